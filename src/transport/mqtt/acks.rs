//! Acknowledgment correlation for in-flight MQTT requests
//!
//! rumqttc assigns packet ids inside its event loop, so a request cannot know
//! its id when it is queued. Requests are queued here in submission order; the
//! event loop binds the oldest queued waiter to the packet id reported by the
//! matching `Outgoing` event and later resolves it from the broker's ack.
//!
//! When the link drops every waiter fails, but rumqttc keeps the requests: it
//! writes unacknowledged publishes again under their old packet ids and sends
//! requests that were still queued once the link is back. Those writes belong
//! to waiters that no longer exist, so the tracker remembers them as orphaned
//! and skips them when they show up instead of handing them a newer waiter.

use super::connection::TransportError;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::oneshot;

type AckResult = Result<(), TransportError>;

/// Kind of request awaiting a broker acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Default)]
pub struct AckTracker {
    queued: HashMap<AckKind, VecDeque<oneshot::Sender<AckResult>>>,
    in_flight: HashMap<(AckKind, u16), oneshot::Sender<AckResult>>,
    /// Requests still to be written whose waiters already failed
    orphaned: HashMap<AckKind, usize>,
    /// Publish packet ids rumqttc will retransmit for waiters that already failed
    orphaned_publishes: HashSet<u16>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a waiter for the next request of `kind` written by the event loop
    pub fn enqueue(&mut self, kind: AckKind) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        self.queued.entry(kind).or_default().push_back(tx);
        rx
    }

    /// Drop the most recently queued waiter after its request failed to queue
    pub fn cancel_last(&mut self, kind: AckKind) {
        if let Some(queue) = self.queued.get_mut(&kind) {
            queue.pop_back();
        }
    }

    /// Bind the oldest queued waiter of `kind` to `packet_id`
    ///
    /// Packet id 0 is only used by QoS 0 publishes, which the broker never
    /// acknowledges, so those waiters resolve as soon as they are written.
    pub fn bind(&mut self, kind: AckKind, packet_id: u16) {
        if self.in_flight.contains_key(&(kind, packet_id)) {
            // Retransmission of a packet we already track
            return;
        }

        if kind == AckKind::Publish && self.orphaned_publishes.contains(&packet_id) {
            return;
        }

        if let Some(count) = self.orphaned.get_mut(&kind).filter(|count| **count > 0) {
            *count -= 1;
            if kind == AckKind::Publish && packet_id != 0 {
                // Written once more if the link drops before its ack
                self.orphaned_publishes.insert(packet_id);
            }
            return;
        }

        let Some(waiter) = self.queued.get_mut(&kind).and_then(VecDeque::pop_front) else {
            return;
        };

        if packet_id == 0 {
            let _ = waiter.send(Ok(()));
        } else {
            self.in_flight.insert((kind, packet_id), waiter);
        }
    }

    /// Resolve the waiter bound to `packet_id`, if any
    pub fn resolve(&mut self, kind: AckKind, packet_id: u16, result: AckResult) {
        if kind == AckKind::Publish {
            self.orphaned_publishes.remove(&packet_id);
        }
        if let Some(waiter) = self.in_flight.remove(&(kind, packet_id)) {
            let _ = waiter.send(result);
        }
    }

    /// Packet ids of `kind` written to the broker and not yet acknowledged
    pub fn awaiting(&self, kind: AckKind) -> Vec<u16> {
        let mut ids: Vec<u16> = self
            .in_flight
            .keys()
            .filter(|(pending, _)| *pending == kind)
            .map(|(_, packet_id)| *packet_id)
            .collect();
        if kind == AckKind::Publish {
            ids.extend(self.orphaned_publishes.iter().copied());
        }
        ids
    }

    /// Fail every queued and in-flight waiter with `error`
    ///
    /// Queued requests and in-flight publishes are remembered as orphaned
    /// because rumqttc still writes them after the next connect.
    pub fn fail_all(&mut self, error: &TransportError) {
        for (kind, queue) in self.queued.drain() {
            *self.orphaned.entry(kind).or_default() += queue.len();
            for waiter in queue {
                let _ = waiter.send(Err(error.clone()));
            }
        }
        for ((kind, packet_id), waiter) in self.in_flight.drain() {
            if kind == AckKind::Publish {
                self.orphaned_publishes.insert(packet_id);
            }
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// True when no request is waiting for an acknowledgment
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.queued.values().all(VecDeque::is_empty)
    }
}
