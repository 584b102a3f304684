//! Pure health monitoring and reconnection logic for the MQTT session
//!
//! This module contains pure functions for reconnection decision making and
//! connection state tracking.

use super::connection::{ConnectionState, ReconnectConfig};
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    ///
    /// Retries are unlimited while auto-reconnect is enabled.
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        auto_reconnect: bool,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if !auto_reconnect {
            return ReconnectionDecision::AbortDisabled;
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(event: &ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnectStarted => ConnectionState::Connecting,
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::LinkLost(reason) => ConnectionState::ConnectionLost(reason.clone()),
            ConnectionEvent::ReconnectionStarted(attempt) => ConnectionState::Reconnecting(*attempt),
            ConnectionEvent::ConnectFailed(_) | ConnectionEvent::Closed => {
                ConnectionState::Disconnected
            }
        }
    }

    /// Check if connection state allows publish/subscribe requests (pure function)
    pub fn can_issue_requests(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established successfully");
            }
            (ConnectionState::Reconnecting(attempt), ConnectionState::Connected) => {
                info!(attempt, "Reconnection successful");
            }
            (_, ConnectionState::ConnectionLost(reason)) => {
                warn!(reason = %reason, "MQTT connection lost");
            }
            (ConnectionState::Connecting, ConnectionState::Disconnected) => {
                error!("MQTT connection attempt failed");
            }
            (_, ConnectionState::Reconnecting(attempt)) => {
                info!(attempt, "Starting reconnection attempt");
            }
            _ => {
                info!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - automatic reconnect disabled
    AbortDisabled,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Initial handshake started
    ConnectStarted,
    /// ConnAck received from broker
    ConnAckReceived,
    /// Established link dropped
    LinkLost(String),
    /// Reconnection attempt started
    ReconnectionStarted(u32),
    /// Initial handshake failed
    ConnectFailed(String),
    /// Session closed by the client
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_attempt_reconnection() {
        let config = ReconnectConfig::default();

        let decision = HealthMonitor::should_attempt_reconnection(0, &config, true, false);
        assert_eq!(
            decision,
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay_ms: 25
            }
        );

        let decision = HealthMonitor::should_attempt_reconnection(7, &config, true, false);
        assert_eq!(
            decision,
            ReconnectionDecision::Proceed {
                attempt: 8,
                delay_ms: 250
            }
        );
    }

    #[test]
    fn test_should_not_reconnect_on_shutdown() {
        let config = ReconnectConfig::default();
        let decision = HealthMonitor::should_attempt_reconnection(0, &config, true, true);
        assert_eq!(decision, ReconnectionDecision::AbortShutdownRequested);
    }

    #[test]
    fn test_should_not_reconnect_when_disabled() {
        let config = ReconnectConfig::default();
        let decision = HealthMonitor::should_attempt_reconnection(0, &config, false, false);
        assert_eq!(decision, ReconnectionDecision::AbortDisabled);
    }

    #[test]
    fn test_determine_next_state() {
        assert_eq!(
            HealthMonitor::determine_next_state(&ConnectionEvent::ConnAckReceived),
            ConnectionState::Connected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(&ConnectionEvent::LinkLost("eof".to_string())),
            ConnectionState::ConnectionLost("eof".to_string())
        );
        assert_eq!(
            HealthMonitor::determine_next_state(&ConnectionEvent::ReconnectionStarted(3)),
            ConnectionState::Reconnecting(3)
        );
        assert_eq!(
            HealthMonitor::determine_next_state(&ConnectionEvent::Closed),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_can_issue_requests() {
        assert!(HealthMonitor::can_issue_requests(&ConnectionState::Connected));
        assert!(!HealthMonitor::can_issue_requests(&ConnectionState::Disconnected));
        assert!(!HealthMonitor::can_issue_requests(&ConnectionState::Reconnecting(1)));
        assert!(!HealthMonitor::can_issue_requests(&ConnectionState::Connecting));
    }
}
