//! Minimal MQTT v5 broker stand-in for session tests
//!
//! Speaks just enough of the protocol over a local `TcpListener` to let a
//! real rumqttc session connect, subscribe, publish and disconnect, while the
//! test decides when acks are sent and when the link drops.
#![allow(dead_code)]

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const CONNECT: u8 = 1;
pub const PUBLISH: u8 = 3;
pub const SUBSCRIBE: u8 = 8;
pub const UNSUBSCRIBE: u8 = 10;
pub const PINGREQ: u8 = 12;
pub const DISCONNECT: u8 = 14;

/// PubAck reason code for a publish the broker refuses
pub const NOT_AUTHORIZED: u8 = 0x87;

/// One control packet read off the wire
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub kind: u8,
    pub flags: u8,
    pub body: Vec<u8>,
}

impl RawPacket {
    /// Packet id of a SUBSCRIBE or UNSUBSCRIBE
    pub fn packet_id(&self) -> u16 {
        u16::from_be_bytes([self.body[0], self.body[1]])
    }

    /// Packet id and payload of a QoS 1 or 2 PUBLISH
    pub fn publish_parts(&self) -> (u16, Vec<u8>) {
        let topic_len = u16::from_be_bytes([self.body[0], self.body[1]]) as usize;
        let mut at = 2 + topic_len;
        let packet_id = u16::from_be_bytes([self.body[at], self.body[at + 1]]);
        at += 2;
        let (properties_len, used) = decode_length(&self.body[at..]);
        at += used + properties_len;
        (packet_id, self.body[at..].to_vec())
    }

    /// First topic filter of a SUBSCRIBE
    pub fn subscribe_topic(&self) -> String {
        let (properties_len, used) = decode_length(&self.body[2..]);
        let at = 2 + used + properties_len;
        let topic_len = u16::from_be_bytes([self.body[at], self.body[at + 1]]) as usize;
        String::from_utf8_lossy(&self.body[at + 2..at + 2 + topic_len]).to_string()
    }
}

fn decode_length(bytes: &[u8]) -> (usize, usize) {
    let mut value = 0usize;
    for (i, byte) in bytes.iter().enumerate().take(4) {
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return (value, i + 1);
        }
    }
    (value, 4)
}

fn encode_length(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Bind a listener on an ephemeral local port
pub async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake broker");
    let port = listener.local_addr().expect("local addr").port();
    (listener, format!("mqtt://127.0.0.1:{port}"))
}

/// Read one packet; `None` once the client closed the socket
pub async fn read_packet(stream: &mut TcpStream) -> Option<RawPacket> {
    let first = stream.read_u8().await.ok()?;
    let mut len = 0usize;
    for shift in 0..4 {
        let byte = stream.read_u8().await.ok()?;
        len |= ((byte & 0x7f) as usize) << (7 * shift);
        if byte & 0x80 == 0 {
            break;
        }
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await.ok()?;
    Some(RawPacket {
        kind: first >> 4,
        flags: first & 0x0f,
        body,
    })
}

pub async fn send_connack(stream: &mut TcpStream) {
    let _ = stream.write_all(&[0x20, 0x03, 0x00, 0x00, 0x00]).await;
}

pub async fn send_suback(stream: &mut TcpStream, packet_id: u16) {
    let [hi, lo] = packet_id.to_be_bytes();
    let _ = stream.write_all(&[0x90, 0x04, hi, lo, 0x00, 0x01]).await;
}

pub async fn send_unsuback(stream: &mut TcpStream, packet_id: u16) {
    let [hi, lo] = packet_id.to_be_bytes();
    let _ = stream.write_all(&[0xB0, 0x04, hi, lo, 0x00, 0x00]).await;
}

pub fn puback_bytes(packet_id: u16, reason: u8) -> Vec<u8> {
    let [hi, lo] = packet_id.to_be_bytes();
    vec![0x40, 0x03, hi, lo, reason]
}

/// Deliver a QoS 0 message to the client
pub async fn send_publish(stream: &mut TcpStream, topic: &str, payload: &[u8]) {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.push(0x00);
    body.extend_from_slice(payload);

    let mut packet = vec![0x30];
    encode_length(body.len(), &mut packet);
    packet.extend_from_slice(&body);
    let _ = stream.write_all(&packet).await;
}

/// Give the default answer to `packet`, as a permissive broker would
pub async fn answer(stream: &mut TcpStream, packet: &RawPacket) {
    match packet.kind {
        CONNECT => send_connack(stream).await,
        SUBSCRIBE => send_suback(stream, packet.packet_id()).await,
        UNSUBSCRIBE => send_unsuback(stream, packet.packet_id()).await,
        PUBLISH if packet.flags & 0x06 != 0 => {
            let (packet_id, _) = packet.publish_parts();
            let _ = stream.write_all(&puback_bytes(packet_id, 0x00)).await;
        }
        PINGREQ => {
            let _ = stream.write_all(&[0xD0, 0x00]).await;
        }
        _ => {}
    }
}

/// Answer everything until the client closes the socket; returns the packet kinds seen
pub async fn serve(stream: &mut TcpStream) -> Vec<u8> {
    let mut kinds = Vec::new();
    while let Some(packet) = read_packet(stream).await {
        kinds.push(packet.kind);
        answer(stream, &packet).await;
    }
    kinds
}

/// Read packets, answering pings, until one of `kind` arrives
pub async fn expect_packet(stream: &mut TcpStream, kind: u8) -> RawPacket {
    loop {
        let packet = read_packet(stream)
            .await
            .unwrap_or_else(|| panic!("link closed while waiting for packet type {kind}"));
        if packet.kind == kind {
            return packet;
        }
        answer(stream, &packet).await;
    }
}

/// Accept a connection and complete the CONNECT handshake
pub async fn accept(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.expect("accept client");
    expect_packet(&mut stream, CONNECT).await;
    send_connack(&mut stream).await;
    stream
}

/// Keep accepting and serving further connections in the background
pub fn serve_remaining(listener: TcpListener) {
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                serve(&mut stream).await;
            });
        }
    });
}
