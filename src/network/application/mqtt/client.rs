//! MQTT 3.1.1 client implementation for embedded systems.
//!
//! [`MqttClient`] opens its connection through a [`Connect`] implementation
//! on every [`MqttTransport::connect`] and keeps it until the broker or the
//! caller closes it. Incoming bytes are buffered until a whole control packet
//! is available, so transports delivering partial reads are fine.
//!
//! # Supported packets
//!
//! - CONNECT with user name, password and keep-alive; CONNACK
//! - PUBLISH in both directions for QoS 0 and 1, PUBACK for inbound QoS 1
//! - SUBSCRIBE/SUBACK and UNSUBSCRIBE/UNSUBACK with a single topic filter
//! - PINGREQ once the keep-alive interval elapsed without outbound traffic
//! - DISCONNECT
//!
//! # Examples
//!
//! ```rust,no_run
//! use tuyalink::network::application::mqtt::client::MqttClient;
//! use tuyalink::network::application::mqtt::{ConnectOptions, MqttTransport, QoS};
//! use tuyalink::network::Connect;
//! use tuyalink::system::System;
//!
//! fn run<N: Connect, S: System>(network: N, system: S) {
//!     let mut client = MqttClient::new(network, system);
//!     let options = ConnectOptions {
//!         host: "broker.local",
//!         port: 1883,
//!         ca_cert: None,
//!         client_id: "sensor_device_01",
//!         username: "user",
//!         password: "pass",
//!         keep_alive_seconds: 60,
//!         timeout_ms: 2000,
//!         clean_session: true,
//!     };
//!     if client.connect(&options).is_ok() {
//!         let _ = client.publish("sensors/temperature", b"23.5", QoS::AtMostOnce);
//!     }
//! }
//! ```

use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use super::{ConnectOptions, Incoming, MqttTransport, QoS};
use crate::network::error::Error;
use crate::network::{Close, Connect, Read, Write, write_all};
use crate::system::System;

// MQTT Control Packet types - these are the fixed header packet type values
const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;
const PUBACK: u8 = 0x40;
const SUBSCRIBE: u8 = 0x82;
const SUBACK: u8 = 0x90;
const UNSUBSCRIBE: u8 = 0xA2;
const UNSUBACK: u8 = 0xB0;
const PINGREQ: u8 = 0xC0;
const PINGRESP: u8 = 0xD0;
const DISCONNECT: u8 = 0xE0;

/// MQTT protocol name as defined in the specification.
const PROTOCOL_NAME: &[u8] = b"MQTT";
/// MQTT protocol level for version 3.1.1.
const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

/// CONNACK return code for "not authorized".
const CONNACK_NOT_AUTHORIZED: u8 = 5;

/// Largest value the remaining length field can carry.
const MAX_REMAINING_LENGTH: usize = 268_435_455;

const READ_CHUNK: usize = 512;

/// An MQTT 3.1.1 client over any [`Connect`].
pub struct MqttClient<N: Connect, S: System> {
    network: N,
    system: S,
    connection: Option<N::Connection>,
    next_packet_id: u16,
    keep_alive_ms: u64,
    last_tx_ms: u64,
    rx: Vec<u8>,
    pending: VecDeque<Incoming>,
}

impl<N: Connect, S: System> MqttClient<N, S> {
    /// Creates a disconnected client.
    pub fn new(network: N, system: S) -> Self {
        Self {
            network,
            system,
            connection: None,
            next_packet_id: 0,
            keep_alive_ms: 0,
            last_tx_ms: 0,
            rx: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Whether a broker connection is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn packet_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        self.next_packet_id
    }

    fn send(&mut self, header: u8, body: &[u8]) -> Result<(), Error> {
        let connection = self.connection.as_mut().ok_or(Error::NotOpen)?;
        let mut packet = Vec::with_capacity(body.len() + 5);
        packet.push(header);
        encode_remaining_length(&mut packet, body.len())?;
        packet.extend_from_slice(body);
        write_all(connection, &packet)?;
        connection.flush()?;
        self.last_tx_ms = self.system.now_ms();
        Ok(())
    }

    fn drop_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.close();
        }
        self.rx.clear();
    }

    /// Reads until one whole packet is buffered; returns it as
    /// `(fixed header byte, body)`.
    fn read_packet(&mut self) -> Result<Option<(u8, Vec<u8>)>, Error> {
        loop {
            if let Some((header_len, body_len)) = decode_remaining_length(&self.rx)? {
                let end = header_len + body_len;
                if self.rx.len() >= end {
                    let header = self.rx[0];
                    let body = self.rx[header_len..end].to_vec();
                    self.rx.drain(..end);
                    return Ok(Some((header, body)));
                }
            }

            let connection = match self.connection.as_mut() {
                Some(c) => c,
                None => return Ok(None),
            };
            let mut chunk = [0u8; READ_CHUNK];
            match connection.read(&mut chunk) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(Error::Timeout) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_packet(&mut self, header: u8, body: &[u8]) -> Result<Option<Incoming>, Error> {
        match header & 0xF0 {
            PUBLISH => {
                let qos = (header >> 1) & 0x03;
                if body.len() < 2 {
                    return Err(Error::ProtocolError);
                }
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let mut offset = 2 + topic_len;
                if body.len() < offset {
                    return Err(Error::ProtocolError);
                }
                let topic = core::str::from_utf8(&body[2..offset])
                    .map_err(|_| Error::ProtocolError)?;
                let topic = String::from(topic);
                let mut msgid = 0;
                if qos > 0 {
                    if body.len() < offset + 2 {
                        return Err(Error::ProtocolError);
                    }
                    msgid = u16::from_be_bytes([body[offset], body[offset + 1]]);
                    offset += 2;
                }
                if qos == 1 {
                    self.send(PUBACK, &msgid.to_be_bytes())?;
                }
                Ok(Some(Incoming::Message {
                    msgid,
                    topic,
                    payload: body[offset..].to_vec(),
                }))
            }
            PUBACK => Ok(Some(Incoming::Published(packet_id_of(body)?))),
            SUBACK => Ok(Some(Incoming::Subscribed(packet_id_of(body)?))),
            UNSUBACK => Ok(Some(Incoming::Unsubscribed(packet_id_of(body)?))),
            PINGRESP => Ok(None),
            _ => {
                debug!("mqtt: ignoring packet type {}", header);
                Ok(None)
            }
        }
    }

    fn keep_alive(&mut self) -> Result<(), Error> {
        if self.keep_alive_ms == 0 {
            return Ok(());
        }
        let now = self.system.now_ms();
        if now.saturating_sub(self.last_tx_ms) >= self.keep_alive_ms {
            self.send(PINGREQ, &[])?;
        }
        Ok(())
    }
}

impl<N: Connect, S: System> MqttTransport for MqttClient<N, S> {
    fn connect(&mut self, options: &ConnectOptions<'_>) -> Result<(), Error> {
        self.drop_connection();
        self.pending.clear();

        let remote = format!("{}:{}", options.host, options.port);
        let connection = self
            .network
            .connect(&remote, options.ca_cert, options.timeout_ms)?;
        self.connection = Some(connection);

        // --- Variable Header ---
        let mut body = Vec::new();
        body.extend_from_slice(&(PROTOCOL_NAME.len() as u16).to_be_bytes());
        body.extend_from_slice(PROTOCOL_NAME);
        body.push(PROTOCOL_LEVEL);

        let mut connect_flags = 0;
        if options.clean_session {
            connect_flags |= 0x02;
        }
        if !options.username.is_empty() {
            connect_flags |= 0x80;
        }
        if !options.password.is_empty() {
            connect_flags |= 0x40;
        }
        body.push(connect_flags);
        body.extend_from_slice(&options.keep_alive_seconds.to_be_bytes());

        // --- Payload ---
        put_str(&mut body, options.client_id)?;
        if !options.username.is_empty() {
            put_str(&mut body, options.username)?;
        }
        if !options.password.is_empty() {
            put_str(&mut body, options.password)?;
        }

        if let Err(e) = self.send(CONNECT, &body) {
            self.drop_connection();
            return Err(e);
        }

        let connack = match self.read_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                self.drop_connection();
                return Err(Error::Timeout);
            }
            Err(e) => {
                self.drop_connection();
                return Err(e);
            }
        };

        let result = match connack {
            (CONNACK, body) if body.len() == 2 => match body[1] {
                0 => Ok(()),
                CONNACK_NOT_AUTHORIZED => Err(Error::NotAuthorized),
                1..=4 => Err(Error::ConnectionRefused),
                _ => Err(Error::ProtocolError),
            },
            _ => Err(Error::ProtocolError),
        };
        match result {
            Ok(()) => {
                self.keep_alive_ms = u64::from(options.keep_alive_seconds) * 1000;
                self.pending.push_back(Incoming::Connected);
                info!("mqtt: connected to {}", remote.as_str());
                Ok(())
            }
            Err(e) => {
                self.drop_connection();
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        if self.connection.is_none() {
            return Ok(());
        }
        let sent = self.send(DISCONNECT, &[]);
        self.drop_connection();
        self.pending.clear();
        sent
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Error> {
        let packet_id = self.packet_id();
        let mut body = Vec::with_capacity(topic.len() + 5);
        body.extend_from_slice(&packet_id.to_be_bytes());
        put_str(&mut body, topic)?;
        body.push(qos as u8);
        self.send(SUBSCRIBE, &body)?;
        Ok(packet_id)
    }

    fn unsubscribe(&mut self, topic: &str, _qos: QoS) -> Result<u16, Error> {
        let packet_id = self.packet_id();
        let mut body = Vec::with_capacity(topic.len() + 4);
        body.extend_from_slice(&packet_id.to_be_bytes());
        put_str(&mut body, topic)?;
        self.send(UNSUBSCRIBE, &body)?;
        Ok(packet_id)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<u16, Error> {
        let mut body = Vec::with_capacity(topic.len() + payload.len() + 4);
        put_str(&mut body, topic)?;

        let mut header = PUBLISH;
        let mut packet_id = 0;
        if qos != QoS::AtMostOnce {
            header |= (qos as u8) << 1;
            packet_id = self.packet_id();
            body.extend_from_slice(&packet_id.to_be_bytes());
        }
        body.extend_from_slice(payload);
        self.send(header, &body)?;
        Ok(packet_id)
    }

    fn poll(&mut self) -> Result<Option<Incoming>, Error> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.connection.is_none() {
            return Ok(None);
        }

        let result = self.keep_alive().and_then(|_| loop {
            match self.read_packet()? {
                Some((header, body)) => {
                    if let Some(event) = self.handle_packet(header, &body)? {
                        break Ok(Some(event));
                    }
                }
                None => break Ok(None),
            }
        });

        match result {
            Ok(event) => Ok(event),
            Err(e) => {
                warn!("mqtt: connection lost: {}", e);
                self.drop_connection();
                Ok(Some(Incoming::Disconnected))
            }
        }
    }
}

fn packet_id_of(body: &[u8]) -> Result<u16, Error> {
    if body.len() < 2 {
        return Err(Error::ProtocolError);
    }
    Ok(u16::from_be_bytes([body[0], body[1]]))
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<(), Error> {
    let len = u16::try_from(s.len()).map_err(|_| Error::BufferTooSmall)?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Encode the remaining length field for an MQTT packet.
///
/// The encoding uses up to 4 bytes where each byte encodes 7 bits of the length
/// value. The most significant bit indicates if another byte follows.
fn encode_remaining_length(buf: &mut Vec<u8>, mut len: usize) -> Result<(), Error> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::BufferTooSmall);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if len == 0 {
            break;
        }
    }
    Ok(())
}

/// Decodes the fixed header at the start of `buf`.
///
/// Returns `(header length, remaining length)` or `None` when more bytes are
/// needed.
fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let mut len = 0usize;
    let mut multiplier = 1usize;
    for i in 1..5 {
        let Some(&byte) = buf.get(i) else {
            return Ok(None);
        };
        len += (byte as usize & 127) * multiplier;
        multiplier *= 128;
        if byte & 0x80 == 0 {
            return Ok(Some((i + 1, len)));
        }
    }
    Err(Error::ProtocolError)
}
