//! MQTT transport abstraction.
//!
//! The session manager in [`crate::service::mqtt`] drives an
//! [`MqttTransport`]: a connect/subscribe/publish primitive that reports
//! broker traffic as a stream of [`Incoming`] events pulled with
//! [`MqttTransport::poll`]. [`client::MqttClient`] implements it on top of any
//! [`Connect`](crate::network::Connect) using MQTT 3.1.1; platforms with a
//! native MQTT stack implement the trait directly.
//!
//! ```rust,no_run
//! use tuyalink::network::application::mqtt::{ConnectOptions, MqttTransport, QoS};
//!
//! fn hello<T: MqttTransport>(transport: &mut T) -> Result<(), tuyalink::network::error::Error> {
//!     let options = ConnectOptions {
//!         host: "m1.tuyaeu.com",
//!         port: 8883,
//!         ca_cert: None,
//!         client_id: "device",
//!         username: "device",
//!         password: "secret",
//!         keep_alive_seconds: 120,
//!         timeout_ms: 2000,
//!         clean_session: true,
//!     };
//!     transport.connect(&options)?;
//!     transport.subscribe("smart/device/in/device", QoS::AtLeastOnce)?;
//!     while let Some(event) = transport.poll()? {
//!         let _ = event;
//!     }
//!     Ok(())
//! }
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use crate::network::error::Error;

/// MQTT 3.1.1 client implementing [`MqttTransport`].
pub mod client;

/// Quality of Service levels for MQTT messages.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce = 0,
    /// At least once delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

/// Parameters of a broker connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions<'a> {
    /// Broker host name.
    pub host: &'a str,
    /// Broker port.
    pub port: u16,
    /// DER encoded CA certificate; `None` for a plain TCP connection.
    pub ca_cert: Option<&'a [u8]>,
    /// The client identifier.
    pub client_id: &'a str,
    /// User name presented in CONNECT.
    pub username: &'a str,
    /// Password presented in CONNECT.
    pub password: &'a str,
    /// The keep-alive time in seconds.
    pub keep_alive_seconds: u16,
    /// How long a single receive may block, in milliseconds.
    pub timeout_ms: u32,
    /// Whether to start a clean session.
    pub clean_session: bool,
}

/// Broker traffic surfaced by [`MqttTransport::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// The broker accepted the connection.
    Connected,
    /// The connection dropped.
    Disconnected,
    /// An application message arrived.
    Message {
        /// Packet identifier (0 for QoS 0).
        msgid: u16,
        /// Topic name.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
    },
    /// SUBACK for the given packet identifier.
    Subscribed(u16),
    /// UNSUBACK for the given packet identifier.
    Unsubscribed(u16),
    /// PUBACK for the given packet identifier.
    Published(u16),
}

/// An MQTT client primitive.
pub trait MqttTransport {
    /// Opens the broker connection.
    ///
    /// Returns [`Error::NotAuthorized`] when the broker rejects the
    /// credentials.
    fn connect(&mut self, options: &ConnectOptions<'_>) -> Result<(), Error>;

    /// Closes the broker connection.
    fn disconnect(&mut self) -> Result<(), Error>;

    /// Sends SUBSCRIBE and returns its packet identifier.
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Error>;

    /// Sends UNSUBSCRIBE and returns its packet identifier.
    fn unsubscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Error>;

    /// Sends PUBLISH and returns its packet identifier (0 for QoS 0).
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<u16, Error>;

    /// Drives the connection and returns the next pending event, if any.
    fn poll(&mut self) -> Result<Option<Incoming>, Error>;
}
