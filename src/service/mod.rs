//! Services running on top of the MQTT transport.
//!
//! - [`signature`]: derives the broker credentials, topics and frame key
//!   of a device identity.
//! - [`mqtt`]: the session manager.
//! - [`matop`]: request/response correlation over the session.

pub mod matop;
pub mod mqtt;
pub mod signature;
