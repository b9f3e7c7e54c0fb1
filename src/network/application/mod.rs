//! # Application Layer Network Protocols
//!
//! The two protocol primitives the cloud services consume:
//!
//! - **[`mqtt`]**: the MQTT transport trait plus an MQTT 3.1.1 client
//!   implementing it over any [`Connect`](crate::network::Connect)
//! - **[`http`]**: a single blocking request/response primitive plus an
//!   HTTP/1.1 client implementing it
//!
//! Both are traits first so the lifecycle code can run against scripted
//! stubs in tests and against vendor stacks on real hardware.

/// HTTP request primitive and HTTP/1.1 client.
pub mod http;

/// MQTT transport abstraction and MQTT 3.1.1 client.
pub mod mqtt;
