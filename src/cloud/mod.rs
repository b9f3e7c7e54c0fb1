//! Cloud side collaborators reached over HTTPS.
//!
//! - [`endpoint`]: the region specific ATOP and MQTT addresses plus the CA
//!   certificate, and their persistence.
//! - [`iotdns`]: the lookup service that hands out those addresses.
//! - [`atop`]: the signed request/response API used for activation and
//!   device bookkeeping.

pub mod atop;
pub mod endpoint;
pub mod iotdns;
