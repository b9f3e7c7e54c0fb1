//! Service-level error type.
//!
//! Lower layers keep their own small error enums ([`network::error::Error`],
//! [`storage::error::Error`]); everything above them (session manager,
//! correlator, lifecycle) reports this one.
//!
//! [`network::error::Error`]: crate::network::error::Error
//! [`storage::error::Error`]: crate::storage::error::Error

use crate::network;
use crate::storage;

/// Errors returned by the cloud service layer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// A required argument was missing, empty or too long.
    InvalidParam,
    /// Generic communication failure (broker call, duplicate registration).
    Com,
    /// No answer before the deadline.
    Timeout,
    /// The broker rejected the device credentials.
    AuthenticationFail,
    /// The MQTT session is not connected.
    NotConnected,
    /// A payload could not be parsed as JSON.
    JsonParse,
    /// A JSON document lacked a required field or had the wrong type.
    JsonField,
    /// A protocol frame had the wrong version or a dirty reserve byte.
    VersionFormat,
    /// The crypto service failed to seal or open a frame.
    Crypto,
    /// A blocking wait was aborted.
    Canceled,
    /// An HTTP exchange completed with a non-success status code.
    Http(u16),
    /// The key/value store failed.
    Storage(storage::error::Error),
    /// The transport failed.
    Network(network::error::Error),
}

impl From<storage::error::Error> for Error {
    fn from(err: storage::error::Error) -> Self {
        Error::Storage(err)
    }
}

impl From<network::error::Error> for Error {
    fn from(err: network::error::Error) -> Self {
        match err {
            network::error::Error::NotAuthorized => Error::AuthenticationFail,
            other => Error::Network(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Error::JsonParse
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidParam => f.write_str("invalid parameter"),
            Error::Com => f.write_str("communication error"),
            Error::Timeout => f.write_str("timeout"),
            Error::AuthenticationFail => f.write_str("authentication failed"),
            Error::NotConnected => f.write_str("not connected"),
            Error::JsonParse => f.write_str("json parse error"),
            Error::JsonField => f.write_str("json field missing"),
            Error::VersionFormat => f.write_str("protocol version format error"),
            Error::Crypto => f.write_str("crypto error"),
            Error::Canceled => f.write_str("canceled"),
            Error::Http(status) => write!(f, "http status {}", status),
            Error::Storage(err) => write!(f, "storage: {}", err),
            Error::Network(err) => write!(f, "network: {}", err),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::InvalidParam => defmt::write!(f, "InvalidParam"),
            Error::Com => defmt::write!(f, "Com"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::AuthenticationFail => defmt::write!(f, "AuthenticationFail"),
            Error::NotConnected => defmt::write!(f, "NotConnected"),
            Error::JsonParse => defmt::write!(f, "JsonParse"),
            Error::JsonField => defmt::write!(f, "JsonField"),
            Error::VersionFormat => defmt::write!(f, "VersionFormat"),
            Error::Crypto => defmt::write!(f, "Crypto"),
            Error::Canceled => defmt::write!(f, "Canceled"),
            Error::Http(status) => defmt::write!(f, "Http({})", status),
            Error::Storage(err) => defmt::write!(f, "Storage({})", err),
            Error::Network(err) => defmt::write!(f, "Network({})", err),
        }
    }
}
