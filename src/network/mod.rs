//! A network abstraction layer for embedded systems
//!
//! The cloud services in this crate never open sockets themselves. They talk
//! to a [`Connect`] implementation supplied by the platform (usually a TLS
//! socket factory) and to the application protocol clients built on it in
//! [`application`].
//!

#![allow(missing_docs)]
#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Application layer protocols (MQTT, HTTP)
pub mod application;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Connect, Connection, Read, Write};
}

// Core synchronous traits
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read data from the connection.
    ///
    /// Implementations return `Ok(0)` when the peer closed the stream and
    /// map a receive timeout to [`error::Error::Timeout`].
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection
pub trait Connection:
    Read<Error = error::Error> + Write<Error = error::Error> + Close<Error = error::Error>
{
}

/// A synchronous connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Open a connection to `remote` (`host:port`).
    ///
    /// When `ca_cert` is given the connection must be TLS, verified against
    /// that DER encoded certificate.
    fn connect(
        &mut self,
        remote: &str,
        ca_cert: Option<&[u8]>,
        timeout_ms: u32,
    ) -> Result<Self::Connection, error::Error>;
}

/// Writes the whole buffer, retrying short writes.
pub(crate) fn write_all<W: Write<Error = error::Error>>(
    conn: &mut W,
    mut buf: &[u8],
) -> Result<(), error::Error> {
    while !buf.is_empty() {
        match conn.write(buf)? {
            0 => return Err(error::Error::WriteError),
            n => buf = &buf[n..],
        }
    }
    Ok(())
}
