//! Common error types for storage operations

/// Errors reported by a [`KvStore`](super::KvStore).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The key has no stored value.
    NotFound,
    /// An error occurred during a read operation.
    ReadError,
    /// An error occurred during a write or delete operation.
    WriteError,
    /// The key is empty or otherwise unusable by the backend.
    InvalidKey,
    /// The underlying storage is bad/unusable.
    StorageFault,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Error::NotFound => "key not found",
            Error::ReadError => "read failed",
            Error::WriteError => "write failed",
            Error::InvalidKey => "invalid key",
            Error::StorageFault => "storage fault",
        };
        f.write_str(text)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::NotFound => defmt::write!(f, "NotFound"),
            Error::ReadError => defmt::write!(f, "ReadError"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::InvalidKey => defmt::write!(f, "InvalidKey"),
            Error::StorageFault => defmt::write!(f, "StorageFault"),
        }
    }
}
