//! # Key/value persistence
//!
//! The lifecycle persists a handful of small records: the activation
//! record, the schema, the cached endpoint and the last reported version
//! string. Everything goes through [`KvStore`], a flat string-keyed store
//! the platform maps onto its flash file system or NVS partition.
//!
//! Keys used by this crate:
//!
//! | key | content |
//! |-----|---------|
//! | `<namespace>` | activation record (JSON) |
//! | `<schemaId>` | data point schema (JSON) |
//! | `<namespace>.devid` | device id kept across resets |
//! | `<namespace>.ver` | last reported version string |
//! | `region`, `regist_key` | bind region and environment |
//! | `endpoint.domain`, `endpoint.cert` | cached endpoint |
//!
//! [`MemoryStore`] keeps everything in RAM and is what the tests and host
//! builds use.
//!
//! ```rust
//! use tuyalink::storage::{KvStore, MemoryStore};
//!
//! let mut store = MemoryStore::new();
//! store.set("region", b"EU").unwrap();
//! assert_eq!(store.get("region").unwrap(), b"EU");
//! store.delete("region").unwrap();
//! assert!(store.get("region").is_err());
//! ```

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

/// Common error types for storage operations
pub mod error;


use error::Error;

/// A flat key/value store.
pub trait KvStore {
    /// Reads the value stored under `key`.
    ///
    /// Returns [`Error::NotFound`] when nothing is stored.
    fn get(&mut self, key: &str) -> Result<Vec<u8>, Error>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), Error>;

    /// Removes `key`. Removing a missing key is not an error.
    fn delete(&mut self, key: &str) -> Result<(), Error>;

    /// Reads the value stored under `key` as UTF-8 text.
    fn get_string(&mut self, key: &str) -> Result<String, Error> {
        let raw = self.get(key)?;
        String::from_utf8(raw).map_err(|_| Error::ReadError)
    }

    /// Whether anything is stored under `key`.
    fn contains(&mut self, key: &str) -> bool {
        self.get(key).is_ok()
    }
}

/// A [`KvStore`] held in RAM.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the stored keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl KvStore for MemoryStore {
    fn get(&mut self, key: &str) -> Result<Vec<u8>, Error> {
        self.entries.get(key).cloned().ok_or(Error::NotFound)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }
        self.entries.insert(String::from(key), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }
}

impl<K: KvStore + ?Sized> KvStore for &mut K {
    fn get(&mut self, key: &str) -> Result<Vec<u8>, Error> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &str) -> Result<(), Error> {
        (**self).delete(key)
    }
}
