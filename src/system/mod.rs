//! Platform services.
//!
//! The state machines in this crate are platform agnostic. Everything that
//! touches the clock, the scheduler, the entropy source or the crypto engine
//! goes through the two traits defined here:
//!
//! - **[`System`]**: monotonic milliseconds, wall-clock seconds, blocking
//!   sleep and random numbers
//! - **[`Crypto`]**: MD5 and AES-128-GCM, usually backed by a hardware
//!   accelerator or mbedTLS
//!
//! [`backoff`] holds the jittered exponential delay used between MQTT
//! connect attempts.
//!
//! ```rust
//! use tuyalink::system::System;
//!
//! #[derive(Clone)]
//! struct Host;
//!
//! impl System for Host {
//!     fn now_ms(&self) -> u64 { 0 }
//!     fn timestamp(&self) -> u32 { 1_700_000_000 }
//!     fn sleep_ms(&self, _ms: u32) {}
//!     fn random(&self) -> u32 { 4 }
//! }
//!
//! assert_eq!(Host.timestamp(), 1_700_000_000);
//! ```

use alloc::vec::Vec;

use crate::error::Error;

/// Jittered exponential backoff.
pub mod backoff;

/// Clock, scheduler and entropy.
pub trait System: Clone {
    /// Monotonic milliseconds since an arbitrary origin.
    fn now_ms(&self) -> u64;

    /// Wall-clock time in seconds since the Unix epoch.
    fn timestamp(&self) -> u32;

    /// Blocks the calling task for `ms` milliseconds.
    fn sleep_ms(&self, ms: u32);

    /// A random 32-bit value.
    fn random(&self) -> u32;
}

/// Digest and cipher primitives.
pub trait Crypto {
    /// MD5 digest of `data`.
    fn md5(&self, data: &[u8]) -> [u8; 16];

    /// AES-128-GCM encryption. Returns the ciphertext and the 16 byte tag.
    fn aes128_gcm_encrypt(
        &self,
        key: &[u8; 16],
        nonce: &[u8; 12],
        aad: &[u8],
        plain: &[u8],
    ) -> Result<(Vec<u8>, [u8; 16]), Error>;

    /// AES-128-GCM decryption with tag verification.
    fn aes128_gcm_decrypt(
        &self,
        key: &[u8; 16],
        nonce: &[u8; 12],
        aad: &[u8],
        cipher: &[u8],
        tag: &[u8; 16],
    ) -> Result<Vec<u8>, Error>;
}
