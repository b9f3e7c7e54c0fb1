//! Tuya protocol ids and the protocol 2.3 frame.
//!
//! Every message on the device's default topics is a JSON document
//! `{"protocol":<id>,"t":<unix seconds>,"data":<payload>}` sealed with
//! AES-128-GCM:
//!
//! ```text
//! offset  size  field
//! 0       3     "2.3"
//! 3       4     sequence number, big endian
//! 7       4     cmd_from, big endian (always 1 when sent by a device)
//! 11      1     reserved, zero
//! 12      12    nonce
//! 24      n     ciphertext
//! 24+n    16    GCM tag
//! ```
//!
//! The first 12 bytes are the associated data.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::Error;
use crate::system::{Crypto, System};

/// Data point report.
pub const DATA_PUSH: u16 = 4;
/// Data point command.
pub const CMD: u16 = 5;
/// Device unbind.
pub const DEV_UNBIND: u16 = 8;
/// Gateway reset.
pub const GW_RESET: u16 = 11;
/// Timer update notification.
pub const TIMER_UG_INF: u16 = 13;
/// Firmware upgrade request.
pub const UPGD_REQ: u16 = 15;
/// Firmware upgrade progress push.
pub const UPGE_PUSH: u16 = 16;
/// Device data request.
pub const IOT_DA_REQ: u16 = 22;
/// Device data response.
pub const IOT_DA_RESP: u16 = 23;
/// Binding token delivered over the pre-activation session.
pub const MQ_ACTIVE_TOKEN_ON: u16 = 46;
/// Cached data point notification.
pub const MQ_DPCACHE_NOTIFY: u16 = 103;

const VERSION: &[u8; 3] = b"2.3";
const CMD_FROM_DEVICE: u32 = 1;

const SEQ_OFFSET: usize = 3;
const CMD_FROM_OFFSET: usize = SEQ_OFFSET + 4;
const RESERVE_OFFSET: usize = CMD_FROM_OFFSET + 4;
const NONCE_OFFSET: usize = RESERVE_OFFSET + 1;
const NONCE_LEN: usize = 12;
const DATA_OFFSET: usize = NONCE_OFFSET + NONCE_LEN;
const TAG_LEN: usize = 16;
const AAD_LEN: usize = 12;

/// Smallest well-formed frame: header, nonce and tag around an empty body.
pub const MIN_FRAME_LEN: usize = AAD_LEN + NONCE_LEN + TAG_LEN;

const NONCE_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unpacked {
    /// Sender sequence number.
    pub sequence: u32,
    /// Sender role.
    pub cmd_from: u32,
    /// Decrypted JSON document.
    pub plaintext: Vec<u8>,
}

/// `value` as a JSON string literal, quotes included.
pub fn json_quote(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// Draws a printable nonce from the platform RNG.
pub fn random_nonce<S: System>(system: &S) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    for byte in nonce.iter_mut() {
        *byte = NONCE_ALPHABET[system.random() as usize % NONCE_ALPHABET.len()];
    }
    nonce
}

/// Seals `data` (a JSON value) as a protocol `protocol` message.
pub fn pack<C: Crypto + ?Sized>(
    crypto: &C,
    key: &[u8; 16],
    nonce: &[u8; NONCE_LEN],
    sequence: u32,
    protocol: u16,
    timestamp: u32,
    data: &str,
) -> Result<Vec<u8>, Error> {
    let plain = format!("{{\"protocol\":{},\"t\":{},\"data\":{}}}", protocol, timestamp, data);
    trace!("pack protocol {} seq {}", protocol, sequence);

    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + plain.len());
    frame.extend_from_slice(VERSION);
    frame.extend_from_slice(&sequence.to_be_bytes());
    frame.extend_from_slice(&CMD_FROM_DEVICE.to_be_bytes());
    frame.push(0);
    frame.extend_from_slice(nonce);

    let (cipher, tag) = crypto.aes128_gcm_encrypt(key, nonce, &frame[..AAD_LEN], plain.as_bytes())?;
    frame.extend_from_slice(&cipher);
    frame.extend_from_slice(&tag);
    Ok(frame)
}

/// Verifies and decrypts a frame.
pub fn unpack<C: Crypto + ?Sized>(crypto: &C, key: &[u8; 16], frame: &[u8]) -> Result<Unpacked, Error> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(Error::InvalidParam);
    }
    if &frame[..SEQ_OFFSET] != VERSION {
        error!("frame version is not 2.3");
        return Err(Error::VersionFormat);
    }
    if frame[RESERVE_OFFSET] != 0 {
        error!("frame reserve field is not zero");
        return Err(Error::VersionFormat);
    }

    let sequence = be_u32(&frame[SEQ_OFFSET..CMD_FROM_OFFSET]);
    let cmd_from = be_u32(&frame[CMD_FROM_OFFSET..RESERVE_OFFSET]);

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&frame[NONCE_OFFSET..DATA_OFFSET]);
    let tag_start = frame.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&frame[tag_start..]);

    let plaintext = crypto.aes128_gcm_decrypt(
        key,
        &nonce,
        &frame[..AAD_LEN],
        &frame[DATA_OFFSET..tag_start],
        &tag,
    )?;
    Ok(Unpacked {
        sequence,
        cmd_from,
        plaintext,
    })
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_be_bytes(raw)
}

/// Copies `key` into a 16 byte cipher key, zero padding short keys.
pub fn cipher_key(key: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    let n = key.len().min(16);
    out[..n].copy_from_slice(&key[..n]);
    out
}
