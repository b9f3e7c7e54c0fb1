//! MQTT access signature.
//!
//! Broker credentials and topics are derived from the device identity. An
//! activated device signs in with its device id and a digest of the session
//! key; a device waiting for its binding token signs in "direct" with its
//! uuid and authkey and only listens.

use core::fmt::Write;

use heapless::String;

use crate::config::{CIPHER_KEY_LENGTH, PROTOCOL_VERSION};
use crate::error::Error;
use crate::protocol::cipher_key;
use crate::system::Crypto;

/// Capacity of the client id, user name and topic fields.
pub const SIGNATURE_FIELD_LENGTH: usize = 64;

type Field = String<SIGNATURE_FIELD_LENGTH>;

/// Identity fields the signature is derived from.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity<'a> {
    /// Device uuid, used before activation.
    pub uuid: Option<&'a str>,
    /// Authorization key paired with the uuid.
    pub authkey: Option<&'a str>,
    /// Device id issued at activation.
    pub devid: Option<&'a str>,
    /// Secret key issued at activation.
    pub seckey: Option<&'a str>,
    /// Frame cipher key issued at activation.
    pub localkey: Option<&'a str>,
}

/// Broker credentials, frame key and topics of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// MQTT client identifier.
    pub clientid: Field,
    /// MQTT user name.
    pub username: Field,
    /// Lowercase hex of bytes 4..12 of an MD5 digest.
    pub password: String<16>,
    /// AES-128 key of the protocol frames.
    pub cipherkey: [u8; CIPHER_KEY_LENGTH],
    /// Default inbound topic.
    pub topic_in: Field,
    /// Default outbound topic; empty for a direct (unactivated) session.
    pub topic_out: Field,
}

impl Signature {
    /// Derives the signature, preferring the activated branch.
    ///
    /// Fails with [`Error::InvalidParam`] when neither devid/seckey/localkey
    /// nor uuid/authkey are all present.
    pub fn derive<C: Crypto + ?Sized>(crypto: &C, identity: &Identity<'_>) -> Result<Self, Error> {
        fn present(value: Option<&str>) -> Option<&str> {
            value.filter(|v| !v.is_empty())
        }

        if let (Some(devid), Some(seckey), Some(localkey)) = (
            present(identity.devid),
            present(identity.seckey),
            present(identity.localkey),
        ) {
            return Ok(Self {
                clientid: field(format_args!("{}", devid))?,
                username: field(format_args!("{}", devid))?,
                password: password(crypto, seckey)?,
                cipherkey: cipher_key(localkey.as_bytes()),
                topic_in: field(format_args!("smart/device/in/{}", devid))?,
                topic_out: field(format_args!("smart/device/out/{}", devid))?,
            });
        }

        if let (Some(uuid), Some(authkey)) = (present(identity.uuid), present(identity.authkey)) {
            return Ok(Self {
                clientid: field(format_args!("acon_{}", uuid))?,
                username: field(format_args!("acon_{}|pv={}", uuid, PROTOCOL_VERSION))?,
                password: password(crypto, authkey)?,
                cipherkey: cipher_key(authkey.as_bytes()),
                topic_in: field(format_args!("d/ai/{}", uuid))?,
                topic_out: Field::new(),
            });
        }

        error!("signature: identity incomplete");
        Err(Error::InvalidParam)
    }
}

fn field(args: core::fmt::Arguments<'_>) -> Result<Field, Error> {
    let mut out = Field::new();
    out.write_fmt(args).map_err(|_| Error::InvalidParam)?;
    Ok(out)
}

fn password<C: Crypto + ?Sized>(crypto: &C, secret: &str) -> Result<String<16>, Error> {
    let digest = crypto.md5(secret.as_bytes());
    let mut out = String::new();
    for byte in &digest[4..12] {
        write!(out, "{:02x}", byte).map_err(|_| Error::InvalidParam)?;
    }
    Ok(out)
}
