//! Compile-time defaults and the client configuration.
#![allow(missing_docs)]

use alloc::string::String;

use crate::error::Error;

/// Receive block time handed to the MQTT transport, in milliseconds.
pub const MQTT_RECV_BLOCK_TIME_MS: u32 = 2000;
/// MQTT keep-alive interval, in seconds.
pub const MQTT_KEEPALIVE_INTERVAL_S: u16 = 120;
/// Lower bound of the connect retry backoff window.
pub const MQTT_CONNECT_RETRY_MIN_DELAY_MS: u32 = 1000;
/// Upper bound of the connect retry backoff window.
pub const MQTT_CONNECT_RETRY_MAX_DELAY_MS: u32 = 8000;
/// Connect retry attempt limit. `None` retries forever.
pub const MQTT_CONNECT_RETRY_MAX_ATTEMPTS: Option<u32> = None;
/// Receive block time of the pre-activation bind session.
pub const MQTT_BIND_TIMEOUT_MS: u32 = 5000;
/// Timeout for iot-dns and ATOP HTTP exchanges.
pub const HTTP_TIMEOUT_MS: u32 = 5000;
/// Default deadline of a correlated MQTT request.
pub const MATOP_TIMEOUT_MS: u32 = 8000;
/// Deadline used by `upgrade_info_get`.
pub const MATOP_UPGRADE_INFO_TIMEOUT_MS: u32 = 10_000;
/// Maximum size of an activation response.
pub const ACTIVATE_BUFFER_LENGTH: usize = 8192;
/// Period of the automatic firmware upgrade check.
pub const AUTO_UPGRADE_CHECK_INTERVAL_MS: u64 = 1000 * 60 * 60 * 24;
/// Delay before the first automatic upgrade check after connecting.
pub const AUTO_UPGRADE_FIRST_CHECK_MS: u64 = 1000;
/// Fixed delay between lifecycle retries (network, endpoint, activation).
pub const STATE_RETRY_DELAY_MS: u32 = 1000;
/// Delay between bind session connect attempts.
pub const BIND_RETRY_DELAY_MS: u32 = 2000;
/// Sleep applied by each yield while idle.
pub const IDLE_SLEEP_MS: u32 = 500;

/// Protocol version announced to the cloud.
pub const PROTOCOL_VERSION: &str = "2.3";
/// Baseline version announced to the cloud.
pub const BASELINE_VERSION: &str = "40.07";

/// Field limits, in bytes.
pub const MAX_LENGTH_PRODUCT_ID: usize = 16;
pub const MAX_LENGTH_UUID: usize = 25;
pub const MAX_LENGTH_AUTHKEY: usize = 32;
pub const MAX_LENGTH_DEVICE_ID: usize = 25;
pub const MAX_LENGTH_SECKEY: usize = 16;
pub const MAX_LENGTH_LOCALKEY: usize = 16;
pub const MAX_LENGTH_SCHEMA_ID: usize = 16;
pub const MAX_LENGTH_TIMEZONE: usize = 6;
pub const MAX_LENGTH_SW_VER: usize = 10;
pub const MAX_LENGTH_TOKEN: usize = 8;
pub const MAX_LENGTH_REGION: usize = 2;
pub const MAX_LENGTH_REGIST: usize = 4;
pub const MAX_LENGTH_HOST: usize = 64;
pub const MAX_LENGTH_ATOP_PATH: usize = 16;

/// Length of the AES-128 key taken from the authkey or localkey.
pub const CIPHER_KEY_LENGTH: usize = 16;

/// Client configuration.
///
/// `product_key`, `uuid`, `authkey` and `software_ver` are required; the
/// rest is optional.
///
/// ```
/// use tuyalink::config::Config;
///
/// let mut config = Config::new("p1234567890abcde", "uuid0123456789abcd", "0123456789abcdef0123456789abcdef");
/// config.software_ver = "1.0.0".into();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Firmware version, for example `"1.0.0"`.
    pub software_ver: String,
    /// Product key (PID) the device was registered under.
    pub product_key: String,
    /// Device uuid.
    pub uuid: String,
    /// Device authorization key.
    pub authkey: String,
    /// Key under which the activation record is stored. Defaults to the uuid.
    pub storage_namespace: Option<String>,
    /// JSON array of extension module versions.
    pub modules: Option<String>,
    /// Skill parameters forwarded with the activation request.
    pub skill_param: Option<String>,
    /// Firmware key, sent as `productKeyStr` when present.
    pub firmware_key: Option<String>,
    /// Receive block time of the bind session.
    pub bind_timeout_ms: u32,
}

impl Config {
    /// Creates a configuration with the three identity fields set and the
    /// software version defaulted to `"1.0.0"`.
    pub fn new(product_key: &str, uuid: &str, authkey: &str) -> Self {
        Self {
            software_ver: String::from("1.0.0"),
            product_key: String::from(product_key),
            uuid: String::from(uuid),
            authkey: String::from(authkey),
            storage_namespace: None,
            modules: None,
            skill_param: None,
            firmware_key: None,
            bind_timeout_ms: MQTT_BIND_TIMEOUT_MS,
        }
    }

    /// Checks presence and length of the required fields.
    pub fn validate(&self) -> Result<(), Error> {
        fn bounded(value: &str, max: usize) -> bool {
            !value.is_empty() && value.len() <= max
        }
        if !bounded(&self.product_key, MAX_LENGTH_PRODUCT_ID)
            || !bounded(&self.uuid, MAX_LENGTH_UUID)
            || !bounded(&self.software_ver, MAX_LENGTH_SW_VER)
            || self.authkey.len() < CIPHER_KEY_LENGTH
            || self.authkey.len() > MAX_LENGTH_AUTHKEY
        {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }

    /// Storage key of the activation record.
    pub fn namespace(&self) -> &str {
        self.storage_namespace.as_deref().unwrap_or(&self.uuid)
    }
}
