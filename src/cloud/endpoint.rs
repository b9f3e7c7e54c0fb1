//! Endpoint record and manager.
//!
//! The record lives in the key/value store under four keys:
//!
//! | key | content |
//! |---|---|
//! | `region` | two letter region code |
//! | `regist_key` | registration environment, `pro` by default |
//! | `endpoint.cert` | DER encoded CA certificate |
//! | `endpoint.domain` | JSON record of the ATOP and MQTT addresses |

use alloc::vec::Vec;

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::cloud::iotdns;
use crate::config::{MAX_LENGTH_ATOP_PATH, MAX_LENGTH_HOST, MAX_LENGTH_REGION, MAX_LENGTH_REGIST};
use crate::error::Error;
use crate::network::application::http::HttpClient;
use crate::storage::KvStore;

const KEY_REGION: &str = "region";
const KEY_REGIST: &str = "regist_key";
const KEY_CERT: &str = "endpoint.cert";
const KEY_DOMAIN: &str = "endpoint.domain";

/// Registration environment used until the cloud assigns one.
pub const DEFAULT_REGIST_KEY: &str = "pro";

const DOMAIN_RECORD_LEN: usize = 256;

/// ATOP (HTTPS API) address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtopUrl {
    /// Host name.
    pub host: String<MAX_LENGTH_HOST>,
    /// TCP port.
    pub port: u16,
    /// Request path, for example `/d.json`.
    pub path: String<MAX_LENGTH_ATOP_PATH>,
}

/// MQTT broker address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttUrl {
    /// Host name.
    pub host: String<MAX_LENGTH_HOST>,
    /// TCP port.
    pub port: u16,
}

/// Where the device talks to the cloud.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    /// Region the addresses belong to, empty when auto assigned.
    pub region: String<MAX_LENGTH_REGION>,
    /// HTTPS API address.
    pub atop: AtopUrl,
    /// Broker address.
    pub mqtt: MqttUrl,
    /// DER encoded CA certificate of both services.
    pub cert: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct DomainRecord {
    atop: AtopUrl,
    mqtt: MqttUrl,
}

/// Owns the current [`Endpoint`] and the region/environment it was
/// resolved for.
#[derive(Debug, Clone, Default)]
pub struct EndpointManager {
    region: String<MAX_LENGTH_REGION>,
    regist_key: String<MAX_LENGTH_REGIST>,
    endpoint: Endpoint,
    dns_cacert: Option<Vec<u8>>,
}

impl EndpointManager {
    /// Creates a manager with no region and the default environment.
    pub fn new() -> Self {
        let mut manager = Self::default();
        let _ = manager.regist_key.push_str(DEFAULT_REGIST_KEY);
        manager
    }

    /// Sets the CA certificate presented by the iot-dns service.
    pub fn set_dns_cacert(&mut self, cert: Option<Vec<u8>>) {
        self.dns_cacert = cert;
    }

    /// Loads region and environment from `store`.
    ///
    /// The environment falls back to `pro` whatever the outcome.
    pub fn init<K: KvStore>(&mut self, store: &mut K) -> Result<(), Error> {
        let result = self.load(store);
        info!("endpoint: region {}", self.region.as_str());
        info!("endpoint: regist_key {}", self.regist_key.as_str());
        if self.regist_key.is_empty() {
            let _ = self.regist_key.push_str(DEFAULT_REGIST_KEY);
        }
        result
    }

    fn load<K: KvStore>(&mut self, store: &mut K) -> Result<(), Error> {
        self.region.clear();
        self.regist_key.clear();
        let region = store.get(KEY_REGION).inspect_err(|e| {
            error!("endpoint: region read failed: {}", e);
        })?;
        self.region = truncated(&region);
        let regist = store.get(KEY_REGIST).inspect_err(|e| {
            error!("endpoint: regist_key read failed: {}", e);
        })?;
        self.regist_key = truncated(&regist);
        Ok(())
    }

    /// Region the endpoint is resolved for.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Registration environment.
    pub fn regist_key(&self) -> &str {
        &self.regist_key
    }

    /// The current endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Persists a new region/environment pair and adopts it.
    pub fn region_regist_set<K: KvStore>(
        &mut self,
        store: &mut K,
        region: &str,
        regist_key: &str,
    ) -> Result<(), Error> {
        let region_value = String::try_from(region).map_err(|_| Error::InvalidParam)?;
        let regist_value = String::try_from(regist_key).map_err(|_| Error::InvalidParam)?;
        store.set(KEY_REGION, region.as_bytes())?;
        store.set(KEY_REGIST, regist_key.as_bytes())?;
        self.region = region_value;
        self.regist_key = regist_value;
        Ok(())
    }

    /// Resolves the endpoint of the stored region.
    pub fn update<H: HttpClient>(&mut self, http: &mut H) -> Result<(), Error> {
        let region = self.region.clone();
        let region = if region.is_empty() { None } else { Some(region.as_str()) };
        self.resolve(http, region)
    }

    /// Resolves the endpoint letting the service pick the region.
    pub fn update_auto_region<H: HttpClient>(&mut self, http: &mut H) -> Result<(), Error> {
        self.resolve(http, None)
    }

    fn resolve<H: HttpClient>(&mut self, http: &mut H, region: Option<&str>) -> Result<(), Error> {
        let endpoint =
            iotdns::cloud_endpoint_get(http, self.dns_cacert.as_deref(), region, &self.regist_key)?;
        self.endpoint = endpoint;
        Ok(())
    }

    /// Loads the stored certificate into the endpoint.
    pub fn cert_get<K: KvStore>(&mut self, store: &mut K) -> Result<(), Error> {
        let cert = store.get(KEY_CERT).inspect_err(|e| {
            error!("endpoint: cert read failed: {}", e);
        })?;
        self.endpoint.cert = Some(cert);
        Ok(())
    }

    /// Stores the certificate of the endpoint.
    pub fn cert_set<K: KvStore>(&self, store: &mut K) -> Result<(), Error> {
        let cert = self.endpoint.cert.as_deref().ok_or(Error::InvalidParam)?;
        store.set(KEY_CERT, cert).inspect_err(|e| {
            error!("endpoint: cert write failed: {}", e);
        })?;
        Ok(())
    }

    /// Loads the stored addresses into the endpoint.
    pub fn domain_get<K: KvStore>(&mut self, store: &mut K) -> Result<(), Error> {
        let raw = store.get(KEY_DOMAIN)?;
        let (record, _) = serde_json_core::from_slice::<DomainRecord>(&raw).map_err(|_| {
            error!("endpoint: domain record corrupt");
            Error::JsonParse
        })?;
        self.endpoint.atop = record.atop;
        self.endpoint.mqtt = record.mqtt;
        Ok(())
    }

    /// Stores the addresses of the endpoint.
    pub fn domain_set<K: KvStore>(&self, store: &mut K) -> Result<(), Error> {
        let record = DomainRecord {
            atop: self.endpoint.atop.clone(),
            mqtt: self.endpoint.mqtt.clone(),
        };
        let mut buf = [0u8; DOMAIN_RECORD_LEN];
        let len = serde_json_core::to_slice(&record, &mut buf).map_err(|_| Error::InvalidParam)?;
        store.set(KEY_DOMAIN, &buf[..len])?;
        Ok(())
    }

    /// Deletes every stored endpoint key.
    pub fn remove<K: KvStore>(store: &mut K) {
        for key in [KEY_REGION, KEY_REGIST, KEY_CERT, KEY_DOMAIN] {
            if let Err(e) = store.delete(key) {
                warn!("endpoint: delete {} failed: {}", key, e);
            }
        }
    }
}

// Stored values longer than the field are cut, not rejected.
fn truncated<const N: usize>(raw: &[u8]) -> String<N> {
    let mut out = String::new();
    if let Ok(text) = core::str::from_utf8(raw) {
        for c in text.chars() {
            if out.push(c).is_err() {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn sample() -> EndpointManager {
        let mut manager = EndpointManager::new();
        manager.endpoint.atop.host.push_str("a1.tuyaeu.com").unwrap();
        manager.endpoint.atop.port = 443;
        manager.endpoint.atop.path.push_str("/d.json").unwrap();
        manager.endpoint.mqtt.host.push_str("m1.tuyaeu.com").unwrap();
        manager.endpoint.mqtt.port = 8883;
        manager.endpoint.cert = Some(alloc::vec![0x30, 0x82, 0x01]);
        manager
    }

    #[test]
    fn domain_and_cert_survive_storage() {
        let mut store = MemoryStore::new();
        let saved = sample();
        saved.domain_set(&mut store).unwrap();
        saved.cert_set(&mut store).unwrap();

        let mut loaded = EndpointManager::new();
        loaded.domain_get(&mut store).unwrap();
        loaded.cert_get(&mut store).unwrap();
        assert_eq!(loaded.endpoint(), saved.endpoint());
    }

    #[test]
    fn init_defaults_environment() {
        let mut store = MemoryStore::new();
        let mut manager = EndpointManager::new();
        assert!(manager.init(&mut store).is_err());
        assert_eq!(manager.regist_key(), "pro");
        assert_eq!(manager.region(), "");

        manager.region_regist_set(&mut store, "eu", "pre").unwrap();
        let mut reloaded = EndpointManager::new();
        reloaded.init(&mut store).unwrap();
        assert_eq!(reloaded.region(), "eu");
        assert_eq!(reloaded.regist_key(), "pre");
    }

    #[test]
    fn oversized_region_is_rejected() {
        let mut store = MemoryStore::new();
        let mut manager = EndpointManager::new();
        assert_eq!(
            manager.region_regist_set(&mut store, "europe", "pro"),
            Err(Error::InvalidParam)
        );
        assert!(!store.contains("region"));
    }

    #[test]
    fn remove_clears_all_keys() {
        let mut store = MemoryStore::new();
        let mut manager = sample();
        manager.region_regist_set(&mut store, "us", "pro").unwrap();
        manager.domain_set(&mut store).unwrap();
        manager.cert_set(&mut store).unwrap();
        EndpointManager::remove(&mut store);
        assert!(store.is_empty());
    }
}
