//! Activation record and the activation exchange.
//!
//! A successful activation leaves two entries in the store: the data point
//! schema under its schema id and the rest of the ATOP result (device id,
//! keys, schema id, time zone...) under the storage namespace.

use alloc::format;
use alloc::string::ToString;
use alloc::vec::Vec;

use heapless::String;
use serde_json::Value;

use crate::cloud::atop::{self, ActivateRequest, AtopResponse};
use crate::config::{
    MAX_LENGTH_DEVICE_ID, MAX_LENGTH_LOCALKEY, MAX_LENGTH_SCHEMA_ID, MAX_LENGTH_SECKEY,
    MAX_LENGTH_TIMEZONE,
};
use crate::error::Error;
use crate::iot::event::{Event, ResetType};
use crate::iot::{Core, Platform};
use crate::storage::KvStore;
use crate::system::System;

/// Credentials issued by the cloud on activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivatedData {
    /// Device id.
    pub devid: String<MAX_LENGTH_DEVICE_ID>,
    /// Secret key for signed cloud calls.
    pub seckey: String<MAX_LENGTH_SECKEY>,
    /// Frame cipher key.
    pub localkey: String<MAX_LENGTH_LOCALKEY>,
    /// Key under which the data point schema is stored.
    pub schema_id: String<MAX_LENGTH_SCHEMA_ID>,
    /// Standard time zone, for example `+08:00`. May be empty.
    pub timezone: String<MAX_LENGTH_TIMEZONE>,
}

fn string_field<const N: usize>(root: &Value, key: &str) -> Result<String<N>, Error> {
    let value = root.get(key).and_then(Value::as_str).ok_or(Error::JsonField)?;
    String::try_from(value).map_err(|_| Error::JsonField)
}

impl ActivatedData {
    /// Parses a stored record. `devId`, `secKey`, `localKey` and `schemaId`
    /// are required, `stdTimeZone` is optional.
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        let root: Value = serde_json::from_slice(raw)?;
        let timezone = match root.get("stdTimeZone") {
            Some(_) => string_field(&root, "stdTimeZone")?,
            None => String::new(),
        };
        Ok(Self {
            devid: string_field(&root, "devId")?,
            seckey: string_field(&root, "secKey")?,
            localkey: string_field(&root, "localKey")?,
            schema_id: string_field(&root, "schemaId")?,
            timezone,
        })
    }

    /// Whether the four primary fields are set.
    pub fn is_complete(&self) -> bool {
        !self.devid.is_empty()
            && !self.seckey.is_empty()
            && !self.localkey.is_empty()
            && !self.schema_id.is_empty()
    }
}

/// Reads the record stored under `namespace`.
pub fn activated_data_read<K: KvStore>(store: &mut K, namespace: &str) -> Result<ActivatedData, Error> {
    let raw = store.get(namespace).inspect_err(|e| {
        warn!("activation: record not found: {}", e);
    })?;
    let data = ActivatedData::parse(&raw).inspect_err(|e| {
        error!("activation: record parse failed: {}", e);
    })?;
    trace!("activation: devId {}", data.devid.as_str());
    Ok(data)
}

/// Reads the record and checks that its schema is stored as well. This is
/// what makes a device count as activated.
pub fn activated_data_load<K: KvStore>(store: &mut K, namespace: &str) -> Result<ActivatedData, Error> {
    let data = activated_data_read(store, namespace)?;
    if !store.contains(&data.schema_id) {
        warn!("activation: schema {} missing", data.schema_id.as_str());
        return Err(Error::Storage(crate::storage::error::Error::NotFound));
    }
    Ok(data)
}

/// Storage key of the device id kept across resets.
pub fn devid_key(namespace: &str) -> alloc::string::String {
    format!("{}.devid", namespace)
}

/// Persists a successful activation answer. Returns whether the cloud
/// asked for a factory reset of the local data.
pub fn response_store<K: KvStore>(
    store: &mut K,
    namespace: &str,
    response: &AtopResponse,
) -> Result<bool, Error> {
    if !response.success {
        return Err(Error::InvalidParam);
    }
    let Value::Object(result) = &response.result else {
        return Err(Error::InvalidParam);
    };
    let (Some(schema), Some(schema_id)) = (
        result.get("schema"),
        result.get("schemaId").and_then(Value::as_str),
    ) else {
        error!("activation: schema not found");
        return Err(Error::JsonField);
    };

    let schema_blob: Vec<u8> = match schema {
        Value::String(text) => text.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    };
    store.set(schema_id, &schema_blob).inspect_err(|e| {
        error!("activation: schema save failed: {}", e);
    })?;

    let mut record = result.clone();
    record.remove("schema");
    let record = Value::Object(record).to_string();
    debug!("activation: record {}", record.as_str());
    store.set(namespace, record.as_bytes()).inspect_err(|e| {
        error!("activation: record save failed: {}", e);
    })?;

    Ok(result.get("resetFactory").and_then(Value::as_bool) == Some(true))
}

/// Runs the activation exchange with `token` and persists the answer.
pub(crate) fn activate_process<P: Platform>(core: &mut Core<P>, token: &str) -> Result<(), Error> {
    let namespace = core.config.namespace().to_string();
    let cached_devid = core
        .platform
        .store()
        .get_string(&devid_key(&namespace))
        .ok()
        .filter(|devid| !devid.is_empty());

    let request = ActivateRequest {
        token,
        product_key: &core.config.product_key,
        uuid: &core.config.uuid,
        authkey: &core.config.authkey,
        devid: cached_devid.as_deref(),
        sw_ver: &core.config.software_ver,
        modules: core.config.modules.as_deref(),
        skill_param: core.config.skill_param.as_deref(),
        firmware_key: core.config.firmware_key.as_deref(),
    };
    let timestamp = core.platform.system().timestamp();
    let endpoint = core.endpoint.endpoint().clone();
    let response = atop::activate(core.platform.atop(), &endpoint, &request, timestamp)?;

    core.dispatch(Event::TimestampSync(response.t));

    let reset_factory = response_store(core.platform.store(), &namespace, &response)
        .inspect_err(|e| error!("activation: response rejected: {}", e))?;
    if reset_factory {
        debug!("activation: cloud reset to factory, local data follows");
        core.dispatch(Event::Reset(ResetType::DataFactory));
    }
    Ok(())
}
