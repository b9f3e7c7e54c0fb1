//! ATOP, the signed HTTPS request API of the cloud.
//!
//! URL signing and payload encryption depend on the platform crypto stack,
//! so the transport itself is the [`Atop`] trait. This module builds the
//! requests the device makes and interprets their answers.
#![allow(missing_docs)]

use alloc::format;
use alloc::string::String;

use serde_json::Value;

use crate::cloud::endpoint::Endpoint;
use crate::config::{BASELINE_VERSION, PROTOCOL_VERSION};
use crate::error::Error;
use crate::protocol::json_quote;

/// Path every device request is posted to.
pub const DEVICE_PATH: &str = "/d.json";

const CAD_VER: &str = "1.0.3";
const CD_VER: &str = "1.0.0";
const ATTRIBUTE_OTA: u32 = 11;

/// One ATOP call.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtopRequest<'a> {
    /// Device id, for calls made by an activated device.
    pub devid: Option<&'a str>,
    /// Device uuid, for calls made before activation.
    pub uuid: Option<&'a str>,
    /// Signing key: the authkey before activation, the seckey after.
    pub key: &'a str,
    pub path: &'a str,
    pub timestamp: u32,
    /// API name, for example `tuya.device.active`.
    pub api: &'a str,
    pub version: Option<&'a str>,
    /// Plaintext JSON body.
    pub data: &'a str,
}

/// Decoded answer of an ATOP call.
#[derive(Debug, Clone, PartialEq)]
pub struct AtopResponse {
    pub success: bool,
    /// Server time, POSIX seconds.
    pub t: u32,
    /// The `result` member; `Null` when absent.
    pub result: Value,
}

/// Sends ATOP calls to an endpoint.
pub trait Atop {
    /// Signs, encrypts and posts `request` to the ATOP address of
    /// `endpoint`, returning the decrypted answer.
    fn request(&mut self, endpoint: &Endpoint, request: &AtopRequest<'_>) -> Result<AtopResponse, Error>;
}

impl<A: Atop + ?Sized> Atop for &mut A {
    fn request(&mut self, endpoint: &Endpoint, request: &AtopRequest<'_>) -> Result<AtopResponse, Error> {
        (**self).request(endpoint, request)
    }
}

/// Parameters of the activation call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivateRequest<'a> {
    /// Binding token handed out by the app.
    pub token: &'a str,
    pub product_key: &'a str,
    pub uuid: &'a str,
    pub authkey: &'a str,
    /// Device id kept from a previous activation.
    pub devid: Option<&'a str>,
    pub sw_ver: &'a str,
    pub modules: Option<&'a str>,
    pub skill_param: Option<&'a str>,
    pub firmware_key: Option<&'a str>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Body of the activation call.
pub fn activate_body(request: &ActivateRequest<'_>, timestamp: u32) -> String {
    let firmware_key = non_empty(request.firmware_key);
    let mut body = format!(
        r#"{{"token":{},"softVer":{},"productKey":{},"protocolVer":"{}","baselineVer":"{}""#,
        json_quote(request.token),
        json_quote(request.sw_ver),
        json_quote(request.product_key),
        PROTOCOL_VERSION,
        BASELINE_VERSION
    );
    body.push_str(&format!(
        r#","options":"{{\"isFK\":{}}}""#,
        firmware_key.is_some()
    ));
    if let Some(key) = firmware_key {
        body.push_str(&format!(r#","productKeyStr":{}"#, json_quote(key)));
    }
    if let Some(devid) = non_empty(request.devid) {
        body.push_str(&format!(r#","devId":{}"#, json_quote(devid)));
    }
    if let Some(modules) = non_empty(request.modules) {
        body.push_str(&format!(r#","modules":{}"#, json_quote(modules)));
    }
    if let Some(skill) = non_empty(request.skill_param) {
        body.push_str(&format!(r#","skillParam":{}"#, json_quote(skill)));
    }
    body.push_str(&format!(
        r#","devAttribute":{},"cadVer":"{}","cdVer":"{}","t":{}}}"#,
        1u32 << ATTRIBUTE_OTA,
        CAD_VER,
        CD_VER,
        timestamp
    ));
    body
}

/// Activates the device (`tuya.device.active` 4.4).
pub fn activate<A: Atop>(
    atop: &mut A,
    endpoint: &Endpoint,
    request: &ActivateRequest<'_>,
    timestamp: u32,
) -> Result<AtopResponse, Error> {
    let body = activate_body(request, timestamp);
    debug!("atop: activate {}", body.as_str());
    atop.request(
        endpoint,
        &AtopRequest {
            devid: None,
            uuid: Some(request.uuid),
            key: request.authkey,
            path: DEVICE_PATH,
            timestamp,
            api: "tuya.device.active",
            version: Some("4.4"),
            data: &body,
        },
    )
    .inspect_err(|e| error!("atop: activate request failed: {}", e))
}

/// Reports the firmware versions (`tuya.device.versions.update` 4.1).
///
/// A call the cloud answers with `success: false` is [`Error::Com`].
pub fn version_update<A: Atop>(
    atop: &mut A,
    endpoint: &Endpoint,
    devid: &str,
    seckey: &str,
    versions: &str,
    timestamp: u32,
) -> Result<(), Error> {
    let body = format!(r#"{{"versions":{},"t":{}}}"#, json_quote(versions), timestamp);
    debug!("atop: version update {}", body.as_str());
    let response = atop.request(
        endpoint,
        &AtopRequest {
            devid: Some(devid),
            uuid: None,
            key: seckey,
            path: DEVICE_PATH,
            timestamp,
            api: "tuya.device.versions.update",
            version: Some("4.1"),
            data: &body,
        },
    )?;
    if response.success { Ok(()) } else { Err(Error::Com) }
}

/// Cloud side state of a device, from `tuya.device.info.sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// The app removed the device and wiped its data.
    ResetFactory,
    /// The app removed the device.
    Reset,
    /// The device is still bound.
    Enable,
}

/// Asks the cloud what happened to this device (`tuya.device.info.sync`
/// 1.0).
pub fn sync_check<A: Atop>(
    atop: &mut A,
    endpoint: &Endpoint,
    devid: &str,
    seckey: &str,
    timestamp: u32,
) -> Result<SyncStatus, Error> {
    let body = format!(r#"{{"t":{}}}"#, timestamp);
    let response = atop.request(
        endpoint,
        &AtopRequest {
            devid: Some(devid),
            uuid: None,
            key: seckey,
            path: DEVICE_PATH,
            timestamp,
            api: "tuya.device.info.sync",
            version: Some("1.0"),
            data: &body,
        },
    )?;
    match response.result.get("status").and_then(Value::as_str) {
        Some("reset_factory") => Ok(SyncStatus::ResetFactory),
        Some("reset") => Ok(SyncStatus::Reset),
        Some("enable") => Ok(SyncStatus::Enable),
        _ => {
            warn!("atop: unknown sync status");
            Err(Error::Com)
        }
    }
}
