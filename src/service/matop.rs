//! Request/response correlation over MQTT ("MATOP").
//!
//! Requests go out as `{"id":N,"a":"<api>","t":T,"data":{..}[,"v":"<ver>"]}`
//! on `rpc/req/<devid>`; replies come back on `rpc/rsp/<devid>` carrying the
//! same id, or as raw bytes on `rpc/file/<devid>` prefixed with a big endian
//! `u32` id. Each request waits in a FIFO list until its reply arrives or its
//! deadline passes.
//!
//! The correlator lives inside the session context `U` (see
//! [`MatopContext`]) so the topic handlers, which only receive the session and
//! the context, can reach it.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;

use serde_json::Value;

use crate::config::{MATOP_TIMEOUT_MS, MATOP_UPGRADE_INFO_TIMEOUT_MS};
use crate::error::Error;
use crate::network::application::mqtt::MqttTransport;
use crate::protocol::json_quote;
use crate::service::mqtt::{Message, MqttSession};
use crate::system::{Crypto, System};

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Response<'a> {
    /// Correlation id of the request.
    pub id: u16,
    /// `data.result.success` of the reply; `false` on timeout.
    pub success: bool,
    /// `data.t` of a successful reply, else 0.
    pub t: u32,
    /// `data.result.result` of the reply.
    pub result: Option<&'a Value>,
    /// Payload of a raw reply, after the id prefix.
    pub raw: Option<&'a [u8]>,
}

impl Response<'_> {
    fn failed(id: u16) -> Self {
        Self {
            id,
            success: false,
            t: 0,
            result: None,
            raw: None,
        }
    }
}

/// A request to send.
#[derive(Debug, Clone, Copy, Default)]
pub struct Request<'a> {
    /// API name, sent as `"a"`.
    pub api: &'a str,
    /// API version, sent as `"v"` when present.
    pub version: Option<&'a str>,
    /// JSON object sent as `"data"`; `{}` when absent.
    pub data: Option<&'a str>,
    /// Deadline in milliseconds; 0 selects the 8 s default.
    pub timeout_ms: u32,
}

/// One-shot completion of a request.
pub type MatopNotify<T, S, U> = Box<dyn FnOnce(&mut MqttSession<T, S, U>, &mut U, &Response<'_>)>;

/// Gives the topic handlers access to the correlator.
pub trait MatopContext<T, S>: Sized {
    /// The correlator of this session.
    fn matop(&mut self) -> &mut Matop<T, S, Self>;
}

/// Selection of `dynamic_cfg_get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicCfgType {
    /// Time zone rules only.
    Timezone,
    /// Electricity rate rules only.
    RateRule,
    /// Both.
    All,
}

struct Pending<T, S, U> {
    id: u16,
    deadline_ms: u64,
    notify: Option<MatopNotify<T, S, U>>,
}

/// The correlator.
pub struct Matop<T, S, U> {
    devid: String,
    request_topic: String,
    id_cnt: u16,
    pending: VecDeque<Pending<T, S, U>>,
}

impl<T, S, U> Default for Matop<T, S, U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S, U> Matop<T, S, U> {
    /// Creates an idle correlator.
    pub fn new() -> Self {
        Self {
            devid: String::new(),
            request_topic: String::new(),
            id_cnt: 0,
            pending: VecDeque::new(),
        }
    }

    /// Topic requests are published on; empty before [`init`](Self::init).
    pub fn request_topic(&self) -> &str {
        &self.request_topic
    }

    /// Number of requests waiting for a reply.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Ids of the waiting requests, oldest first.
    pub fn pending_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.pending.iter().map(|p| p.id)
    }

    fn take(&mut self, id: u32) -> Option<Pending<T, S, U>> {
        let index = self.pending.iter().position(|p| u32::from(p.id) == id)?;
        self.pending.remove(index)
    }
}

impl<T, S, U> Matop<T, S, U>
where
    T: MqttTransport,
    S: System + Crypto,
    U: MatopContext<T, S>,
{
    /// Subscribes the reply topics of `devid`.
    ///
    /// Calling it again on the next connection keeps the waiting requests.
    pub fn init(&mut self, session: &mut MqttSession<T, S, U>, devid: &str) -> Result<(), Error> {
        if devid.is_empty() {
            return Err(Error::InvalidParam);
        }
        let rsp = format!("rpc/rsp/{}", devid);
        if let Err(e) = session.subscribe_register(&rsp, Some(on_response::<T, S, U>)) {
            error!("matop: topic subscribe error {}", rsp.as_str());
            return Err(e);
        }
        let file = format!("rpc/file/{}", devid);
        if let Err(e) = session.subscribe_register(&file, Some(on_file_response::<T, S, U>)) {
            error!("matop: topic subscribe error {}", file.as_str());
            return Err(e);
        }
        self.devid = String::from(devid);
        self.request_topic = format!("rpc/req/{}", devid);
        Ok(())
    }

    /// Unsubscribes the reply topics and drops every waiting request
    /// without notifying it.
    pub fn destroy(&mut self, session: &mut MqttSession<T, S, U>) {
        if !self.devid.is_empty() {
            let rsp = format!("rpc/rsp/{}", self.devid);
            let result = session.subscribe_unregister(&rsp);
            debug!("matop: unsubscribe {} ok {}", rsp.as_str(), result.is_ok());
            let file = format!("rpc/file/{}", self.devid);
            let result = session.subscribe_unregister(&file);
            debug!("matop: unsubscribe {} ok {}", file.as_str(), result.is_ok());
        }
        self.pending.clear();
        self.devid.clear();
        self.request_topic.clear();
    }

    /// Sends `request` and tracks it until its reply or deadline.
    ///
    /// On a publish failure nothing is tracked and the error is returned.
    pub fn request_async(
        &mut self,
        session: &mut MqttSession<T, S, U>,
        request: &Request<'_>,
        notify: Option<MatopNotify<T, S, U>>,
    ) -> Result<(), Error> {
        if self.request_topic.is_empty() || request.api.is_empty() {
            return Err(Error::InvalidParam);
        }
        self.id_cnt = self.id_cnt.wrapping_add(1);
        let id = self.id_cnt;
        let timeout = if request.timeout_ms == 0 {
            MATOP_TIMEOUT_MS
        } else {
            request.timeout_ms
        };
        let deadline_ms = session.system().now_ms() + u64::from(timeout);

        let body = envelope(
            id,
            request.api,
            session.system().timestamp(),
            request.data,
            request.version,
        );
        debug!("matop: request {}", body.as_str());

        if let Err(e) = session.publish(&self.request_topic, body.as_bytes()) {
            error!("matop: request send error {}", e);
            return Err(e);
        }
        self.pending.push_back(Pending {
            id,
            deadline_ms,
            notify,
        });
        Ok(())
    }

    /// Fails the oldest expired request, if any, and returns
    /// [`Error::Timeout`] for it. At most one request expires per call.
    pub fn yield_once(session: &mut MqttSession<T, S, U>, ctx: &mut U) -> Result<(), Error> {
        let now = session.system().now_ms();
        let matop = ctx.matop();
        let Some(index) = matop.pending.iter().position(|p| now > p.deadline_ms) else {
            return Ok(());
        };
        let Some(entry) = matop.pending.remove(index) else {
            return Ok(());
        };
        warn!("matop: message id {} timeout", entry.id);
        if let Some(notify) = entry.notify {
            notify(session, ctx, &Response::failed(entry.id));
        }
        Err(Error::Timeout)
    }

    fn simple(
        &mut self,
        session: &mut MqttSession<T, S, U>,
        api: &str,
        version: Option<&str>,
        data: Option<&str>,
        timeout_ms: u32,
        notify: Option<MatopNotify<T, S, U>>,
    ) -> Result<(), Error> {
        self.request_async(
            session,
            &Request {
                api,
                version,
                data,
                timeout_ms,
            },
            notify,
        )
    }

    /// Tells the cloud the device is being reset.
    pub fn client_reset(&mut self, session: &mut MqttSession<T, S, U>) -> Result<(), Error> {
        let data = format!("{{\"t\":{}}}", session.system().timestamp());
        self.simple(session, "tuya.device.reset", Some("4.0"), Some(&data), 0, None)
    }

    /// Reports the firmware version string.
    pub fn version_update(&mut self, session: &mut MqttSession<T, S, U>, versions: &str) -> Result<(), Error> {
        let data = format!(
            "{{\"versions\":{},\"t\":{}}}",
            json_quote(versions),
            session.system().timestamp()
        );
        self.simple(
            session,
            "tuya.device.versions.update",
            Some("4.1"),
            Some(&data),
            0,
            None,
        )
    }

    /// Reports the upgrade status of `channel`.
    pub fn upgrade_status_update(
        &mut self,
        session: &mut MqttSession<T, S, U>,
        channel: u32,
        status: u32,
    ) -> Result<(), Error> {
        let data = format!(
            "{{\"type\":{},\"upgradeStatus\":{},\"t\":{}}}",
            channel,
            status,
            session.system().timestamp()
        );
        self.simple(
            session,
            "tuya.device.upgrade.status.update",
            Some("4.1"),
            Some(&data),
            0,
            None,
        )
    }

    /// Queries the pending firmware upgrade of `channel`.
    pub fn upgrade_info_get(
        &mut self,
        session: &mut MqttSession<T, S, U>,
        channel: u32,
        notify: Option<MatopNotify<T, S, U>>,
    ) -> Result<(), Error> {
        let data = format!("{{\"type\":{},\"t\":{}}}", channel, session.system().timestamp());
        self.simple(
            session,
            "tuya.device.upgrade.get",
            Some("4.4"),
            Some(&data),
            MATOP_UPGRADE_INFO_TIMEOUT_MS,
            notify,
        )
    }

    /// Queries the silent (automatic) firmware upgrade.
    pub fn auto_upgrade_info_get(
        &mut self,
        session: &mut MqttSession<T, S, U>,
        notify: Option<MatopNotify<T, S, U>>,
    ) -> Result<(), Error> {
        let data = format!("{{\"subId\":null,\"t\":{}}}", session.system().timestamp());
        self.simple(
            session,
            "tuya.device.upgrade.silent.get",
            Some("4.4"),
            Some(&data),
            0,
            notify,
        )
    }

    /// Requests a byte range of a file; the reply arrives on the raw topic.
    /// `0..0` requests the whole file.
    pub fn file_download_range(
        &mut self,
        session: &mut MqttSession<T, S, U>,
        url: &str,
        range_start: u32,
        range_end: u32,
        timeout_ms: u32,
        notify: Option<MatopNotify<T, S, U>>,
    ) -> Result<(), Error> {
        let kind = if range_start == 0 && range_end == 0 { 1 } else { 2 };
        let data = format!(
            "{{\"url\":{},\"range\":\"bytes={}-{}\",\"type\":{}}}",
            json_quote(url),
            range_start,
            range_end,
            kind
        );
        self.simple(
            session,
            "tuya.device.file.download",
            Some("1.0"),
            Some(&data),
            timeout_ms,
            notify,
        )
    }

    /// Uploads the reset reason.
    pub fn put_rst_log(&mut self, session: &mut MqttSession<T, S, U>, reason: i32) -> Result<(), Error> {
        let data = format!("{{\"data\":{},\"t\":{}}}", reason, session.system().timestamp());
        self.simple(session, "atop.online.debug.log", None, Some(&data), 0, None)
    }

    /// Fetches dynamic configuration.
    pub fn dynamic_cfg_get(
        &mut self,
        session: &mut MqttSession<T, S, U>,
        kind: DynamicCfgType,
        notify: Option<MatopNotify<T, S, U>>,
    ) -> Result<(), Error> {
        let types = match kind {
            DynamicCfgType::Timezone => r#"[\"timezone\"]"#,
            DynamicCfgType::RateRule => r#"[\"rateRule\"]"#,
            DynamicCfgType::All => r#"[\"timezone\",\"rateRule\"]"#,
        };
        let data = format!(
            "{{\"type\":\"{}\",\"t\":{}}}",
            types,
            session.system().timestamp()
        );
        self.simple(
            session,
            "tuya.device.dynamic.config.get",
            Some("2.0"),
            Some(&data),
            0,
            notify,
        )
    }

    /// Acknowledges dynamic configuration.
    pub fn dynamic_cfg_ack(
        &mut self,
        session: &mut MqttSession<T, S, U>,
        timezone_ack_id: Option<&str>,
        rate_rule_ack_id: Option<&str>,
        notify: Option<MatopNotify<T, S, U>>,
    ) -> Result<(), Error> {
        let mut acks = String::new();
        if let Some(id) = timezone_ack_id {
            acks.push_str(&format!("{{\"type\":\"timezone\",\"ackId\":{}}}", json_quote(id)));
        }
        if let Some(id) = rate_rule_ack_id {
            if !acks.is_empty() {
                acks.push(',');
            }
            acks.push_str(&format!("{{\"type\":\"rateRule\",\"ackId\":{}}}", id));
        }
        let data = format!(
            "{{\"ackList\":[{}],\"t\":{}}}",
            acks,
            session.system().timestamp()
        );
        self.simple(
            session,
            "tuya.device.dynamic.config.ack",
            Some("2.0"),
            Some(&data),
            0,
            notify,
        )
    }

    /// Enables the communication node.
    pub fn comm_node_enable(
        &mut self,
        session: &mut MqttSession<T, S, U>,
        notify: Option<MatopNotify<T, S, U>>,
    ) -> Result<(), Error> {
        self.simple(session, "tuya.device.comm.node.enable", Some("1.0"), None, 0, notify)
    }

    /// Disables the communication node.
    pub fn comm_node_disable(
        &mut self,
        session: &mut MqttSession<T, S, U>,
        notify: Option<MatopNotify<T, S, U>>,
    ) -> Result<(), Error> {
        self.simple(session, "tuya.device.comm.node.disable", Some("1.0"), None, 0, notify)
    }
}

fn envelope(id: u16, api: &str, t: u32, data: Option<&str>, version: Option<&str>) -> String {
    let mut body = format!(
        "{{\"id\":{},\"a\":{},\"t\":{},\"data\":{}",
        id,
        json_quote(api),
        t,
        data.unwrap_or("{}")
    );
    if let Some(version) = version {
        body.push_str(&format!(",\"v\":{}", json_quote(version)));
    }
    body.push('}');
    body
}

fn on_response<T, S, U>(session: &mut MqttSession<T, S, U>, ctx: &mut U, message: &Message<'_>)
where
    T: MqttTransport,
    S: System + Crypto,
    U: MatopContext<T, S>,
{
    let root: Value = match serde_json::from_slice(message.payload) {
        Ok(root) => root,
        Err(_) => {
            error!("matop: json parse error");
            return;
        }
    };
    let (Some(id), Some(data)) = (root.get("id").and_then(Value::as_u64), root.get("data")) else {
        error!("matop: reply lacks id or data");
        return;
    };
    let Some(entry) = u32::try_from(id).ok().and_then(|id| ctx.matop().take(id)) else {
        warn!("matop: not found id {}", id);
        return;
    };

    let result = data.get("result");
    let success = result
        .and_then(|r| r.get("success"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let t = if success {
        data.get("t")
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok())
            .unwrap_or(0)
    } else {
        0
    };
    let response = Response {
        id: entry.id,
        success,
        t,
        result: result.and_then(|r| r.get("result")),
        raw: None,
    };
    if let Some(notify) = entry.notify {
        notify(session, ctx, &response);
    }
}

fn on_file_response<T, S, U>(session: &mut MqttSession<T, S, U>, ctx: &mut U, message: &Message<'_>)
where
    T: MqttTransport,
    S: System + Crypto,
    U: MatopContext<T, S>,
{
    let payload = message.payload;
    if payload.len() < 4 {
        error!("matop: raw reply too short {}", payload.len());
        return;
    }
    let id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    info!("matop: file data id {}", id);
    let Some(entry) = ctx.matop().take(id) else {
        warn!("matop: not found id {}", id);
        return;
    };
    let response = Response {
        id: entry.id,
        success: true,
        t: 0,
        result: None,
        raw: Some(&payload[4..]),
    };
    if let Some(notify) = entry.notify {
        notify(session, ctx, &response);
    }
}
