//! Lifecycle events delivered to the application.

use alloc::string::String;

use serde_json::Value;

/// Why the device is being reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResetType {
    /// Local factory reset requested by the application.
    Factory = 0,
    /// The app removed the device.
    RemoteUnactive = 1,
    /// Local unbind without data wipe.
    LocalUnactive = 2,
    /// The app removed the device and wiped its data.
    RemoteFactory = 3,
    /// The cloud reported a factory reset during activation.
    DataFactory = 4,
}

/// Connection status advertised while starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Not activated yet.
    Unactive = 0,
    /// Waiting for network provisioning.
    NetcfgIdle = 1,
    /// Activated, link not up yet.
    UnconnectRouter = 2,
    /// Link up.
    WifiConnected = 3,
    /// Broker session established.
    MqttConnected = 4,
}

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Local data is being wiped.
    Reset(ResetType),
    /// Waiting for a binding token.
    BindStart,
    /// A binding token arrived.
    BindTokenOn(String),
    /// The cloud activated the device.
    ActivateSuccessed,
    /// The broker connection is up.
    MqttConnected,
    /// The broker connection dropped.
    MqttDisconnect,
    /// Data points sent by the cloud (`data` of a CMD frame).
    DpReceive(Value),
    /// A firmware upgrade is available.
    UpgradeNotify(Value),
    /// Local data was wiped.
    ResetComplete,
    /// Server time, POSIX seconds.
    TimestampSync(u32),
    /// The cloud holds cached data points for the device.
    DpCacheNotify,
    /// The device is bound and about to connect.
    BindedNotify,
    /// The pre-activation broker connection is up.
    DirectMqttConnected,
}

/// Payload of an event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventData<'a> {
    /// No payload.
    Undefined,
    /// Numeric payload.
    Integer(i64),
    /// Text payload.
    String(&'a str),
    /// Structured payload.
    Json(&'a Value),
}

impl Event {
    /// The event payload as a tagged value.
    pub fn data(&self) -> EventData<'_> {
        match self {
            Event::Reset(kind) => EventData::Integer(*kind as i64),
            Event::TimestampSync(t) => EventData::Integer(i64::from(*t)),
            Event::BindTokenOn(token) => EventData::String(token),
            Event::DpReceive(value) | Event::UpgradeNotify(value) => EventData::Json(value),
            _ => EventData::Undefined,
        }
    }

    /// Short name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Reset(_) => "RESET",
            Event::BindStart => "BIND_START",
            Event::BindTokenOn(_) => "BIND_TOKEN_ON",
            Event::ActivateSuccessed => "ACTIVATE_SUCCESSED",
            Event::MqttConnected => "MQTT_CONNECTED",
            Event::MqttDisconnect => "MQTT_DISCONNECT",
            Event::DpReceive(_) => "DP_RECEIVE",
            Event::UpgradeNotify(_) => "UPGRADE_NOTIFY",
            Event::ResetComplete => "RESET_COMPLETE",
            Event::TimestampSync(_) => "TIMESTAMP_SYNC",
            Event::DpCacheNotify => "DPCACHE_NOTIFY",
            Event::BindedNotify => "BINDED_NOTIFY",
            Event::DirectMqttConnected => "DIRECT_MQTT_CONNECTED",
        }
    }
}
