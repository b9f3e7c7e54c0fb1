//! Device lifecycle.
//!
//! [`Client`] walks the device from power-on to a steady broker connection:
//!
//! ```text
//! Idle -> Start -> DataLoad -> TokenPending -> NetworkCheck -> EndpointUpdate -> Activating
//!           \                                      |                                 |
//!            `---------(activated)----------> NetworkCheck -> EndpointGet -----> StartupUpdate
//!                                                                                   |
//!             MqttYield <- MqttConnecting <- MqttConnectStart <---------------------'
//! ```
//!
//! Every [`Client::yield_once`] runs exactly one state. Reset, restart and
//! stop requests only schedule the next state; they take effect on the
//! following yield. Milestones are reported to the application through the
//! event handler.
//!
//! The platform (clock, crypto, storage, HTTP, ATOP, MQTT transport factory
//! and network reachability) is supplied through [`Platform`].

use alloc::boxed::Box;
use alloc::format;
use alloc::string::{String, ToString};

use crate::cloud::atop::{self, Atop, SyncStatus};
use crate::cloud::endpoint::EndpointManager;
use crate::config::{
    AUTO_UPGRADE_CHECK_INTERVAL_MS, AUTO_UPGRADE_FIRST_CHECK_MS, BASELINE_VERSION, Config,
    IDLE_SLEEP_MS, MQTT_RECV_BLOCK_TIME_MS, PROTOCOL_VERSION, STATE_RETRY_DELAY_MS,
};
use crate::error::Error;
use crate::network::application::http::HttpClient;
use crate::network::application::mqtt::MqttTransport;
use crate::protocol;
use crate::service::matop::{Matop, MatopContext, Response};
use crate::service::mqtt::{MqttSession, ProtocolEvent, PublishNotify, SessionConfig, SessionEvent};
use crate::service::signature::Identity;
use crate::storage::KvStore;
use crate::system::{Crypto, System};

pub mod activation;
pub mod bind;
pub mod event;
pub mod token;

use activation::ActivatedData;
use bind::MqttBind;
use event::{Event, ResetType, Status};
use token::{Binding, TokenProvider};

/// Everything the lifecycle needs from the device.
pub trait Platform: 'static {
    /// Clock, randomness and crypto.
    type System: System + Crypto;
    /// MQTT transport, one per session.
    type Transport: MqttTransport;
    /// Persistent key/value store.
    type Store: KvStore;
    /// HTTP client for the iot-dns lookup.
    type Http: HttpClient;
    /// ATOP client.
    type Atop: Atop;

    /// Clock, sleep and entropy.
    fn system(&self) -> &Self::System;
    /// Persistent key/value storage.
    fn store(&mut self) -> &mut Self::Store;
    /// HTTP client for the iot-dns lookup.
    fn http(&mut self) -> &mut Self::Http;
    /// ATOP (HTTPS API) client.
    fn atop(&mut self) -> &mut Self::Atop;
    /// Creates a fresh transport for a new broker session.
    fn mqtt_transport(&mut self) -> Self::Transport;
    /// Whether the cloud is reachable (link up, address assigned).
    fn network_check(&mut self) -> bool;
}

/// Lifecycle states; [`Client::yield_once`] runs one per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not started.
    Idle,
    /// Picks the activated or the binding path.
    Start,
    /// Prepares binding of an unactivated device.
    DataLoad,
    /// Waiting for the binding token.
    TokenPending,
    /// Waiting for the link.
    NetworkCheck,
    /// Loads the stored endpoint.
    EndpointGet,
    /// Resolves the endpoint through iot-dns.
    EndpointUpdate,
    /// Activation with the cloud.
    Activating,
    /// Version sync and broker session setup.
    StartupUpdate,
    /// Connects to the broker.
    MqttConnectStart,
    /// Waiting for the broker session.
    MqttConnecting,
    /// Online; services the session.
    MqttYield,
    /// Drops the broker session.
    MqttReconnect,
    /// Waiting for the link before reconnecting.
    NetworkReconnect,
    /// Starts over.
    Restart,
    /// Wipes the activation.
    Reset,
    /// Stops the broker session.
    Stop,
}

/// Application event handler.
pub type EventHandler = Box<dyn FnMut(&Event)>;

/// The broker session of an activated device.
pub type Session<P> = MqttSession<<P as Platform>::Transport, <P as Platform>::System, Core<P>>;

type Correlator<P> = Matop<<P as Platform>::Transport, <P as Platform>::System, Core<P>>;

/// Lifecycle data shared with the session callbacks.
pub struct Core<P: Platform> {
    config: Config,
    platform: P,
    state: State,
    nextstate: State,
    status: Status,
    is_activated: bool,
    activate: ActivatedData,
    endpoint: EndpointManager,
    binding: Option<Binding>,
    matop: Correlator<P>,
    handler: Option<EventHandler>,
    token_provider: Option<Box<dyn TokenProvider<P>>>,
    next_upgrade_check_ms: Option<u64>,
}

impl<P: Platform> MatopContext<P::Transport, P::System> for Core<P> {
    fn matop(&mut self) -> &mut Correlator<P> {
        &mut self.matop
    }
}

impl<P: Platform> Core<P> {
    /// The configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The platform.
    pub fn platform(&mut self) -> &mut P {
        &mut self.platform
    }

    /// The endpoint manager.
    pub fn endpoint(&mut self) -> &mut EndpointManager {
        &mut self.endpoint
    }

    /// Sends `event` to the application.
    pub fn dispatch(&mut self, event: Event) {
        debug!("iot: event {}", event.name());
        if let Some(handler) = self.handler.as_mut() {
            handler(&event);
        }
    }

    fn sleep(&self, ms: u32) {
        self.platform.system().sleep_ms(ms);
    }

    fn storage_key(&self, suffix: &str) -> String {
        format!("{}.{}", self.config.namespace(), suffix)
    }

    fn activated_data_remove(&mut self) -> Result<(), Error> {
        warn!("iot: activated data remove");
        if !self.is_activated {
            return Err(Error::Com);
        }
        let schema_id = self.activate.schema_id.clone();
        let namespace = self.config.namespace().to_string();
        let store = self.platform.store();
        if let Err(e) = store.delete(&schema_id) {
            warn!("iot: schema delete failed: {}", e);
        }
        if let Err(e) = store.delete(&namespace) {
            warn!("iot: record delete failed: {}", e);
        }
        EndpointManager::remove(store);
        self.is_activated = false;
        self.activate = ActivatedData::default();
        info!("iot: activated data removed");
        self.dispatch(Event::ResetComplete);
        Ok(())
    }

    fn version_update_sync(&mut self) -> Result<(), Error> {
        let mut versions = match self.config.modules.as_deref() {
            Some(modules) => {
                let open = modules.trim_end().strip_suffix(']').ok_or(Error::InvalidParam)?;
                if open.trim_end().ends_with('[') {
                    String::from(open)
                } else {
                    format!("{},", open)
                }
            }
            None => String::from("["),
        };
        versions.push_str(&format!(
            r#"{{"otaChannel":{},"protocolVer":"{}","baselineVer":"{}","softVer":{}}}]"#,
            0,
            PROTOCOL_VERSION,
            BASELINE_VERSION,
            protocol::json_quote(&self.config.software_ver)
        ));
        debug!("iot: versions {}", versions.as_str());

        let key = self.storage_key("ver");
        match self.platform.store().get(&key) {
            Ok(saved) if saved == versions.as_bytes() => {
                debug!("iot: version unchanged, no sync needed");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => warn!("iot: saved version not found: {}", e),
        }

        let endpoint = self.endpoint.endpoint().clone();
        let timestamp = self.platform.system().timestamp();
        atop::version_update(
            self.platform.atop(),
            &endpoint,
            &self.activate.devid,
            &self.activate.seckey,
            &versions,
            timestamp,
        )?;
        self.platform.store().set(&key, versions.as_bytes())?;
        Ok(())
    }

    fn on_session_event(&mut self, session: &mut Session<P>, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                let devid = self.activate.devid.clone();
                if let Err(e) = self.matop.init(session, &devid) {
                    error!("iot: matop init failed: {}", e);
                }
                if self.next_upgrade_check_ms.is_none() {
                    let now = self.platform.system().now_ms();
                    self.next_upgrade_check_ms = Some(now + AUTO_UPGRADE_FIRST_CHECK_MS);
                }
                self.status = Status::MqttConnected;
                self.dispatch(Event::MqttConnected);
            }
            SessionEvent::Disconnected => self.dispatch(Event::MqttDisconnect),
            SessionEvent::Unbind => {
                info!("iot: mqtt unbind");
                self.nextstate = State::Reset;
                let endpoint = self.endpoint.endpoint().clone();
                let timestamp = self.platform.system().timestamp();
                let status = atop::sync_check(
                    self.platform.atop(),
                    &endpoint,
                    &self.activate.devid,
                    &self.activate.seckey,
                    timestamp,
                );
                let kind = match status {
                    Ok(SyncStatus::ResetFactory) => ResetType::RemoteFactory,
                    _ => ResetType::RemoteUnactive,
                };
                self.dispatch(Event::Reset(kind));
            }
        }
    }
}

fn drain_session_events<P: Platform>(session: &mut Session<P>, core: &mut Core<P>) {
    while let Some(event) = session.take_event() {
        core.on_session_event(session, event);
    }
}

fn on_dp_receive<P: Platform>(_session: &mut Session<P>, core: &mut Core<P>, event: &ProtocolEvent<'_>) {
    if event.data.get("dps").is_none() {
        error!("iot: not found dps");
        return;
    }
    core.dispatch(Event::DpReceive(event.data.clone()));
}

fn on_reset_command<P: Platform>(_session: &mut Session<P>, core: &mut Core<P>, event: &ProtocolEvent<'_>) {
    match event.data.get("gwId").and_then(|v| v.as_str()) {
        Some(gw_id) => warn!("iot: reset id {}", gw_id),
        None => error!("iot: not found gwId"),
    }
    let kind = if event.root.get("type").and_then(|v| v.as_str()) == Some("reset_factory") {
        debug!("iot: reset factory command");
        ResetType::RemoteFactory
    } else {
        debug!("iot: unactive command");
        ResetType::RemoteUnactive
    };
    core.dispatch(Event::Reset(kind));
    core.nextstate = State::Reset;
}

fn on_upgrade_info<P: Platform>(_session: &mut Session<P>, core: &mut Core<P>, response: &Response<'_>) {
    if !response.success {
        return;
    }
    core.dispatch(Event::TimestampSync(response.t));
    if let Some(result) = response.result {
        core.dispatch(Event::UpgradeNotify(result.clone()));
    }
}

fn on_app_upgrade_info<P: Platform>(session: &mut Session<P>, core: &mut Core<P>, response: &Response<'_>) {
    if !response.success {
        if let Err(e) = core.matop.upgrade_status_update(session, 0, 4) {
            error!("iot: upgrade status update failed: {}", e);
        }
        return;
    }
    on_upgrade_info(session, core, response);
}

fn on_upgrade_notify<P: Platform>(session: &mut Session<P>, core: &mut Core<P>, event: &ProtocolEvent<'_>) {
    let channel = event
        .data
        .get("firmwareType")
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0);
    if let Err(e) = core
        .matop
        .upgrade_info_get(session, channel, Some(Box::new(on_app_upgrade_info::<P>)))
    {
        error!("iot: upgrade info get error: {}", e);
    }
}

fn on_dp_cache_notify<P: Platform>(_session: &mut Session<P>, core: &mut Core<P>, _event: &ProtocolEvent<'_>) {
    core.dispatch(Event::DpCacheNotify);
}

/// The device lifecycle.
pub struct Client<P: Platform> {
    core: Core<P>,
    session: Option<Session<P>>,
}

impl<P: Platform> Client<P> {
    /// Validates `config`, loads the endpoint and the activation record.
    ///
    /// The device counts as activated when the record parses and its schema
    /// is stored. The client starts in [`State::Idle`].
    pub fn init(mut config: Config, mut platform: P, handler: Option<EventHandler>) -> Result<Self, Error> {
        config.validate()?;
        info!("iot: init");
        debug!("iot: software_ver {}", config.software_ver.as_str());
        debug!("iot: productkey {}", config.product_key.as_str());
        debug!("iot: uuid {}", config.uuid.as_str());
        if config.storage_namespace.is_none() {
            config.storage_namespace = Some(config.uuid.clone());
        }

        let mut endpoint = EndpointManager::new();
        let _ = endpoint.init(platform.store());

        let (is_activated, activate) =
            match activation::activated_data_load(platform.store(), config.namespace()) {
                Ok(data) => (true, data),
                Err(_) => (false, ActivatedData::default()),
            };

        Ok(Self {
            core: Core {
                config,
                platform,
                state: State::Idle,
                nextstate: State::Idle,
                status: Status::Unactive,
                is_activated,
                activate,
                endpoint,
                binding: None,
                matop: Matop::new(),
                handler,
                token_provider: None,
                next_upgrade_check_ms: None,
            },
            session: None,
        })
    }

    /// Tears the client down and hands the platform back.
    pub fn destroy(mut self) -> P {
        if let Some(mut session) = self.session.take() {
            self.core.matop.destroy(&mut session);
            let _ = session.stop();
            drop(session.destroy());
        }
        self.core.platform
    }

    /// Replaces the token source used while unactivated.
    pub fn token_provider_register(&mut self, provider: Box<dyn TokenProvider<P>>) {
        self.core.token_provider = Some(provider);
    }

    /// Schedules [`State::Start`]. Only valid while idle.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.core.state != State::Idle {
            return Err(Error::Com);
        }
        self.core.nextstate = State::Start;
        Ok(())
    }

    /// Schedules [`State::Stop`].
    pub fn stop(&mut self) -> Result<(), Error> {
        self.core.nextstate = State::Stop;
        Ok(())
    }

    /// Schedules a broker reconnect. Only valid in [`State::MqttYield`].
    pub fn reconnect(&mut self) -> Result<(), Error> {
        if self.core.state != State::MqttYield {
            return Err(Error::Com);
        }
        self.core.nextstate = State::MqttReconnect;
        Ok(())
    }

    /// Factory reset: tells the cloud (when connected and activated),
    /// reports [`ResetType::Factory`] and schedules [`State::Reset`]. A
    /// token wait in progress is canceled.
    pub fn reset(&mut self) -> Result<(), Error> {
        let mut result = Ok(());
        if self.core.state == State::MqttYield && self.core.is_activated {
            if let Some(session) = self.session.as_mut() {
                result = self.core.matop.client_reset(session);
            }
        }
        let waiting = self.core.state == State::TokenPending || self.core.nextstate == State::TokenPending;
        if waiting {
            if let Some(provider) = self.core.token_provider.as_mut() {
                provider.cancel();
            }
        }
        self.core.dispatch(Event::Reset(ResetType::Factory));
        self.core.nextstate = State::Reset;
        result
    }

    /// Runs one lifecycle step.
    pub fn yield_once(&mut self) -> Result<(), Error> {
        self.core.state = self.core.nextstate;
        match self.core.state {
            State::MqttYield => self.run_mqtt_yield(),
            State::Idle => self.core.sleep(IDLE_SLEEP_MS),
            State::Start => {
                debug!("iot: STATE_START");
                if self.core.is_activated {
                    self.core.status = Status::UnconnectRouter;
                    self.core.nextstate = State::NetworkCheck;
                } else {
                    self.core.status = Status::Unactive;
                    self.core.nextstate = State::DataLoad;
                }
            }
            State::DataLoad => {
                if self.core.is_activated {
                    self.core.nextstate = State::NetworkCheck;
                } else {
                    info!("iot: activation data read fail, go activation mode");
                    self.core.binding = None;
                    self.core.nextstate = State::TokenPending;
                }
            }
            State::TokenPending => self.run_token_pending(),
            State::NetworkCheck | State::NetworkReconnect => {
                if self.core.platform.network_check() {
                    self.core.nextstate = match self.core.state {
                        State::NetworkReconnect => State::MqttConnectStart,
                        _ if self.core.is_activated => State::EndpointGet,
                        _ => State::EndpointUpdate,
                    };
                } else {
                    self.core.sleep(STATE_RETRY_DELAY_MS);
                }
            }
            State::EndpointGet => {
                let core = &mut self.core;
                let cert = core.endpoint.cert_get(core.platform.store());
                let domain = core.endpoint.domain_get(core.platform.store());
                if cert.is_err() || domain.is_err() {
                    warn!("iot: stored endpoint incomplete, need update");
                    core.nextstate = State::EndpointUpdate;
                } else {
                    core.nextstate = State::StartupUpdate;
                }
            }
            State::EndpointUpdate => {
                let core = &mut self.core;
                if let Err(e) = core.endpoint.update(core.platform.http()) {
                    warn!("iot: endpoint update failed: {}", e);
                    core.sleep(STATE_RETRY_DELAY_MS);
                } else if core.is_activated {
                    endpoint_persist(core);
                    core.nextstate = State::StartupUpdate;
                } else {
                    core.nextstate = State::Activating;
                }
            }
            State::Activating => self.run_activating(),
            State::StartupUpdate => {
                self.core.dispatch(Event::BindedNotify);
                if let Err(e) = self.run_startup_update() {
                    error!("iot: mqtt init failed: {}", e);
                    self.core.sleep(STATE_RETRY_DELAY_MS);
                    self.core.nextstate = State::EndpointUpdate;
                } else {
                    self.core.nextstate = State::MqttConnectStart;
                }
            }
            State::MqttConnectStart => self.run_mqtt_connect_start(),
            State::MqttConnecting => {
                if let Some(session) = self.session.as_mut() {
                    if session.is_connected() {
                        info!("iot: mqtt connected");
                        self.core.nextstate = State::MqttYield;
                    } else {
                        session.loop_once(&mut self.core);
                        drain_session_events(session, &mut self.core);
                    }
                } else {
                    self.core.nextstate = State::StartupUpdate;
                }
            }
            State::MqttReconnect => {
                if let Some(session) = self.session.as_mut() {
                    let _ = session.stop();
                    drain_session_events(session, &mut self.core);
                }
                self.core.nextstate = State::NetworkReconnect;
            }
            State::Restart => {
                warn!("iot: client restart");
                self.core.nextstate = State::Start;
            }
            State::Reset => {
                self.run_reset();
                self.core.nextstate = State::Restart;
            }
            State::Stop => {
                if let Some(session) = self.session.as_mut() {
                    let _ = session.stop();
                    drain_session_events(session, &mut self.core);
                }
                self.core.nextstate = State::Idle;
            }
        }
        Ok(())
    }

    fn run_mqtt_yield(&mut self) {
        let Some(session) = self.session.as_mut() else {
            self.core.nextstate = State::StartupUpdate;
            return;
        };
        let core = &mut self.core;
        session.loop_once(core);
        drain_session_events(session, core);
        let _ = Matop::yield_once(session, core);

        let now = core.platform.system().now_ms();
        if core.next_upgrade_check_ms.is_some_and(|due| now >= due) {
            if session.is_connected() {
                if let Err(e) = core
                    .matop
                    .auto_upgrade_info_get(session, Some(Box::new(on_upgrade_info::<P>)))
                {
                    warn!("iot: auto upgrade check failed: {}", e);
                }
            }
            core.next_upgrade_check_ms = Some(now + AUTO_UPGRADE_CHECK_INTERVAL_MS);
        }
    }

    fn run_token_pending(&mut self) {
        let core = &mut self.core;
        let mut provider: Box<dyn TokenProvider<P>> = match core.token_provider.take() {
            Some(provider) => provider,
            None => {
                info!("iot: no token provider, using mqtt direct bind");
                Box::new(MqttBind::new())
            }
        };
        core.dispatch(Event::BindStart);
        let result = provider.token_get(core);
        core.token_provider = Some(provider);

        match result {
            Ok(binding) => {
                info!("iot: token {}", binding.token.as_str());
                info!("iot: region {}", binding.region.as_str());
                info!("iot: regist_key {}", binding.regist_key.as_str());
                if let Err(e) =
                    core.endpoint
                        .region_regist_set(core.platform.store(), &binding.region, &binding.regist_key)
                {
                    error!("iot: region save failed: {}", e);
                }
                core.dispatch(Event::BindTokenOn(binding.token.as_str().into()));
                core.binding = Some(binding);
                core.nextstate = State::NetworkCheck;
            }
            Err(Error::Canceled) => {
                warn!("iot: token wait canceled");
                core.nextstate = State::Reset;
            }
            Err(e) => error!("iot: get token fail: {}, retry", e),
        }
    }

    fn run_activating(&mut self) {
        let core = &mut self.core;
        let Some(token) = core.binding.as_ref().map(|b| b.token.clone()) else {
            error!("iot: no binding token");
            core.nextstate = State::TokenPending;
            return;
        };
        if let Err(e) = activation::activate_process(core, &token) {
            error!("iot: activate failed: {}", e);
            core.sleep(STATE_RETRY_DELAY_MS);
            return;
        }
        core.binding = None;

        let namespace = core.config.namespace().to_string();
        match activation::activated_data_load(core.platform.store(), &namespace) {
            Ok(data) => core.activate = data,
            Err(_) => {
                core.nextstate = State::Reset;
                return;
            }
        }
        endpoint_persist(core);
        core.is_activated = true;
        core.nextstate = State::StartupUpdate;
        core.dispatch(Event::ActivateSuccessed);
    }

    fn run_startup_update(&mut self) -> Result<(), Error> {
        if let Err(e) = self.core.version_update_sync() {
            warn!("iot: version sync failed: {}", e);
        }

        if let Some(mut old) = self.session.take() {
            self.core.matop.destroy(&mut old);
            drop(old.destroy());
        }

        let core = &mut self.core;
        let endpoint = core.endpoint.endpoint().clone();
        let system = core.platform.system().clone();
        let transport = core.platform.mqtt_transport();
        let config = SessionConfig {
            host: &endpoint.mqtt.host,
            port: endpoint.mqtt.port,
            cacert: endpoint.cert.as_deref(),
            identity: Identity {
                devid: Some(core.activate.devid.as_str()),
                seckey: Some(core.activate.seckey.as_str()),
                localkey: Some(core.activate.localkey.as_str()),
                ..Default::default()
            },
            timeout_ms: MQTT_RECV_BLOCK_TIME_MS,
        };
        let session = Session::<P>::init(transport, system, &config).map_err(|(e, _)| e)?;
        self.session = Some(session);
        Ok(())
    }

    fn run_mqtt_connect_start(&mut self) {
        let Some(session) = self.session.as_mut() else {
            self.core.nextstate = State::StartupUpdate;
            return;
        };
        let result = session.start();
        drain_session_events(session, &mut self.core);
        if let Err(e) = result {
            error!("iot: mqtt start error: {}", e);
            return;
        }
        // Re-registration after a reconnect is refused as a duplicate.
        let _ = session.protocol_register(protocol::CMD, on_dp_receive::<P>);
        let _ = session.protocol_register(protocol::GW_RESET, on_reset_command::<P>);
        let _ = session.protocol_register(protocol::UPGD_REQ, on_upgrade_notify::<P>);
        let _ = session.protocol_register(protocol::MQ_DPCACHE_NOTIFY, on_dp_cache_notify::<P>);
        if self.core.nextstate == State::MqttConnectStart {
            self.core.nextstate = State::MqttConnecting;
        }
    }

    fn run_reset(&mut self) {
        warn!("iot: client reset");
        if let Some(mut session) = self.session.take() {
            if self.core.is_activated && session.is_connected() {
                let _ = session.stop();
            }
            self.core.matop.destroy(&mut session);
            drop(session.destroy());
        }
        self.core.next_upgrade_check_ms = None;

        let core = &mut self.core;
        if !core.activate.devid.is_empty() {
            let key = activation::devid_key(core.config.namespace());
            let devid = core.activate.devid.clone();
            if let Err(e) = core.platform.store().set(&key, devid.as_bytes()) {
                warn!("iot: devid save failed: {}", e);
            }
        }
        if let Err(e) = core.activated_data_remove() {
            debug!("iot: nothing to remove: {}", e);
        }
        if let Some(provider) = core.token_provider.as_mut() {
            provider.rearm();
        }
    }

    fn dp_report_json_common(
        &mut self,
        dps: &str,
        time: Option<&str>,
        notify: Option<PublishNotify>,
        timeout_ms: u32,
        defer: bool,
    ) -> Result<(), Error> {
        if dps.is_empty() {
            return Err(Error::InvalidParam);
        }
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        let devid = protocol::json_quote(&self.core.activate.devid);
        let body = match time {
            Some(time) => format!(r#"{{"devId":{},"dps":{},"t":{}}}"#, devid, dps, time),
            None => format!(r#"{{"devId":{},"dps":{}}}"#, devid, dps),
        };
        session.protocol_data_publish_common(None, protocol::DATA_PUSH, &body, notify, timeout_ms, defer)
    }

    /// Reports data points (`{"<dpid>":<value>,...}`).
    pub fn dp_report_json(&mut self, dps: &str) -> Result<(), Error> {
        self.dp_report_json_common(dps, None, None, 0, false)
    }

    /// Reports data points with an explicit time stamp.
    pub fn dp_report_json_with_time(&mut self, dps: &str, time: &str) -> Result<(), Error> {
        self.dp_report_json_common(dps, Some(time), None, 0, false)
    }

    /// Reports data points at QoS 1 from the next yield; `notify` receives
    /// the outcome.
    pub fn dp_report_json_async(
        &mut self,
        dps: &str,
        time: Option<&str>,
        notify: PublishNotify,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        self.dp_report_json_common(dps, time, Some(notify), timeout_ms, true)
    }

    /// Reports data points at QoS 1 right away; `notify` receives the
    /// outcome.
    pub fn dp_report_json_with_notify(
        &mut self,
        dps: &str,
        time: Option<&str>,
        notify: PublishNotify,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        self.dp_report_json_common(dps, time, Some(notify), timeout_ms, false)
    }

    /// Reports firmware download progress.
    pub fn upgrade_progress_report(&mut self, channel: u32, percent: u32) -> Result<(), Error> {
        self.session
            .as_mut()
            .ok_or(Error::NotConnected)?
            .upgrade_progress_report(channel, percent)
    }

    /// Replaces the extension module versions and syncs them.
    pub fn extension_modules_version_update(&mut self, modules: &str) -> Result<(), Error> {
        self.core.config.modules = Some(String::from(modules));
        self.core.version_update_sync()
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.core.state
    }

    /// State the next yield runs.
    pub fn next_state(&self) -> State {
        self.core.nextstate
    }

    /// Connection status.
    pub fn status(&self) -> Status {
        self.core.status
    }

    /// Whether the device holds cloud credentials.
    pub fn activated(&self) -> bool {
        self.core.is_activated
    }

    /// The activation record.
    pub fn activated_data(&self) -> &ActivatedData {
        &self.core.activate
    }

    /// Device id, empty before activation.
    pub fn devid(&self) -> &str {
        &self.core.activate.devid
    }

    /// Frame cipher key.
    pub fn localkey(&self) -> &str {
        &self.core.activate.localkey
    }

    /// Secret key for signed cloud calls.
    pub fn seckey(&self) -> &str {
        &self.core.activate.seckey
    }

    /// Standard time zone, for example `+08:00`.
    pub fn timezone(&self) -> &str {
        &self.core.activate.timezone
    }

    /// Whether the broker session is connected.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_connected())
    }

    /// The broker session, once created.
    pub fn session(&self) -> Option<&Session<P>> {
        self.session.as_ref()
    }

    /// Shared lifecycle data.
    pub fn core(&mut self) -> &mut Core<P> {
        &mut self.core
    }

    /// The broker session together with the lifecycle data, for issuing
    /// correlated requests.
    pub fn session_and_core(&mut self) -> Option<(&mut Session<P>, &mut Core<P>)> {
        self.session.as_mut().map(|s| (s, &mut self.core))
    }
}

fn endpoint_persist<P: Platform>(core: &mut Core<P>) {
    let cert = core.endpoint.cert_set(core.platform.store());
    let domain = core.endpoint.domain_set(core.platform.store());
    if cert.is_err() || domain.is_err() {
        warn!("iot: endpoint save failed, update needed on next start");
    }
}
