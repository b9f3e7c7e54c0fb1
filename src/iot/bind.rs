//! Binding token over a direct broker session.
//!
//! The unactivated device resolves an endpoint with automatic region,
//! signs in with its uuid and authkey and listens on `d/ai/<uuid>` until the
//! app, having scanned the device QR code, pushes protocol 46 carrying the
//! token.

use serde_json::Value;

use crate::config::{BIND_RETRY_DELAY_MS, STATE_RETRY_DELAY_MS};
use crate::error::Error;
use crate::iot::event::Event;
use crate::iot::token::{Binding, TokenProvider};
use crate::iot::{Core, Platform};
use crate::protocol::MQ_ACTIVE_TOKEN_ON;
use crate::service::mqtt::{MqttSession, ProtocolEvent, SessionConfig};
use crate::service::signature::Identity;
use crate::system::System;

/// Default [`TokenProvider`]: waits for the token on the broker.
#[derive(Debug, Default)]
pub struct MqttBind {
    canceled: bool,
}

impl MqttBind {
    /// A provider with no pending cancel.
    pub fn new() -> Self {
        Self::default()
    }

    fn take_cancel(&mut self) -> Result<(), Error> {
        if core::mem::take(&mut self.canceled) {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Context of the bind session.
#[derive(Debug, Default)]
pub struct BindSlot {
    binding: Option<Binding>,
}

/// Reads `data.token`, `data.region` and `data.env` of an activate token
/// frame.
pub fn token_parse(data: &Value) -> Result<Binding, Error> {
    let Some(token) = data.get("token").and_then(Value::as_str) else {
        error!("bind: not found token");
        return Err(Error::JsonField);
    };
    let Some(region) = data.get("region").and_then(Value::as_str) else {
        error!("bind: not found region");
        return Err(Error::JsonField);
    };
    let regist_key = data.get("env").and_then(Value::as_str).unwrap_or("pro");
    Binding::new(token, region, regist_key).inspect_err(|_| {
        error!("bind: token, region or env length error");
    })
}

fn on_activate_token<T, S>(
    _session: &mut MqttSession<T, S, BindSlot>,
    slot: &mut BindSlot,
    event: &ProtocolEvent<'_>,
) {
    if let Ok(binding) = token_parse(event.data) {
        slot.binding = Some(binding);
    }
}

impl<P: Platform> TokenProvider<P> for MqttBind {
    fn token_get(&mut self, core: &mut Core<P>) -> Result<Binding, Error> {
        let system = core.platform.system().clone();

        loop {
            self.take_cancel()?;
            match core.endpoint.update_auto_region(core.platform.http()) {
                Ok(()) => break,
                Err(e) => {
                    warn!("bind: endpoint update failed: {}", e);
                    system.sleep_ms(STATE_RETRY_DELAY_MS);
                }
            }
        }

        let endpoint = core.endpoint.endpoint().clone();
        let config = SessionConfig {
            host: &endpoint.mqtt.host,
            port: endpoint.mqtt.port,
            cacert: endpoint.cert.as_deref(),
            identity: Identity {
                uuid: Some(core.config.uuid.as_str()),
                authkey: Some(core.config.authkey.as_str()),
                ..Default::default()
            },
            timeout_ms: core.config.bind_timeout_ms,
        };
        let transport = core.platform.mqtt_transport();
        let mut session: MqttSession<P::Transport, P::System, BindSlot> =
            MqttSession::init(transport, system.clone(), &config).map_err(|(e, _)| {
                error!("bind: mqtt init error: {}", e);
                Error::AuthenticationFail
            })?;
        let _ = session.protocol_register(MQ_ACTIVE_TOKEN_ON, on_activate_token::<P::Transport, P::System>);

        let mut slot = BindSlot::default();
        let result = self.wait_token(core, &mut session, &mut slot, &system);
        if let Err(e) = session.stop() {
            debug!("bind: stop result {}", e);
        }
        drop(session.destroy());
        result
    }

    fn cancel(&mut self) {
        self.canceled = true;
    }

    fn rearm(&mut self) {
        self.canceled = false;
    }
}

impl MqttBind {
    fn wait_token<P: Platform>(
        &mut self,
        core: &mut Core<P>,
        session: &mut MqttSession<P::Transport, P::System, BindSlot>,
        slot: &mut BindSlot,
        system: &P::System,
    ) -> Result<Binding, Error> {
        loop {
            self.take_cancel()?;
            match session.start() {
                Ok(()) => break,
                Err(e) => {
                    error!("bind: mqtt connect failed: {}, retry", e);
                    system.sleep_ms(BIND_RETRY_DELAY_MS);
                }
            }
        }

        while !session.is_connected() {
            self.take_cancel()?;
            session.loop_once(slot);
        }
        while session.take_event().is_some() {}
        core.dispatch(Event::DirectMqttConnected);
        info!("bind: mqtt direct connected, waiting for the app to scan the QR code");

        loop {
            self.take_cancel()?;
            session.loop_once(slot);
            while session.take_event().is_some() {}
            if let Some(binding) = slot.binding.take() {
                debug!("bind: token received");
                return Ok(binding);
            }
        }
    }
}
