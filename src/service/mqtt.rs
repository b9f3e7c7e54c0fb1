//! MQTT session manager.
//!
//! [`MqttSession`] owns one [`MqttTransport`] and layers on top of it:
//!
//! - topic-keyed inbound fan-out (every handle registered for the exact
//!   topic fires)
//! - protocol-id-keyed fan-out of the frames arriving on the default inbound
//!   topic
//! - fire-and-forget QoS 0 publishes and acknowledged QoS 1 publishes with a
//!   deadline
//! - reconnect with jittered exponential backoff
//!
//! Callbacks are plain `fn` pointers receiving the session and a caller
//! supplied context `U`, so a handler can publish, register further
//! handlers or reach application state without shared ownership. Lifecycle
//! notifications (connected, disconnected, credentials revoked) are queued
//! and collected with [`MqttSession::take_event`].

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use serde_json::Value;

use crate::config::{
    MQTT_CONNECT_RETRY_MAX_ATTEMPTS, MQTT_CONNECT_RETRY_MAX_DELAY_MS,
    MQTT_CONNECT_RETRY_MIN_DELAY_MS, MQTT_KEEPALIVE_INTERVAL_S,
};
use crate::error::Error;
use crate::network::application::mqtt::{ConnectOptions, Incoming, MqttTransport, QoS};
use crate::network::error::Error as NetworkError;
use crate::protocol;
use crate::service::signature::{Identity, Signature};
use crate::system::backoff::Backoff;
use crate::system::{Crypto, System};

/// An inbound application message.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    /// Packet identifier, zero for QoS 0.
    pub msgid: u16,
    /// Topic the message arrived on.
    pub topic: &'a str,
    /// Raw message body.
    pub payload: &'a [u8],
}

/// A decoded frame from the default inbound topic.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolEvent<'a> {
    /// Protocol id of the frame.
    pub id: u16,
    /// The whole document, `{"protocol":..,"t":..,"data":..}`.
    pub root: &'a Value,
    /// The `data` member of the document.
    pub data: &'a Value,
}

/// Topic handler.
pub type MessageCallback<T, S, U> = fn(&mut MqttSession<T, S, U>, &mut U, &Message<'_>);

/// Protocol handler.
pub type ProtocolCallback<T, S, U> = fn(&mut MqttSession<T, S, U>, &mut U, &ProtocolEvent<'_>);

/// One-shot completion of an acknowledged publish.
pub type PublishNotify = Box<dyn FnOnce(Result<(), Error>)>;

/// Session lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The broker accepted the connection.
    Connected,
    /// The connection dropped or was closed.
    Disconnected,
    /// The broker refused the credentials; the device was unbound remotely.
    Unbind,
}

/// Parameters of [`MqttSession::init`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfig<'a> {
    /// Broker host.
    pub host: &'a str,
    /// Broker port.
    pub port: u16,
    /// DER encoded CA certificate of the broker.
    pub cacert: Option<&'a [u8]>,
    /// Identity the access signature is derived from.
    pub identity: Identity<'a>,
    /// Receive block time handed to the transport.
    pub timeout_ms: u32,
}

struct SubscribeHandle<T, S, U> {
    topic: String,
    // None selects the default protocol frame handler.
    callback: Option<MessageCallback<T, S, U>>,
}

struct ProtocolHandle<T, S, U> {
    id: u16,
    callback: ProtocolCallback<T, S, U>,
}

struct PublishHandle {
    msgid: u16,
    topic: String,
    payload: Vec<u8>,
    deadline_ms: u64,
    notify: PublishNotify,
}

fn same_message_callback<T, S, U>(
    a: Option<MessageCallback<T, S, U>>,
    b: Option<MessageCallback<T, S, U>>,
) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => core::ptr::fn_addr_eq(a, b),
        _ => false,
    }
}

/// The MQTT session of one device.
pub struct MqttSession<T, S, U> {
    transport: T,
    system: S,
    host: String,
    port: u16,
    cacert: Option<Vec<u8>>,
    timeout_ms: u32,
    signature: Signature,
    backoff: Backoff,
    sequence_out: u32,
    is_connected: bool,
    manual_disconnect: bool,
    subscribes: Vec<SubscribeHandle<T, S, U>>,
    protocols: Vec<ProtocolHandle<T, S, U>>,
    publishes: VecDeque<PublishHandle>,
    events: VecDeque<SessionEvent>,
}

impl<T, S, U> MqttSession<T, S, U>
where
    T: MqttTransport,
    S: System + Crypto,
{
    /// Derives the access signature and prepares a stopped session.
    ///
    /// The session takes ownership of `transport`; [`destroy`](Self::destroy)
    /// hands it back.
    pub fn init(transport: T, system: S, config: &SessionConfig<'_>) -> Result<Self, (Error, T)> {
        let signature = match Signature::derive(&system, &config.identity) {
            Ok(signature) => signature,
            Err(e) => return Err((e, transport)),
        };
        if config.host.is_empty() {
            return Err((Error::InvalidParam, transport));
        }
        let sequence_out = system.random() & 0xffff;
        Ok(Self {
            transport,
            system,
            host: String::from(config.host),
            port: config.port,
            cacert: config.cacert.map(<[u8]>::to_vec),
            timeout_ms: config.timeout_ms,
            signature,
            backoff: Backoff::new(
                MQTT_CONNECT_RETRY_MIN_DELAY_MS,
                MQTT_CONNECT_RETRY_MAX_DELAY_MS,
                MQTT_CONNECT_RETRY_MAX_ATTEMPTS,
            ),
            sequence_out,
            is_connected: false,
            manual_disconnect: true,
            subscribes: Vec::new(),
            protocols: Vec::new(),
            publishes: VecDeque::new(),
            events: VecDeque::new(),
        })
    }

    /// Releases the session and returns the transport.
    ///
    /// Pending acknowledged publishes are dropped without notification.
    pub fn destroy(self) -> T {
        self.transport
    }

    /// The derived access signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Whether the broker connection is up.
    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    /// The platform services the session runs on.
    pub fn system(&self) -> &S {
        &self.system
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Next queued lifecycle notification.
    pub fn take_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Number of acknowledged publishes still waiting for PUBACK.
    pub fn pending_publishes(&self) -> usize {
        self.publishes.len()
    }

    /// Number of topic handles.
    pub fn subscribe_handles(&self) -> usize {
        self.subscribes.len()
    }

    /// Number of protocol handles.
    pub fn protocol_handles(&self) -> usize {
        self.protocols.len()
    }

    fn connect(&mut self) -> Result<(), NetworkError> {
        let options = ConnectOptions {
            host: &self.host,
            port: self.port,
            ca_cert: self.cacert.as_deref(),
            client_id: &self.signature.clientid,
            username: &self.signature.username,
            password: &self.signature.password,
            keep_alive_seconds: MQTT_KEEPALIVE_INTERVAL_S,
            timeout_ms: self.timeout_ms,
            clean_session: true,
        };
        self.transport.connect(&options)
    }

    fn backoff_sleep(&mut self) {
        if let Some(delay) = self.backoff.next_delay(self.system.random()) {
            warn!("mqtt: connection failed, retrying after {} ms backoff", delay);
            self.system.sleep_ms(delay);
        }
    }

    fn on_connected(&mut self) {
        info!("mqtt: client connected");
        let topic_in = String::from(self.signature.topic_in.as_str());
        if !self
            .subscribes
            .iter()
            .any(|h| h.topic == topic_in && h.callback.is_none())
        {
            self.subscribes.push(SubscribeHandle {
                topic: topic_in,
                callback: None,
            });
        }

        let mut topics: Vec<String> = Vec::new();
        for handle in &self.subscribes {
            if !topics.contains(&handle.topic) {
                topics.push(handle.topic.clone());
            }
        }
        for topic in &topics {
            match self.transport.subscribe(topic, QoS::AtLeastOnce) {
                Ok(msgid) => debug!("mqtt: subscribe {} sent, msgid {}", topic.as_str(), msgid),
                Err(e) => error!("mqtt: subscribe {} failed: {}", topic.as_str(), e),
            }
        }

        self.is_connected = true;
        self.backoff.reset();
        self.events.push_back(SessionEvent::Connected);
    }

    fn on_disconnected(&mut self) {
        if self.is_connected {
            info!("mqtt: client disconnected");
            self.is_connected = false;
            self.events.push_back(SessionEvent::Disconnected);
        }
    }

    /// Connects to the broker.
    ///
    /// A credential rejection queues [`SessionEvent::Unbind`] and returns
    /// [`Error::AuthenticationFail`]. Any other failure sleeps for the next
    /// backoff delay and returns [`Error::Com`].
    pub fn start(&mut self) -> Result<(), Error> {
        info!("mqtt: clientid {}", self.signature.clientid.as_str());
        info!("mqtt: username {}", self.signature.username.as_str());
        debug!("mqtt: password {}", self.signature.password.as_str());
        info!("mqtt: topic_in {}", self.signature.topic_in.as_str());
        info!("mqtt: topic_out {}", self.signature.topic_out.as_str());
        self.manual_disconnect = false;

        match self.connect() {
            Ok(()) => {
                self.on_connected();
                Ok(())
            }
            Err(NetworkError::NotAuthorized) => {
                error!("mqtt: connect refused, not authorized");
                self.events.push_back(SessionEvent::Unbind);
                Err(Error::AuthenticationFail)
            }
            Err(e) => {
                error!("mqtt: connect failed: {}", e);
                self.backoff_sleep();
                Err(Error::Com)
            }
        }
    }

    /// Drops the default subscription and disconnects. Subsequent
    /// [`loop_once`](Self::loop_once) calls do nothing until the next
    /// [`start`](Self::start).
    pub fn stop(&mut self) -> Result<(), Error> {
        let topic_in = String::from(self.signature.topic_in.as_str());
        if let Err(e) = self.subscribe_unregister(&topic_in) {
            debug!("mqtt: unsubscribe result {}", e);
        }
        if let Err(e) = self.transport.disconnect() {
            debug!("mqtt: disconnect result {}", e);
        }
        self.on_disconnected();
        self.manual_disconnect = true;
        Ok(())
    }

    /// Drives the session once.
    ///
    /// Reconnects when the link is down; otherwise expires or (re)sends the
    /// acknowledged publishes and dispatches everything the transport has
    /// buffered.
    pub fn loop_once(&mut self, ctx: &mut U) {
        if self.manual_disconnect {
            return;
        }

        if !self.is_connected {
            match self.connect() {
                Ok(()) => self.on_connected(),
                Err(NetworkError::NotAuthorized) => {
                    error!("mqtt: reconnect refused, not authorized");
                    self.events.push_back(SessionEvent::Unbind);
                }
                Err(e) => {
                    error!("mqtt: reconnect failed: {}", e);
                    self.backoff_sleep();
                }
            }
            return;
        }

        let now = self.system.now_ms();
        let mut index = 0;
        while index < self.publishes.len() {
            if self.publishes[index].deadline_ms <= now {
                if let Some(handle) = self.publishes.remove(index) {
                    warn!("mqtt: publish {} timed out", handle.msgid);
                    (handle.notify)(Err(Error::Timeout));
                }
                continue;
            }
            let handle = &mut self.publishes[index];
            if handle.msgid == 0 {
                match self
                    .transport
                    .publish(&handle.topic, &handle.payload, QoS::AtLeastOnce)
                {
                    Ok(msgid) => handle.msgid = msgid,
                    Err(e) => warn!("mqtt: deferred publish failed: {}", e),
                }
            }
            index += 1;
        }

        loop {
            match self.transport.poll() {
                Ok(Some(event)) => self.handle_incoming(ctx, event),
                Ok(None) => break,
                Err(e) => {
                    error!("mqtt: transport error: {}", e);
                    self.on_disconnected();
                    break;
                }
            }
            if self.manual_disconnect || !self.is_connected {
                break;
            }
        }
    }

    fn handle_incoming(&mut self, ctx: &mut U, event: Incoming) {
        match event {
            Incoming::Connected => {
                if !self.is_connected {
                    self.on_connected();
                }
            }
            Incoming::Disconnected => self.on_disconnected(),
            Incoming::Message {
                msgid,
                topic,
                payload,
            } => {
                debug!("mqtt: recv message topic {}, payload len {}", topic.as_str(), payload.len());
                let message = Message {
                    msgid,
                    topic: &topic,
                    payload: &payload,
                };
                self.distribute(ctx, &message);
            }
            Incoming::Subscribed(msgid) => debug!("mqtt: subscribe succeeded, msgid {}", msgid),
            Incoming::Unsubscribed(msgid) => debug!("mqtt: unsubscribe succeeded, msgid {}", msgid),
            Incoming::Published(msgid) => {
                debug!("mqtt: PUBACK msgid {}", msgid);
                if let Some(index) = self.publishes.iter().position(|h| h.msgid == msgid) {
                    if let Some(handle) = self.publishes.remove(index) {
                        (handle.notify)(Ok(()));
                    }
                }
            }
        }
    }

    fn distribute(&mut self, ctx: &mut U, message: &Message<'_>) {
        let targets: Vec<Option<MessageCallback<T, S, U>>> = self
            .subscribes
            .iter()
            .filter(|h| h.topic == message.topic)
            .map(|h| h.callback)
            .collect();
        for target in targets {
            match target {
                Some(callback) => callback(self, ctx, message),
                None => {
                    if let Err(e) = self.protocol_message_process(ctx, message.payload) {
                        error!("mqtt: protocol message parse error: {}", e);
                    }
                }
            }
        }
    }

    fn protocol_message_process(&mut self, ctx: &mut U, payload: &[u8]) -> Result<(), Error> {
        let frame = protocol::unpack(&self.system, &self.signature.cipherkey, payload)?;
        let root: Value = serde_json::from_slice(&frame.plaintext)?;
        let (Some(id), Some(_), Some(data)) = (
            root.get("protocol").and_then(Value::as_u64),
            root.get("t"),
            root.get("data"),
        ) else {
            error!("mqtt: frame lacks protocol, t or data");
            return Err(Error::JsonField);
        };
        let id = u16::try_from(id).map_err(|_| Error::JsonField)?;
        debug!("mqtt: protocol {} received", id);

        let targets: Vec<ProtocolCallback<T, S, U>> = self
            .protocols
            .iter()
            .filter(|h| h.id == id)
            .map(|h| h.callback)
            .collect();
        let event = ProtocolEvent {
            id,
            root: &root,
            data,
        };
        for callback in targets {
            callback(self, ctx, &event);
        }
        Ok(())
    }

    /// Routes messages on `topic` to `callback` (`None` = default protocol
    /// frame handler) and subscribes when connected.
    ///
    /// Registering the same `(topic, callback)` pair twice keeps a single
    /// handle and sends a single SUBSCRIBE.
    pub fn subscribe_register(
        &mut self,
        topic: &str,
        callback: Option<MessageCallback<T, S, U>>,
    ) -> Result<(), Error> {
        if topic.is_empty() {
            return Err(Error::InvalidParam);
        }
        if self
            .subscribes
            .iter()
            .any(|h| h.topic == topic && same_message_callback(h.callback, callback))
        {
            warn!("mqtt: repetition {}", topic);
            return Ok(());
        }
        if self.is_connected {
            self.transport
                .subscribe(topic, QoS::AtLeastOnce)
                .map_err(|_| Error::Com)?;
        }
        self.subscribes.push(SubscribeHandle {
            topic: String::from(topic),
            callback,
        });
        Ok(())
    }

    /// Drops every handle of `topic` and unsubscribes when connected.
    pub fn subscribe_unregister(&mut self, topic: &str) -> Result<(), Error> {
        if topic.is_empty() {
            return Err(Error::InvalidParam);
        }
        self.subscribes.retain(|h| h.topic != topic);
        if self.is_connected {
            self.transport
                .unsubscribe(topic, QoS::AtLeastOnce)
                .map_err(|_| Error::Com)?;
        }
        Ok(())
    }

    /// Routes protocol `id` frames to `callback`.
    ///
    /// An exact duplicate of an existing `(id, callback)` pair is rejected
    /// with [`Error::Com`].
    pub fn protocol_register(&mut self, id: u16, callback: ProtocolCallback<T, S, U>) -> Result<(), Error> {
        if self
            .protocols
            .iter()
            .any(|h| h.id == id && core::ptr::fn_addr_eq(h.callback, callback))
        {
            return Err(Error::Com);
        }
        self.protocols.push(ProtocolHandle { id, callback });
        Ok(())
    }

    /// Removes the `(id, callback)` handle.
    pub fn protocol_unregister(&mut self, id: u16, callback: ProtocolCallback<T, S, U>) {
        self.protocols
            .retain(|h| !(h.id == id && core::ptr::fn_addr_eq(h.callback, callback)));
    }

    /// Removes every protocol handle.
    pub fn protocol_unregister_all(&mut self) {
        self.protocols.clear();
    }

    /// Publishes `payload` on `topic`.
    ///
    /// Without `notify` the message goes out at QoS 0 right away. With
    /// `notify` a copy is kept and sent at QoS 1 (immediately, or from the
    /// next [`loop_once`](Self::loop_once) when `defer` is set); `notify`
    /// later receives `Ok(())` on PUBACK or [`Error::Timeout`] once
    /// `timeout_ms` elapsed, exactly once.
    pub fn publish_common(
        &mut self,
        topic: &str,
        payload: &[u8],
        notify: Option<PublishNotify>,
        timeout_ms: u32,
        defer: bool,
    ) -> Result<(), Error> {
        if topic.is_empty() {
            return Err(Error::InvalidParam);
        }
        let Some(notify) = notify else {
            if defer {
                return Err(Error::InvalidParam);
            }
            self.transport
                .publish(topic, payload, QoS::AtMostOnce)
                .map_err(|_| Error::Com)?;
            return Ok(());
        };

        let mut handle = PublishHandle {
            msgid: 0,
            topic: String::from(topic),
            payload: payload.to_vec(),
            deadline_ms: self.system.now_ms() + u64::from(timeout_ms),
            notify,
        };
        if !defer {
            match self
                .transport
                .publish(&handle.topic, &handle.payload, QoS::AtLeastOnce)
            {
                Ok(msgid) => handle.msgid = msgid,
                Err(e) => warn!("mqtt: publish failed, retrying from loop: {}", e),
            }
        }
        self.publishes.push_back(handle);
        Ok(())
    }

    /// Fire-and-forget publish.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        self.publish_common(topic, payload, None, 0, false)
    }

    /// Seals `data` as a protocol frame and publishes it on `topic`
    /// (default: the outbound topic). Requires a live connection.
    pub fn protocol_data_publish_common(
        &mut self,
        topic: Option<&str>,
        protocol_id: u16,
        data: &str,
        notify: Option<PublishNotify>,
        timeout_ms: u32,
        defer: bool,
    ) -> Result<(), Error> {
        if !self.is_connected {
            return Err(Error::NotConnected);
        }
        let nonce = protocol::random_nonce(&self.system);
        let frame = protocol::pack(
            &self.system,
            &self.signature.cipherkey,
            &nonce,
            self.sequence_out,
            protocol_id,
            self.system.timestamp(),
            data,
        )?;
        self.sequence_out = self.sequence_out.wrapping_add(1);

        let topic = match topic {
            Some(topic) => String::from(topic),
            None => String::from(self.signature.topic_out.as_str()),
        };
        self.publish_common(&topic, &frame, notify, timeout_ms, defer)
    }

    /// Publishes a protocol frame on `topic`.
    pub fn protocol_data_publish_with_topic(
        &mut self,
        topic: &str,
        protocol_id: u16,
        data: &str,
    ) -> Result<(), Error> {
        self.protocol_data_publish_common(Some(topic), protocol_id, data, None, 0, false)
    }

    /// Publishes a protocol frame on the outbound topic.
    pub fn protocol_data_publish(&mut self, protocol_id: u16, data: &str) -> Result<(), Error> {
        self.protocol_data_publish_common(None, protocol_id, data, None, 0, false)
    }

    /// Reports firmware download progress on `channel`.
    pub fn upgrade_progress_report(&mut self, channel: u32, percent: u32) -> Result<(), Error> {
        if percent > 100 {
            error!("mqtt: invalid progress {}", percent);
            return Err(Error::InvalidParam);
        }
        let data = format!("{{\"progress\":\"{}\",\"firmwareType\":{}}}", percent, channel);
        self.protocol_data_publish(protocol::UPGE_PUSH, &data)
    }
}
