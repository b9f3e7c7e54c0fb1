use std::cell::{Cell, RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::Rc;

use tuyalink::cloud::atop::{Atop, AtopRequest, AtopResponse};
use tuyalink::cloud::endpoint::Endpoint;
use tuyalink::error::Error;
use tuyalink::iot::Platform;
use tuyalink::network::application::http::{HttpClient, Request, Response};
use tuyalink::network::application::mqtt::{ConnectOptions, Incoming, MqttTransport, QoS};
use tuyalink::network::error::Error as NetError;
use tuyalink::storage::MemoryStore;
use tuyalink::system::{Crypto, System};

pub const BASE_TIMESTAMP: u32 = 1_700_000_000;

/// Manual clock. Sleeping advances it, nothing else does.
#[derive(Clone, Default)]
pub struct MockSystem {
    clock: Rc<Cell<u64>>,
    seed: Rc<Cell<u32>>,
}

impl MockSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.clock.set(self.clock.get() + ms);
    }
}

impl System for MockSystem {
    fn now_ms(&self) -> u64 {
        self.clock.get()
    }

    fn timestamp(&self) -> u32 {
        BASE_TIMESTAMP + (self.clock.get() / 1000) as u32
    }

    fn sleep_ms(&self, ms: u32) {
        self.advance(u64::from(ms));
    }

    fn random(&self) -> u32 {
        let next = self.seed.get().wrapping_mul(1_103_515_245).wrapping_add(12_345);
        self.seed.set(next);
        next >> 1
    }
}

fn tag_of(key: &[u8; 16], nonce: &[u8; 12], aad: &[u8], cipher: &[u8]) -> [u8; 16] {
    let mut tag = *key;
    for (i, byte) in nonce.iter().chain(aad).chain(cipher).enumerate() {
        tag[i % 16] = tag[i % 16].rotate_left(3) ^ byte;
    }
    tag
}

// Keyed XOR with a checksum tag: enough to tell keys apart and catch
// tampering, which is all the frame tests need.
impl Crypto for MockSystem {
    fn md5(&self, data: &[u8]) -> [u8; 16] {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let mut out = [0u8; 16];
        for (i, slot) in out.iter_mut().enumerate() {
            for byte in data {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
            hash ^= i as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
            *slot = (hash >> 32) as u8;
        }
        out
    }

    fn aes128_gcm_encrypt(
        &self,
        key: &[u8; 16],
        nonce: &[u8; 12],
        aad: &[u8],
        plain: &[u8],
    ) -> Result<(Vec<u8>, [u8; 16]), Error> {
        let cipher: Vec<u8> = plain
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % 16] ^ nonce[i % 12])
            .collect();
        let tag = tag_of(key, nonce, aad, &cipher);
        Ok((cipher, tag))
    }

    fn aes128_gcm_decrypt(
        &self,
        key: &[u8; 16],
        nonce: &[u8; 12],
        aad: &[u8],
        cipher: &[u8],
        tag: &[u8; 16],
    ) -> Result<Vec<u8>, Error> {
        if tag_of(key, nonce, aad, cipher) != *tag {
            return Err(Error::Crypto);
        }
        Ok(cipher
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % 16] ^ nonce[i % 12])
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub msgid: u16,
}

#[derive(Default)]
pub struct TransportState {
    /// Results handed out by `connect`, oldest first; `Ok` once drained.
    pub connect_results: VecDeque<Result<(), NetError>>,
    pub connects: usize,
    pub client_id: String,
    pub username: String,
    pub connected: bool,
    pub subscribed: Vec<String>,
    pub unsubscribed: Vec<String>,
    pub published: Vec<Published>,
    pub inbox: VecDeque<Incoming>,
    pub fail_publish: bool,
    next_msgid: u16,
}

impl TransportState {
    fn msgid(&mut self) -> u16 {
        self.next_msgid = self.next_msgid.wrapping_add(1).max(1);
        self.next_msgid
    }
}

/// Scripted transport. Clones share their state so a test keeps a handle
/// on the instance a session owns.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefMut<'_, TransportState> {
        self.state.borrow_mut()
    }

    pub fn push_message(&self, topic: &str, payload: &[u8]) {
        self.state().inbox.push_back(Incoming::Message {
            msgid: 0,
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    pub fn push(&self, event: Incoming) {
        self.state().inbox.push_back(event);
    }

    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.state()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    pub fn subscribe_count(&self, topic: &str) -> usize {
        self.state().subscribed.iter().filter(|t| *t == topic).count()
    }
}

impl MqttTransport for MockTransport {
    fn connect(&mut self, options: &ConnectOptions<'_>) -> Result<(), NetError> {
        let mut state = self.state();
        state.connects += 1;
        state.client_id = options.client_id.to_string();
        state.username = options.username.to_string();
        let result = state.connect_results.pop_front().unwrap_or(Ok(()));
        state.connected = result.is_ok();
        result
    }

    fn disconnect(&mut self) -> Result<(), NetError> {
        self.state().connected = false;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<u16, NetError> {
        let mut state = self.state();
        state.subscribed.push(topic.to_string());
        Ok(state.msgid())
    }

    fn unsubscribe(&mut self, topic: &str, _qos: QoS) -> Result<u16, NetError> {
        let mut state = self.state();
        state.unsubscribed.push(topic.to_string());
        Ok(state.msgid())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<u16, NetError> {
        let mut state = self.state();
        if state.fail_publish {
            return Err(NetError::WriteError);
        }
        let msgid = if qos == QoS::AtMostOnce { 0 } else { state.msgid() };
        state.published.push(Published {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            msgid,
        });
        Ok(msgid)
    }

    fn poll(&mut self) -> Result<Option<Incoming>, NetError> {
        Ok(self.state().inbox.pop_front())
    }
}

pub const ATOP_HOST: &str = "a1.tuyaeu.com";
pub const MQTT_HOST: &str = "m1.tuyaeu.com";

pub fn url_config_body() -> String {
    format!(
        r#"{{"httpsSelfUrl":{{"addr":"https://{}/d.json"}},"mqttsSelfUrl":{{"addr":"{}:8883"}},"caArr":["MIIB"]}}"#,
        ATOP_HOST, MQTT_HOST
    )
}

/// iot-dns stub: scripted answers, then a valid url configuration.
#[derive(Default)]
pub struct MockHttp {
    pub answers: VecDeque<Result<Response, NetError>>,
    pub bodies: Vec<String>,
}

impl HttpClient for MockHttp {
    fn request(&mut self, request: &Request<'_>) -> Result<Response, NetError> {
        let body = request.body.map(|b| String::from_utf8_lossy(b).into_owned());
        self.bodies.push(body.unwrap_or_default());
        self.answers.pop_front().unwrap_or_else(|| {
            Ok(Response {
                status_code: 200,
                headers: heapless::Vec::new(),
                body: url_config_body().into_bytes(),
            })
        })
    }
}

/// ATOP stub: answers by api name, success with a null result otherwise.
#[derive(Default)]
pub struct MockAtop {
    pub calls: Vec<(String, String)>,
    pub answers: Vec<(String, AtopResponse)>,
    pub offline: bool,
}

impl MockAtop {
    pub fn answer(&mut self, api: &str, response: AtopResponse) {
        self.answers.push((api.to_string(), response));
    }

    pub fn apis(&self) -> Vec<&str> {
        self.calls.iter().map(|(api, _)| api.as_str()).collect()
    }
}

impl Atop for MockAtop {
    fn request(&mut self, _endpoint: &Endpoint, request: &AtopRequest<'_>) -> Result<AtopResponse, Error> {
        self.calls.push((request.api.to_string(), request.data.to_string()));
        if self.offline {
            return Err(Error::Com);
        }
        let answer = self
            .answers
            .iter()
            .find(|(api, _)| api == request.api)
            .map(|(_, response)| response.clone());
        Ok(answer.unwrap_or(AtopResponse {
            success: true,
            t: BASE_TIMESTAMP,
            result: serde_json::Value::Null,
        }))
    }
}

pub struct MockPlatform {
    pub system: MockSystem,
    pub store: MemoryStore,
    pub http: MockHttp,
    pub atop: MockAtop,
    pub transport: MockTransport,
    pub network_up: bool,
    pub transports_made: usize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            system: MockSystem::new(),
            store: MemoryStore::new(),
            http: MockHttp::default(),
            atop: MockAtop::default(),
            transport: MockTransport::new(),
            network_up: true,
            transports_made: 0,
        }
    }
}

impl Platform for MockPlatform {
    type System = MockSystem;
    type Transport = MockTransport;
    type Store = MemoryStore;
    type Http = MockHttp;
    type Atop = MockAtop;

    fn system(&self) -> &MockSystem {
        &self.system
    }

    fn store(&mut self) -> &mut MemoryStore {
        &mut self.store
    }

    fn http(&mut self) -> &mut MockHttp {
        &mut self.http
    }

    fn atop(&mut self) -> &mut MockAtop {
        &mut self.atop
    }

    fn mqtt_transport(&mut self) -> MockTransport {
        self.transports_made += 1;
        self.transport.clone()
    }

    fn network_check(&mut self) -> bool {
        self.network_up
    }
}
