#![allow(dead_code)]

pub mod mock;

use mock::MockSystem;
use tuyalink::cloud::atop::AtopResponse;
use tuyalink::protocol;
use tuyalink::storage::{KvStore, MemoryStore};

pub const PRODUCT_KEY: &str = "pk000001";
pub const UUID: &str = "uuid0001";
pub const AUTHKEY: &str = "AaBbCcDdEeFfGgHhIiJjKkLlMmNnOoPp";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Seals `data` the way the cloud does, for injection into a transport.
pub fn frame(system: &MockSystem, key: &str, protocol_id: u16, data: &str) -> Vec<u8> {
    let key = protocol::cipher_key(key.as_bytes());
    let nonce = protocol::random_nonce(system);
    protocol::pack(system, &key, &nonce, 1, protocol_id, mock::BASE_TIMESTAMP, data).unwrap()
}

/// Opens a frame published by the device.
pub fn open(system: &MockSystem, key: &str, payload: &[u8]) -> serde_json::Value {
    let key = protocol::cipher_key(key.as_bytes());
    let frame = protocol::unpack(system, &key, payload).unwrap();
    serde_json::from_slice(&frame.plaintext).unwrap()
}

pub fn activation_answer() -> AtopResponse {
    AtopResponse {
        success: true,
        t: mock::BASE_TIMESTAMP + 5,
        result: serde_json::json!({
            "devId": "d1",
            "secKey": "s1",
            "localKey": "l1",
            "schemaId": "sch1",
            "schema": "[]",
            "stdTimeZone": "+08:00",
            "resetFactory": false
        }),
    }
}

/// A store holding what a previous activation left behind.
pub fn activated_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store
        .set(
            UUID,
            br#"{"devId":"d1","secKey":"s1","localKey":"l1","schemaId":"sch1","stdTimeZone":"+08:00"}"#,
        )
        .unwrap();
    store.set("sch1", b"[]").unwrap();
    store.set("region", b"eu").unwrap();
    store.set("regist_key", b"pro").unwrap();
    let mut manager = tuyalink::cloud::endpoint::EndpointManager::new();
    manager.update(&mut mock::MockHttp::default()).unwrap();
    manager.cert_set(&mut store).unwrap();
    manager.domain_set(&mut store).unwrap();
    store
}
