mod common;

use common::mock::{ATOP_HOST, MQTT_HOST, MockHttp};
use tuyalink::cloud::endpoint::EndpointManager;
use tuyalink::error::Error;
use tuyalink::network::application::http::Response;
use tuyalink::network::error::Error as NetError;
use tuyalink::storage::{KvStore, MemoryStore};

fn status(code: u16) -> Result<Response, NetError> {
    Ok(Response {
        status_code: code,
        headers: heapless::Vec::new(),
        body: b"busy".to_vec(),
    })
}

#[test]
fn test_update_resolves_stored_region() {
    let mut store = MemoryStore::new();
    let mut manager = EndpointManager::new();
    manager.region_regist_set(&mut store, "eu", "pre").unwrap();

    let mut http = MockHttp::default();
    manager.update(&mut http).unwrap();
    assert!(http.bodies[0].ends_with(r#""region":"eu","env":"pre"}"#));

    let endpoint = manager.endpoint();
    assert_eq!(endpoint.region.as_str(), "eu");
    assert_eq!(endpoint.atop.host.as_str(), ATOP_HOST);
    assert_eq!(endpoint.atop.path.as_str(), "/d.json");
    assert_eq!(endpoint.mqtt.host.as_str(), MQTT_HOST);
    assert_eq!(endpoint.mqtt.port, 8883);
    assert!(endpoint.cert.is_some());
}

#[test]
fn test_auto_region_leaves_region_open() {
    let mut manager = EndpointManager::new();
    let mut http = MockHttp::default();
    manager.update_auto_region(&mut http).unwrap();
    assert!(!http.bodies[0].contains("region"));
    assert!(http.bodies[0].ends_with(r#""env":"pro"}"#));
    assert_eq!(manager.endpoint().region.as_str(), "");

    // update without a stored region asks for automatic placement too
    manager.update(&mut http).unwrap();
    assert!(!http.bodies[1].contains("region"));
}

#[test]
fn test_update_failures_keep_previous_endpoint() {
    let mut manager = EndpointManager::new();
    let mut http = MockHttp::default();
    manager.update(&mut http).unwrap();
    let before = manager.endpoint().clone();

    http.answers.push_back(status(503));
    assert_eq!(manager.update(&mut http), Err(Error::Http(503)));
    http.answers.push_back(Err(NetError::Timeout));
    assert_eq!(manager.update(&mut http), Err(Error::Network(NetError::Timeout)));
    http.answers.push_back(Ok(Response {
        status_code: 200,
        headers: heapless::Vec::new(),
        body: b"{".to_vec(),
    }));
    assert_eq!(manager.update(&mut http), Err(Error::JsonParse));

    assert_eq!(manager.endpoint(), &before);
}

#[test]
fn test_resolved_endpoint_survives_restart() {
    let mut store = MemoryStore::new();
    let mut manager = EndpointManager::new();
    manager.region_regist_set(&mut store, "us", "pro").unwrap();
    manager.update(&mut MockHttp::default()).unwrap();
    manager.cert_set(&mut store).unwrap();
    manager.domain_set(&mut store).unwrap();

    let mut restarted = EndpointManager::new();
    restarted.init(&mut store).unwrap();
    assert_eq!(restarted.region(), "us");
    assert_eq!(restarted.regist_key(), "pro");
    restarted.cert_get(&mut store).unwrap();
    restarted.domain_get(&mut store).unwrap();
    assert_eq!(restarted.endpoint().atop, manager.endpoint().atop);
    assert_eq!(restarted.endpoint().mqtt, manager.endpoint().mqtt);
    assert_eq!(restarted.endpoint().cert, manager.endpoint().cert);
}

#[test]
fn test_missing_or_corrupt_record() {
    let mut store = MemoryStore::new();
    let mut manager = EndpointManager::new();
    assert!(manager.cert_get(&mut store).is_err());
    assert!(manager.domain_get(&mut store).is_err());
    // nothing resolved yet, so there is no certificate to store
    assert_eq!(manager.cert_set(&mut store), Err(Error::InvalidParam));

    store.set("endpoint.domain", b"{\"atop\":").unwrap();
    assert_eq!(manager.domain_get(&mut store), Err(Error::JsonParse));
}

#[test]
fn test_remove_forgets_region() {
    let mut store = MemoryStore::new();
    let mut manager = EndpointManager::new();
    manager.region_regist_set(&mut store, "eu", "pro").unwrap();
    manager.update(&mut MockHttp::default()).unwrap();
    manager.cert_set(&mut store).unwrap();
    manager.domain_set(&mut store).unwrap();
    store.set("unrelated", b"x").unwrap();

    EndpointManager::remove(&mut store);
    assert_eq!(store.keys().collect::<Vec<_>>(), vec!["unrelated"]);

    let mut restarted = EndpointManager::new();
    assert!(restarted.init(&mut store).is_err());
    assert_eq!(restarted.region(), "");
    assert_eq!(restarted.regist_key(), "pro");
}
