mod common;

use common::mock::{MockSystem, MockTransport};
use tuyalink::error::Error;
use tuyalink::service::matop::{DynamicCfgType, Matop, MatopContext, Request, Response};
use tuyalink::service::mqtt::{MqttSession, SessionConfig};
use tuyalink::service::signature::Identity;

#[derive(Debug, Clone, PartialEq)]
struct Seen {
    id: u16,
    success: bool,
    t: u32,
    result: Option<serde_json::Value>,
    raw: Option<Vec<u8>>,
}

#[derive(Default)]
struct Ctx {
    matop: Matop<MockTransport, MockSystem, Ctx>,
    seen: Vec<Seen>,
}

impl MatopContext<MockTransport, MockSystem> for Ctx {
    fn matop(&mut self) -> &mut Matop<MockTransport, MockSystem, Self> {
        &mut self.matop
    }
}

type Session = MqttSession<MockTransport, MockSystem, Ctx>;

const REQ: &str = "rpc/req/d1";
const RSP: &str = "rpc/rsp/d1";
const FILE: &str = "rpc/file/d1";

fn remember(_session: &mut Session, ctx: &mut Ctx, response: &Response<'_>) {
    ctx.seen.push(Seen {
        id: response.id,
        success: response.success,
        t: response.t,
        result: response.result.cloned(),
        raw: response.raw.map(<[u8]>::to_vec),
    });
}

fn setup() -> (Session, Ctx, MockTransport, MockSystem) {
    common::init_logger();
    let transport = MockTransport::new();
    let system = MockSystem::new();
    let config = SessionConfig {
        host: "m1.tuyaeu.com",
        port: 8883,
        identity: Identity {
            devid: Some("d1"),
            seckey: Some("s1"),
            localkey: Some("l1"),
            ..Default::default()
        },
        ..Default::default()
    };
    let Ok(mut session) = Session::init(transport.clone(), system.clone(), &config) else {
        panic!("session init failed");
    };
    session.start().unwrap();
    let mut ctx = Ctx::default();
    ctx.matop.init(&mut session, "d1").unwrap();
    (session, ctx, transport, system)
}

fn request(api: &str, timeout_ms: u32) -> Request<'_> {
    Request {
        api,
        timeout_ms,
        ..Default::default()
    }
}

fn reply(id: u16, success: bool) -> Vec<u8> {
    format!(
        r#"{{"id":{},"data":{{"t":1700000123,"result":{{"success":{},"result":{{"id":{}}}}}}}}}"#,
        id, success, id
    )
    .into_bytes()
}

fn sent_bodies(transport: &MockTransport) -> Vec<serde_json::Value> {
    transport
        .published_on(REQ)
        .iter()
        .map(|p| serde_json::from_slice(&p.payload).unwrap())
        .collect()
}

#[test]
fn test_init_subscribes_reply_topics() {
    let (_session, ctx, transport, _) = setup();
    assert_eq!(transport.subscribe_count(RSP), 1);
    assert_eq!(transport.subscribe_count(FILE), 1);
    assert_eq!(ctx.matop.request_topic(), REQ);
}

#[test]
fn test_uninitialized_correlator_refuses_requests() {
    let (mut session, _, _, _) = setup();
    let mut idle: Matop<MockTransport, MockSystem, Ctx> = Matop::new();
    assert_eq!(
        idle.request_async(&mut session, &request("tuya.device.reset", 0), None),
        Err(Error::InvalidParam)
    );
    assert_eq!(idle.init(&mut session, ""), Err(Error::InvalidParam));
}

#[test]
fn test_request_envelope() {
    let (mut session, mut ctx, transport, _) = setup();
    ctx.matop
        .request_async(
            &mut session,
            &Request {
                api: "tuya.device.dynamic.config.get",
                version: Some("2.0"),
                data: Some(r#"{"type":"x"}"#),
                timeout_ms: 0,
            },
            None,
        )
        .unwrap();
    ctx.matop.request_async(&mut session, &request("a.b", 0), None).unwrap();

    let bodies = sent_bodies(&transport);
    assert_eq!(bodies[0]["id"], 1);
    assert_eq!(bodies[0]["a"], "tuya.device.dynamic.config.get");
    assert_eq!(bodies[0]["v"], "2.0");
    assert_eq!(bodies[0]["data"]["type"], "x");
    assert!(bodies[0]["t"].is_u64());
    assert_eq!(bodies[1]["id"], 2);
    assert!(bodies[1].get("v").is_none());
    assert_eq!(bodies[1]["data"], serde_json::json!({}));
    assert_eq!(ctx.matop.pending_ids().collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn test_replies_match_by_id_not_position() {
    let (mut session, mut ctx, transport, _) = setup();
    for _ in 0..4 {
        ctx.matop
            .request_async(&mut session, &request("a.b", 0), Some(Box::new(remember)))
            .unwrap();
    }
    for id in (1..=4).rev() {
        transport.push_message(RSP, &reply(id, true));
    }
    session.loop_once(&mut ctx);

    let ids: Vec<u16> = ctx.seen.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![4, 3, 2, 1]);
    for seen in &ctx.seen {
        assert!(seen.success);
        assert_eq!(seen.t, 1_700_000_123);
        assert_eq!(seen.result.as_ref().unwrap()["id"], seen.id);
    }
    assert_eq!(ctx.matop.pending_len(), 0);
}

#[test]
fn test_failed_reply_carries_no_time() {
    let (mut session, mut ctx, transport, _) = setup();
    ctx.matop
        .request_async(&mut session, &request("a.b", 0), Some(Box::new(remember)))
        .unwrap();
    transport.push_message(RSP, &reply(1, false));
    session.loop_once(&mut ctx);
    assert_eq!(ctx.seen.len(), 1);
    assert!(!ctx.seen[0].success);
    assert_eq!(ctx.seen[0].t, 0);
}

#[test]
fn test_unknown_and_malformed_replies_are_ignored() {
    let (mut session, mut ctx, transport, _) = setup();
    ctx.matop
        .request_async(&mut session, &request("a.b", 0), Some(Box::new(remember)))
        .unwrap();
    transport.push_message(RSP, &reply(9, true));
    transport.push_message(RSP, b"not json");
    transport.push_message(RSP, br#"{"id":1}"#);
    session.loop_once(&mut ctx);
    assert!(ctx.seen.is_empty());
    assert_eq!(ctx.matop.pending_len(), 1);
}

#[test]
fn test_reply_without_notify_just_clears_entry() {
    let (mut session, mut ctx, transport, _) = setup();
    ctx.matop.version_update(&mut session, "1.2.3").unwrap();

    let body = &sent_bodies(&transport)[0];
    assert_eq!(body["a"], "tuya.device.versions.update");
    assert_eq!(body["data"]["versions"], "1.2.3");
    assert!(body["data"]["t"].is_u64());
    assert_eq!(ctx.matop.pending_len(), 1);

    let id = body["id"].as_u64().unwrap() as u16;
    transport.push_message(RSP, &reply(id, true));
    session.loop_once(&mut ctx);
    assert_eq!(ctx.matop.pending_len(), 0);
    assert!(ctx.seen.is_empty());
}

#[test]
fn test_string_fields_are_escaped() {
    let (mut session, mut ctx, transport, _) = setup();
    ctx.matop.version_update(&mut session, r#"1.0"beta\2"#).unwrap();
    ctx.matop
        .file_download_range(&mut session, r#"https://f/"a".bin"#, 0, 0, 0, None)
        .unwrap();
    ctx.matop
        .dynamic_cfg_ack(&mut session, Some(r#"tz"1"#), None, None)
        .unwrap();

    let bodies = sent_bodies(&transport);
    assert_eq!(bodies[0]["data"]["versions"], r#"1.0"beta\2"#);
    assert_eq!(bodies[1]["data"]["url"], r#"https://f/"a".bin"#);
    assert_eq!(bodies[2]["data"]["ackList"][0]["ackId"], r#"tz"1"#);
}

#[test]
fn test_timeout_fails_once() {
    let (mut session, mut ctx, _, system) = setup();
    ctx.matop
        .request_async(&mut session, &request("a.b", 100), Some(Box::new(remember)))
        .unwrap();

    system.advance(150);
    assert_eq!(Matop::yield_once(&mut session, &mut ctx), Err(Error::Timeout));
    assert_eq!(ctx.seen.len(), 1);
    assert!(!ctx.seen[0].success);
    assert_eq!(ctx.seen[0].id, 1);

    assert_eq!(Matop::yield_once(&mut session, &mut ctx), Ok(()));
    assert_eq!(ctx.seen.len(), 1);
    assert_eq!(ctx.matop.pending_len(), 0);
}

#[test]
fn test_one_expiry_per_yield() {
    let (mut session, mut ctx, _, system) = setup();
    ctx.matop
        .request_async(&mut session, &request("a.b", 100), Some(Box::new(remember)))
        .unwrap();
    ctx.matop
        .request_async(&mut session, &request("a.b", 100), Some(Box::new(remember)))
        .unwrap();
    ctx.matop
        .request_async(&mut session, &request("a.b", 10_000), Some(Box::new(remember)))
        .unwrap();

    system.advance(150);
    assert_eq!(Matop::yield_once(&mut session, &mut ctx), Err(Error::Timeout));
    assert_eq!(ctx.matop.pending_ids().collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(Matop::yield_once(&mut session, &mut ctx), Err(Error::Timeout));
    assert_eq!(ctx.matop.pending_ids().collect::<Vec<_>>(), vec![3]);
    assert_eq!(Matop::yield_once(&mut session, &mut ctx), Ok(()));
    assert_eq!(ctx.matop.pending_ids().collect::<Vec<_>>(), vec![3]);
}

#[test]
fn test_default_timeout_is_eight_seconds() {
    let (mut session, mut ctx, _, system) = setup();
    ctx.matop.client_reset(&mut session).unwrap();
    system.advance(8000);
    assert_eq!(Matop::yield_once(&mut session, &mut ctx), Ok(()));
    system.advance(1);
    assert_eq!(Matop::yield_once(&mut session, &mut ctx), Err(Error::Timeout));
}

#[test]
fn test_file_reply_is_raw() {
    let (mut session, mut ctx, transport, _) = setup();
    ctx.matop
        .file_download_range(&mut session, "https://f/x.bin", 0, 1023, 0, Some(Box::new(remember)))
        .unwrap();
    let body = &sent_bodies(&transport)[0];
    assert_eq!(body["data"]["range"], "bytes=0-1023");
    assert_eq!(body["data"]["type"], 2);

    transport.push_message(FILE, &[0, 0]);
    transport.push_message(FILE, &[0, 0, 0, 1, b'h', b'i']);
    session.loop_once(&mut ctx);
    assert_eq!(ctx.seen.len(), 1);
    assert!(ctx.seen[0].success);
    assert_eq!(ctx.seen[0].raw.as_deref(), Some(&b"hi"[..]));
}

#[test]
fn test_publish_failure_is_not_tracked() {
    let (mut session, mut ctx, transport, _) = setup();
    transport.state().fail_publish = true;
    assert_eq!(
        ctx.matop.request_async(&mut session, &request("a.b", 0), Some(Box::new(remember))),
        Err(Error::Com)
    );
    assert_eq!(ctx.matop.pending_len(), 0);
}

#[test]
fn test_convenience_payloads() {
    let (mut session, mut ctx, transport, _) = setup();
    ctx.matop.upgrade_status_update(&mut session, 0, 4).unwrap();
    ctx.matop.put_rst_log(&mut session, 3).unwrap();
    ctx.matop
        .dynamic_cfg_get(&mut session, DynamicCfgType::All, None)
        .unwrap();
    ctx.matop
        .dynamic_cfg_ack(&mut session, Some("tz1"), Some("7"), None)
        .unwrap();
    ctx.matop.comm_node_enable(&mut session, None).unwrap();

    let bodies = sent_bodies(&transport);
    assert_eq!(bodies[0]["a"], "tuya.device.upgrade.status.update");
    assert_eq!(bodies[0]["data"]["upgradeStatus"], 4);
    assert_eq!(bodies[1]["a"], "atop.online.debug.log");
    assert_eq!(bodies[1]["data"]["data"], 3);
    assert_eq!(bodies[2]["data"]["type"], r#"["timezone","rateRule"]"#);
    let acks = bodies[3]["data"]["ackList"].as_array().unwrap();
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[0]["ackId"], "tz1");
    assert_eq!(acks[1]["ackId"], 7);
    assert_eq!(bodies[4]["a"], "tuya.device.comm.node.enable");
}

#[test]
fn test_destroy_drops_pending_and_topics() {
    let (mut session, mut ctx, transport, _) = setup();
    ctx.matop
        .request_async(&mut session, &request("a.b", 0), Some(Box::new(remember)))
        .unwrap();
    ctx.matop.destroy(&mut session);
    assert_eq!(ctx.matop.pending_len(), 0);
    assert_eq!(ctx.matop.request_topic(), "");
    let unsubscribed = transport.state().unsubscribed.clone();
    assert!(unsubscribed.contains(&RSP.to_string()));
    assert!(unsubscribed.contains(&FILE.to_string()));
    assert!(ctx.seen.is_empty());
}
