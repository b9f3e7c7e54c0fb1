mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::mock::{MockSystem, MockTransport};
use tuyalink::error::Error;
use tuyalink::network::application::mqtt::{Incoming, QoS};
use tuyalink::network::error::Error as NetError;
use tuyalink::service::mqtt::{
    Message, MqttSession, ProtocolEvent, PublishNotify, SessionConfig, SessionEvent,
};
use tuyalink::service::signature::Identity;

#[derive(Default)]
struct Ctx {
    hits: Vec<&'static str>,
    frames: Vec<(u16, serde_json::Value)>,
}

type Session = MqttSession<MockTransport, MockSystem, Ctx>;

const TOPIC_IN: &str = "smart/device/in/d1";
const TOPIC_OUT: &str = "smart/device/out/d1";

fn session_config() -> SessionConfig<'static> {
    SessionConfig {
        host: "m1.tuyaeu.com",
        port: 8883,
        cacert: None,
        identity: Identity {
            devid: Some("d1"),
            seckey: Some("s1"),
            localkey: Some("l1"),
            ..Default::default()
        },
        timeout_ms: 2000,
    }
}

fn new_session() -> (Session, MockTransport, MockSystem) {
    common::init_logger();
    let transport = MockTransport::new();
    let system = MockSystem::new();
    let session = match Session::init(transport.clone(), system.clone(), &session_config()) {
        Ok(session) => session,
        Err((e, _)) => panic!("init failed: {e}"),
    };
    (session, transport, system)
}

fn connected_session() -> (Session, MockTransport, MockSystem) {
    let (mut session, transport, system) = new_session();
    session.start().unwrap();
    assert_eq!(session.take_event(), Some(SessionEvent::Connected));
    (session, transport, system)
}

fn first(_session: &mut Session, ctx: &mut Ctx, _message: &Message<'_>) {
    ctx.hits.push("first");
}

fn second(_session: &mut Session, ctx: &mut Ctx, _message: &Message<'_>) {
    ctx.hits.push("second");
}

fn on_cmd(_session: &mut Session, ctx: &mut Ctx, event: &ProtocolEvent<'_>) {
    ctx.frames.push((event.id, event.data.clone()));
}

#[test]
fn test_activated_signature() {
    let (session, _, _) = new_session();
    let signature = session.signature();
    assert_eq!(signature.clientid.as_str(), "d1");
    assert_eq!(signature.username.as_str(), "d1");
    assert_eq!(signature.topic_in.as_str(), TOPIC_IN);
    assert_eq!(signature.topic_out.as_str(), TOPIC_OUT);
    assert_eq!(signature.password.len(), 16);
    assert!(!session.is_connected());
}

#[test]
fn test_init_rejects_incomplete_identity() {
    let config = SessionConfig {
        host: "m1.tuyaeu.com",
        identity: Identity {
            devid: Some("d1"),
            ..Default::default()
        },
        ..Default::default()
    };
    let result = Session::init(MockTransport::new(), MockSystem::new(), &config);
    assert!(matches!(result, Err((Error::InvalidParam, _))));
}

#[test]
fn test_start_subscribes_default_topic() {
    let (_session, transport, _) = connected_session();
    let state = transport.state();
    assert_eq!(state.connects, 1);
    assert_eq!(state.client_id, "d1");
    assert_eq!(state.subscribed, vec![TOPIC_IN.to_string()]);
}

#[test]
fn test_not_authorized_reports_unbind() {
    let (mut session, transport, _) = new_session();
    transport
        .state()
        .connect_results
        .push_back(Err(NetError::NotAuthorized));
    assert_eq!(session.start(), Err(Error::AuthenticationFail));
    assert_eq!(session.take_event(), Some(SessionEvent::Unbind));
    assert!(!session.is_connected());
}

#[test]
fn test_failed_start_is_a_com_error() {
    let (mut session, transport, _) = new_session();
    transport
        .state()
        .connect_results
        .push_back(Err(NetError::ConnectionRefused));
    assert_eq!(session.start(), Err(Error::Com));
    assert_eq!(session.take_event(), None);

    session.loop_once(&mut Ctx::default());
    assert_eq!(session.take_event(), Some(SessionEvent::Connected));
}

#[test]
fn test_subscribe_register_deduplicates() {
    let (mut session, transport, _) = connected_session();
    session.subscribe_register("t", Some(first)).unwrap();
    session.subscribe_register("t", Some(first)).unwrap();
    assert_eq!(transport.subscribe_count("t"), 1);
    // default topic plus "t"
    assert_eq!(session.subscribe_handles(), 2);

    session.subscribe_register("t", Some(second)).unwrap();
    assert_eq!(session.subscribe_handles(), 3);
    assert_eq!(session.subscribe_register("", Some(first)), Err(Error::InvalidParam));
}

#[test]
fn test_every_handle_of_a_topic_fires() {
    let (mut session, transport, _) = connected_session();
    session.subscribe_register("t", Some(first)).unwrap();
    session.subscribe_register("t", Some(second)).unwrap();
    session.subscribe_register("other", Some(second)).unwrap();

    transport.push_message("t", b"hello");
    let mut ctx = Ctx::default();
    session.loop_once(&mut ctx);
    assert_eq!(ctx.hits, vec!["first", "second"]);

    session.subscribe_unregister("t").unwrap();
    transport.push_message("t", b"hello");
    session.loop_once(&mut ctx);
    assert_eq!(ctx.hits.len(), 2);
    assert_eq!(transport.state().unsubscribed, vec!["t".to_string()]);
}

#[test]
fn test_protocol_frames_reach_their_handler() {
    let (mut session, transport, system) = connected_session();
    session.protocol_register(5, on_cmd).unwrap();
    assert_eq!(session.protocol_register(5, on_cmd), Err(Error::Com));
    assert_eq!(session.protocol_handles(), 1);

    transport.push_message(TOPIC_IN, &common::frame(&system, "l1", 5, r#"{"dps":{"1":true}}"#));
    transport.push_message(TOPIC_IN, &common::frame(&system, "l1", 15, r#"{"firmwareType":0}"#));
    let mut ctx = Ctx::default();
    session.loop_once(&mut ctx);

    assert_eq!(ctx.frames.len(), 1);
    assert_eq!(ctx.frames[0].0, 5);
    assert_eq!(ctx.frames[0].1["dps"]["1"], true);
}

#[test]
fn test_frame_sealed_with_another_key_is_dropped() {
    let (mut session, transport, system) = connected_session();
    session.protocol_register(5, on_cmd).unwrap();
    transport.push_message(TOPIC_IN, &common::frame(&system, "other", 5, r#"{"dps":{}}"#));
    let mut ctx = Ctx::default();
    session.loop_once(&mut ctx);
    assert!(ctx.frames.is_empty());
    assert!(session.is_connected());
}

#[test]
fn test_protocol_publish_seals_frame() {
    let (mut session, transport, system) = connected_session();
    session.protocol_data_publish(4, r#"{"devId":"d1","dps":{"1":true}}"#).unwrap();
    session.protocol_data_publish(4, r#"{"devId":"d1","dps":{"1":false}}"#).unwrap();

    let sent = transport.published_on(TOPIC_OUT);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].qos, QoS::AtMostOnce);
    assert_eq!(&sent[0].payload[..3], b"2.3");
    let first = u32::from_be_bytes(sent[0].payload[3..7].try_into().unwrap());
    let second = u32::from_be_bytes(sent[1].payload[3..7].try_into().unwrap());
    assert_eq!(second, first.wrapping_add(1));

    let root = common::open(&system, "l1", &sent[0].payload);
    assert_eq!(root["protocol"], 4);
    assert_eq!(root["data"]["devId"], "d1");
}

#[test]
fn test_protocol_publish_requires_connection() {
    let (mut session, _, _) = new_session();
    assert_eq!(session.protocol_data_publish(4, "{}"), Err(Error::NotConnected));
}

#[test]
fn test_upgrade_progress_range() {
    let (mut session, transport, system) = connected_session();
    assert_eq!(session.upgrade_progress_report(0, 101), Err(Error::InvalidParam));
    session.upgrade_progress_report(0, 42).unwrap();
    let sent = transport.published_on(TOPIC_OUT);
    let root = common::open(&system, "l1", &sent[0].payload);
    assert_eq!(root["protocol"], 16);
    assert_eq!(root["data"]["progress"], "42");
}

fn outcome_recorder() -> (Rc<RefCell<Vec<Result<(), Error>>>>, PublishNotify) {
    let outcomes = Rc::new(RefCell::new(Vec::new()));
    let sink = outcomes.clone();
    let notify: PublishNotify = Box::new(move |result: Result<(), Error>| sink.borrow_mut().push(result));
    (outcomes, notify)
}

#[test]
fn test_acknowledged_publish_succeeds_once() {
    let (mut session, transport, _) = connected_session();
    let (outcomes, notify) = outcome_recorder();
    session
        .publish_common("t", b"payload", Some(notify), 1000, false)
        .unwrap();
    let msgid = transport.published_on("t")[0].msgid;
    assert_eq!(transport.published_on("t")[0].qos, QoS::AtLeastOnce);
    assert_eq!(session.pending_publishes(), 1);

    transport.push(Incoming::Published(msgid));
    let mut ctx = Ctx::default();
    session.loop_once(&mut ctx);
    assert_eq!(*outcomes.borrow(), vec![Ok(())]);
    assert_eq!(session.pending_publishes(), 0);

    transport.push(Incoming::Published(msgid));
    session.loop_once(&mut ctx);
    assert_eq!(outcomes.borrow().len(), 1);
}

#[test]
fn test_unacknowledged_publish_times_out_once() {
    let (mut session, _, system) = connected_session();
    let (outcomes, notify) = outcome_recorder();
    session.publish_common("t", b"payload", Some(notify), 100, false).unwrap();

    let mut ctx = Ctx::default();
    system.advance(50);
    session.loop_once(&mut ctx);
    assert!(outcomes.borrow().is_empty());

    system.advance(100);
    session.loop_once(&mut ctx);
    session.loop_once(&mut ctx);
    assert_eq!(*outcomes.borrow(), vec![Err(Error::Timeout)]);
    assert_eq!(session.pending_publishes(), 0);
}

#[test]
fn test_deferred_publish_goes_out_from_loop() {
    let (mut session, transport, _) = connected_session();
    let (_outcomes, notify) = outcome_recorder();
    session.publish_common("t", b"later", Some(notify), 1000, true).unwrap();
    assert!(transport.published_on("t").is_empty());

    session.loop_once(&mut Ctx::default());
    assert_eq!(transport.published_on("t").len(), 1);
    assert_eq!(session.publish_common("t", b"x", None, 0, true), Err(Error::InvalidParam));
}

#[test]
fn test_link_loss_and_reconnect() {
    let (mut session, transport, _) = connected_session();
    let mut ctx = Ctx::default();
    transport.push(Incoming::Disconnected);
    session.loop_once(&mut ctx);
    assert_eq!(session.take_event(), Some(SessionEvent::Disconnected));
    assert!(!session.is_connected());

    session.loop_once(&mut ctx);
    assert_eq!(session.take_event(), Some(SessionEvent::Connected));
    assert_eq!(transport.state().connects, 2);
    assert_eq!(transport.subscribe_count(TOPIC_IN), 2);
}

#[test]
fn test_stop_is_sticky() {
    let (mut session, transport, _) = connected_session();
    session.stop().unwrap();
    assert_eq!(session.take_event(), Some(SessionEvent::Disconnected));
    assert_eq!(transport.state().unsubscribed, vec![TOPIC_IN.to_string()]);

    session.loop_once(&mut Ctx::default());
    assert_eq!(transport.state().connects, 1);
    assert_eq!(session.take_event(), None);
}
