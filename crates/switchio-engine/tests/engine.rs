//! End-to-end engine scenarios against the scripted factory double.

mod fixture;

use std::sync::Arc;
use std::time::{Duration, Instant};

use fixture::{MockFactory, Recorder, Script};
use switchio_engine::engine::{event, Data, EnginePayload};
use switchio_engine::{Engine, EngineOptions, EngineState, Packet, Scope};

fn engine_with(factory: Arc<MockFactory>) -> Arc<Engine> {
    Engine::new(
        "http://localhost:3000/",
        EngineOptions::default(),
        Scope::new(),
        factory,
    )
    .unwrap()
}

fn recorder(engine: &Arc<Engine>) -> Recorder<EnginePayload> {
    Recorder::subscribe(
        engine.events(),
        &[
            event::OPEN,
            event::HANDSHAKE,
            event::DATA,
            event::PING,
            event::UPGRADING,
            event::UPGRADE,
            event::UPGRADE_ERROR,
            event::ERROR,
            event::CLOSE,
        ],
    )
}

#[tokio::test]
async fn handshake_over_polling() {
    let factory = MockFactory::new(Script::default());
    let engine = engine_with(factory.clone());
    let events = recorder(&engine);

    engine.open();
    let EnginePayload::Open(open) = events.next(event::HANDSHAKE).await else {
        panic!("handshake payload should carry the open packet");
    };
    assert_eq!(open.sid, "s1");
    assert_eq!(open.ping_interval, 25000);

    events.next(event::OPEN).await;
    assert_eq!(engine.state(), EngineState::Open);
    assert_eq!(engine.sid().as_deref(), Some("s1"));
    assert_eq!(engine.transport_name(), Some("polling"));
    assert_eq!(engine.max_payload(), 100000);
}

#[tokio::test]
async fn messages_roundtrip_over_polling() {
    let factory = MockFactory::new(Script {
        echo_messages: true,
        ..Default::default()
    });
    let engine = engine_with(factory.clone());
    let events = recorder(&engine);

    engine.open();
    events.next(event::OPEN).await;
    engine.send([Packet::Message("hi".into())]);

    let payload = events.next(event::DATA).await;
    assert!(matches!(payload, EnginePayload::Data(Data::Text(text)) if text == "hi"));
    assert!(factory.posts().contains(&"4hi".to_owned()));
}

#[tokio::test]
async fn server_ping_is_answered_with_pong() {
    let factory = MockFactory::new(Script::default());
    let engine = engine_with(factory.clone());
    let events = recorder(&engine);

    engine.open();
    events.next(event::OPEN).await;

    factory.push_poll("2");
    events.next(event::PING).await;

    // the pong goes out on the next POST
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(factory.posts().contains(&"3".to_owned()));
}

#[tokio::test]
async fn missed_heartbeat_closes_the_session() {
    let factory = MockFactory::new(Script {
        ping_interval: 100,
        ping_timeout: 50,
        ..Default::default()
    });
    let engine = engine_with(factory.clone());
    let events = recorder(&engine);

    let started = Instant::now();
    engine.open();
    events.next(event::OPEN).await;

    let payload = events.next(event::CLOSE).await;
    assert!(matches!(payload, EnginePayload::Reason(reason) if reason == "ping timeout"));
    assert_eq!(engine.state(), EngineState::Closed);

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(150), "closed after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "closed after {elapsed:?}");
}

#[tokio::test]
async fn probe_upgrades_to_websocket_without_losing_packets() {
    let factory = MockFactory::new(Script {
        upgrades: vec!["websocket".into()],
        echo_messages: true,
        accept_ws: true,
        ..Default::default()
    });
    let engine = engine_with(factory.clone());
    let events = recorder(&engine);

    engine.open();
    events.next(event::OPEN).await;
    engine.send([Packet::Message("before".into())]);

    let payload = events.next(event::UPGRADING).await;
    assert!(matches!(payload, EnginePayload::Transport(name) if name == "websocket"));
    // emitted mid-probe: held back by the upgrade and flushed afterwards
    engine.send([Packet::Message("during".into())]);

    events.next(event::UPGRADE).await;
    assert_eq!(engine.transport_name(), Some("websocket"));
    assert!(!engine.upgrading());

    let payload = events.next(event::DATA).await;
    assert!(matches!(payload, EnginePayload::Data(Data::Text(text)) if text == "during"));

    assert!(factory.posts().contains(&"4before".to_owned()));
    let ws = factory.ws_sent();
    let probe = ws.iter().position(|f| f == "2probe").unwrap();
    let upgrade = ws.iter().position(|f| f == "5").unwrap();
    let during = ws.iter().position(|f| f == "4during").unwrap();
    assert!(
        probe < upgrade && upgrade < during,
        "ws frames out of order: {ws:?}"
    );
}

#[tokio::test]
async fn force_close_sends_a_close_packet() {
    let factory = MockFactory::new(Script::default());
    let engine = engine_with(factory.clone());
    let events = recorder(&engine);

    engine.open();
    events.next(event::OPEN).await;
    engine.close();

    let payload = events.next(event::CLOSE).await;
    assert!(matches!(payload, EnginePayload::Reason(reason) if reason == "force close"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(factory.posts().contains(&"1".to_owned()));
}

#[tokio::test]
async fn transport_error_surfaces_and_closes() {
    let factory = MockFactory::new(Script {
        fail_get: true,
        ..Default::default()
    });
    let engine = engine_with(factory.clone());
    let events = recorder(&engine);

    engine.open();
    events.next(event::ERROR).await;
    let payload = events.next(event::CLOSE).await;
    assert!(matches!(payload, EnginePayload::Reason(reason) if reason == "transport error"));
    assert_eq!(engine.state(), EngineState::Closed);
}
