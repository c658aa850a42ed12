#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, Instant};

use wsmux_client::resolver::{parse_document, EndpointResolver};
use wsmux_client::transport::memory::ServerEnd;
use wsmux_client::transport::MemoryConnector;
use wsmux_client::{ConnectionManager, ConnectionState, ConnectionStatus, IdlePolicy, ManagerSettings};
use wsmux_core::protocol::MessageKind;
use wsmux_core::ChannelKey;

use common::{hosts, memory_manager, settings, ROUTING_DOC};

const KEY: ChannelKey = ChannelKey::Notifications;

async fn wait_status(mgr: &ConnectionManager, key: ChannelKey, status: ConnectionStatus) -> ConnectionState {
    let mut rx = mgr.state(key);
    let state = rx.wait_for(|s| s.status == status).await.unwrap().clone();
    state
}

async fn open(mgr: &ConnectionManager, conn: &MemoryConnector) -> ServerEnd {
    let server = conn.next_server().await.unwrap();
    wait_status(mgr, KEY, ConnectionStatus::Connected).await;
    server
}

fn gaps_secs(times: &[Instant]) -> Vec<u64> {
    times.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect()
}

fn drain_json(server: &mut ServerEnd) -> Vec<Value> {
    let mut out = Vec::new();
    while let Some(frame) = server.try_recv() {
        out.push(serde_json::from_str(frame.as_text().unwrap()).unwrap());
    }
    out
}

#[tokio::test(start_paused = true)]
async fn second_connect_joins_the_live_connection() {
    let (mgr, conn) = memory_manager(settings());

    let mut a = mgr.connect(KEY, &[], None).await.unwrap();
    let mut b = mgr.connect(KEY, &[], None).await.unwrap();
    let server = open(&mgr, &conn).await;
    let mut c = mgr.connect(KEY, &[], None).await.unwrap();

    assert_eq!(conn.attempt_count(), 1);
    assert_eq!(conn.live_connections(), 1);

    server.push_text(r#"{"type":"alert","payload":{"content":"hi"}}"#);
    for sub in [&mut a, &mut b, &mut c] {
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.msg_type.as_deref(), Some("alert"));
        assert_eq!(msg.content(), Some("hi"));
    }
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_double_up_to_the_cap() {
    let (mgr, conn) = memory_manager(settings());
    conn.set_refusing(true);

    let _sub = mgr.connect(KEY, &[], None).await.unwrap();
    while conn.attempt_count() < 8 {
        sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(gaps_secs(&conn.attempt_times())[..7], [1, 2, 4, 8, 16, 30, 30]);
    let state = mgr.snapshot(KEY);
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(state.last_error.as_deref(), Some("transport: connection refused"));
    assert!(state.attempts >= 8);
    assert_eq!(conn.live_connections(), 0);

    mgr.close(KEY).await;
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_the_backoff() {
    let (mgr, conn) = memory_manager(settings());
    conn.refuse_next(3);

    let _sub = mgr.connect(KEY, &[], None).await.unwrap();
    let server = open(&mgr, &conn).await;
    let state = mgr.snapshot(KEY);
    assert_eq!(state.attempts, 0);
    assert_eq!(state.last_error, None);

    server.close();
    let _server = conn.next_server().await.unwrap();

    assert_eq!(gaps_secs(&conn.attempt_times()), [1, 2, 4, 1]);
    assert_eq!(mgr.metrics().opens.get(KEY), 2);
    assert_eq!(mgr.metrics().reconnects_scheduled.get(KEY), 4);
}

#[tokio::test(start_paused = true)]
async fn socket_error_is_recorded_and_retried() {
    let (mgr, conn) = memory_manager(settings());
    let _sub = mgr.connect(KEY, &[], None).await.unwrap();
    let server = open(&mgr, &conn).await;

    server.fail("connection reset");
    let state = wait_status(&mgr, KEY, ConnectionStatus::Disconnected).await;
    assert_eq!(state.attempts, 1);
    assert!(state.last_error.unwrap().contains("connection reset"));

    let _server = conn.next_server().await.unwrap();
    wait_status(&mgr, KEY, ConnectionStatus::Connected).await;
    assert_eq!(conn.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn close_cancels_a_scheduled_reopen() {
    let (mgr, conn) = memory_manager(settings());
    let mut sub = mgr.connect(KEY, &[], None).await.unwrap();
    let server = open(&mgr, &conn).await;

    server.close();
    wait_status(&mgr, KEY, ConnectionStatus::Disconnected).await;
    mgr.close(KEY).await;

    sleep(Duration::from_secs(35)).await;
    assert_eq!(conn.attempt_count(), 1);
    assert_eq!(conn.live_connections(), 0);
    assert!(mgr.open_channels().is_empty());
    assert!(sub.recv().await.is_none());

    let state = mgr.snapshot(KEY);
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(state.attempts, 0);

    // Closing again is a no-op.
    mgr.close(KEY).await;
    assert_eq!(mgr.snapshot(KEY), state);
}

#[tokio::test(start_paused = true)]
async fn close_while_connected_shuts_the_socket() {
    let (mgr, conn) = memory_manager(settings());
    let _sub = mgr.connect(KEY, &[], None).await.unwrap();
    let mut server = open(&mgr, &conn).await;

    mgr.disconnect(KEY).await;

    assert_eq!(conn.live_connections(), 0);
    assert!(server.recv().await.is_none());
    assert_eq!(mgr.snapshot(KEY).status, ConnectionStatus::Disconnected);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(conn.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unresolvable_key_stays_silent_and_records_the_failure() {
    let (mgr, conn) = memory_manager(settings());

    let mut sub = mgr.connect(ChannelKey::Presence, &[], None).await.unwrap();

    let state = mgr.snapshot(ChannelKey::Presence);
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert!(state.last_error.unwrap().contains("presence"));
    assert_eq!(conn.attempt_count(), 0);
    assert!(sub.try_recv().is_none());
    assert_eq!(mgr.open_channels(), vec![ChannelKey::Presence]);

    let err = mgr.send(ChannelKey::Presence, "hello").unwrap_err();
    assert_eq!(err.code().as_str(), "NOT_READY");

    mgr.close(ChannelKey::Presence).await;
    assert!(sub.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn keepalive_and_garbage_frames_do_not_disturb_the_channel() {
    let (mgr, conn) = memory_manager(settings());
    let mut sub = mgr.connect(KEY, &[], None).await.unwrap();
    let server = open(&mgr, &conn).await;

    server.push_text("ping");
    server.push_text(r#"{"type":"pong"}"#);
    server.push_text("definitely not json");
    server.push_text(r#"{"envelope":"message","payload":{"id":"1","type":"read"}}"#);
    server.push_text(
        r#"{"envelope":"message","payload":{"id":"2","type":"text","content":"hello","timestamp":"2024-01-01T00:00:00.000Z"}}"#,
    );

    let first = sub.recv().await.unwrap();
    assert!(first.is_raw());
    assert_eq!(first.payload, Some(Value::String("definitely not json".into())));

    let second = sub.recv().await.unwrap();
    assert_eq!(second.msg_type.as_deref(), Some("text"));
    assert_eq!(second.content(), Some("hello"));
    assert_eq!(second.timestamp.as_deref(), Some("2024-01-01T00:00:00.000Z"));

    assert!(sub.try_recv().is_none());
    assert!(mgr.snapshot(KEY).is_connected());
    assert_eq!(conn.attempt_count(), 1);

    let m = mgr.metrics();
    assert_eq!(m.frames_in.get(KEY), 5);
    assert_eq!(m.frames_dropped.get(KEY), 3);
    assert_eq!(m.frames_raw.get(KEY), 1);
}

#[tokio::test(start_paused = true)]
async fn send_while_disconnected_is_rejected_without_side_effects() {
    let (mgr, conn) = memory_manager(settings());
    conn.set_refusing(true);
    let _sub = mgr.connect(KEY, &[], None).await.unwrap();
    let before = wait_status(&mgr, KEY, ConnectionStatus::Disconnected).await;

    let err = mgr.send_chat(KEY, "hi", MessageKind::Text, None).unwrap_err();
    assert_eq!(err.code().as_str(), "NOT_READY");
    assert_eq!(mgr.snapshot(KEY), before);
    assert_eq!(mgr.metrics().sends_rejected.get(KEY), 1);
    assert_eq!(mgr.metrics().sends.get(KEY), 0);

    // A key that was never connected is rejected too.
    assert!(mgr.send(ChannelKey::Chat, &serde_json::json!({"a": 1})).is_err());

    // Rejected messages are not replayed once the channel opens.
    conn.set_refusing(false);
    let mut server = conn.next_server().await.unwrap();
    wait_status(&mgr, KEY, ConnectionStatus::Connected).await;
    assert!(drain_json(&mut server).is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_while_connected_reaches_the_peer_once() {
    let (mgr, conn) = memory_manager(settings());
    let mut sub = mgr.connect(KEY, &[], None).await.unwrap();
    let mut server = open(&mgr, &conn).await;

    let sent = mgr
        .send_chat(KEY, "see attached", MessageKind::File, Some("report.pdf"))
        .unwrap();

    let frame = server.recv().await.unwrap();
    let v: Value = serde_json::from_str(frame.as_text().unwrap()).unwrap();
    assert_eq!(v["envelope"], "message");
    assert_eq!(v["payload"]["id"], sent.id.as_str());
    assert_eq!(v["payload"]["content"], "see attached");
    assert_eq!(v["payload"]["type"], "file");
    assert_eq!(v["payload"]["fileName"], "report.pdf");
    assert_eq!(v["payload"]["isSender"], true);
    assert!(server.try_recv().is_none());

    // Echoed back, it decodes to the same chat payload.
    server.push(frame);
    let echoed = sub.recv().await.unwrap();
    assert_eq!(echoed.msg_type.as_deref(), Some("file"));
    assert_eq!(echoed.content(), Some("see attached"));
    assert_eq!(echoed.field("fileName"), Some(&Value::String("report.pdf".into())));
    assert_eq!(mgr.metrics().sends.get(KEY), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_probes_while_connected() {
    let (mgr, conn) = memory_manager(settings());
    let _sub = mgr.connect(KEY, &[], None).await.unwrap();
    let mut server = open(&mgr, &conn).await;

    sleep(Duration::from_secs(29)).await;
    assert!(drain_json(&mut server).is_empty());

    sleep(Duration::from_secs(32)).await;
    let probes = drain_json(&mut server);
    assert_eq!(probes.len(), 2);
    for p in &probes {
        assert_eq!(p["type"], "ping");
        assert!(p["ts"].is_string());
    }
    assert_eq!(mgr.metrics().heartbeats.get(KEY), 2);
}

#[tokio::test(start_paused = true)]
async fn no_heartbeat_after_the_socket_drops() {
    let (mgr, conn) = memory_manager(settings());
    let _sub = mgr.connect(KEY, &[], None).await.unwrap();
    let mut server = open(&mgr, &conn).await;
    conn.set_refusing(true);

    server.close();
    wait_status(&mgr, KEY, ConnectionStatus::Disconnected).await;
    sleep(Duration::from_secs(90)).await;

    assert!(drain_json(&mut server).is_empty());
    assert_eq!(mgr.metrics().heartbeats.get(KEY), 0);
}

#[tokio::test(start_paused = true)]
async fn close_when_idle_releases_with_the_last_subscriber() {
    let (mgr, conn) = memory_manager(ManagerSettings {
        idle_policy: IdlePolicy::CloseWhenIdle,
        ..settings()
    });
    let a = mgr.connect(KEY, &[], None).await.unwrap();
    let b = mgr.connect(KEY, &[], None).await.unwrap();
    let _server = open(&mgr, &conn).await;

    drop(a);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(mgr.open_channels(), vec![KEY]);
    assert_eq!(conn.live_connections(), 1);

    drop(b);
    while !mgr.open_channels().is_empty() {
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(conn.live_connections(), 0);
    assert_eq!(mgr.snapshot(KEY).status, ConnectionStatus::Disconnected);

    sleep(Duration::from_secs(35)).await;
    assert_eq!(conn.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn keep_warm_survives_losing_every_subscriber() {
    let (mgr, conn) = memory_manager(settings());
    let sub = mgr.connect(KEY, &[], None).await.unwrap();
    let server = open(&mgr, &conn).await;

    drop(sub);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(mgr.open_channels(), vec![KEY]);
    assert!(mgr.snapshot(KEY).is_connected());
    assert_eq!(conn.live_connections(), 1);

    let mut again = mgr.connect(KEY, &[], None).await.unwrap();
    assert_eq!(conn.attempt_count(), 1);
    server.push_text(r#"{"type":"alert"}"#);
    assert_eq!(again.recv().await.unwrap().msg_type.as_deref(), Some("alert"));
}

#[tokio::test(start_paused = true)]
async fn connect_during_backoff_reopens_now_and_keeps_subscribers() {
    let (mgr, conn) = memory_manager(settings());
    conn.refuse_next(1);

    let mut first = mgr.connect(KEY, &[], None).await.unwrap();
    let failed = wait_status(&mgr, KEY, ConnectionStatus::Disconnected).await;
    assert_eq!(failed.attempts, 1);

    let mut second = mgr.connect(KEY, &[], None).await.unwrap();
    let server = open(&mgr, &conn).await;

    let times = conn.attempt_times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] < Duration::from_secs(1));
    assert_eq!(conn.live_connections(), 1);

    server.push_text(r#"{"type":"x"}"#);
    assert_eq!(first.recv().await.unwrap().msg_type.as_deref(), Some("x"));
    assert_eq!(second.recv().await.unwrap().msg_type.as_deref(), Some("x"));
}

#[tokio::test(start_paused = true)]
async fn params_and_token_reach_the_url() {
    let (mgr, conn) = memory_manager(settings());

    let _sub = mgr
        .connect(ChannelKey::Chat, &[("id", "42")], Some("s3cr3t token"))
        .await
        .unwrap();
    let server = conn.next_server().await.unwrap();

    let expected = "wss://chat.example.test/messaging/chat/42?token=s3cr3t%20token";
    assert_eq!(server.url(), expected);
    assert_eq!(conn.attempt_urls(), vec![expected.to_string()]);
    assert_eq!(mgr.snapshot(ChannelKey::Chat).url.as_deref(), Some(expected));
}

#[tokio::test(start_paused = true)]
async fn connect_waits_for_routing() {
    let resolver = Arc::new(EndpointResolver::new(hosts()));
    let conn = MemoryConnector::new();
    let mgr = ConnectionManager::new(Arc::clone(&resolver), Arc::new(conn.clone()), settings());

    let pending = tokio::spawn({
        let mgr = mgr.clone();
        async move { mgr.connect(KEY, &[], None).await.map(|sub| sub.key()) }
    });

    sleep(Duration::from_secs(5)).await;
    assert!(!pending.is_finished());
    assert_eq!(conn.attempt_count(), 0);

    resolver.load_document(&parse_document(ROUTING_DOC).unwrap());
    assert_eq!(pending.await.unwrap().unwrap(), KEY);
    let _server = conn.next_server().await.unwrap();
    assert_eq!(conn.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_gives_up_when_routing_never_arrives() {
    let resolver = Arc::new(EndpointResolver::new(hosts()));
    let mgr = ConnectionManager::new(
        resolver,
        Arc::new(MemoryConnector::new()),
        ManagerSettings {
            ready_timeout: Some(Duration::from_secs(5)),
            ..settings()
        },
    );

    let err = mgr.connect(KEY, &[], None).await.unwrap_err();
    assert_eq!(err.code().as_str(), "CONFIG_UNAVAILABLE");
    assert!(mgr.open_channels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn churn_never_leaves_two_sockets_open() {
    let (mgr, conn) = memory_manager(settings());

    for round in 1..=5 {
        let _sub = mgr.connect(KEY, &[], None).await.unwrap();
        let _server = open(&mgr, &conn).await;
        assert_eq!(conn.live_connections(), 1, "round {round}");
        mgr.close(KEY).await;
        assert_eq!(conn.live_connections(), 0, "round {round}");
    }
    assert_eq!(conn.attempt_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn close_all_tears_down_every_channel() {
    let (mgr, conn) = memory_manager(settings());
    let mut chat = mgr.connect(ChannelKey::Chat, &[("id", "1")], None).await.unwrap();
    let _s1 = conn.next_server().await.unwrap();
    let mut alerts = mgr.connect(KEY, &[], None).await.unwrap();
    let _s2 = conn.next_server().await.unwrap();
    wait_status(&mgr, ChannelKey::Chat, ConnectionStatus::Connected).await;
    wait_status(&mgr, KEY, ConnectionStatus::Connected).await;
    assert_eq!(mgr.open_channels(), vec![ChannelKey::Chat, KEY]);

    mgr.close_all().await;

    assert!(mgr.open_channels().is_empty());
    assert_eq!(conn.live_connections(), 0);
    assert!(chat.recv().await.is_none());
    assert!(alerts.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn metrics_render_per_channel() {
    let (mgr, conn) = memory_manager(settings());
    let _sub = mgr.connect(KEY, &[], None).await.unwrap();
    let _server = open(&mgr, &conn).await;
    mgr.send(KEY, "x").unwrap();

    let text = mgr.metrics().render();
    assert!(text.contains("# TYPE wsmux_opens_total counter"));
    assert!(text.contains("wsmux_opens_total{channel=\"notifications\"} 1"));
    assert!(text.contains("wsmux_sends_total{channel=\"notifications\"} 1"));
}
