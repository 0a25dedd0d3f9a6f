mod support;

use std::sync::Arc;
use std::time::Duration;

use rcws_telemetry::stream::{StreamHandle, StreamObservers};
use rcws_telemetry::{ClientConfig, ConnectionState, SystemClock};
use secrecy::SecretString;
use serde_json::json;
use tokio::time::{timeout, Instant};

use support::{error_sink, next_link, wait_for_state, MockLink, MockTransport};

const WS_URL: &str = "ws://host:8444/telemetry";

fn token() -> SecretString {
    SecretString::new("jwt".to_string())
}

fn spawn_stream() -> (
    StreamHandle,
    StreamObservers,
    tokio::sync::mpsc::UnboundedReceiver<MockLink>,
) {
    let (transport, links) = MockTransport::new();
    let observers = StreamObservers::default();
    let handle = StreamHandle::spawn(
        &ClientConfig::default(),
        transport,
        Arc::new(SystemClock),
        observers.clone(),
    );
    (handle, observers, links)
}

#[tokio::test(start_paused = true)]
async fn handshake_then_subscribe_after_half_a_second() {
    let (handle, _observers, mut links) = spawn_stream();
    let mut status = handle.watch();

    handle.connect(WS_URL.to_string(), token()).await.expect("connect");
    let mut link = next_link(&mut links).await;
    assert_eq!(link.url, WS_URL);
    assert_eq!(handle.status().state, ConnectionState::Connecting);

    link.open();
    assert_eq!(link.next_sent().await, json!({"type": "auth", "token": "jwt"}));
    wait_for_state(&mut status, ConnectionState::Authenticating).await;

    link.push(json!({"type": "auth_response", "success": true}));
    let authenticated_at = Instant::now();
    wait_for_state(&mut status, ConnectionState::Subscribed).await;

    let subscribe = link.next_sent().await;
    assert_eq!(subscribe, json!({"type": "subscribe", "categories": ["all"]}));
    assert_eq!(authenticated_at.elapsed(), Duration::from_millis(500));

    let ping = link.next_sent().await;
    assert_eq!(ping, json!({"type": "ping"}));
    assert_eq!(authenticated_at.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn no_subscribe_without_successful_auth() {
    let (handle, observers, mut links) = spawn_stream();
    let (errors, sink) = error_sink();
    let _errors = observers.errors.register(sink);
    let mut status = handle.watch();

    handle.connect(WS_URL.to_string(), token()).await.expect("connect");
    let mut link = next_link(&mut links).await;
    link.open();
    link.next_sent().await;

    link.push(json!({"type": "auth_response", "success": false, "error": "Invalid token"}));
    wait_for_state(&mut status, ConnectionState::Disconnected).await;

    let leftover = timeout(Duration::from_secs(5), link.from_client.recv()).await;
    assert!(
        matches!(leftover, Ok(None)),
        "link must be closed without a subscribe frame"
    );
    assert_eq!(
        *errors.lock().expect("lock"),
        vec!["authentication error: Invalid token".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn five_reconnects_two_seconds_apart_then_failed() {
    let (handle, observers, mut links) = spawn_stream();
    let (errors, sink) = error_sink();
    let _errors = observers.errors.register(sink);
    let mut status = handle.watch();

    handle.connect(WS_URL.to_string(), token()).await.expect("connect");
    let mut link = next_link(&mut links).await;

    for attempt in 1..=5u32 {
        link.close("connection refused");
        let closed_at = Instant::now();
        let reconnecting = wait_for_state(&mut status, ConnectionState::Reconnecting).await;
        assert_eq!(reconnecting.reconnect_attempts, attempt - 1);

        link = next_link(&mut links).await;
        assert_eq!(closed_at.elapsed(), Duration::from_millis(2000));
        assert_eq!(link.url, WS_URL);
        assert_eq!(handle.status().reconnect_attempts, attempt);
    }

    link.close("connection refused");
    let failed = wait_for_state(&mut status, ConnectionState::Failed).await;
    assert_eq!(failed.reconnect_attempts, 5);
    assert!(
        timeout(Duration::from_secs(60), links.recv()).await.is_err(),
        "no reconnect may be scheduled after failing"
    );

    {
        let errors = errors.lock().expect("lock");
        assert_eq!(errors.len(), 7);
        assert!(errors[..6]
            .iter()
            .all(|error| error == "transport error: connection refused"));
        assert!(errors[6].contains("giving up after 5 reconnect attempts"));
    }

    handle.connect(WS_URL.to_string(), token()).await.expect("reconnect");
    let link = next_link(&mut links).await;
    link.open();
    let resumed = wait_for_state(&mut status, ConnectionState::Authenticating).await;
    assert_eq!(resumed.reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_the_attempt_counter() {
    let (handle, _observers, mut links) = spawn_stream();
    let mut status = handle.watch();

    handle.connect(WS_URL.to_string(), token()).await.expect("connect");
    let link = next_link(&mut links).await;
    link.close("refused");
    let link = next_link(&mut links).await;
    link.close("refused");
    let link = next_link(&mut links).await;
    assert_eq!(handle.status().reconnect_attempts, 2);

    link.open();
    let open = wait_for_state(&mut status, ConnectionState::Authenticating).await;
    assert_eq!(open.reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_reconnecting_cancels_backoff_and_resets_counters() {
    let (handle, observers, mut links) = spawn_stream();
    let frames = Arc::new(std::sync::Mutex::new(Vec::new()));
    let _updates = {
        let frames = Arc::clone(&frames);
        observers
            .updates
            .register(move |frame| frames.lock().expect("lock").push(*frame))
    };
    let mut status = handle.watch();

    handle.connect(WS_URL.to_string(), token()).await.expect("connect");
    let mut link = next_link(&mut links).await;
    link.open();
    link.next_sent().await;
    link.push(json!({"type": "auth_response", "success": true}));
    link.push(json!({"type": "telemetry", "data": {"gimbal": {"azimuth": 12.5}}}));
    timeout(
        Duration::from_secs(1),
        status.wait_for(|status| status.message_count == 1),
    )
    .await
    .expect("first frame dispatched")
    .expect("worker alive");
    tokio::time::advance(Duration::from_millis(100)).await;
    link.push(json!({"type": "telemetry", "data": {"gimbalAz": 13.0}}));

    let streaming = timeout(
        Duration::from_secs(1),
        status.wait_for(|status| status.message_count == 2),
    )
    .await
    .expect("frames dispatched")
    .expect("worker alive")
    .clone();
    assert_eq!(streaming.update_rate, 10.0);
    assert_eq!(frames.lock().expect("lock").len(), 2);
    assert_eq!(frames.lock().expect("lock")[1].gimbal.gimbal_az, 13.0);

    link.close("reset by peer");
    wait_for_state(&mut status, ConnectionState::Reconnecting).await;

    handle.disconnect().await.expect("disconnect");
    let stopped = handle.status();
    assert_eq!(stopped.state, ConnectionState::Disconnected);
    assert_eq!(stopped.message_count, 0);
    assert_eq!(stopped.update_rate, 0.0);
    assert_eq!(stopped.reconnect_attempts, 0);

    assert!(
        timeout(Duration::from_secs(30), links.recv()).await.is_err(),
        "backoff timer must be cancelled"
    );
}

#[tokio::test(start_paused = true)]
async fn bad_frames_are_reported_without_dropping_the_link() {
    let (handle, observers, mut links) = spawn_stream();
    let (errors, sink) = error_sink();
    let _errors = observers.errors.register(sink);
    let mut status = handle.watch();

    handle.connect(WS_URL.to_string(), token()).await.expect("connect");
    let mut link = next_link(&mut links).await;
    link.open();
    link.next_sent().await;
    link.push(json!({"type": "auth_response", "success": true}));
    wait_for_state(&mut status, ConnectionState::Subscribed).await;

    link.push_text("not json at all");
    link.push(json!({"kind": "telemetry"}));
    link.push(json!({"type": "error", "message": "Subscription limit reached"}));
    link.push(json!({"type": "welcome", "version": "1.0"}));
    link.push(json!({"type": "telemetry", "data": {"roll": 2.0}}));

    timeout(
        Duration::from_secs(1),
        status.wait_for(|status| status.message_count == 1),
    )
    .await
    .expect("telemetry still dispatched")
    .expect("worker alive");

    assert_eq!(handle.status().state, ConnectionState::Subscribed);
    let errors = errors.lock().expect("lock");
    assert_eq!(errors.len(), 3);
    assert!(errors[0].starts_with("protocol error: malformed frame"));
    assert_eq!(errors[1], "protocol error: frame is missing a type tag");
    assert_eq!(errors[2], "protocol error: server error: Subscription limit reached");
}

#[tokio::test(start_paused = true)]
async fn events_from_a_replaced_link_are_ignored() {
    let (handle, _observers, mut links) = spawn_stream();
    let mut status = handle.watch();

    handle.connect(WS_URL.to_string(), token()).await.expect("connect");
    let stale = next_link(&mut links).await;
    handle.disconnect().await.expect("disconnect");
    handle.connect(WS_URL.to_string(), token()).await.expect("connect again");
    let fresh = next_link(&mut links).await;

    stale.open();
    stale.close("late close");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.status().state, ConnectionState::Connecting);

    fresh.open();
    wait_for_state(&mut status, ConnectionState::Authenticating).await;
}
