mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use rcws_telemetry::{ClientConfig, ConnectionState, ReconnectPolicy, TelemetryClient};
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

use support::{spawn_server, wait_for_state};

async fn next_json(socket: &mut WebSocket) -> Option<Value> {
    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).ok();
        }
    }
    None
}

/// Station stand-in: checks the token, waits for the subscription, pushes
/// one nested frame and then hangs up.
async fn station(mut socket: WebSocket, received: mpsc::UnboundedSender<Value>) {
    let Some(auth) = next_json(&mut socket).await else {
        return;
    };
    let accepted = auth["token"] == "jwt-live";
    let _ = received.send(auth);
    let reply = json!({"type": "auth_response", "success": accepted});
    if socket.send(Message::Text(reply.to_string())).await.is_err() || !accepted {
        return;
    }

    let Some(subscribe) = next_json(&mut socket).await else {
        return;
    };
    let _ = received.send(subscribe);
    let frame = json!({
        "type": "telemetry",
        "data": {"gimbal": {"azimuth": 181.0}, "sensor": {"lrfDistance": 950.0}}
    });
    let _ = socket.send(Message::Text(frame.to_string())).await;
    let _ = socket.send(Message::Close(None)).await;
}

#[tokio::test]
async fn websocket_handshake_against_a_live_server() {
    let (received_tx, mut received_rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route(
            "/api/auth/login",
            post(|| async { Json(json!({"token": "jwt-live", "role": 0})) }),
        )
        .route(
            "/telemetry",
            get(move |ws: WebSocketUpgrade| {
                let received = received_tx.clone();
                async move {
                    ws.on_upgrade(move |socket| station(socket, received))
                        .into_response()
                }
            }),
        );
    let (addr, _shutdown) = spawn_server(app).await;

    let config = ClientConfig::default()
        .with_stream_port_map(addr.port(), addr.port())
        .with_subscribe_delay(Duration::from_millis(20))
        .with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(30), 1));
    let client = TelemetryClient::new(config).expect("build client");
    let frames = Arc::new(Mutex::new(Vec::new()));
    let _updates = {
        let frames = Arc::clone(&frames);
        client.on_update(move |frame| frames.lock().expect("lock").push(*frame))
    };

    client
        .login(
            &format!("http://{addr}"),
            "viewer",
            &SecretString::new("pw".to_string()),
        )
        .await
        .expect("login");
    let mut status = client.watch_status();
    client.connect().await.expect("connect");

    let auth = timeout(Duration::from_secs(5), received_rx.recv())
        .await
        .expect("auth frame in time")
        .expect("server alive");
    assert_eq!(auth, json!({"type": "auth", "token": "jwt-live"}));
    let subscribe = timeout(Duration::from_secs(5), received_rx.recv())
        .await
        .expect("subscribe frame in time")
        .expect("server alive");
    assert_eq!(subscribe, json!({"type": "subscribe", "categories": ["all"]}));

    let reconnecting = wait_for_state(&mut status, ConnectionState::Reconnecting).await;
    assert_eq!(reconnecting.message_count, 1);
    {
        let frames = frames.lock().expect("lock");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].gimbal.gimbal_az, 181.0);
        assert_eq!(frames[0].sensor.lrf_distance, 950.0);
    }

    client.logout().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
