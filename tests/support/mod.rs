#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use rcws_telemetry::{
    ConnectionState, LinkStatus, TelemetryError, Transport, TransportEvent, TransportLink,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

/// Server side of one link opened through [`MockTransport`].
pub struct MockLink {
    pub url: String,
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<TransportEvent>,
}

impl MockLink {
    pub fn open(&self) {
        self.to_client
            .send(TransportEvent::Opened)
            .expect("client link alive");
    }

    pub fn push(&self, frame: Value) {
        self.to_client
            .send(TransportEvent::Frame(frame.to_string()))
            .expect("client link alive");
    }

    pub fn push_text(&self, text: &str) {
        self.to_client
            .send(TransportEvent::Frame(text.to_string()))
            .expect("client link alive");
    }

    pub fn close(&self, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Closed {
            reason: reason.to_string(),
        });
    }

    /// Next frame the client sent, decoded.
    pub async fn next_sent(&mut self) -> Value {
        let text = timeout(Duration::from_secs(60), self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client link closed");
        serde_json::from_str(&text).expect("client frames are json")
    }
}

/// In-memory transport handing every opened link to the test.
pub struct MockTransport {
    opened: mpsc::UnboundedSender<MockLink>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockLink>) {
        let (opened, links) = mpsc::unbounded_channel();
        (Arc::new(Self { opened }), links)
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &str) -> TransportLink {
        let (link, from_client, to_client) = TransportLink::pair();
        let _ = self.opened.send(MockLink {
            url: url.to_string(),
            from_client,
            to_client,
        });
        link
    }
}

pub async fn next_link(links: &mut mpsc::UnboundedReceiver<MockLink>) -> MockLink {
    timeout(Duration::from_secs(60), links.recv())
        .await
        .expect("timed out waiting for transport open")
        .expect("transport dropped")
}

pub async fn wait_for_state(
    status: &mut watch::Receiver<LinkStatus>,
    state: ConnectionState,
) -> LinkStatus {
    timeout(Duration::from_secs(60), status.wait_for(|current| current.state == state))
        .await
        .expect("timed out waiting for state")
        .expect("stream worker stopped")
        .clone()
}

/// Collects error observer output as display strings.
pub fn error_sink() -> (Arc<Mutex<Vec<String>>>, impl Fn(&TelemetryError) + Send + Sync + 'static) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let errors = Arc::clone(&errors);
        move |error: &TelemetryError| errors.lock().expect("lock").push(error.to_string())
    };
    (errors, sink)
}

pub async fn spawn_server(app: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let addr = listener
        .local_addr()
        .expect("read mock server listener address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("mock server should run");
    });
    (addr, shutdown_tx)
}
