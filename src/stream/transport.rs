//! Websocket transport seam.
//!
//! A [`Transport`] opens a link and hands back a pair of channels; the
//! socket itself lives in a task owned by the transport. Dropping the
//! outbound sender closes the socket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ClientDefaults;
use crate::retry::with_timeout;

/// Lifecycle and data events of one transport link.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    /// Open failed or the socket closed. Always the last event of a link.
    Closed { reason: String },
}

/// Channel pair of an opened (or opening) link.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    /// Creates a link and returns the far-side ends for a transport
    /// implementation to drive.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            outbound_rx,
            inbound_tx,
        )
    }
}

/// Opens message-oriented links to the stream server.
pub trait Transport: Send + Sync {
    /// Starts opening `url`. Must not block; progress is reported through
    /// the link's inbound events.
    fn open(&self, url: &str) -> TransportLink;
}

/// Websocket transport backed by `tokio-tungstenite`.
#[derive(Clone, Debug)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    /// Transport giving up on opens after `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(ClientDefaults::WS_CONNECT_TIMEOUT)
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str) -> TransportLink {
        let (link, outbound_rx, inbound_tx) = TransportLink::pair();
        let url = url.to_string();
        let connect_timeout = self.connect_timeout;
        tokio::spawn(async move {
            let reason = run_socket(&url, connect_timeout, outbound_rx, &inbound_tx).await;
            tracing::debug!(event = "ws_link_closed", url = %url, reason = %reason);
            let _ = inbound_tx.send(TransportEvent::Closed { reason });
        });
        link
    }
}

async fn run_socket(
    url: &str,
    connect_timeout: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> String {
    let mut socket = match with_timeout(connect_timeout, connect_async(url)).await {
        Ok(Ok((socket, _))) => socket,
        Ok(Err(err)) => return format!("connect failed: {err}"),
        Err(_) => return format!("connect timed out after {connect_timeout:?}"),
    };
    if inbound_tx.send(TransportEvent::Opened).is_err() {
        let _ = socket.close(None).await;
        return "link dropped".to_string();
    }

    loop {
        tokio::select! {
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(text) => {
                        if let Err(err) = socket.send(Message::Text(text)).await {
                            return format!("send failed: {err}");
                        }
                    }
                    None => {
                        let _ = socket.close(None).await;
                        return "closed by client".to_string();
                    }
                }
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(TransportEvent::Frame(text)).is_err() {
                            let _ = socket.close(None).await;
                            return "link dropped".to_string();
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = socket.send(Message::Pong(payload)).await {
                            return format!("send failed: {err}");
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(payload))) => {
                        tracing::debug!(event = "ws_binary_frame_ignored", len = payload.len());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(frame) => {
                                format!("closed by server: {} {}", frame.code, frame.reason)
                            }
                            None => "closed by server".to_string(),
                        };
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(err)) => return format!("websocket error: {err}"),
                    None => return "connection ended".to_string(),
                }
            }
        }
    }
}
