//! Transport seam and the `tokio-tungstenite` channel adapter.
//!
//! The connection manager only needs two capabilities from a channel: send a
//! text frame, and receive [`ChannelEvent`]s. [`Transport`] is the seam —
//! [`WsTransport`] is the production implementation; tests substitute an
//! in-memory fake.
//!
//! Every event carries the generation of the channel that produced it, so
//! the manager can ignore stragglers from a channel it has already replaced.

use futures::{SinkExt, StreamExt};
use http::{HeaderName, HeaderValue};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::warn;

use crate::errors::ClientError;

/// Something that happened on a channel.
#[derive(Clone, Debug)]
pub enum ChannelEventKind {
    /// The channel finished its handshake and can carry frames.
    Ready,
    /// An inbound text frame.
    Message(String),
    /// The channel failed. Outstanding sessions will be rejected.
    Error(String),
    /// The channel closed cleanly. Outstanding sessions stay pending.
    Closed {
        /// Close code from the peer, if any.
        code: Option<u16>,
        /// Close reason from the peer, possibly empty.
        reason: String,
    },
}

/// A channel event tagged with the generation of the channel it came from.
#[derive(Clone, Debug)]
pub struct ChannelEvent {
    /// Generation assigned by the connection manager when it opened the
    /// channel.
    pub generation: u64,
    /// What happened.
    pub kind: ChannelEventKind,
}

/// Outbound half of an open channel.
pub trait ChannelHandle: Send + Sync {
    /// Queue one text frame for sending.
    fn send_text(&self, text: String) -> Result<(), ClientError>;
}

/// Factory for channels. One implementation per transport.
pub trait Transport: Send + Sync + 'static {
    /// Open a channel to `endpoint`. Connection progress and inbound frames
    /// are reported through `events`, tagged with `generation`.
    fn open(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        generation: u64,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Box<dyn ChannelHandle>;
}

/// WebSocket transport over `tokio-tungstenite`.
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        generation: u64,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Box<dyn ChannelHandle> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(
            endpoint.to_owned(),
            headers.to_vec(),
            generation,
            events,
            outbound_rx,
        ));
        Box::new(WsHandle {
            outbound: outbound_tx,
            _task: task,
        })
    }
}

struct WsHandle {
    outbound: mpsc::UnboundedSender<String>,
    _task: JoinHandle<()>,
}

impl ChannelHandle for WsHandle {
    fn send_text(&self, text: String) -> Result<(), ClientError> {
        self.outbound
            .send(text)
            .map_err(|_| ClientError::Send("channel task has exited".to_owned()))
    }
}

/// Own one WebSocket connection end to end: handshake, then pump outbound
/// frames from the manager and inbound frames to the manager until either
/// side goes away.
async fn run_channel(
    endpoint: String,
    headers: Vec<(String, String)>,
    generation: u64,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let emit = |kind: ChannelEventKind| {
        let _ = events.send(ChannelEvent { generation, kind });
    };

    let mut request = match endpoint.as_str().into_client_request() {
        Ok(request) => request,
        Err(err) => {
            emit(ChannelEventKind::Error(err.to_string()));
            return;
        }
    };
    for (name, value) in &headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                let _ = request.headers_mut().insert(name, value);
            }
            _ => warn!(header = %name, "skipping invalid handshake header"),
        }
    }

    let (ws, _response) = match connect_async(request).await {
        Ok(pair) => pair,
        Err(err) => {
            emit(ChannelEventKind::Error(err.to_string()));
            return;
        }
    };
    emit(ChannelEventKind::Ready);

    let (mut ws_tx, mut ws_rx) = ws.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    // Manager dropped the handle; close cleanly.
                    let _ = ws_tx.close().await;
                    break;
                };
                if let Err(err) = ws_tx.send(WsMessage::Text(text.into())).await {
                    emit(ChannelEventKind::Error(err.to_string()));
                    break;
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        emit(ChannelEventKind::Message(text.to_string()));
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                            .unwrap_or((None, String::new()));
                        emit(ChannelEventKind::Closed { code, reason });
                        break;
                    }
                    // Ping/pong are answered by the library; binary frames
                    // are not part of this protocol.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        emit(ChannelEventKind::Error(err.to_string()));
                        break;
                    }
                    None => {
                        emit(ChannelEventKind::Closed { code: None, reason: String::new() });
                        break;
                    }
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_endpoint_reports_channel_error() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = WsTransport;
        let _handle = transport.open("not a url", &[], 7, events_tx);

        let event = events_rx.recv().await.expect("error event");
        assert_eq!(event.generation, 7);
        assert!(matches!(event.kind, ChannelEventKind::Error(_)));
    }

    #[tokio::test]
    async fn send_after_task_exit_fails() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = WsTransport;
        let handle = transport.open("not a url", &[], 1, events_tx);

        // Wait for the task to bail out on the bad endpoint.
        let _ = events_rx.recv().await;
        tokio::task::yield_now().await;

        let result = handle.send_text("{}".to_owned());
        assert!(matches!(result, Err(ClientError::Send(_))));
    }
}
