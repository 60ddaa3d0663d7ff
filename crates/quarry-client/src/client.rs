//! Connection manager: one logical channel, many in-flight queries.
//!
//! [`Client`] owns the channel lifecycle and the routing table from
//! `locationId` to session. Submissions never block on the network: messages
//! submitted before the channel is ready queue up and ride the single `init`
//! batch once the handshake completes.
//!
//! A dedicated dispatch task consumes channel events one at a time, so no
//! two fragments are ever applied concurrently — the aggregation logic in
//! [`crate::session`] needs no locking of its own beyond the shared state
//! mutex.
//!
//! Lifecycle policy, deliberately asymmetric:
//! - a channel **error** rejects every outstanding session with that error
//!   and discards any still-queued sends (their sessions just failed;
//!   replaying them on reconnect would be a retry), but leaves the sessions
//!   in the routing table for post-mortem inspection;
//! - a clean **close** rejects nothing — it is not a failure of the queries.
//!
//! Either way the next [`Client::submit`] opens a fresh channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use quarry_protocol::{ClientMessage, FragmentEnvelope, LocationId};

use crate::errors::ClientError;
use crate::session::{ApplyOutcome, SessionHandle, SessionState};
use crate::transport::{ChannelEvent, ChannelEventKind, ChannelHandle, Transport, WsTransport};

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket endpoint URL.
    pub endpoint: String,
    /// Language code sent in `init` and every `newQuery`.
    pub language: String,
    /// Extra handshake headers.
    pub headers: Vec<(String, String)>,
}

impl ClientConfig {
    /// Configuration for `endpoint` with the default language (`en`).
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            language: "en".to_owned(),
            headers: Vec::new(),
        }
    }
}

/// Channel lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChannelState {
    /// No channel; the next send initiates a connection.
    Disconnected,
    /// Handshake in progress; sends queue up for the `init` batch.
    Connecting,
    /// Channel usable; sends go out immediately.
    Ready,
}

struct Inner {
    channel: ChannelState,
    handle: Option<Box<dyn ChannelHandle>>,
    generation: u64,
    queue: VecDeque<Value>,
    outstanding: HashMap<LocationId, Arc<SessionState>>,
}

/// Client for the streaming query protocol.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Client {
    inner: Arc<Mutex<Inner>>,
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    _dispatch: JoinHandle<()>,
}

impl Client {
    /// Create a client using the WebSocket transport. No connection is made
    /// until the first [`Client::submit`].
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(WsTransport))
    }

    /// Create a client over a custom [`Transport`].
    #[must_use]
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            channel: ChannelState::Disconnected,
            handle: None,
            generation: 0,
            queue: VecDeque::new(),
            outstanding: HashMap::new(),
        }));
        let config = Arc::new(config);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatch = tokio::spawn(dispatch_loop(
            Arc::clone(&inner),
            Arc::clone(&config),
            events_rx,
        ));
        Self {
            inner,
            config,
            transport,
            events_tx,
            _dispatch: dispatch,
        }
    }

    /// Submit a query.
    ///
    /// Registers a session under a fresh identifier, routes the `newQuery`
    /// message (queueing it if the channel is not ready, connecting if there
    /// is no channel), and returns the session handle immediately.
    pub fn submit(&self, input: &str, assumptions: &[String]) -> SessionHandle {
        let id = LocationId::new();
        let session = SessionState::new(id.clone(), input, assumptions);
        let handle = SessionHandle::new(Arc::clone(&session));
        let message = ClientMessage::new_query(&self.config.language, input, assumptions, id.clone());

        let mut guard = self.inner.lock();
        let _ = guard.outstanding.insert(id, session);
        match serde_json::to_value(&message) {
            Ok(value) => self.route(&mut guard, value),
            Err(err) => warn!(%err, "failed to encode query message"),
        }
        handle
    }

    /// Locally cancel a session: remove it from the routing table so further
    /// fragments for it drop as unmatched. The server keeps streaming; this
    /// only stops us listening. Returns whether the session was registered.
    pub fn evict(&self, id: &LocationId) -> bool {
        self.inner.lock().outstanding.remove(id).is_some()
    }

    /// Number of sessions currently registered in the routing table.
    #[must_use]
    pub fn pending_queries(&self) -> usize {
        self.inner.lock().outstanding.len()
    }

    /// Route an outbound message according to channel state.
    fn route(&self, guard: &mut Inner, value: Value) {
        match guard.channel {
            ChannelState::Ready => send_now(guard, &value),
            ChannelState::Connecting => guard.queue.push_back(value),
            ChannelState::Disconnected => {
                guard.queue.push_back(value);
                self.open_channel(guard);
            }
        }
    }

    fn open_channel(&self, guard: &mut Inner) {
        guard.generation += 1;
        debug!(
            generation = guard.generation,
            endpoint = %self.config.endpoint,
            "opening channel"
        );
        guard.handle = Some(self.transport.open(
            &self.config.endpoint,
            &self.config.headers,
            guard.generation,
            self.events_tx.clone(),
        ));
        guard.channel = ChannelState::Connecting;
    }
}

/// Consume channel events in arrival order. One event at a time: this task
/// is the only place fragments are applied.
async fn dispatch_loop(
    inner: Arc<Mutex<Inner>>,
    config: Arc<ClientConfig>,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    while let Some(event) = events.recv().await {
        handle_event(&inner, &config, event);
    }
}

fn handle_event(inner: &Mutex<Inner>, config: &ClientConfig, event: ChannelEvent) {
    let mut guard = inner.lock();
    if event.generation != guard.generation {
        debug!(
            generation = event.generation,
            current = guard.generation,
            "dropping event from superseded channel"
        );
        return;
    }

    match event.kind {
        ChannelEventKind::Ready => {
            let queued: Vec<Value> = guard.queue.drain(..).collect();
            guard.channel = ChannelState::Ready;
            let init = ClientMessage::init(
                &config.language,
                chrono::Utc::now().timestamp_millis(),
                queued,
            );
            match serde_json::to_value(&init) {
                Ok(value) => send_now(&mut guard, &value),
                Err(err) => warn!(%err, "failed to encode init message"),
            }
        }
        ChannelEventKind::Message(raw) => dispatch_fragment(&mut guard, &raw),
        ChannelEventKind::Error(reason) => {
            warn!(%reason, "channel error; rejecting outstanding sessions");
            guard.channel = ChannelState::Disconnected;
            guard.handle = None;
            // Queued messages belong to sessions rejected right below;
            // letting them ride the next init batch would be a retry.
            guard.queue.clear();
            let error = ClientError::Channel(reason);
            // Sessions stay registered for post-mortem inspection.
            for session in guard.outstanding.values() {
                session.reject(error.clone());
            }
        }
        ChannelEventKind::Closed { code, reason } => {
            debug!(?code, %reason, "channel closed");
            guard.channel = ChannelState::Disconnected;
            guard.handle = None;
        }
    }
}

fn send_now(guard: &mut Inner, value: &Value) {
    if let Some(handle) = &guard.handle {
        if let Err(err) = handle.send_text(value.to_string()) {
            warn!(%err, "failed to hand frame to transport");
        }
    }
}

/// Parse one inbound frame and route it to its session.
///
/// Unmatched and malformed frames are dropped without touching any session;
/// a matched frame is applied and the routing table updated per the outcome
/// (completion unregisters, did-you-mean rebinds old id → `_dym` successor
/// atomically under the state lock).
fn dispatch_fragment(guard: &mut Inner, raw: &str) {
    let envelope: FragmentEnvelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(%err, "skipping malformed fragment");
            return;
        }
    };
    let Some(location_id) = envelope.location_id.clone() else {
        debug!("dropping fragment without locationId");
        return;
    };
    let Some(session) = guard.outstanding.get(&location_id).cloned() else {
        debug!(id = %location_id, kind = envelope.kind.name(), "dropping unmatched fragment");
        return;
    };

    match session.apply(envelope) {
        ApplyOutcome::None => {}
        ApplyOutcome::Complete => {
            let _ = guard.outstanding.remove(&location_id);
        }
        ApplyOutcome::Rekey => {
            if let Some(session) = guard.outstanding.remove(&location_id) {
                let successor = location_id.rekeyed();
                session.set_identifier(successor.clone());
                let _ = guard.outstanding.insert(successor, session);
            }
        }
    }
}

#[cfg(test)]
impl Client {
    /// Feed an event through the dispatch path synchronously, tagged with
    /// the current channel generation.
    fn inject(&self, kind: ChannelEventKind) {
        let generation = self.inner.lock().generation;
        self.inject_at(generation, kind);
    }

    /// Feed an event through the dispatch path with an explicit generation.
    fn inject_at(&self, generation: u64, kind: ChannelEventKind) {
        handle_event(&self.inner, &self.config, ChannelEvent { generation, kind });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct FakeTransport {
        sent: Arc<Mutex<Vec<String>>>,
        opened: Arc<AtomicUsize>,
    }

    struct FakeHandle {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for FakeTransport {
        fn open(
            &self,
            _endpoint: &str,
            _headers: &[(String, String)],
            _generation: u64,
            _events: mpsc::UnboundedSender<ChannelEvent>,
        ) -> Box<dyn ChannelHandle> {
            let _ = self.opened.fetch_add(1, Ordering::SeqCst);
            Box::new(FakeHandle {
                sent: Arc::clone(&self.sent),
            })
        }
    }

    impl ChannelHandle for FakeHandle {
        fn send_text(&self, text: String) -> Result<(), ClientError> {
            self.sent.lock().push(text);
            Ok(())
        }
    }

    fn client() -> (Client, FakeTransport) {
        let transport = FakeTransport::default();
        let client = Client::with_transport(
            ClientConfig::new("wss://example.net/api"),
            Arc::new(transport.clone()),
        );
        (client, transport)
    }

    fn frame(value: serde_json::Value) -> ChannelEventKind {
        ChannelEventKind::Message(value.to_string())
    }

    fn pods_fragment(id: &LocationId) -> serde_json::Value {
        json!({
            "type": "pods",
            "locationId": id.as_str(),
            "pods": [{"title": "Result", "position": 200}]
        })
    }

    async fn still_pending(handle: &SessionHandle) -> bool {
        tokio::time::timeout(Duration::from_millis(20), handle.wait())
            .await
            .is_err()
    }

    // ── Queueing and init batch ──────────────────────────────────────

    #[tokio::test]
    async fn submits_before_ready_ride_one_init_batch_in_order() {
        let (client, transport) = client();
        let _a = client.submit("first query", &[]);
        let _b = client.submit("second query", &[]);

        // Nothing on the wire while the handshake is in flight.
        assert!(transport.sent.lock().is_empty());
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);

        client.inject(ChannelEventKind::Ready);

        let sent = transport.sent.lock().clone();
        assert_eq!(sent.len(), 1, "exactly one init message");
        let init: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(init["kind"], "init");
        assert_eq!(init["lang"], "en");
        assert!(init["exp"].as_i64().unwrap() > 0);
        assert_eq!(init["messages"][0]["input"], "first query");
        assert_eq!(init["messages"][1]["input"], "second query");
    }

    #[tokio::test]
    async fn submit_after_ready_sends_directly() {
        let (client, transport) = client();
        let _a = client.submit("warmup", &[]);
        client.inject(ChannelEventKind::Ready);

        let _b = client.submit("direct", &[]);

        let sent = transport.sent.lock().clone();
        assert_eq!(sent.len(), 2);
        let query: serde_json::Value = serde_json::from_str(&sent[1]).unwrap();
        assert_eq!(query["kind"], "newQuery");
        assert_eq!(query["input"], "direct");
        // Still the same channel.
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
    }

    // ── Fragment routing ─────────────────────────────────────────────

    #[tokio::test]
    async fn fragments_route_to_matching_session() {
        let (client, _transport) = client();
        let handle = client.submit("2+2", &[]);
        client.inject(ChannelEventKind::Ready);

        client.inject(frame(pods_fragment(&handle.id())));

        let snapshot = handle.snapshot();
        assert!(snapshot.pods.contains_key(&200));
        assert_eq!(snapshot.fragments.len(), 1);
    }

    #[tokio::test]
    async fn unmatched_fragment_is_silently_dropped() {
        let (client, _transport) = client();
        let handle = client.submit("2+2", &[]);
        client.inject(ChannelEventKind::Ready);

        client.inject(frame(pods_fragment(&LocationId::from("nobody-home"))));

        assert!(handle.snapshot().fragments.is_empty());
        assert_eq!(client.pending_queries(), 1);
    }

    #[tokio::test]
    async fn malformed_fragment_does_not_kill_dispatch() {
        let (client, _transport) = client();
        let handle = client.submit("2+2", &[]);
        client.inject(ChannelEventKind::Ready);

        client.inject(ChannelEventKind::Message("{not json".to_owned()));
        client.inject(frame(json!({"locationId": handle.id().as_str()})));

        // Later well-formed fragments still route.
        client.inject(frame(pods_fragment(&handle.id())));
        assert_eq!(handle.snapshot().fragments.len(), 1);
    }

    #[tokio::test]
    async fn query_complete_resolves_and_unregisters() {
        let (client, _transport) = client();
        let handle = client.submit("2+2", &[]);
        client.inject(ChannelEventKind::Ready);

        client.inject(frame(json!({
            "type": "queryComplete",
            "locationId": handle.id().as_str()
        })));

        handle.wait().await.expect("completed query");
        assert_eq!(client.pending_queries(), 0);

        // Fragments after local cleanup drop as unmatched.
        client.inject(frame(pods_fragment(&handle.id())));
        assert_eq!(handle.snapshot().fragments.len(), 1);
    }

    // ── Re-key ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn didyoumean_rebinds_session_under_dym_successor() {
        let (client, _transport) = client();
        let handle = client.submit("pie", &[]);
        client.inject(ChannelEventKind::Ready);
        let original = handle.id();

        client.inject(frame(json!({
            "type": "didyoumean",
            "locationId": original.as_str(),
            "didyoumean": {"val": "pi"}
        })));

        let successor = handle.id();
        assert_eq!(successor.as_str(), format!("{original}_dym"));

        // Old identifier no longer routes.
        client.inject(frame(pods_fragment(&original)));
        assert_eq!(handle.snapshot().fragments.len(), 1);

        // Successor identifier does.
        client.inject(frame(pods_fragment(&successor)));
        assert_eq!(handle.snapshot().fragments.len(), 2);
        assert_eq!(client.pending_queries(), 1);
    }

    // ── Channel failure policy ───────────────────────────────────────

    #[tokio::test]
    async fn channel_error_rejects_all_outstanding_but_removes_none() {
        let (client, _transport) = client();
        let a = client.submit("one", &[]);
        let b = client.submit("two", &[]);
        client.inject(ChannelEventKind::Ready);

        client.inject(ChannelEventKind::Error("connection reset".to_owned()));

        assert_matches!(
            a.wait().await,
            Err(ClientError::Channel(reason)) if reason == "connection reset"
        );
        assert_matches!(
            b.wait().await,
            Err(ClientError::Channel(reason)) if reason == "connection reset"
        );
        // Post-mortem inspection: sessions stay registered.
        assert_eq!(client.pending_queries(), 2);
    }

    #[tokio::test]
    async fn clean_close_does_not_reject_sessions() {
        let (client, _transport) = client();
        let handle = client.submit("patient query", &[]);
        client.inject(ChannelEventKind::Ready);

        client.inject(ChannelEventKind::Closed {
            code: Some(1000),
            reason: "bye".to_owned(),
        });

        assert!(still_pending(&handle).await);
        assert_eq!(client.pending_queries(), 1);
    }

    #[tokio::test]
    async fn submit_after_error_reopens_channel() {
        let (client, transport) = client();
        let _dead = client.submit("doomed", &[]);
        client.inject(ChannelEventKind::Ready);
        client.inject(ChannelEventKind::Error("boom".to_owned()));

        let revived = client.submit("try again", &[]);
        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);

        client.inject(ChannelEventKind::Ready);
        let sent = transport.sent.lock().clone();
        let init: serde_json::Value = serde_json::from_str(sent.last().unwrap()).unwrap();
        assert_eq!(init["kind"], "init");
        assert_eq!(init["messages"][0]["input"], "try again");
        assert!(still_pending(&revived).await);
    }

    #[tokio::test]
    async fn handshake_failure_does_not_replay_queued_messages() {
        let (client, transport) = client();
        // Queued while Connecting; the handshake then fails.
        let doomed = client.submit("doomed", &[]);
        client.inject(ChannelEventKind::Error("handshake failed".to_owned()));
        assert_matches!(doomed.wait().await, Err(ClientError::Channel(_)));

        let _fresh = client.submit("fresh", &[]);
        client.inject(ChannelEventKind::Ready);

        let sent = transport.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        let init: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        let inputs: Vec<_> = init["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["input"].as_str().unwrap().to_owned())
            .collect();
        // The rejected session's queued message must not ride the new batch.
        assert_eq!(inputs, vec!["fresh"]);
    }

    #[tokio::test]
    async fn stale_generation_events_are_ignored() {
        let (client, _transport) = client();
        let _dead = client.submit("doomed", &[]);
        client.inject(ChannelEventKind::Ready);
        client.inject(ChannelEventKind::Error("boom".to_owned()));

        let revived = client.submit("fresh", &[]);

        // A late error from the first channel must not touch the new session.
        client.inject_at(1, ChannelEventKind::Error("stale".to_owned()));
        assert!(still_pending(&revived).await);
    }

    // ── Local cancellation ───────────────────────────────────────────

    #[tokio::test]
    async fn evicted_session_stops_receiving_fragments() {
        let (client, _transport) = client();
        let handle = client.submit("never mind", &[]);
        client.inject(ChannelEventKind::Ready);

        assert!(client.evict(&handle.id()));
        assert!(!client.evict(&handle.id()));
        assert_eq!(client.pending_queries(), 0);

        client.inject(frame(pods_fragment(&handle.id())));
        assert!(handle.snapshot().fragments.is_empty());
    }

    #[tokio::test]
    async fn new_query_carries_session_identifier() {
        let (client, transport) = client();
        let handle = client.submit("2+2", &["*C.pi-_*Movie-".to_owned()]);
        client.inject(ChannelEventKind::Ready);

        let sent = transport.sent.lock().clone();
        let init: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        let query = &init["messages"][0];
        assert_eq!(query["locationId"], handle.id().as_str());
        assert_eq!(query["assumption"][0], "*C.pi-_*Movie-");
        assert!(query["file"].is_null());
    }
}
