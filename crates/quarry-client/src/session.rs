//! Per-query session state and fragment aggregation.
//!
//! One [`SessionState`] exists per in-flight query. [`SessionState::apply`]
//! is the single entry point for inbound fragments: it mutates the growing
//! [`QueryResult`], reports back to the connection manager via
//! [`ApplyOutcome`] (complete → unregister, did-you-mean → re-key), and
//! fans the raw fragment out to any [`SessionHandle::subscribe`] listeners
//! after the mutation lands.
//!
//! Completion is a single-settlement primitive: a `watch` channel over
//! [`Settlement`] guarded so that Pending transitions to Resolved or
//! Rejected exactly once. Duplicate `queryComplete` fragments and channel
//! errors arriving after resolution are no-ops by construction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use quarry_protocol::{
    Assumption, DidYouMean, FragmentEnvelope, FragmentKind, FutureTopic, LocationId, Pod, Warning,
};

use crate::errors::ClientError;
use crate::template;

/// Capacity of the per-session fragment fan-out channel.
const FRAGMENT_CHANNEL_CAPACITY: usize = 64;

/// An assumption together with its expanded display string.
#[derive(Clone, Debug)]
pub struct ExpandedAssumption {
    /// Human-readable sentence produced by template expansion.
    pub display: String,
    /// The assumption as received.
    pub assumption: Assumption,
}

/// Accumulated result of one query.
///
/// Grows as fragments arrive; [`SessionHandle::snapshot`] clones the current
/// state at any point, before or after completion.
#[derive(Clone, Debug, Default)]
pub struct QueryResult {
    /// Query text as submitted.
    pub original_input: String,
    /// Assumption tokens the query was submitted with.
    pub input_assumptions: Vec<String>,
    /// Server-corrected input; last non-null value seen wins.
    pub corrected_input: Option<String>,
    /// Spelling/phrasing suggestions, in arrival order.
    pub did_you_mean: Vec<DidYouMean>,
    /// Result pods keyed by display position; later fragments replace earlier
    /// pods at the same position.
    pub pods: BTreeMap<i64, Pod>,
    /// Pods the server failed to compute, in arrival order.
    pub errored_pods: Vec<Pod>,
    /// Step-by-step solution pods keyed by position, same overwrite policy
    /// as `pods`.
    pub step_by_step: BTreeMap<i64, Pod>,
    /// Assumptions with expanded display strings, in arrival order.
    pub assumptions: Vec<ExpandedAssumption>,
    /// Interpretation warnings, in arrival order.
    pub warnings: Vec<Warning>,
    /// True once a `noResult` fragment arrives; never reset.
    pub failed: bool,
    /// Topics the server plans to cover in the future.
    pub future_topics: Vec<FutureTopic>,
    /// Subqueries that timed out server-side; set once at completion.
    pub timed_out: Vec<String>,
    /// Every fragment received for this session, in arrival order.
    pub fragments: Vec<FragmentEnvelope>,
    /// Backend hostname from the most recent fragment carrying one.
    pub host: Option<String>,
    /// Backend server identifier from the most recent fragment carrying one.
    pub server: Option<String>,
}

/// Completion state of a session.
#[derive(Clone, Debug)]
enum Settlement {
    /// Query still in flight.
    Pending,
    /// `queryComplete` arrived.
    Resolved,
    /// The channel failed while the query was outstanding.
    Rejected(ClientError),
}

/// What the connection manager must do after applying a fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ApplyOutcome {
    /// Nothing; the session stays registered under its current identifier.
    None,
    /// Unregister the session — the query is complete.
    Complete,
    /// Rebind the session under its `_dym` successor identifier.
    Rekey,
}

/// Shared state for one in-flight query.
pub(crate) struct SessionState {
    identifier: Mutex<LocationId>,
    rekeyed: AtomicBool,
    result: Mutex<QueryResult>,
    settled: watch::Sender<Settlement>,
    fragments_tx: broadcast::Sender<FragmentEnvelope>,
}

impl SessionState {
    pub(crate) fn new(
        identifier: LocationId,
        input: &str,
        input_assumptions: &[String],
    ) -> Arc<Self> {
        let (settled, _) = watch::channel(Settlement::Pending);
        let (fragments_tx, _) = broadcast::channel(FRAGMENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            identifier: Mutex::new(identifier),
            rekeyed: AtomicBool::new(false),
            result: Mutex::new(QueryResult {
                original_input: input.to_owned(),
                input_assumptions: input_assumptions.to_vec(),
                ..QueryResult::default()
            }),
            settled,
            fragments_tx,
        })
    }

    pub(crate) fn identifier(&self) -> LocationId {
        self.identifier.lock().clone()
    }

    /// Rebind the session's identifier. Called by the connection manager as
    /// part of the atomic re-key; identity mutates at most once per session.
    pub(crate) fn set_identifier(&self, identifier: LocationId) {
        *self.identifier.lock() = identifier;
    }

    /// Apply one inbound fragment. The single mutation entry point; the
    /// dispatch loop calls this for one fragment at a time.
    pub(crate) fn apply(&self, envelope: FragmentEnvelope) -> ApplyOutcome {
        let outcome = {
            let mut result = self.result.lock();

            // Envelope-level fields, regardless of fragment kind.
            if let Some(corrected) = &envelope.corrected_input {
                result.corrected_input = Some(corrected.clone());
            }
            if let Some(host) = &envelope.host {
                result.host = Some(host.clone());
            }
            if let Some(server) = &envelope.server {
                result.server = Some(server.clone());
            }

            let outcome = match envelope.kind.clone() {
                FragmentKind::QueryComplete { timed_out } => {
                    result.timed_out = timed_out;
                    ApplyOutcome::Complete
                }
                FragmentKind::DidYouMean { suggestions } => {
                    result.did_you_mean.extend(suggestions.into_vec());
                    if self.rekeyed.swap(true, Ordering::Relaxed) {
                        // Identifier is mutable exactly once.
                        ApplyOutcome::None
                    } else {
                        ApplyOutcome::Rekey
                    }
                }
                FragmentKind::Assumptions { assumptions } => {
                    for assumption in assumptions {
                        let display = template::expand(&assumption, &result.original_input);
                        result.assumptions.push(ExpandedAssumption { display, assumption });
                    }
                    ApplyOutcome::None
                }
                FragmentKind::Pods { pods } => {
                    for pod in pods {
                        if pod.error {
                            result.errored_pods.push(pod);
                        } else {
                            let _ = result.pods.insert(pod.position, pod);
                        }
                    }
                    ApplyOutcome::None
                }
                FragmentKind::StepByStep { pod } => {
                    if let Some(pod) = pod {
                        let _ = result.step_by_step.insert(pod.position, pod);
                    }
                    ApplyOutcome::None
                }
                FragmentKind::Warnings { warnings } => {
                    result.warnings.extend(warnings.into_vec());
                    ApplyOutcome::None
                }
                FragmentKind::NoResult => {
                    // Terminal "no result" signal; completion still awaits
                    // queryComplete.
                    result.failed = true;
                    ApplyOutcome::None
                }
                FragmentKind::FutureTopic { topic } => {
                    result.future_topics.push(topic);
                    ApplyOutcome::None
                }
                FragmentKind::Unknown => ApplyOutcome::None,
            };

            result.fragments.push(envelope.clone());
            outcome
        };

        if outcome == ApplyOutcome::Complete {
            self.settle(Settlement::Resolved);
        }
        // Listeners fire after the state mutation has landed.
        let _ = self.fragments_tx.send(envelope);
        outcome
    }

    /// Reject the session's completion. Channel-error path only; a no-op if
    /// the session already settled.
    pub(crate) fn reject(&self, error: ClientError) {
        self.settle(Settlement::Rejected(error));
    }

    fn settle(&self, next: Settlement) {
        let _ = self.settled.send_if_modified(|current| {
            if matches!(current, Settlement::Pending) {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

/// Caller-facing handle to one in-flight (or finished) query.
///
/// Cheap to clone; all clones observe the same session.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<SessionState>,
}

impl SessionHandle {
    pub(crate) fn new(state: Arc<SessionState>) -> Self {
        Self { state }
    }

    /// The session's current routing identifier. Changes once if the server
    /// sends a did-you-mean fragment.
    #[must_use]
    pub fn id(&self) -> LocationId {
        self.state.identifier()
    }

    /// Clone the accumulated result as of now.
    #[must_use]
    pub fn snapshot(&self) -> QueryResult {
        self.state.result.lock().clone()
    }

    /// Subscribe to raw fragments. Each listener receives every fragment
    /// applied after the point of subscription, post-mutation.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FragmentEnvelope> {
        self.state.fragments_tx.subscribe()
    }

    /// Wait for the query to complete.
    ///
    /// Resolves with `Ok(())` when the server signals `queryComplete`, or
    /// with the channel error if the channel fails while the query is
    /// outstanding. A query that already settled returns immediately.
    pub async fn wait(&self) -> Result<(), ClientError> {
        let mut settled = self.state.settled.subscribe();
        match settled
            .wait_for(|settlement| !matches!(settlement, Settlement::Pending))
            .await
        {
            Ok(settlement) => match &*settlement {
                Settlement::Rejected(error) => Err(error.clone()),
                _ => Ok(()),
            },
            // The sender lives inside our own Arc, so this only happens if
            // the state is torn down mid-wait.
            Err(_) => Err(ClientError::Channel("session dropped".to_owned())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
