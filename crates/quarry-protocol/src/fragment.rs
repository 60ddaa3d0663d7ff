//! Inbound response fragments.
//!
//! Each WebSocket text frame from the server is one [`FragmentEnvelope`]:
//! routing metadata (`locationId`, the occasional corrected input and host
//! identification) plus a [`FragmentKind`] discriminated by the `type` field.
//!
//! Fragments for different queries interleave freely; the envelope's
//! `locationId` is the only routing key. Unknown `type` values parse to
//! [`FragmentKind::Unknown`] rather than failing — the protocol grows new
//! fragment kinds and old clients must keep routing.

use serde::Deserialize;

use crate::ids::LocationId;
use crate::types::{Assumption, DidYouMean, FutureTopic, Pod, Warning};

/// One inbound server message, belonging to exactly one session.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentEnvelope {
    /// Session this fragment belongs to; frames without one are dropped.
    #[serde(default)]
    pub location_id: Option<LocationId>,
    /// Server-corrected form of the query input, when it differs.
    #[serde(default)]
    pub corrected_input: Option<String>,
    /// Hostname of the backend that produced this fragment (informational).
    #[serde(default)]
    pub host: Option<String>,
    /// Backend server identifier (informational).
    #[serde(default)]
    pub server: Option<String>,
    /// The typed payload.
    #[serde(flatten)]
    pub kind: FragmentKind,
}

/// Fragment payload, discriminated by the wire `type` field.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FragmentKind {
    /// Terminal fragment: the query finished and no more fragments follow.
    QueryComplete {
        /// Subqueries that timed out server-side before completion.
        #[serde(default, rename = "timedOutQueries")]
        timed_out: Vec<String>,
    },

    /// Spelling/phrasing suggestions; re-keys the session (see the client).
    #[serde(rename = "didyoumean")]
    DidYouMean {
        /// One suggestion or several — the server sends both encodings.
        #[serde(default, rename = "didyoumean")]
        suggestions: OneOrMany<DidYouMean>,
    },

    /// Interpretation assumptions, each carrying an expansion template.
    Assumptions {
        /// Assumptions made for this query.
        #[serde(default)]
        assumptions: Vec<Assumption>,
    },

    /// A batch of result pods.
    Pods {
        /// Pods in this batch; positions may repeat across batches.
        #[serde(default)]
        pods: Vec<Pod>,
    },

    /// A single step-by-step solution pod.
    StepByStep {
        /// The carried pod; absent on malformed frames.
        #[serde(default)]
        pod: Option<Pod>,
    },

    /// Non-fatal warnings about query interpretation.
    Warnings {
        /// One warning or several — the server sends both encodings.
        #[serde(default)]
        warnings: OneOrMany<Warning>,
    },

    /// Terminal "the server has no result" signal. Completion still waits
    /// for `queryComplete`.
    NoResult,

    /// A topic the server cannot answer yet but plans to.
    FutureTopic {
        /// The carried topic.
        #[serde(rename = "futureTopic")]
        topic: FutureTopic,
    },

    /// Any fragment type this client does not understand.
    #[serde(other)]
    Unknown,
}

impl FragmentKind {
    /// Stable name for logging and progress display.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::QueryComplete { .. } => "queryComplete",
            Self::DidYouMean { .. } => "didyoumean",
            Self::Assumptions { .. } => "assumptions",
            Self::Pods { .. } => "pods",
            Self::StepByStep { .. } => "stepByStep",
            Self::Warnings { .. } => "warnings",
            Self::NoResult => "noResult",
            Self::FutureTopic { .. } => "futureTopic",
            Self::Unknown => "unknown",
        }
    }
}

/// A value the server encodes either bare or as an array.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// Array encoding.
    Many(Vec<T>),
    /// Bare single-value encoding.
    One(T),
}

impl<T> OneOrMany<T> {
    /// Normalize into a sequence: a lone value becomes a one-element vec.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
