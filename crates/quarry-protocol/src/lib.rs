//! # quarry-protocol
//!
//! Wire types for the Quarry streaming query protocol.
//!
//! The protocol runs over a single persistent WebSocket carrying JSON text
//! frames in both directions:
//!
//! - **Outbound**: [`ClientMessage`] — the `init` handshake batch and
//!   `newQuery` query-start messages, discriminated by a `kind` field.
//! - **Inbound**: [`FragmentEnvelope`] — typed response fragments
//!   discriminated by a `type` field, routed by `locationId`.
//! - **IDs**: [`LocationId`] — the per-query routing identifier.
//!
//! Field names and shapes here are load-bearing: the server matches them
//! byte-for-byte, so every type carries exact-string serialization tests.

#![deny(unsafe_code)]

pub mod fragment;
pub mod ids;
pub mod outbound;
pub mod types;

pub use fragment::{FragmentEnvelope, FragmentKind, OneOrMany};
pub use ids::{DYM_SUFFIX, LocationId};
pub use outbound::ClientMessage;
pub use types::{Assumption, AssumptionValue, DidYouMean, FutureTopic, Pod, Subpod, Warning};
