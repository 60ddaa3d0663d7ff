//! Outbound client messages.
//!
//! Two messages ever leave the client, both discriminated by a `kind` field:
//!
//! - `init` — sent once when the channel becomes ready, carrying the session
//!   language, the current epoch-ms timestamp, and every message queued while
//!   the channel was connecting (as one batch, in submission order).
//! - `newQuery` — starts one query, tagged with the session's `locationId`.
//!
//! These shapes must match the server byte-for-byte; see the exact-string
//! tests below.

use serde::Serialize;
use serde_json::Value;

use crate::ids::LocationId;

/// A message sent from client to server, discriminated by `kind`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind")]
pub enum ClientMessage {
    /// Channel handshake carrying the queued message batch.
    #[serde(rename = "init")]
    Init {
        /// Session language code (e.g. `en`).
        lang: String,
        /// Current time in epoch milliseconds.
        exp: i64,
        /// Queued messages, in original submission order.
        messages: Vec<Value>,
    },

    /// Query-start message for one session.
    #[serde(rename = "newQuery")]
    NewQuery {
        /// Session language code (e.g. `en`).
        language: String,
        /// Always `null` — reserved by the protocol.
        file: Option<String>,
        /// The natural-language query text.
        input: String,
        /// Assumption selections to apply, as server-issued tokens.
        assumption: Vec<String>,
        /// Routing identifier the server tags response fragments with.
        #[serde(rename = "locationId")]
        location_id: LocationId,
    },
}

impl ClientMessage {
    /// Build the `init` handshake message.
    #[must_use]
    pub fn init(lang: &str, exp: i64, messages: Vec<Value>) -> Self {
        Self::Init {
            lang: lang.to_owned(),
            exp,
            messages,
        }
    }

    /// Build a `newQuery` message for one session.
    #[must_use]
    pub fn new_query(
        language: &str,
        input: &str,
        assumption: &[String],
        location_id: LocationId,
    ) -> Self {
        Self::NewQuery {
            language: language.to_owned(),
            file: None,
            input: input.to_owned(),
            assumption: assumption.to_vec(),
            location_id,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
