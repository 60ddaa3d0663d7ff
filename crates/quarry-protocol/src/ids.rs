//! Query routing identifiers.
//!
//! Every in-flight query is keyed by a [`LocationId`], an opaque string
//! unique within the process. IDs are UUID v7 (time-ordered) generated via
//! [`uuid::Uuid::now_v7`].
//!
//! A did-you-mean fragment re-keys its session: the server tags all
//! subsequent fragments for that query with the original ID plus the fixed
//! [`DYM_SUFFIX`]. [`LocationId::rekeyed`] produces that successor ID.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Suffix appended to a session's ID after a did-you-mean re-key.
pub const DYM_SUFFIX: &str = "_dym";

/// Routing identifier for one in-flight query.
///
/// Serializes transparently as its inner string (the wire `locationId`
/// field).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(String);

impl LocationId {
    /// Create a new random ID (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// The successor ID the server uses after a did-you-mean re-key.
    #[must_use]
    pub fn rekeyed(&self) -> Self {
        Self(format!("{}{DYM_SUFFIX}", self.0))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume self and return the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for LocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<str> for LocationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LocationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LocationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<LocationId> for String {
    fn from(id: LocationId) -> Self {
        id.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
