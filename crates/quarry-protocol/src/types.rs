//! Inbound payload types carried by response fragments.
//!
//! The server's payloads vary more than the routing layer needs, so only the
//! fields the aggregator routes or accumulates are typed; everything else is
//! either defaulted or kept as opaque JSON. Lenient deserializers absorb the
//! server's looser encodings (boolean-or-object error flags, numeric-or-string
//! scores) so one odd field never discards a whole fragment.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// A named result block at a fixed display position.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    /// Display title (e.g. `Result`, `Input`).
    #[serde(default)]
    pub title: String,
    /// Display position; later pods at the same position replace earlier ones.
    #[serde(default)]
    pub position: i64,
    /// Whether the server failed to compute this pod.
    #[serde(default, deserialize_with = "error_flag")]
    pub error: bool,
    /// Scanner that produced the pod.
    #[serde(default)]
    pub scanner: Option<String>,
    /// Content blocks within the pod.
    #[serde(default)]
    pub subpods: Vec<Subpod>,
}

/// One content block within a [`Pod`].
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subpod {
    /// Subpod title, frequently empty.
    #[serde(default)]
    pub title: String,
    /// Plaintext rendering, when the server provides one.
    #[serde(default)]
    pub plaintext: Option<String>,
    /// Image rendering, kept opaque — shape varies by content type.
    #[serde(default)]
    pub img: Option<Value>,
}

/// An interpretation assumption the server made about the query.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Assumption {
    /// Assumption category (wire field `type`).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// The word the assumption is about, when the server names one.
    #[serde(default)]
    pub word: Option<String>,
    /// Template with `${...}` placeholders describing the assumption.
    #[serde(default)]
    pub template: Option<String>,
    /// Number of alternative interpretations.
    #[serde(default)]
    pub count: Option<u32>,
    /// Candidate interpretations, most likely first.
    #[serde(default)]
    pub values: Vec<AssumptionValue>,
}

/// One candidate interpretation within an [`Assumption`].
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssumptionValue {
    /// Server-internal name for the interpretation.
    #[serde(default)]
    pub name: Option<String>,
    /// Human-readable description (consumed by `${desc}` placeholders).
    #[serde(default)]
    pub desc: String,
    /// Word this interpretation applies to.
    #[serde(default)]
    pub word: Option<String>,
    /// Assumption token to resubmit for selecting this interpretation.
    #[serde(default)]
    pub input: Option<String>,
}

/// A non-fatal warning about how the query was interpreted.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Warning {
    /// Warning text, when present.
    #[serde(default)]
    pub text: String,
    /// Remaining warning fields, kept opaque — shape varies by warning kind.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A spelling/phrasing suggestion for the submitted query.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DidYouMean {
    /// Confidence score; the server encodes this as a number or a string.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score: Option<f64>,
    /// Suggestion level (e.g. `low`, `medium`, `high`).
    #[serde(default)]
    pub level: Option<String>,
    /// The suggested replacement query.
    #[serde(default)]
    pub val: String,
}

/// A topic the server plans to cover in the future.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FutureTopic {
    /// Topic name.
    #[serde(default)]
    pub topic: String,
    /// Server-provided explanation.
    #[serde(default)]
    pub msg: String,
}

/// Accept `false`, `true`, or an error object (which implies an error).
fn error_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(flag) => flag,
        Value::Null => false,
        Value::String(s) => s == "true",
        _ => true,
    })
}

/// Accept a number or a numeric string; anything else is `None`.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
