//! Assumption template expansion.
//!
//! Each assumption carries a template string with `${name}` placeholders and
//! a list of candidate interpretations. Expansion walks literal chunks and
//! placeholders in lockstep:
//!
//! - `${desc}` consumes the next unconsumed value description, in order. The
//!   cursor starts at 1 instead of 0 when the first description already
//!   appears verbatim inside the template — the server sometimes spells the
//!   primary interpretation out literally, and repeating it reads badly.
//! - `${separator}` is the literal `" | "`.
//! - `${word}` resolves through a priority chain; see [`resolve_word`].
//! - Unknown placeholders pass through verbatim. Not an error: the server
//!   adds placeholder kinds over time.
//!
//! The regex walk interleaves chunks and placeholders structurally, so a
//! chunk/placeholder count mismatch cannot arise; an exhausted `${desc}`
//! cursor appends nothing.

use std::sync::LazyLock;

use regex::Regex;

use quarry_protocol::Assumption;

/// Literal substituted for `${separator}`.
pub const SEPARATOR: &str = " | ";

/// Sentinel `word` value directing `${word}` to the first value description.
const ASSUMING_WORD_SENTINEL: &str = "AssumingWord";

/// Value-level `word` that stands for the whole submitted query.
const THE_INPUT_SENTINEL: &str = "the input";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}").expect("placeholder pattern is valid"));

/// Expand an assumption's template into its display string.
///
/// `original_input` is the query text the session was created with; it is
/// the fallback for `${word}` when neither the assumption nor its values
/// name a word.
#[must_use]
pub fn expand(assumption: &Assumption, original_input: &str) -> String {
    let Some(template) = assumption.template.as_deref() else {
        // No template to expand; fall back to the bare description.
        return assumption
            .values
            .first()
            .map(|value| value.desc.clone())
            .unwrap_or_default();
    };

    let values = &assumption.values;
    // An empty first description is trivially contained and also skips.
    let mut cursor = usize::from(
        values
            .first()
            .is_some_and(|value| template.contains(&value.desc)),
    );

    let mut out = String::new();
    let mut last = 0;
    for placeholder in PLACEHOLDER.find_iter(template) {
        out.push_str(&template[last..placeholder.start()]);
        let name = &template[placeholder.start() + 2..placeholder.end() - 1];
        match name {
            "desc" => {
                if let Some(value) = values.get(cursor) {
                    out.push_str(&value.desc);
                }
                cursor += 1;
            }
            "separator" => out.push_str(SEPARATOR),
            "word" => out.push_str(&resolve_word(assumption, original_input)),
            _ => out.push_str(placeholder.as_str()),
        }
        last = placeholder.end();
    }
    out.push_str(&template[last..]);
    out
}

/// Resolve `${word}` through the priority chain:
///
/// 1. assumption word equal to the `AssumingWord` sentinel → first value's
///    description;
/// 2. non-empty assumption word → that word;
/// 3. first value's word → that word, unless it is literally `the input`,
///    which stands for the original query text;
/// 4. otherwise → the original query text.
fn resolve_word(assumption: &Assumption, original_input: &str) -> String {
    if assumption.word.as_deref() == Some(ASSUMING_WORD_SENTINEL) {
        return assumption
            .values
            .first()
            .map_or_else(|| original_input.to_owned(), |value| value.desc.clone());
    }
    if let Some(word) = assumption.word.as_deref() {
        if !word.is_empty() {
            return word.to_owned();
        }
    }
    if let Some(word) = assumption.values.first().and_then(|value| value.word.as_deref()) {
        if word == THE_INPUT_SENTINEL {
            return original_input.to_owned();
        }
        return word.to_owned();
    }
    original_input.to_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
