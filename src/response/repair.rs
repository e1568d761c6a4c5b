/// Best-effort recovery of a JSON value from model output.
///
/// Candidates are tried in order: fenced code blocks, the whole text, then
/// every brace-balanced substring (one level of nesting) in order of
/// appearance. Each candidate is parsed as-is first, then after the full
/// repair pipeline, then after the conservative pipeline.
///
/// Full pipeline order (each step depends on the previous ones):
///
/// 1. [`collapse_whitespace`]
/// 2. [`strip_control_chars`]
/// 3. [`quote_bare_keys`]
/// 4. [`single_to_double_quotes`]
/// 5. [`unescape_quotes`]
/// 6. [`remove_trailing_commas`]
///
/// Nothing here returns an error: unrecoverable input yields
/// [`Recovered::NotFound`].
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)\s*```").unwrap());
static BRACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static BARE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([{,])\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*:").unwrap());
static TRAILING_COMMA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*([}\]])").unwrap());
static BAD_ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\\([^"\\/bfnrtu])"#).unwrap());

/// Which top-level shape the caller can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// An object with a `results` array (per-chunk question answers).
    Results,
    /// A field-keyed object, or a non-empty list of such objects.
    Fields,
}

impl Expect {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Expect::Results => value.get("results").is_some_and(Value::is_array),
            Expect::Fields => match value {
                Value::Object(_) => true,
                Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_object),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recovered {
    Json(Value),
    NotFound,
}

impl Recovered {
    pub fn is_found(&self) -> bool {
        matches!(self, Recovered::Json(_))
    }

    /// The recovered value, or the empty-results fallback `{"results": []}`.
    pub fn into_value(self) -> Value {
        match self {
            Recovered::Json(v) => v,
            Recovered::NotFound => json!({ "results": [] }),
        }
    }
}

/// Find the first candidate in `text` that parses into the expected shape.
pub fn recover_json(text: &str, expect: Expect) -> Recovered {
    for candidate in candidates(text) {
        if let Some(value) = try_candidate(candidate, expect) {
            return Recovered::Json(value);
        }
    }
    debug!("no JSON candidate matched {expect:?} in {} chars", text.len());
    Recovered::NotFound
}

/// Recover and re-serialize compactly; `{"results": []}` when nothing parses.
pub fn normalize_response(text: &str, expect: Expect) -> String {
    recover_json(text, expect).into_value().to_string()
}

fn candidates(text: &str) -> Vec<&str> {
    let mut out: Vec<&str> = fenced_blocks(text);
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
    out.extend(brace_candidates(text));
    out
}

fn try_candidate(candidate: &str, expect: Expect) -> Option<Value> {
    let attempts = [
        candidate.to_string(),
        repair(candidate),
        repair_conservative(candidate),
    ];
    for attempt in attempts {
        match serde_json::from_str::<Value>(&attempt) {
            Ok(value) if expect.accepts(&value) => return Some(value),
            Ok(_) => {}
            Err(e) => debug!("JSON parse attempt failed: {e}"),
        }
    }
    None
}

/// Bodies of markdown code fences, in order of appearance.
pub fn fenced_blocks(text: &str) -> Vec<&str> {
    FENCE_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Brace-balanced substrings (one level of nesting), in order of appearance.
pub fn brace_candidates(text: &str) -> Vec<&str> {
    BRACE_RE.find_iter(text).map(|m| m.as_str()).collect()
}

// ── Repair steps ─────────────────────────────────────────────────────

/// Step 1: newlines become spaces, whitespace runs collapse to one space.
pub fn collapse_whitespace(s: &str) -> String {
    let s = s.replace(['\n', '\r'], " ");
    WHITESPACE_RE.replace_all(&s, " ").into_owned()
}

/// Step 2: drop U+0000–U+001F and U+007F–U+009F.
pub fn strip_control_chars(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(*c as u32, 0x00..=0x1F | 0x7F..=0x9F))
        .collect()
}

/// Step 3: `{key:` / `,key:` become `{"key":` / `,"key":`.
pub fn quote_bare_keys(s: &str) -> String {
    BARE_KEY_RE.replace_all(s, r#"$1"$2":"#).into_owned()
}

/// Step 4: single-quote delimiters become double quotes.
pub fn single_to_double_quotes(s: &str) -> String {
    s.replace('\'', "\"")
}

/// Step 5: `\"` becomes `"`, then `""` collapses to `"`.
pub fn unescape_quotes(s: &str) -> String {
    s.replace("\\\"", "\"").replace("\"\"", "\"")
}

/// Step 6: drop commas directly before `}` or `]`.
pub fn remove_trailing_commas(s: &str) -> String {
    TRAILING_COMMA_RE.replace_all(s, "$1").into_owned()
}

/// Drop the backslash of escapes JSON does not define (`\x` → `x`).
pub fn drop_invalid_escapes(s: &str) -> String {
    BAD_ESCAPE_RE.replace_all(s, "$1").into_owned()
}

/// The full pipeline, steps 1–6 in order.
pub fn repair(s: &str) -> String {
    let s = collapse_whitespace(s);
    let s = strip_control_chars(&s);
    let s = quote_bare_keys(&s);
    let s = single_to_double_quotes(&s);
    let s = unescape_quotes(&s);
    remove_trailing_commas(&s)
}

/// Whitespace, control characters, invalid escapes and trailing commas only.
/// Leaves quoting alone, so string contents with apostrophes or empty strings survive.
pub fn repair_conservative(s: &str) -> String {
    let s = collapse_whitespace(s);
    let s = strip_control_chars(&s);
    let s = drop_invalid_escapes(&s);
    remove_trailing_commas(&s)
}
