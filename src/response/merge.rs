/// Combining per-chunk answers into one result per document.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{Answer, ChunkResult, MergedResult, NOT_FOUND_PLACEHOLDER, is_placeholder_text};
use crate::schema::Schema;

/// Which candidate wins when several chunks answer the same question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Longest answer by character count; ties go to the earliest chunk.
    #[default]
    Longest,
    First,
    /// Every distinct answer, in chunk order, joined with newlines.
    Concatenate,
}

/// Read a `{"results": [{"question_id": .., "answer": ..}]}` value.
///
/// Returns `None` when there is no `results` array. Malformed entries are
/// skipped with a warning; `question_id` may be an integer or a numeric string.
pub fn parse_chunk(value: &Value) -> Option<ChunkResult> {
    let Some(entries) = value.get("results").and_then(Value::as_array) else {
        warn!("chunk response has no results array, skipping");
        return None;
    };

    let mut answers = Vec::with_capacity(entries.len());
    for entry in entries {
        let id = entry.get("question_id").and_then(question_id);
        let answer = entry.get("answer").and_then(Value::as_str);
        match (id, answer) {
            (Some(question_id), Some(answer)) => answers.push(Answer {
                question_id,
                answer: answer.to_string(),
            }),
            _ => warn!("ignoring malformed chunk entry: {entry}"),
        }
    }

    Some(ChunkResult { answers })
}

fn question_id(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Pick the final answer from `candidates` (in chunk order).
pub fn select(candidates: &[&str], policy: MergePolicy) -> Option<String> {
    match policy {
        MergePolicy::First => candidates.first().map(|s| s.to_string()),
        MergePolicy::Longest => {
            let mut best: Option<&str> = None;
            for &c in candidates {
                let longer = best.is_none_or(|b| c.chars().count() > b.chars().count());
                if longer {
                    best = Some(c);
                }
            }
            best.map(str::to_string)
        }
        MergePolicy::Concatenate => {
            let mut seen: Vec<&str> = Vec::new();
            for &c in candidates {
                if !seen.contains(&c) {
                    seen.push(c);
                }
            }
            if seen.is_empty() {
                None
            } else {
                Some(seen.join("\n"))
            }
        }
    }
}

/// Merge chunk answers into a schema-complete result.
///
/// Placeholder answers ("not found" and the like) are not candidates.
/// Questions with no candidate get [`NOT_FOUND_PLACEHOLDER`]; answers for
/// unknown question ids are ignored.
pub fn merge_chunks(
    chunks: &[ChunkResult],
    schema: &Schema,
    title: &str,
    policy: MergePolicy,
) -> MergedResult {
    MergedResult::from_schema(schema, title, |q| {
        let candidates: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.answers.iter())
            .filter(|a| a.question_id == q.id)
            .map(|a| a.answer.trim())
            .filter(|a| !is_placeholder_text(a))
            .collect();
        select(&candidates, policy).unwrap_or_else(|| NOT_FOUND_PLACEHOLDER.to_string())
    })
}
