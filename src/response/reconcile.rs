/// Forcing a field-keyed model response onto the schema.
///
/// The model may answer with one object or a list of partial objects; lists
/// are folded into a single mapping first. Every schema field then gets a
/// value, with [`MISSING_PLACEHOLDER`] standing in for anything absent.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{MISSING_PLACEHOLDER, MergedResult, is_placeholder};
use crate::schema::Schema;

/// How values for the same key are combined when folding a list response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldPolicy {
    /// Keep the first value, let a real value replace a placeholder, and join
    /// two real values with a newline.
    #[default]
    FillThenConcatenate,
    FirstWins,
    LastWins,
}

/// A reconciled result plus the fields that had to be filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub result: MergedResult,
    pub missing: Vec<String>,
}

/// Fold a list of objects into one mapping. Non-object items are ignored.
pub fn fold_items(items: &[Value], policy: FoldPolicy) -> Map<String, Value> {
    let mut merged = Map::new();

    for item in items {
        let Some(obj) = item.as_object() else {
            continue;
        };
        for (key, value) in obj {
            match merged.get_mut(key) {
                None => {
                    merged.insert(key.clone(), value.clone());
                }
                Some(existing) => fold_value(existing, value, policy),
            }
        }
    }

    merged
}

fn fold_value(existing: &mut Value, incoming: &Value, policy: FoldPolicy) {
    match policy {
        FoldPolicy::FirstWins => {}
        FoldPolicy::LastWins => *existing = incoming.clone(),
        FoldPolicy::FillThenConcatenate => {
            if is_placeholder(incoming) {
                return;
            }
            if is_placeholder(existing) {
                *existing = incoming.clone();
                return;
            }
            let (old, new) = (render_value(existing), render_value(incoming));
            if old != new {
                *existing = Value::String(format!("{old}\n{new}"));
            }
        }
    }
}

/// Turn a response value into a cell string.
///
/// Strings pass through, arrays of scalars are joined with `, `, anything
/// else becomes compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(items) if items.iter().all(is_scalar) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
        _ => value.to_string(),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Build a schema-complete result from a recovered response value.
///
/// The title comes from the response when present and non-empty, otherwise
/// `fallback_title`. The error field is always empty.
pub fn reconcile(
    value: &Value,
    schema: &Schema,
    fallback_title: &str,
    policy: FoldPolicy,
) -> Reconciled {
    let folded = match value {
        Value::Object(obj) => obj.clone(),
        Value::Array(items) => fold_items(items, policy),
        _ => Map::new(),
    };

    let title = folded
        .get(&schema.title_field)
        .filter(|v| !is_placeholder(v))
        .map(render_value)
        .map(|t| t.trim().to_string())
        .unwrap_or_else(|| fallback_title.to_string());

    let mut missing = Vec::new();
    let result = MergedResult::from_schema(schema, title, |q| {
        match folded.get(&q.field).filter(|v| !is_placeholder(v)) {
            Some(v) => render_value(v),
            None => {
                missing.push(q.field.clone());
                MISSING_PLACEHOLDER.to_string()
            }
        }
    });

    Reconciled { result, missing }
}
