//! Recovery of structured answers from raw model output.
//!
//! - [`repair`] finds and fixes a JSON value inside free-form text
//! - [`reconcile`] forces a field-keyed response onto the configured schema
//! - [`merge`] combines per-chunk answer lists into one result
pub mod merge;
pub mod reconcile;
pub mod repair;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::schema::{Question, Schema};

/// Substituted for a field the model did not answer.
pub const MISSING_PLACEHOLDER: &str = "정보 없음";

/// Substituted when no chunk produced an answer for a question.
pub const NOT_FOUND_PLACEHOLDER: &str = "해당 내용을 찾을 수 없습니다.";

/// Substituted for every field when the document could not be analyzed.
pub const ERROR_PLACEHOLDER: &str = "처리 중 오류가 발생했습니다. 자세한 내용은 로그를 확인해주세요.";

/// Whether a response value carries no information.
pub fn is_placeholder(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => is_placeholder_text(s),
        _ => false,
    }
}

pub fn is_placeholder_text(s: &str) -> bool {
    let s = s.trim();
    s.is_empty()
        || s == MISSING_PLACEHOLDER
        || s == NOT_FOUND_PLACEHOLDER
        || s.eq_ignore_ascii_case("no information")
}

/// One answer for one question, as returned for a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub question_id: u32,
    pub answer: String,
}

/// Answers recovered from a single chunk. May cover only some questions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkResult {
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAnswer {
    pub question_id: u32,
    pub field: String,
    pub value: String,
}

/// The per-document result: a title, one answer per schema question, an error.
///
/// Only built through schema-aware constructors, so the answer list always
/// matches the schema's questions one-to-one and in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedResult {
    title: String,
    answers: Vec<FieldAnswer>,
    error: String,
}

impl MergedResult {
    /// Build a result by asking `answer_for` for every question in schema order.
    pub fn from_schema(
        schema: &Schema,
        title: impl Into<String>,
        mut answer_for: impl FnMut(&Question) -> String,
    ) -> Self {
        let answers = schema
            .questions
            .iter()
            .map(|q| FieldAnswer {
                question_id: q.id,
                field: q.field.clone(),
                value: answer_for(q),
            })
            .collect();
        Self {
            title: title.into(),
            answers,
            error: String::new(),
        }
    }

    /// Every field set to `placeholder`, with `error` recorded.
    pub fn filled(
        schema: &Schema,
        title: impl Into<String>,
        placeholder: &str,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::from_schema(schema, title, |_| placeholder.to_string());
        result.error = error.into();
        result
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn answers(&self) -> &[FieldAnswer] {
        &self.answers
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = error.into();
    }

    pub fn get(&self, question_id: u32) -> Option<&str> {
        self.answers
            .iter()
            .find(|a| a.question_id == question_id)
            .map(|a| a.value.as_str())
    }

    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.answers
            .iter()
            .find(|a| a.field == field)
            .map(|a| a.value.as_str())
    }

    /// Values in CSV column order (title, answers, error).
    pub fn record(&self) -> Vec<&str> {
        let mut row = Vec::with_capacity(self.answers.len() + 2);
        row.push(self.title.as_str());
        row.extend(self.answers.iter().map(|a| a.value.as_str()));
        row.push(self.error.as_str());
        row
    }

    /// Serializable view keyed by the schema's column names.
    pub fn as_record<'a>(&'a self, schema: &'a Schema) -> Record<'a> {
        Record {
            schema,
            result: self,
        }
    }
}

/// A [`MergedResult`] serialized as an ordered JSON object.
pub struct Record<'a> {
    schema: &'a Schema,
    result: &'a MergedResult,
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.result.answers.len() + 2))?;
        map.serialize_entry(&self.schema.title_field, &self.result.title)?;
        for answer in &self.result.answers {
            map.serialize_entry(&answer.field, &answer.value)?;
        }
        map.serialize_entry(&self.schema.error_field, &self.result.error)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_questions;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(parse_questions("1. q1: a\n2. q2: b\n")).unwrap()
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder(&Value::Null));
        assert!(is_placeholder(&json!("")));
        assert!(is_placeholder(&json!("  ")));
        assert!(is_placeholder(&json!("정보 없음")));
        assert!(is_placeholder(&json!("No Information")));
        assert!(!is_placeholder(&json!("real")));
        assert!(!is_placeholder(&json!(0)));
    }

    #[test]
    fn test_filled_covers_schema() {
        let r = MergedResult::filled(&schema(), "doc.pdf", NOT_FOUND_PLACEHOLDER, "boom");
        assert_eq!(r.answers().len(), 2);
        assert_eq!(r.get(1), Some(NOT_FOUND_PLACEHOLDER));
        assert_eq!(r.get_field("q2"), Some(NOT_FOUND_PLACEHOLDER));
        assert_eq!(r.error(), "boom");
        assert_eq!(r.record(), vec!["doc.pdf", NOT_FOUND_PLACEHOLDER, NOT_FOUND_PLACEHOLDER, "boom"]);
    }

    #[test]
    fn test_record_serializes_in_column_order() {
        let schema = schema();
        let r = MergedResult::from_schema(&schema, "T", |q| format!("v{}", q.id));
        let s = serde_json::to_string(&r.as_record(&schema)).unwrap();
        assert_eq!(s, r#"{"논문 제목":"T","q1":"v1","q2":"v2","오류":""}"#);
    }
}
