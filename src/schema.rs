/// Question set, output columns and prompt templates.
///
/// A prompt book is a markdown file with level-1 sections:
///
/// - `# 분석 질문` — numbered questions (`N. 필드: 설명`), optional `- ` detail lines
/// - `# 업로드 템플릿` — prompt sent together with an uploaded PDF (`{fields}`, `{questions}`)
/// - `# 청크 템플릿` — prompt wrapping one text chunk (`{text}`, `{questions}`)
/// - `# 출력 필드` — optional `- title: …` / `- error: …` column names
///
/// The built-in book lives in `prompts/default.md`.
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

const BUILTIN_BOOK: &str = include_str!("../prompts/default.md");

const QUESTIONS_SECTION: &str = "분석 질문";
const UPLOAD_SECTION: &str = "업로드 템플릿";
const CHUNK_SECTION: &str = "청크 템플릿";
const FIELDS_SECTION: &str = "출력 필드";

pub const DEFAULT_TITLE_FIELD: &str = "논문 제목";
pub const DEFAULT_ERROR_FIELD: &str = "오류";

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to read prompt file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("prompt file has no `# {0}` section")]
    MissingSection(&'static str),

    #[error("prompt file defines no questions")]
    NoQuestions,

    #[error("duplicate question id {0}")]
    DuplicateId(u32),

    #[error("duplicate field name {0:?}")]
    DuplicateField(String),
}

/// One analysis question. `field` doubles as the CSV column and JSON key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: u32,
    pub field: String,
    pub prompt: String,
    pub details: Vec<String>,
}

impl Question {
    /// Render as a numbered prompt line with its detail bullets.
    pub fn render(&self) -> String {
        let mut out = format!("{}. {}", self.id, self.prompt);
        for detail in &self.details {
            out.push_str("\n   - ");
            out.push_str(detail);
        }
        out
    }
}

/// Ordered questions plus the two reserved columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub questions: Vec<Question>,
    pub title_field: String,
    pub error_field: String,
}

impl Schema {
    pub fn new(questions: Vec<Question>) -> Result<Self, SchemaError> {
        Self::with_reserved(
            questions,
            DEFAULT_TITLE_FIELD.to_string(),
            DEFAULT_ERROR_FIELD.to_string(),
        )
    }

    pub fn with_reserved(
        questions: Vec<Question>,
        title_field: String,
        error_field: String,
    ) -> Result<Self, SchemaError> {
        if questions.is_empty() {
            return Err(SchemaError::NoQuestions);
        }

        let mut ids = HashSet::new();
        let mut fields = HashSet::from([title_field.as_str(), error_field.as_str()]);
        for q in &questions {
            if !ids.insert(q.id) {
                return Err(SchemaError::DuplicateId(q.id));
            }
            if !fields.insert(q.field.as_str()) {
                return Err(SchemaError::DuplicateField(q.field.clone()));
            }
        }

        Ok(Self {
            questions,
            title_field,
            error_field,
        })
    }

    /// CSV header: title, question fields in order, error.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = Vec::with_capacity(self.questions.len() + 2);
        cols.push(self.title_field.as_str());
        cols.extend(self.questions.iter().map(|q| q.field.as_str()));
        cols.push(self.error_field.as_str());
        cols
    }

    pub fn question(&self, id: u32) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.questions.iter().map(|q| q.field.as_str()).collect()
    }
}

/// Schema plus the two prompt templates.
#[derive(Debug, Clone)]
pub struct PromptBook {
    pub schema: Schema,
    pub upload_template: String,
    pub chunk_template: String,
}

impl PromptBook {
    /// The book compiled into the binary.
    pub fn builtin() -> Result<Self, SchemaError> {
        Self::parse(BUILTIN_BOOK)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, SchemaError> {
        let sections = split_sections(content);

        let questions_body = sections
            .get(QUESTIONS_SECTION)
            .ok_or(SchemaError::MissingSection(QUESTIONS_SECTION))?;
        let upload_template = sections
            .get(UPLOAD_SECTION)
            .ok_or(SchemaError::MissingSection(UPLOAD_SECTION))?
            .trim()
            .to_string();
        let chunk_template = sections
            .get(CHUNK_SECTION)
            .ok_or(SchemaError::MissingSection(CHUNK_SECTION))?
            .trim()
            .to_string();

        let mut title_field = DEFAULT_TITLE_FIELD.to_string();
        let mut error_field = DEFAULT_ERROR_FIELD.to_string();
        if let Some(body) = sections.get(FIELDS_SECTION) {
            for line in body.lines() {
                let line = line.trim().trim_start_matches('-').trim();
                match line.split_once(':') {
                    Some(("title", name)) if !name.trim().is_empty() => {
                        title_field = name.trim().to_string();
                    }
                    Some(("error", name)) if !name.trim().is_empty() => {
                        error_field = name.trim().to_string();
                    }
                    _ => {}
                }
            }
        }

        let schema =
            Schema::with_reserved(parse_questions(questions_body), title_field, error_field)?;

        Ok(Self {
            schema,
            upload_template,
            chunk_template,
        })
    }

    /// All questions, rendered as the `{questions}` block.
    pub fn questions_block(&self) -> String {
        self.schema
            .questions
            .iter()
            .map(Question::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Prompt for whole-document analysis; the model answers with a field-keyed object.
    pub fn upload_prompt(&self) -> String {
        let fields = serde_json::to_string(&self.schema.field_names()).unwrap_or_default();
        self.upload_template
            .replace("{questions}", &self.questions_block())
            .replace("{fields}", &fields)
    }

    /// Prompt for one chunk; the model answers with `{"results": [...]}`.
    pub fn chunk_prompt(&self, text: &str) -> String {
        self.chunk_template
            .replace("{questions}", &self.questions_block())
            .replace("{text}", text)
    }
}

/// Split markdown into level-1 sections keyed by heading text.
fn split_sections(content: &str) -> HashMap<&str, String> {
    let mut sections: HashMap<&str, String> = HashMap::new();
    let mut current: Option<&str> = None;

    for line in content.lines() {
        if let Some(heading) = line.strip_prefix("# ") {
            current = Some(heading.trim());
            sections.entry(heading.trim()).or_default();
            continue;
        }
        if let Some(name) = current {
            let body = sections.entry(name).or_default();
            body.push_str(line);
            body.push('\n');
        }
    }

    sections
}

/// Parse `N. text` lines (plus `- detail` continuation lines) into questions.
pub fn parse_questions(body: &str) -> Vec<Question> {
    let mut questions: Vec<Question> = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((id, text)) = numbered_line(line) {
            let field = match text.split_once(':') {
                Some((head, _)) if !head.trim().is_empty() => head.trim().to_string(),
                _ => format!("answer_{id}"),
            };
            questions.push(Question {
                id,
                field,
                prompt: text.to_string(),
                details: Vec::new(),
            });
        } else if let Some(detail) = line.strip_prefix('-') {
            if let Some(last) = questions.last_mut() {
                last.details.push(detail.trim().to_string());
            }
        }
    }

    questions
}

fn numbered_line(line: &str) -> Option<(u32, &str)> {
    let (num, rest) = line.split_once('.')?;
    let id = num.trim().parse::<u32>().ok()?;
    let text = rest.trim();
    if text.is_empty() {
        return None;
    }
    Some((id, text))
}
