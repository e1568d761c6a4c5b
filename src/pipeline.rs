/// Per-document analysis and the batch loop.
///
/// Every document yields exactly one [`MergedResult`]. Failures before the
/// CSV write are folded into a placeholder-filled result with a populated
/// error field; they never stop the batch.
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{AnalysisMode, Config};
use crate::document::{self, DocumentError, chunker, pdf};
use crate::output::csv::CsvSink;
use crate::output::json::write_json;
use crate::output::{OutputError, OutputPaths, ensure_output_dir};
use crate::provider::{AiProvider, ProviderError};
use crate::response::merge::{merge_chunks, parse_chunk};
use crate::response::reconcile::reconcile;
use crate::response::repair::{Expect, Recovered, recover_json};
use crate::response::{ERROR_PLACEHOLDER, MergedResult, NOT_FOUND_PLACEHOLDER};
use crate::schema::PromptBook;

const UPLOAD_FAILED: &str = "파일 업로드 실패";
const TEXT_FAILED: &str = "텍스트 추출 실패";
const NO_RESPONSE: &str = "API 응답 없음";
const NO_JSON: &str = "JSON 추출 실패";
const MISSING_FIELDS: &str = "필드 누락";
const CSV_FAILED: &str = "CSV 저장 실패";
const PANICKED: &str = "처리 중 패닉";

/// Rate-limited calls wait this many pacing delays before retrying.
const RATE_LIMIT_BACKOFF_FACTOR: u32 = 5;

/// Why a document's result is (partly) placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The document could not be uploaded or its text could not be read.
    Transport,
    /// The service returned errors or no text on every attempt.
    RemoteCall,
    /// Text came back but no usable JSON could be recovered.
    ResponseShape,
    /// JSON was recovered but some fields were missing.
    SchemaGap,
    /// The CSV row could not be written.
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Success(MergedResult),
    Recovered {
        result: MergedResult,
        failure: FailureKind,
    },
}

impl DocumentOutcome {
    fn failed(result: MergedResult, failure: FailureKind) -> Self {
        DocumentOutcome::Recovered { result, failure }
    }

    pub fn result(&self) -> &MergedResult {
        match self {
            DocumentOutcome::Success(r) | DocumentOutcome::Recovered { result: r, .. } => r,
        }
    }

    pub fn into_result(self) -> MergedResult {
        match self {
            DocumentOutcome::Success(r) | DocumentOutcome::Recovered { result: r, .. } => r,
        }
    }

    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            DocumentOutcome::Success(_) => None,
            DocumentOutcome::Recovered { failure, .. } => Some(*failure),
        }
    }
}

/// Counts for one batch run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub recovered: usize,
    pub persist_failed: usize,
    /// Every document that did not come through cleanly, in batch order.
    /// A document can appear twice: once for analysis, once for persistence.
    pub failures: Vec<(PathBuf, FailureKind)>,
    pub csv_path: PathBuf,
    pub json_path: Option<PathBuf>,
}

pub struct Analyzer<'a, P: AiProvider + ?Sized> {
    provider: &'a P,
    book: &'a PromptBook,
    config: &'a Config,
}

impl<'a, P: AiProvider + ?Sized> Analyzer<'a, P> {
    pub fn new(provider: &'a P, book: &'a PromptBook, config: &'a Config) -> Self {
        Self {
            provider,
            book,
            config,
        }
    }

    /// Analyze one document in the configured mode. Never fails.
    pub fn analyze_document(&self, path: &Path) -> DocumentOutcome {
        match self.config.mode {
            AnalysisMode::Upload => self.analyze_upload(path),
            AnalysisMode::Chunked => match pdf::extract_text(path) {
                Ok(text) => {
                    let title = pdf::extract_title(&text)
                        .unwrap_or_else(|| document::file_title(path));
                    self.analyze_text(&text, &title)
                }
                Err(e) => {
                    warn!("{}: {e}", path.display());
                    // A readable PDF without text yields no chunks, same as empty text.
                    let placeholder = match e {
                        DocumentError::NoText(_) => NOT_FOUND_PLACEHOLDER,
                        _ => ERROR_PLACEHOLDER,
                    };
                    self.fail(
                        &document::file_title(path),
                        placeholder,
                        TEXT_FAILED,
                        FailureKind::Transport,
                    )
                }
            },
        }
    }

    fn analyze_upload(&self, path: &Path) -> DocumentOutcome {
        let title = document::file_title(path);

        let handle = match self.with_retry("upload", false, || self.provider.upload(path)) {
            Ok(h) => h,
            Err(e) => {
                warn!("{title}: upload failed: {e}");
                return self.fail(
                    &title,
                    ERROR_PLACEHOLDER,
                    UPLOAD_FAILED,
                    FailureKind::Transport,
                );
            }
        };

        let prompt = self.book.upload_prompt();
        debug!("{title}: prompt:\n{prompt}");
        let text = match self.with_retry("generate", true, || {
            self.provider.generate(&prompt, Some(&handle))
        }) {
            Ok(t) => t,
            Err(e) => {
                warn!("{title}: no response: {e}");
                return self.fail(
                    &title,
                    ERROR_PLACEHOLDER,
                    NO_RESPONSE,
                    FailureKind::RemoteCall,
                );
            }
        };
        debug!("{title}: raw response:\n{text}");

        let value = match recover_json(&text, Expect::Fields) {
            Recovered::Json(v) => v,
            Recovered::NotFound => {
                warn!("{title}: no JSON in response");
                return self.fail(
                    &title,
                    NOT_FOUND_PLACEHOLDER,
                    NO_JSON,
                    FailureKind::ResponseShape,
                );
            }
        };

        let reconciled = reconcile(&value, &self.book.schema, &title, self.config.fold_policy);
        if reconciled.missing.is_empty() {
            return DocumentOutcome::Success(reconciled.result);
        }

        warn!(
            "{title}: {} field(s) missing from response: {}",
            reconciled.missing.len(),
            reconciled.missing.join(", ")
        );
        let mut result = reconciled.result;
        result.set_error(format!("{MISSING_FIELDS}: {}", reconciled.missing.join(", ")));
        DocumentOutcome::failed(result, FailureKind::SchemaGap)
    }

    /// Chunked analysis of already-extracted text.
    pub fn analyze_text(&self, text: &str, title: &str) -> DocumentOutcome {
        let chunks = chunker::split_into_chunks(text, self.config.chunk_size_chars);
        if chunks.is_empty() {
            warn!("{title}: document has no text");
            return self.fail(title, NOT_FOUND_PLACEHOLDER, TEXT_FAILED, FailureKind::Transport);
        }

        let total = chunks.len();
        let mut parsed = Vec::with_capacity(total);
        let mut remote_failures = 0;

        for (i, chunk) in chunks.iter().enumerate() {
            info!("{title}: chunk {}/{total} ({} chars)", i + 1, chunk.chars().count());
            let prompt = self.book.chunk_prompt(chunk);

            let reply = self.with_retry("generate", true, || self.provider.generate(&prompt, None));
            let reply = match reply {
                Ok(r) => r,
                Err(e) => {
                    warn!("{title}: chunk {}/{total} failed: {e}", i + 1);
                    remote_failures += 1;
                    continue;
                }
            };
            debug!("{title}: chunk {} raw response:\n{reply}", i + 1);

            match recover_json(&reply, Expect::Results) {
                Recovered::Json(value) => {
                    if let Some(result) = parse_chunk(&value) {
                        parsed.push(result);
                    }
                }
                Recovered::NotFound => {
                    warn!("{title}: chunk {}/{total}: no JSON in response", i + 1);
                }
            }
        }

        // Zero parsed chunks: every field is "not found", the error says why.
        if parsed.is_empty() {
            let (error, kind) = if remote_failures == total {
                (NO_RESPONSE, FailureKind::RemoteCall)
            } else {
                (NO_JSON, FailureKind::ResponseShape)
            };
            return self.fail(title, NOT_FOUND_PLACEHOLDER, error, kind);
        }
        if parsed.len() < total {
            warn!("{title}: merged {}/{total} chunks", parsed.len());
        }

        DocumentOutcome::Success(merge_chunks(
            &parsed,
            &self.book.schema,
            title,
            self.config.merge_policy,
        ))
    }

    /// Analyze every file, appending each result to the CSV as it completes.
    ///
    /// Only failing to create the output directory aborts the run.
    pub fn run_batch(
        &self,
        files: &[PathBuf],
        outputs: &OutputPaths,
    ) -> Result<BatchSummary, OutputError> {
        if let Some(dir) = outputs.csv.parent() {
            ensure_output_dir(dir)?;
        }

        let sink = CsvSink::new(&outputs.csv, &self.book.schema);
        let write_delay = Duration::from_secs(self.config.write_retry_delay_secs);
        let mut summary = BatchSummary {
            total: files.len(),
            csv_path: outputs.csv.clone(),
            ..Default::default()
        };
        let mut results = Vec::with_capacity(files.len());

        for (i, path) in files.iter().enumerate() {
            info!("[{}/{}] Analyzing {}", i + 1, files.len(), path.display());
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.analyze_document(path)))
                .unwrap_or_else(|payload| {
                    error!(
                        "{}: analysis panicked: {}",
                        path.display(),
                        panic_message(&*payload)
                    );
                    self.fail(
                        &document::file_title(path),
                        ERROR_PLACEHOLDER,
                        PANICKED,
                        FailureKind::Transport,
                    )
                });
            match outcome.failure() {
                None => summary.succeeded += 1,
                Some(kind) => {
                    summary.recovered += 1;
                    summary.failures.push((path.clone(), kind));
                    info!("{}: recorded with placeholders ({kind:?})", path.display());
                }
            }

            let mut result = outcome.into_result();
            if let Err(e) = sink.append_with_retry(&result, self.config.max_retries, write_delay) {
                error!("{}: failed to write CSV row: {e}", path.display());
                summary.persist_failed += 1;
                summary.failures.push((path.clone(), FailureKind::Persistence));
                if result.error().is_empty() {
                    result.set_error(CSV_FAILED);
                }
            }
            results.push(result);
        }

        if self.config.json_output {
            match write_json(&outputs.json, &results, &self.book.schema) {
                Ok(()) => summary.json_path = Some(outputs.json.clone()),
                Err(e) => error!("Failed to write {}: {e}", outputs.json.display()),
            }
        }

        info!(
            "Batch done: {} document(s), {} ok, {} with placeholders, {} not written",
            summary.total, summary.succeeded, summary.recovered, summary.persist_failed
        );
        Ok(summary)
    }

    /// Run `op` up to `max_retries` times. Paced calls sleep `call_delay_secs`
    /// first; a rate-limited failure adds a longer backoff.
    fn with_retry<T>(
        &self,
        what: &str,
        paced: bool,
        mut op: impl FnMut() -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let attempts = self.config.max_retries.max(1);
        let delay = Duration::from_secs(self.config.call_delay_secs);
        let mut attempt = 1;

        loop {
            if paced {
                thread::sleep(delay);
            }
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < attempts => {
                    warn!("{what} attempt {attempt}/{attempts} failed: {e}");
                    if e.is_rate_limited() {
                        thread::sleep(delay * RATE_LIMIT_BACKOFF_FACTOR);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fail(
        &self,
        title: &str,
        placeholder: &str,
        error: &str,
        kind: FailureKind,
    ) -> DocumentOutcome {
        DocumentOutcome::failed(
            MergedResult::filled(&self.book.schema, title, placeholder, error),
            kind,
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
