/// Remote generative-AI provider trait and shared types.
///
/// The pipeline only talks to [`AiProvider`]; [`gemini::GeminiProvider`] is
/// the real backend and [`mock::ScriptedProvider`] replays canned responses
/// in tests.
pub mod gemini;
pub mod mock;

use std::path::Path;

use thiserror::Error;

/// Errors that can occur while talking to the remote service.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("upload start response carried no upload URL")]
    MissingUploadUrl,

    #[error("no API key configured (set GEMINI_API_KEY or GOOGLE_API_KEY)")]
    MissingApiKey,

    #[error("response contained no text{}", blocked_suffix(.reason))]
    EmptyResponse { reason: Option<String> },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("file {0} is still processing")]
    StillProcessing(String),
}

/// Request URLs are dropped so they never reach logs.
impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e.without_url())
    }
}

fn blocked_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(" (blocked: {r})"))
        .unwrap_or_default()
}

impl ProviderError {
    /// Whether the service asked us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ProviderError::Api { status, body } => {
                *status == 429
                    || body.contains("RESOURCE_EXHAUSTED")
                    || body.to_lowercase().contains("rate limit")
            }
            ProviderError::Http(e) => e.status().is_some_and(|s| s.as_u16() == 429),
            _ => false,
        }
    }
}

/// A file uploaded to the service, referenced from later prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

/// Trait for remote analysis backends.
///
/// Implementations must be `Send + Sync` so a provider can be shared
/// behind `Arc`.
pub trait AiProvider: Send + Sync {
    /// Upload a document so later prompts can reference it.
    fn upload(&self, path: &Path) -> Result<DocumentHandle, ProviderError>;

    /// Send a prompt, optionally with an uploaded document, and return the
    /// model's text.
    fn generate(
        &self,
        prompt: &str,
        document: Option<&DocumentHandle>,
    ) -> Result<String, ProviderError>;
}
