/// Scripted provider for testing purposes.
///
/// Replays queued replies in order and records every call, so tests can
/// drive the pipeline without network access.
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{AiProvider, DocumentHandle, ProviderError};

/// A provider that answers from a queue of canned replies.
///
/// When the queue is empty, `fallback` is returned if set; otherwise the
/// call fails with [`ProviderError::EmptyResponse`].
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Option<String>,
    fail_uploads: bool,
    prompts: Mutex<Vec<String>>,
    uploads: Mutex<Vec<PathBuf>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    #[must_use]
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// Queue a failed call.
    #[must_use]
    pub fn fail(self, error: ProviderError) -> Self {
        self.push(Err(error));
        self
    }

    /// Reply used once the queue runs dry.
    #[must_use]
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Make every upload fail.
    #[must_use]
    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Paths uploaded so far, in call order.
    pub fn uploads(&self) -> Vec<PathBuf> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }

    fn push(&self, reply: Result<String, ProviderError>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }
}

impl AiProvider for ScriptedProvider {
    fn upload(&self, path: &Path) -> Result<DocumentHandle, ProviderError> {
        if let Ok(mut u) = self.uploads.lock() {
            u.push(path.to_path_buf());
        }
        if self.fail_uploads {
            return Err(ProviderError::Api {
                status: 500,
                body: "scripted upload failure".to_string(),
            });
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(DocumentHandle {
            name: format!("files/{name}"),
            uri: format!("mock://files/{name}"),
            mime_type: "application/pdf".to_string(),
        })
    }

    fn generate(
        &self,
        prompt: &str,
        _document: Option<&DocumentHandle>,
    ) -> Result<String, ProviderError> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(prompt.to_string());
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or(ProviderError::EmptyResponse { reason: None }),
        }
    }
}
