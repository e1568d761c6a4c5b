/// Google Gemini REST backend.
///
/// Uses the Files API resumable upload for whole-PDF analysis and
/// `models/{model}:generateContent` for prompts.
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{AiProvider, DocumentHandle, ProviderError};
use crate::config::{Config, GenerationConfig};

const PDF_MIME: &str = "application/pdf";
const API_KEY_HEADER: &str = "x-goog-api-key";
const PROCESSING_POLLS: u32 = 10;
const PROCESSING_POLL_INTERVAL: Duration = Duration::from_secs(2);

// ── Request / response shapes ────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: &'a GenerationConfigBody,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: FileData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GenerationConfigBody {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

impl From<&GenerationConfig> for GenerationConfigBody {
    fn from(g: &GenerationConfig) -> Self {
        Self {
            temperature: g.temperature,
            top_p: g.top_p,
            top_k: g.top_k,
            max_output_tokens: g.max_output_tokens,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize, Debug)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Serialize)]
struct UploadStart<'a> {
    file: UploadStartFile<'a>,
}

#[derive(Serialize)]
struct UploadStartFile<'a> {
    display_name: &'a str,
}

#[derive(Deserialize, Debug)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    uri: String,
    mime_type: Option<String>,
    state: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
    next_page_token: Option<String>,
}

/// A model as reported by `models.list`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

impl ModelInfo {
    pub fn supports_generate(&self) -> bool {
        self.supported_generation_methods
            .iter()
            .any(|m| m == "generateContent")
    }
}

// ── Provider ─────────────────────────────────────────────────────────

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    generation: GenerationConfigBody,
}

impl GeminiProvider {
    /// Build a provider from configuration. Fails without an API key.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(ProviderError::MissingApiKey)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("paperscan/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model_id(&config.model).to_string(),
            generation: GenerationConfigBody::from(&config.generation),
        })
    }

    /// Models available to this key that support `generateContent`.
    pub fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let url = format!("{}/v1beta/models", self.base_url);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self
                .client
                .get(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .query(&[("pageSize", "100")]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }

            let page: ModelList = check(req.send()?)?
                .json()
                .map_err(|e| ProviderError::Decode(e.to_string()))?;
            models.extend(page.models.into_iter().filter(ModelInfo::supports_generate));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(models)
    }

    fn wait_until_active(&self, mut file: RemoteFile) -> Result<RemoteFile, ProviderError> {
        let url = format!("{}/v1beta/{}", self.base_url, file.name);
        for _ in 0..PROCESSING_POLLS {
            if file.state.as_deref() != Some("PROCESSING") {
                break;
            }
            debug!("{} is still processing", file.name);
            thread::sleep(PROCESSING_POLL_INTERVAL);
            file = check(
                self.client
                    .get(&url)
                    .header(API_KEY_HEADER, &self.api_key)
                    .send()?,
            )?
            .json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        }

        settled(file)
    }
}

impl AiProvider for GeminiProvider {
    fn upload(&self, path: &Path) -> Result<DocumentHandle, ProviderError> {
        let bytes = std::fs::read(path).map_err(|source| ProviderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", PDF_MIME)
            .json(&UploadStart {
                file: UploadStartFile {
                    display_name: &display_name,
                },
            })
            .send()?;
        let start = check(start)?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .ok_or(ProviderError::MissingUploadUrl)?
            .to_string();

        let size = bytes.len();
        let finished = self
            .client
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()?;
        let uploaded: UploadResponse = check(finished)?
            .json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let file = self.wait_until_active(uploaded.file)?;
        info!("Uploaded {display_name} ({size} bytes) as {}", file.name);

        Ok(DocumentHandle {
            name: file.name,
            uri: file.uri,
            mime_type: file.mime_type.unwrap_or_else(|| PDF_MIME.to_string()),
        })
    }

    fn generate(
        &self,
        prompt: &str,
        document: Option<&DocumentHandle>,
    ) -> Result<String, ProviderError> {
        let body = build_request(prompt, document, &self.generation);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let resp = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()?;
        let parsed: GenerateResponse = check(resp)?
            .json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        extract_text(parsed)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Accept both `gemini-2.0-flash` and `models/gemini-2.0-flash`.
fn model_id(model: &str) -> &str {
    let model = model.trim();
    model.strip_prefix("models/").unwrap_or(model)
}

fn build_request<'a>(
    prompt: &'a str,
    document: Option<&'a DocumentHandle>,
    generation: &'a GenerationConfigBody,
) -> GenerateRequest<'a> {
    let mut parts = Vec::with_capacity(2);
    if let Some(doc) = document {
        parts.push(Part::File {
            file_data: FileData {
                mime_type: &doc.mime_type,
                file_uri: &doc.uri,
            },
        });
    }
    parts.push(Part::Text { text: prompt });

    GenerateRequest {
        contents: vec![Content { parts }],
        generation_config: generation,
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(resp: GenerateResponse) -> Result<String, ProviderError> {
    let block_reason = resp.prompt_feedback.and_then(|f| f.block_reason);

    let Some(candidate) = resp.candidates.into_iter().next() else {
        return Err(ProviderError::EmptyResponse {
            reason: block_reason,
        });
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse {
            reason: block_reason.or(candidate.finish_reason),
        });
    }

    Ok(text)
}

/// Final state check after polling: only active (or stateless) files are usable.
fn settled(file: RemoteFile) -> Result<RemoteFile, ProviderError> {
    match file.state.as_deref() {
        Some("FAILED") => Err(ProviderError::Api {
            status: 200,
            body: format!("file {} failed processing", file.name),
        }),
        Some("PROCESSING") => Err(ProviderError::StillProcessing(file.name)),
        _ => Ok(file),
    }
}

fn check(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn generation() -> GenerationConfigBody {
        GenerationConfigBody::from(&GenerationConfig::default())
    }

    #[test]
    fn test_request_with_document() {
        let doc = DocumentHandle {
            name: "files/abc".into(),
            uri: "https://example.test/files/abc".into(),
            mime_type: PDF_MIME.into(),
        };
        let g = generation();
        let body = serde_json::to_value(build_request("analyze", Some(&doc), &g)).unwrap();

        assert_eq!(
            body["contents"][0]["parts"][0],
            json!({"fileData": {"mimeType": "application/pdf", "fileUri": "https://example.test/files/abc"}})
        );
        assert_eq!(body["contents"][0]["parts"][1], json!({"text": "analyze"}));
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn test_request_text_only() {
        let g = GenerationConfigBody {
            max_output_tokens: Some(1024),
            ..generation()
        };
        let body = serde_json::to_value(build_request("hi", None, &g)).unwrap();
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 1);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let resp: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"a\": "}, {"text": "1}"}]}, "finishReason": "STOP"}]
        }))
        .unwrap();
        assert_eq!(extract_text(resp).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_text_blocked() {
        let resp: GenerateResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        match extract_text(resp) {
            Err(ProviderError::EmptyResponse { reason }) => {
                assert_eq!(reason.as_deref(), Some("SAFETY"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_extract_text_empty_candidate() {
        let resp: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "MAX_TOKENS"}]
        }))
        .unwrap();
        match extract_text(resp) {
            Err(ProviderError::EmptyResponse { reason }) => {
                assert_eq!(reason.as_deref(), Some("MAX_TOKENS"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_model_id_and_key_requirement() {
        assert_eq!(model_id("models/gemini-2.0-flash"), "gemini-2.0-flash");
        assert_eq!(model_id(" gemini-1.5-pro "), "gemini-1.5-pro");

        let config = Config::default();
        assert!(matches!(
            GeminiProvider::from_config(&config),
            Err(ProviderError::MissingApiKey)
        ));
    }

    fn remote_file(state: Option<&str>) -> RemoteFile {
        RemoteFile {
            name: "files/abc".into(),
            uri: "https://example.test/files/abc".into(),
            mime_type: None,
            state: state.map(str::to_string),
        }
    }

    #[test]
    fn test_settled_file_states() {
        assert!(settled(remote_file(Some("ACTIVE"))).is_ok());
        assert!(settled(remote_file(None)).is_ok());
        assert!(matches!(
            settled(remote_file(Some("FAILED"))),
            Err(ProviderError::Api { .. })
        ));
        match settled(remote_file(Some("PROCESSING"))) {
            Err(e @ ProviderError::StillProcessing(_)) => {
                assert_eq!(e.to_string(), "file files/abc is still processing");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_transport_error_hides_api_key() {
        let config = Config {
            api_key: Some("SECRET-KEY-123".into()),
            // Nothing listens on the discard port, so the request fails to connect.
            api_base_url: "http://127.0.0.1:9".into(),
            request_timeout_secs: 5,
            ..Config::default()
        };
        let provider = GeminiProvider::from_config(&config).unwrap();

        let err = provider.generate("hi", None).unwrap_err();
        assert!(matches!(err, ProviderError::Http(_)));
        assert!(!err.to_string().contains("SECRET-KEY-123"), "{err}");
        assert!(!format!("{err:?}").contains("SECRET-KEY-123"));

        let err = provider.list_models().unwrap_err();
        assert!(!err.to_string().contains("SECRET-KEY-123"), "{err}");
    }

    #[test]
    fn test_model_info_filter() {
        let list: ModelList = serde_json::from_value(json!({
            "models": [
                {"name": "models/a", "supportedGenerationMethods": ["generateContent"]},
                {"name": "models/b", "supportedGenerationMethods": ["embedContent"]}
            ]
        }))
        .unwrap();
        let names: Vec<_> = list
            .models
            .into_iter()
            .filter(ModelInfo::supports_generate)
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["models/a"]);
    }
}
