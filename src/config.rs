/// Configuration module for paperscan.
///
/// Handles loading, validating, and providing default configuration values.
/// Precedence, lowest first: built-in defaults, `paperscan.json`,
/// environment variables (including a `.env` file), command-line flags.
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::response::merge::MergePolicy;
use crate::response::reconcile::FoldPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "paperscan.json";

// ── Default value functions ──────────────────────────────────────────

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_input_dir() -> String {
    "input".to_string()
}

fn default_output_dir() -> String {
    "result".to_string()
}

fn default_call_delay_secs() -> u64 {
    2
}

fn default_chunk_size_chars() -> usize {
    15000
}

fn default_max_retries() -> u32 {
    3
}

fn default_write_retry_delay_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.8
}

fn default_top_k() -> u32 {
    40
}

// ── Config structs ───────────────────────────────────────────────────

/// How a document is presented to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Upload the whole PDF and ask for one field-keyed JSON object.
    #[default]
    Upload,
    /// Extract text locally, send it in chunks, merge per-question answers.
    Chunked,
}

impl std::str::FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upload" => Ok(AnalysisMode::Upload),
            "chunked" | "chunk" => Ok(AnalysisMode::Chunked),
            other => Err(format!("unknown analysis mode: {other}")),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Read from the environment only.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_input_dir")]
    pub input_dir: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Pause before every generate call.
    #[serde(default = "default_call_delay_secs")]
    pub call_delay_secs: u64,

    #[serde(default = "default_chunk_size_chars")]
    pub chunk_size_chars: usize,

    /// Attempts per remote call and per CSV write.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_write_retry_delay_secs")]
    pub write_retry_delay_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub mode: AnalysisMode,

    /// Markdown prompt book; the built-in one when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<String>,

    #[serde(default = "default_true")]
    pub json_output: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub merge_policy: MergePolicy,

    #[serde(default)]
    pub fold_policy: FoldPolicy,
}

/// Sampling parameters sent with every generate call.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_top_k")]
    pub top_k: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base_url: default_api_base_url(),
            api_key: None,
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            call_delay_secs: default_call_delay_secs(),
            chunk_size_chars: default_chunk_size_chars(),
            max_retries: default_max_retries(),
            write_retry_delay_secs: default_write_retry_delay_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            mode: AnalysisMode::default(),
            prompt_file: None,
            json_output: default_true(),
            log_file: None,
            generation: GenerationConfig::default(),
            merge_policy: MergePolicy::default(),
            fold_policy: FoldPolicy::default(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: None,
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"paperscan.json"`.
    /// If the file does not exist, returns a default config and, for the
    /// default path only, writes a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == DEFAULT_CONFIG_PATH {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file. The API key is never written.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparseable numbers are ignored with a warning.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")) {
            self.api_key = Some(key.trim().to_string());
        }
        if let Some(v) = get("PAPERSCAN_MODEL") {
            self.model = v;
        }
        if let Some(v) = get("PAPERSCAN_API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = get("PAPERSCAN_INPUT_DIR") {
            self.input_dir = v;
        }
        if let Some(v) = get("PAPERSCAN_OUTPUT_DIR") {
            self.output_dir = v;
        }
        if let Some(v) = get("PAPERSCAN_PROMPT_FILE") {
            self.prompt_file = Some(v);
        }
        if let Some(v) = get("PAPERSCAN_LOG_FILE") {
            self.log_file = Some(v);
        }
        if let Some(v) = get("PAPERSCAN_MODE") {
            match v.parse() {
                Ok(mode) => self.mode = mode,
                Err(e) => warn!("Ignoring PAPERSCAN_MODE: {e}"),
            }
        }
        parse_env(&get, "PAPERSCAN_CHUNK_SIZE", &mut self.chunk_size_chars);
        parse_env(&get, "PAPERSCAN_CALL_DELAY_SECS", &mut self.call_delay_secs);
        parse_env(&get, "PAPERSCAN_MAX_RETRIES", &mut self.max_retries);
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.chunk_size_chars > 0,
            "chunk_size_chars must be positive"
        );
        anyhow::ensure!(self.max_retries > 0, "max_retries must be at least 1");
        anyhow::ensure!(!self.model.trim().is_empty(), "model must not be empty");
        anyhow::ensure!(
            !self.api_base_url.trim().is_empty(),
            "api_base_url must not be empty"
        );
        anyhow::ensure!(
            self.request_timeout_secs > 0,
            "request_timeout_secs must be positive"
        );
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = get(key) {
        match raw.trim().parse() {
            Ok(v) => *target = v,
            Err(_) => warn!("Ignoring {key}: not a valid number: {raw:?}"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
