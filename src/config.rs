use crate::error::ConfigError;
use serde::Deserialize;
use std::{fs, io, path::Path};

pub const DEFAULT_CONFIG_PATH: &str = "receipts.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: String,
    pub upload_dir: String,
    pub max_upload_bytes: usize,
    pub summary_window_days: i64,
    pub llm: LlmSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "receipts.db".to_string(),
            upload_dir: "uploads".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
            summary_window_days: 30,
            llm: LlmSection::default(),
        }
    }
}

/// Which service structures receipt text and writes summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    Ollama,
    Cliproxy,
    Remote,
    /// Regex extraction and local totals, no network.
    Heuristics,
}

/// How the extraction request pins down the output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// JSON layout described in the prompt, `json_object` response format.
    JsonPrompt,
    /// Strict `json_schema` response format.
    Schema,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(from = "LlmSectionFile")]
pub struct LlmSection {
    pub backend: LlmBackend,
    pub mode: ExtractionMode,
    pub max_chars: usize,
    pub remote: EndpointConfig,
    pub ollama: EndpointConfig,
    pub cliproxy: EndpointConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Remote,
            mode: ExtractionMode::JsonPrompt,
            max_chars: 12_000,
            remote: EndpointConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key_env: Some("OPENAI_API_KEY".to_string()),
            },
            ollama: EndpointConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                model: "qwen3:8b".to_string(),
                api_key_env: None,
            },
            cliproxy: EndpointConfig {
                base_url: "http://localhost:8317/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key_env: None,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: Option<String>,
}

/// `[llm]` as written in the file. Anything left out keeps its default,
/// including single keys inside an endpoint table.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LlmSectionFile {
    backend: Option<LlmBackend>,
    mode: Option<ExtractionMode>,
    max_chars: Option<usize>,
    remote: EndpointOverride,
    ollama: EndpointOverride,
    cliproxy: EndpointOverride,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EndpointOverride {
    base_url: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
}

impl EndpointOverride {
    fn apply(self, target: &mut EndpointConfig) {
        if let Some(url) = self.base_url {
            target.base_url = url;
        }
        if let Some(model) = self.model {
            target.model = model;
        }
        if let Some(var) = self.api_key_env {
            target.api_key_env = Some(var);
        }
    }
}

impl From<LlmSectionFile> for LlmSection {
    fn from(file: LlmSectionFile) -> Self {
        let mut section = Self::default();
        if let Some(backend) = file.backend {
            section.backend = backend;
        }
        if let Some(mode) = file.mode {
            section.mode = mode;
        }
        if let Some(max_chars) = file.max_chars {
            section.max_chars = max_chars;
        }
        file.remote.apply(&mut section.remote);
        file.ollama.apply(&mut section.ollama);
        file.cliproxy.apply(&mut section.cliproxy);
        section
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Like [`Config::load`], but a missing file means all defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }
}
