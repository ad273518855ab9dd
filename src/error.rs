//! Error types for the receipt tracker.

use thiserror::Error;

/// Top-level error for anything that is allowed to fail a command.
#[derive(Error, Debug)]
pub enum ReceiptError {
    /// The request itself was unusable; nothing was stored.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Input problems caught before anything touches disk.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("No file selected")]
    MissingFile,

    #[error("Email is required")]
    MissingOwner,

    #[error("File too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: usize, limit: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors from a chat-completions round trip. Callers log these and degrade.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("LLM API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Empty response from LLM")]
    EmptyResponse,

    #[error("malformed JSON in LLM response: {0}")]
    MalformedJson(String),

    #[error("failed to parse LLM response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Why an office document yielded no text. Turned into degraded text, never raised.
#[derive(Error, Debug)]
pub enum OfficeError {
    #[error("not a valid office archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to read archive entry: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("archive has no {0}")]
    MissingPart(String),
}

pub type Result<T> = std::result::Result<T, ReceiptError>;
