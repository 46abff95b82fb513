use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("invalid timestamp: {0}")]
    #[diagnostic(help("expected `YYYY-MM-DD HH:MM:SS` or RFC 3339"))]
    InvalidTimestamp(String),

    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    #[error("missing required setting: {0}")]
    #[diagnostic(help("set the {0} environment variable or add it to the config file"))]
    MissingSetting(String),

    #[error("invalid setting {name}: {message}")]
    InvalidSetting { name: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("pageview request failed: {0}")]
    Network(String),

    #[error("pageview source returned status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("failed to decompress {file}: {message}")]
    Decompression { file: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("warehouse connection failed: {0}")]
    WarehouseConnection(String),

    #[error("failed to set up {object}: {message}")]
    DdlSetup { object: String, message: String },

    #[error("failed to stage {file}: {message}")]
    StageUpload { file: String, message: String },

    #[error("failed to load {file}: {message}")]
    Load { file: String, message: String },

    #[error("pageviews for {0} could not be fetched")]
    TargetHourUnavailable(String),
}

impl IngestError {
    /// Stage name used in the terminal failure message of an aborted run.
    pub fn stage(&self) -> &'static str {
        match self {
            IngestError::InvalidTimestamp(_) | IngestError::InvalidRange { .. } => "resolve",
            IngestError::MissingSetting(_)
            | IngestError::InvalidSetting { .. }
            | IngestError::ConfigRead(_)
            | IngestError::ConfigParse(_) => "config",
            IngestError::Network(_)
            | IngestError::HttpStatus { .. }
            | IngestError::TargetHourUnavailable(_) => "download",
            IngestError::Decompression { .. } => "unzip",
            IngestError::Filesystem(_) => "filesystem",
            IngestError::WarehouseConnection(_) => "connect",
            IngestError::DdlSetup { .. } => "setup",
            IngestError::StageUpload { .. } => "upload",
            IngestError::Load { .. } => "load",
        }
    }
}
