use crate::config::ConfigError;
use thiserror::Error;

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Errors that can occur while discovering, pulling or persisting streams
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No streams resolved for any requested type: {0}")]
    NoSources(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Unknown stream type: {0}")]
    UnknownStreamKind(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}
