use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DexError {
    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("entity {0} is not in the name cache")]
    EntityNotFound(u16),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("species request failed: {0}")]
    SpeciesHttp(String),

    #[error("species endpoint returned status {status}: {message}")]
    SpeciesStatus { status: u16, message: String },

    #[error("species request for {id} timed out after {timeout_ms}ms")]
    Timeout { id: u16, timeout_ms: u64 },

    #[error("failed to parse document: {0}")]
    Parse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("offloaded worker stopped before posting results")]
    WorkerDisconnected,

    #[error("refresh run panicked before reporting")]
    RunPanicked,
}
