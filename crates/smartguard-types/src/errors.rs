use thiserror::Error;

pub type Result<T, E = SmartguardError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum SmartguardError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("capture error: {0}")]
    Capture(String),
    #[error("vision error: {0}")]
    Vision(String),
    #[error("monitor error: {0}")]
    Monitor(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("upload error: {0}")]
    Upload(String),
    #[error("malformed upload grant: {0}")]
    Grant(String),
    #[error("pipeline error: {0}")]
    Pipeline(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
