//! Error types for the pipeline crate.

pub use sdhome_core::Error as CoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] sdhome_storage::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<PipelineError> for CoreError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Storage(e) => CoreError::Storage(e.to_string()),
            PipelineError::Serialization(e) => CoreError::Serialization(e.to_string()),
        }
    }
}
