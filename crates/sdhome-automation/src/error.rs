//! Error types for the automation crate.

pub use sdhome_core::Error as CoreError;

#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("storage error: {0}")]
    Storage(#[from] sdhome_storage::Error),

    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AutomationError>;

impl From<AutomationError> for CoreError {
    fn from(e: AutomationError) -> Self {
        match e {
            AutomationError::Validation(s) => CoreError::Validation(s),
            AutomationError::Execution(s) => CoreError::Internal(s),
            AutomationError::Storage(e) => CoreError::Storage(e.to_string()),
            AutomationError::Webhook(e) => CoreError::Transport(e.to_string()),
            AutomationError::Serialization(e) => CoreError::Serialization(e.to_string()),
        }
    }
}
