//! Crate-local error type, bridged into `sdhome_core::Error` at the boundary
//! the way `sdhome-storage` and `sdhome-automation` bridge theirs.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("storage error: {0}")]
    Storage(#[from] sdhome_storage::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publisher is disabled")]
    Disabled,
}

impl From<BrokerError> for sdhome_core::Error {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Mqtt(e) => sdhome_core::Error::Transport(e.to_string()),
            BrokerError::Storage(e) => sdhome_core::Error::Storage(e.to_string()),
            BrokerError::Serialization(e) => sdhome_core::Error::Serialization(e.to_string()),
            BrokerError::Disabled => sdhome_core::Error::Transport("mqtt publisher is disabled".to_string()),
        }
    }
}
