//! The MQTT transport layer (§4.1, §4.4, §4.6, §4.7): the ingestion worker,
//! the publisher, the state-sync worker, and the pairing sub-protocol, all
//! built on one `rumqttc`-based connection idiom.

mod backoff;
pub mod error;
pub mod ingestion;
pub mod pairing;
pub mod publisher;
pub mod state_sync;

pub use error::{BrokerError, Result};
pub use ingestion::IngestionWorker;
pub use pairing::PairingCoordinator;
pub use publisher::MqttPublisher;
pub use state_sync::StateSyncWorker;
