//! Shared primitives for the sdhome backend: entity ids, the data model,
//! the polymorphic `Value`/`Operator` pair, the injectable clock, the
//! broadcaster port, and environment-driven configuration.
//!
//! This crate has no domain-specific I/O — no broker client, no database
//! handle. Everything here is a pure type or trait other crates build on.

pub mod broadcaster;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod model;
pub mod publisher;
pub mod value;

pub use broadcaster::{Broadcaster, NoOpBroadcaster, SharedBroadcaster};
pub use clock::{Clock, SharedClock, SystemClock};
pub use error::{Error, Result};
pub use publisher::{Publisher, SharedPublisher};
pub use value::{Operator, Value};

/// Re-exports commonly used across the workspace's other crates.
pub mod prelude {
    pub use crate::broadcaster::*;
    pub use crate::clock::{Clock, SharedClock, SystemClock};
    pub use crate::config::{AppConfig, BrokerConfig, LocationConfig, StateSyncConfig, WebhooksConfig};
    pub use crate::error::{Error, Result};
    pub use crate::ids::*;
    pub use crate::model::*;
    pub use crate::publisher::{Publisher, RecordingPublisher, SharedPublisher};
    pub use crate::value::{Operator, Value, NUMERIC_TOLERANCE};
}
