//! The mapper, projection, and signals-service stages of the event pipeline
//! (§4.2, §4.3): everything between "raw broker message" and "automation
//! engine invocation".

pub mod error;
pub mod mapper;
pub mod projection;
pub mod signals_service;

pub use error::{PipelineError, Result};
pub use signals_service::SignalsService;
