//! Shared types for the audience admin core: customer records, collaborator
//! contracts, configuration and the error taxonomy.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod repository;
pub mod types;

pub use config::AppConfig;
pub use error::{AudienceError, AudienceResult, ErrorKind};
pub use types::{CustomerRecord, Order};
