//! Shared building blocks for the Confer conferencing control plane:
//! identifiers, the error taxonomy carried across the broker, configuration
//! and logging bootstrap.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;

pub use config::Config;
pub use error::{Error, ErrorCode, Nack, Result};
pub use models::{MemberId, RouterId, SpaceId, TransportId};
