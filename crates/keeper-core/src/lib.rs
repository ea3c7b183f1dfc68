//! `keeper-core`: shared types, configuration and errors for the keeper workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::KeeperConfig;
pub use error::{KeeperError, Result};
pub use types::{CadencePolicy, ChainId, JobDefinition, RunKey, ScheduledJob, SyncCategory};
