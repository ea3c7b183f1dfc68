use thiserror::Error;

use keeper_scheduler::JobError;

/// Errors raised during a sync cycle. Any of them leaves the checkpoint untouched.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Chain client error: {0}")]
    ChainClient(String),

    #[error("Change detector error: {0}")]
    ChangeDetector(String),

    #[error("Updater error: {0}")]
    Updater(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// No pipeline is configured for the chain a job ran on.
    #[error("No sync pipeline for chain {0}")]
    UnknownChain(String),

    /// The run was cancelled before the checkpoint could advance.
    #[error("Sync cycle cancelled")]
    Cancelled,
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

impl From<SyncError> for JobError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Cancelled => JobError::Cancelled,
            other => JobError::Failed(other.to_string()),
        }
    }
}
