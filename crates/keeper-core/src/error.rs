use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job definition {name}: {reason}")]
    InvalidJob { name: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeeperError {
    /// Short error code string used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            KeeperError::Config(_) => "CONFIG_ERROR",
            KeeperError::InvalidJob { .. } => "INVALID_JOB",
            KeeperError::Serialization(_) => "SERIALIZATION_ERROR",
            KeeperError::Io(_) => "IO_ERROR",
            KeeperError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, KeeperError>;
