use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No configured job carries this name.
    #[error("Unknown job: {name}")]
    UnknownJob { name: String },

    /// A configured job has no handler registered under its name.
    #[error("No handler registered for job: {name}")]
    MissingHandler { name: String },

    /// The job is chain-scoped but the request did not name a chain.
    #[error("Job {name} requires a chain")]
    ChainRequired { name: String },

    /// The job exists but is not configured on the requested chain.
    #[error("Job {name} is not configured on chain {chain}")]
    UnknownChain { name: String, chain: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failure reported by a job body.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    /// The body observed its cancellation token and stopped early.
    #[error("job cancelled")]
    Cancelled,
}

/// Failure publishing a metric. Never propagated past the emitter.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}
