use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keeper_core::{ChainId, RunKey, ScheduledJob};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{JobError, Result, SchedulerError};

/// Everything a job body learns about the execution it belongs to.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub run_key: RunKey,
    /// `None` for jobs that are not chain-scoped.
    pub chain: Option<ChainId>,
    /// Cancelled by the dispatcher when the run times out. Bodies should stop
    /// issuing external requests once it fires.
    pub cancel: CancellationToken,
}

/// Summary returned by a successful job body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// Number of entities (rows, pools, prices…) the run touched.
    pub touched: u64,
}

impl JobReport {
    pub fn touched(touched: u64) -> Self {
        Self { touched }
    }
}

/// Typed body for a named job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> std::result::Result<JobReport, JobError>;
}

/// Maps job names to their handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A handler already registered under `name` is replaced.
    pub fn register(&mut self, name: &str, handler: Arc<dyn JobHandler>) {
        if self.handlers.insert(name.to_string(), handler).is_some() {
            info!(job = %name, "job handler replaced");
        } else {
            debug!(job = %name, "job handler registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Fail fast when any configured job has no handler.
    pub fn validate(&self, jobs: &[ScheduledJob]) -> Result<()> {
        for job in jobs {
            if !self.handlers.contains_key(&job.definition.name) {
                return Err(SchedulerError::MissingHandler {
                    name: job.definition.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// The configured jobs, looked up by name (and chain) for on-demand runs.
#[derive(Debug, Clone, Default)]
pub struct JobCatalog {
    jobs: Vec<ScheduledJob>,
}

impl JobCatalog {
    pub fn new(jobs: Vec<ScheduledJob>) -> Self {
        Self { jobs }
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Find the job to run for `name` on `chain`.
    ///
    /// Global jobs ignore `chain`. Chain-scoped jobs require one that the job
    /// is configured on.
    pub fn resolve(&self, name: &str, chain: Option<&str>) -> Result<&ScheduledJob> {
        let mut candidates = self
            .jobs
            .iter()
            .filter(|j| j.definition.name == name)
            .peekable();

        let Some(first) = candidates.peek() else {
            return Err(SchedulerError::UnknownJob {
                name: name.to_string(),
            });
        };
        if !first.definition.chain_scoped {
            return Ok(*first);
        }

        let chain = match chain.map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => {
                return Err(SchedulerError::ChainRequired {
                    name: name.to_string(),
                })
            }
        };

        candidates
            .find(|j| j.chain.as_ref().is_some_and(|c| c.as_str() == chain))
            .ok_or_else(|| SchedulerError::UnknownChain {
                name: name.to_string(),
                chain: chain.to_string(),
            })
    }
}
