use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keeper_core::{ChainId, SyncCategory};
use keeper_scheduler::{JobContext, JobError, JobHandler, JobReport};
use tracing::debug;

use crate::{ChainSynchronizer, SyncError};

/// A chain-scoped job that runs one sync cycle for the chain it was ticked on.
pub struct SyncJob {
    category: SyncCategory,
    pipelines: HashMap<ChainId, Arc<ChainSynchronizer>>,
}

impl SyncJob {
    pub fn new(category: SyncCategory) -> Self {
        Self {
            category,
            pipelines: HashMap::new(),
        }
    }

    /// Attach a pipeline. Its category must match the job's.
    pub fn with_chain(mut self, sync: Arc<ChainSynchronizer>) -> Result<Self, SyncError> {
        if sync.category() != self.category {
            return Err(SyncError::InvalidConfig(format!(
                "{} pipeline attached to {} job",
                sync.category(),
                self.category
            )));
        }
        self.pipelines.insert(sync.chain().clone(), sync);
        Ok(self)
    }
}

#[async_trait]
impl JobHandler for SyncJob {
    async fn run(&self, ctx: JobContext) -> Result<JobReport, JobError> {
        let chain = ctx
            .chain
            .as_ref()
            .ok_or_else(|| SyncError::UnknownChain("<none>".to_string()))?;
        let sync = self
            .pipelines
            .get(chain)
            .ok_or_else(|| SyncError::UnknownChain(chain.to_string()))?;

        let report = sync.sync_once(&ctx.cancel).await?;
        debug!(run_key = %ctx.run_key, checkpoint = report.checkpoint, "sync job finished");
        Ok(JobReport::touched(report.touched as u64))
    }
}
