//! Per run-key execution statistics, fed by the outcome emitter.
//!
//! In-memory only; reset on restart along with the run registry.

use std::sync::Arc;

use dashmap::DashMap;
use keeper_core::RunKey;
use serde::Serialize;

use crate::outcome::{Outcome, OutcomeStatus};

/// Public snapshot of one run key's history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStatsEntry {
    pub run_key: String,
    pub last_status: Option<OutcomeStatus>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_touched: Option<u64>,
    /// Unix timestamp (seconds) of the last non-skipped outcome.
    pub last_finished_at: Option<i64>,
    pub succeeded: u64,
    pub errored: u64,
    pub timed_out: u64,
    pub skipped: u64,
}

/// Concurrent tracker of outcomes for every run key.
#[derive(Default)]
pub struct JobStats {
    entries: DashMap<RunKey, JobStatsEntry>,
}

impl JobStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, key: &RunKey, outcome: &Outcome) {
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| JobStatsEntry {
                run_key: key.to_string(),
                ..Default::default()
            });

        if outcome.status == OutcomeStatus::Skipped {
            // A skip says nothing about the run that is still in flight.
            entry.skipped += 1;
            return;
        }

        match outcome.status {
            OutcomeStatus::Succeeded => entry.succeeded += 1,
            OutcomeStatus::Errored => entry.errored += 1,
            OutcomeStatus::TimedOut => entry.timed_out += 1,
            OutcomeStatus::Skipped => {}
        }
        entry.last_status = Some(outcome.status);
        entry.last_duration_ms = Some(outcome.duration.as_millis() as u64);
        entry.last_error = outcome.error.clone();
        entry.last_touched = outcome.touched;
        entry.last_finished_at = Some(chrono::Utc::now().timestamp());
    }

    pub fn get(&self, key: &RunKey) -> Option<JobStatsEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// All entries sorted by run key.
    pub fn all(&self) -> Vec<JobStatsEntry> {
        let mut out: Vec<JobStatsEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.run_key.cmp(&b.run_key));
        out
    }
}
