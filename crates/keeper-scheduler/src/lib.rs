//! `keeper-scheduler`: per-job supervised loops with mutual exclusion and timeouts.
//!
//! # Overview
//!
//! Each configured job runs in its own tokio task ([`Dispatcher::schedule`]).
//! Every tick goes through [`Dispatcher::run_once`]:
//!
//! 1. skip if the job's [`keeper_core::RunKey`] is already active in the
//!    [`RunLimiter`],
//! 2. run the registered [`JobHandler`] in its own task, raced against the
//!    job timeout,
//! 3. release the key and report an [`Outcome`] through the [`OutcomeEmitter`],
//! 4. re-arm according to the job's [`keeper_core::CadencePolicy`].
//!
//! # Cadence policies
//!
//! | Policy             | Next tick fires                          |
//! |--------------------|------------------------------------------|
//! | `fixed_delay`      | `cadence` after the tick completed       |
//! | `minimum_interval` | `cadence` after the tick started         |

pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod handler;
pub mod metrics;
pub mod outcome;
pub mod registry;
pub mod stats;

pub use dispatcher::Dispatcher;
pub use error::{JobError, MetricsError, Result, SchedulerError};
pub use handler::{HandlerRegistry, JobCatalog, JobContext, JobHandler, JobReport};
pub use metrics::{LogSink, MetricsSink, NullSink, WebhookSink};
pub use outcome::{Outcome, OutcomeEmitter, OutcomeStatus};
pub use registry::{RunGuard, RunLimiter, RunRegistry};
pub use stats::{JobStats, JobStatsEntry};
