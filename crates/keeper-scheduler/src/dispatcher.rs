use std::sync::Arc;
use std::time::Duration;

use keeper_core::ScheduledJob;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    guard::{race, Race},
    handler::{HandlerRegistry, JobContext, JobHandler},
    outcome::{Outcome, OutcomeEmitter},
    registry::{RunGuard, RunLimiter},
};

/// Drives job handlers: mutual exclusion, timeout, outcome reporting, re-arming.
///
/// One [`Dispatcher::schedule`] loop runs per scheduled job; the trigger
/// endpoint shares the same execution path through [`Dispatcher::run_once`].
pub struct Dispatcher {
    handlers: HandlerRegistry,
    limiter: Arc<dyn RunLimiter>,
    emitter: OutcomeEmitter,
}

impl Dispatcher {
    pub fn new(
        handlers: HandlerRegistry,
        limiter: Arc<dyn RunLimiter>,
        emitter: OutcomeEmitter,
    ) -> Arc<Self> {
        Arc::new(Self {
            handlers,
            limiter,
            emitter,
        })
    }

    pub fn limiter(&self) -> &Arc<dyn RunLimiter> {
        &self.limiter
    }

    pub fn emitter(&self) -> &OutcomeEmitter {
        &self.emitter
    }

    /// Execute `job` once and report the outcome.
    ///
    /// Never fails: handler errors, panics and timeouts all become an
    /// [`Outcome`]. The run key is released before the outcome is emitted.
    ///
    /// Once the key is acquired, the run is supervised by its own task. Dropping
    /// the returned future (a disconnected trigger client, a caller-side
    /// timeout) detaches that task: the key stays held until the body settles
    /// or times out, and the outcome is still emitted.
    pub async fn run_once(&self, job: &ScheduledJob) -> Outcome {
        let key = job.run_key();

        let Some(handler) = self.handlers.get(&job.definition.name) else {
            let outcome = Outcome::errored(
                Duration::ZERO,
                format!("no handler registered for job {}", job.definition.name),
            );
            self.emitter.emit(&key, &outcome);
            return outcome;
        };

        let Some(guard) = RunGuard::acquire(&self.limiter, &key) else {
            let outcome = Outcome::skipped();
            self.emitter.emit(&key, &outcome);
            return outcome;
        };

        let ctx = JobContext {
            run_key: key.clone(),
            chain: job.chain.clone(),
            cancel: CancellationToken::new(),
        };
        let timeout = job.definition.timeout();
        let emitter = self.emitter.clone();

        let supervisor = tokio::spawn(supervise(handler, ctx, timeout, guard, emitter));
        match supervisor.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(run_key = %key, error = %e, "job supervisor failed");
                Outcome::errored(Duration::ZERO, format!("job supervisor failed: {e}"))
            }
        }
    }

    /// Run `job` forever on its cadence until `shutdown` turns true.
    ///
    /// The first tick fires immediately. A tick in progress is allowed to
    /// finish before the loop exits.
    pub async fn schedule(self: Arc<Self>, job: ScheduledJob, mut shutdown: watch::Receiver<bool>) {
        let key = job.run_key();
        let cadence = job.definition.cadence();
        info!(
            run_key = %key,
            cadence_ms = job.definition.cadence_ms,
            timeout_ms = job.definition.timeout_ms,
            policy = %job.definition.policy,
            "job loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = Instant::now();
            self.run_once(&job).await;

            let delay = job.definition.policy.next_delay(cadence, started.elapsed());
            if sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }

        info!(run_key = %key, "job loop stopped");
    }

    /// Spawn one supervised loop per scheduled job.
    pub fn spawn_all(
        self: &Arc<Self>,
        jobs: Vec<ScheduledJob>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for job in jobs {
            set.spawn(Arc::clone(self).schedule(job, shutdown.clone()));
        }
        set
    }
}

/// Race one body against its deadline while holding `guard`, then release the
/// key and emit the outcome.
async fn supervise(
    handler: Arc<dyn JobHandler>,
    ctx: JobContext,
    timeout: Duration,
    guard: RunGuard,
    emitter: OutcomeEmitter,
) -> Outcome {
    let key = ctx.run_key.clone();
    let cancel = ctx.cancel.clone();
    let started = Instant::now();

    // The body runs in its own task so a panic surfaces as a JoinError
    // instead of unwinding through the supervisor.
    let mut handle = tokio::spawn(async move { handler.run(ctx).await });

    let outcome = match race(&mut handle, timeout).await {
        Race::Settled(Ok(Ok(report))) => Outcome::succeeded(started.elapsed(), report.touched),
        Race::Settled(Ok(Err(e))) => Outcome::errored(started.elapsed(), e.to_string()),
        Race::Settled(Err(join_err)) => {
            error!(run_key = %key, error = %join_err, "job body panicked");
            Outcome::errored(started.elapsed(), format!("job body panicked: {join_err}"))
        }
        Race::TimedOut => {
            cancel.cancel();
            let late_key = key.clone();
            // Detached: the body may still be running. Watch it only to log
            // how it eventually ended.
            tokio::spawn(async move {
                match handle.await {
                    Ok(Ok(report)) => warn!(
                        run_key = %late_key,
                        touched = report.touched,
                        "job finished after its timeout was reported"
                    ),
                    Ok(Err(e)) => info!(run_key = %late_key, error = %e, "timed-out job stopped"),
                    Err(e) => error!(run_key = %late_key, error = %e, "timed-out job panicked"),
                }
            });
            Outcome::timed_out(started.elapsed(), timeout)
        }
    };

    drop(guard);
    emitter.emit(&key, &outcome);
    outcome
}

/// Sleep for `delay`; returns true if shutdown was requested first.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                // A dropped sender counts as shutdown.
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}
