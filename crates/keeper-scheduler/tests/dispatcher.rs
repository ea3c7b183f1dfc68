// Dispatcher behaviour under overlap, failure, panic and timeout.
// Timing tests run on tokio's paused clock, so "5 seconds" costs nothing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keeper_core::{CadencePolicy, ChainId, JobDefinition, ScheduledJob};
use keeper_scheduler::{
    Dispatcher, HandlerRegistry, JobContext, JobError, JobHandler, JobReport, JobStats, NullSink,
    OutcomeEmitter, OutcomeStatus, RunRegistry,
};
use tokio::sync::watch;
use tokio::time::Instant;

/// Sleeps for `delay`, counting invocations.
struct SleepJob {
    delay: Duration,
    calls: AtomicUsize,
}

impl SleepJob {
    fn new(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_millis(delay_ms),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for SleepJob {
    async fn run(&self, _ctx: JobContext) -> Result<JobReport, JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(JobReport::touched(1))
    }
}

struct FailJob;

#[async_trait]
impl JobHandler for FailJob {
    async fn run(&self, _ctx: JobContext) -> Result<JobReport, JobError> {
        Err(JobError::Failed("change feed returned 503".into()))
    }
}

struct PanicJob;

#[async_trait]
impl JobHandler for PanicJob {
    async fn run(&self, _ctx: JobContext) -> Result<JobReport, JobError> {
        panic!("unexpected null pool reserve");
    }
}

/// Waits for either its cancellation token or five seconds.
#[derive(Default)]
struct CancelAwareJob {
    cancelled: AtomicBool,
}

#[async_trait]
impl JobHandler for CancelAwareJob {
    async fn run(&self, ctx: JobContext) -> Result<JobReport, JobError> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                self.cancelled.store(true, Ordering::SeqCst);
                Err(JobError::Cancelled)
            }
            _ = tokio::time::sleep(Duration::from_millis(5_000)) => Ok(JobReport::default()),
        }
    }
}

fn job(name: &str, cadence_ms: u64, timeout_ms: u64) -> ScheduledJob {
    ScheduledJob {
        definition: JobDefinition::new(name, cadence_ms, timeout_ms),
        chain: Some(ChainId::new("ethereum")),
    }
}

fn dispatcher(handlers: HandlerRegistry) -> Arc<Dispatcher> {
    let emitter = OutcomeEmitter::new(Arc::new(NullSink), JobStats::new(), "");
    Dispatcher::new(handlers, RunRegistry::new(), emitter)
}

#[tokio::test(start_paused = true)]
async fn overlapping_tick_is_skipped() {
    let body = SleepJob::new(1_000);
    let mut handlers = HandlerRegistry::new();
    handlers.register("pool-sync", body.clone());
    let d = dispatcher(handlers);
    let job = job("pool-sync", 60_000, 10_000);

    let (first, second) = tokio::join!(d.run_once(&job), async {
        tokio::task::yield_now().await;
        d.run_once(&job).await
    });

    assert_eq!(first.status, OutcomeStatus::Succeeded);
    assert_eq!(second.status, OutcomeStatus::Skipped);
    assert_eq!(body.calls(), 1);

    let stats = d.emitter().stats().get(&job.run_key()).unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn key_is_released_after_each_run() {
    let body = SleepJob::new(10);
    let mut handlers = HandlerRegistry::new();
    handlers.register("pool-sync", body.clone());
    let d = dispatcher(handlers);
    let job = job("pool-sync", 60_000, 10_000);

    assert_eq!(d.run_once(&job).await.status, OutcomeStatus::Succeeded);
    assert_eq!(d.run_once(&job).await.status, OutcomeStatus::Succeeded);
    assert_eq!(body.calls(), 2);
    assert!(d.limiter().active().is_empty());
}

#[tokio::test(start_paused = true)]
async fn abandoned_caller_keeps_key_held_until_body_settles() {
    let body = SleepJob::new(3_000);
    let mut handlers = HandlerRegistry::new();
    handlers.register("pool-sync", body.clone());
    let d = dispatcher(handlers);
    let job = job("pool-sync", 60_000, 10_000);

    // The caller gives up after 100ms, as a disconnected trigger client would.
    let abandoned = tokio::time::timeout(Duration::from_millis(100), d.run_once(&job)).await;
    assert!(abandoned.is_err());
    assert_eq!(d.limiter().active(), vec![job.run_key()]);

    let second = d.run_once(&job).await;
    assert_eq!(second.status, OutcomeStatus::Skipped);
    assert_eq!(body.calls(), 1);

    // The detached run still completes and reports its outcome.
    tokio::time::sleep(Duration::from_millis(3_000)).await;
    assert!(d.limiter().active().is_empty());
    let stats = d.emitter().stats().get(&job.run_key()).unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.skipped, 1);

    assert_eq!(d.run_once(&job).await.status, OutcomeStatus::Succeeded);
    assert_eq!(body.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn same_job_on_other_chain_is_not_blocked() {
    let body = SleepJob::new(1_000);
    let mut handlers = HandlerRegistry::new();
    handlers.register("pool-sync", body.clone());
    let d = dispatcher(handlers);
    let eth = job("pool-sync", 60_000, 10_000);
    let polygon = ScheduledJob {
        chain: Some(ChainId::new("polygon")),
        ..eth.clone()
    };

    let (a, b) = tokio::join!(d.run_once(&eth), d.run_once(&polygon));
    assert_eq!(a.status, OutcomeStatus::Succeeded);
    assert_eq!(b.status, OutcomeStatus::Succeeded);
    assert_eq!(body.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_body_times_out_while_other_jobs_proceed() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("staking-sync", SleepJob::new(5_000));
    handlers.register("pool-sync", SleepJob::new(10));
    let d = dispatcher(handlers);
    let slow = job("staking-sync", 60_000, 1_000);
    let fast = job("pool-sync", 60_000, 1_000);

    let start = Instant::now();
    let (slow_outcome, (fast_outcome, fast_done_at)) = tokio::join!(d.run_once(&slow), async {
        let outcome = d.run_once(&fast).await;
        (outcome, start.elapsed())
    });

    assert_eq!(slow_outcome.status, OutcomeStatus::TimedOut);
    assert!(slow_outcome.duration >= Duration::from_millis(1_000));
    assert!(slow_outcome.duration < Duration::from_millis(1_100));

    assert_eq!(fast_outcome.status, OutcomeStatus::Succeeded);
    assert!(fast_done_at < Duration::from_millis(1_000));
}

#[tokio::test(start_paused = true)]
async fn timeout_cancels_body_and_releases_key() {
    let body = Arc::new(CancelAwareJob::default());
    let mut handlers = HandlerRegistry::new();
    handlers.register("pool-sync", body.clone());
    let d = dispatcher(handlers);
    let job = job("pool-sync", 60_000, 1_000);

    let outcome = d.run_once(&job).await;
    assert_eq!(outcome.status, OutcomeStatus::TimedOut);
    assert!(d.limiter().active().is_empty());

    // The detached body sees the token on its next poll.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(body.cancelled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn errors_and_panics_become_errored_outcomes() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("fail", Arc::new(FailJob));
    handlers.register("panic", Arc::new(PanicJob));
    handlers.register("ok", SleepJob::new(0));
    let d = dispatcher(handlers);

    let failed = d.run_once(&job("fail", 1_000, 1_000)).await;
    assert_eq!(failed.status, OutcomeStatus::Errored);
    assert_eq!(failed.error.as_deref(), Some("change feed returned 503"));

    let panicked = d.run_once(&job("panic", 1_000, 1_000)).await;
    assert_eq!(panicked.status, OutcomeStatus::Errored);
    assert!(panicked.error.unwrap().contains("panicked"));

    // The dispatcher is still healthy and the panicking key was released.
    assert_eq!(d.run_once(&job("ok", 1_000, 1_000)).await.status, OutcomeStatus::Succeeded);
    assert!(d.limiter().active().is_empty());
}

#[tokio::test]
async fn missing_handler_is_reported_not_raised() {
    let d = dispatcher(HandlerRegistry::new());
    let outcome = d.run_once(&job("ghost", 1_000, 1_000)).await;
    assert_eq!(outcome.status, OutcomeStatus::Errored);
}

async fn ticks_after(policy: CadencePolicy, body_ms: u64, window_ms: u64) -> usize {
    let body = SleepJob::new(body_ms);
    let mut handlers = HandlerRegistry::new();
    handlers.register("pool-sync", body.clone());
    let d = dispatcher(handlers);
    let mut job = job("pool-sync", 1_000, 900);
    job.definition = job.definition.with_policy(policy);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&d).schedule(job, rx));
    tokio::time::sleep(Duration::from_millis(window_ms)).await;
    let calls = body.calls();

    tx.send(true).unwrap();
    handle.await.unwrap();
    calls
}

#[tokio::test(start_paused = true)]
async fn minimum_interval_keeps_start_to_start_cadence() {
    // Starts at 0, 1000, 2000, 3000.
    assert_eq!(ticks_after(CadencePolicy::MinimumInterval, 400, 3_500).await, 4);
}

#[tokio::test(start_paused = true)]
async fn fixed_delay_waits_after_completion() {
    // Starts at 0, 1400, 2800; the next would be 4200.
    assert_eq!(ticks_after(CadencePolicy::FixedDelay, 400, 3_500).await, 3);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_the_wait() {
    let body = SleepJob::new(0);
    let mut handlers = HandlerRegistry::new();
    handlers.register("price-refresh", body.clone());
    let d = dispatcher(handlers);
    let job = ScheduledJob {
        definition: JobDefinition::new("price-refresh", 3_600_000, 1_000).global(),
        chain: None,
    };

    let (tx, rx) = watch::channel(false);
    let start = Instant::now();
    let mut loops = d.spawn_all(vec![job], rx);
    tokio::time::sleep(Duration::from_millis(10)).await;
    tx.send(true).unwrap();
    while let Some(res) = loops.join_next().await {
        res.unwrap();
    }

    assert_eq!(body.calls(), 1);
    assert!(start.elapsed() < Duration::from_secs(3_600));
}
