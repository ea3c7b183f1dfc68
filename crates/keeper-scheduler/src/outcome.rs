use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keeper_core::RunKey;
use serde::Serialize;
use tracing::{info, warn};

use crate::metrics::MetricsSink;
use crate::stats::JobStats;

/// How a single tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The run key was already active; nothing ran.
    Skipped,
    Succeeded,
    /// The body returned an error or panicked.
    Errored,
    /// The deadline fired before the body settled.
    TimedOut,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::Errored => "errored",
            OutcomeStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one dispatcher tick for one run key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub duration: Duration,
    /// Entities touched, when the body succeeded.
    pub touched: Option<u64>,
    pub error: Option<String>,
}

impl Outcome {
    pub fn skipped() -> Self {
        Self {
            status: OutcomeStatus::Skipped,
            duration: Duration::ZERO,
            touched: None,
            error: None,
        }
    }

    pub fn succeeded(duration: Duration, touched: u64) -> Self {
        Self {
            status: OutcomeStatus::Succeeded,
            duration,
            touched: Some(touched),
            error: None,
        }
    }

    pub fn errored(duration: Duration, error: String) -> Self {
        Self {
            status: OutcomeStatus::Errored,
            duration,
            touched: None,
            error: Some(error),
        }
    }

    pub fn timed_out(duration: Duration, timeout: Duration) -> Self {
        Self {
            status: OutcomeStatus::TimedOut,
            duration,
            touched: None,
            error: Some(format!("timed out after {}ms", timeout.as_millis())),
        }
    }
}

/// Reports every tick outcome to the stats tracker, the log and the metrics sink.
#[derive(Clone)]
pub struct OutcomeEmitter {
    sink: Arc<dyn MetricsSink>,
    stats: Arc<JobStats>,
    prefix: String,
}

impl OutcomeEmitter {
    pub fn new(sink: Arc<dyn MetricsSink>, stats: Arc<JobStats>, prefix: &str) -> Self {
        Self {
            sink,
            stats,
            prefix: prefix.to_string(),
        }
    }

    pub fn stats(&self) -> &Arc<JobStats> {
        &self.stats
    }

    /// Metric points published for `outcome`: a counter named after the
    /// status, plus the duration for anything that actually ran.
    pub fn metric_points(&self, key: &RunKey, outcome: &Outcome) -> Vec<(String, Option<f64>)> {
        let mut points = vec![(
            format!("{}{}.{}", self.prefix, key, outcome.status),
            Some(1.0),
        )];
        if outcome.status != OutcomeStatus::Skipped {
            points.push((
                format!("{}{}.duration_ms", self.prefix, key),
                Some(outcome.duration.as_millis() as f64),
            ));
        }
        points
    }

    /// Record and publish `outcome`. Never blocks on the sink.
    pub fn emit(&self, key: &RunKey, outcome: &Outcome) {
        self.stats.record(key, outcome);

        let duration_ms = outcome.duration.as_millis() as u64;
        match outcome.status {
            OutcomeStatus::Skipped => {
                info!(run_key = %key, "job skipped: previous run still active")
            }
            OutcomeStatus::Succeeded => info!(
                run_key = %key,
                duration_ms,
                touched = outcome.touched.unwrap_or_default(),
                "job succeeded"
            ),
            OutcomeStatus::Errored => warn!(
                run_key = %key,
                duration_ms,
                error = outcome.error.as_deref().unwrap_or_default(),
                "job failed"
            ),
            OutcomeStatus::TimedOut => warn!(run_key = %key, duration_ms, "job timed out"),
        }

        let points = self.metric_points(key, outcome);
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            for (name, value) in points {
                if let Err(e) = sink.publish(&name, value).await {
                    warn!(sink = %sink.name(), metric = %name, error = %e, "metric publish failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetricsError;
    use crate::metrics::NullSink;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        points: Mutex<Vec<(String, Option<f64>)>>,
    }

    #[async_trait]
    impl MetricsSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn publish(&self, name: &str, value: Option<f64>) -> Result<(), MetricsError> {
            self.points.lock().unwrap().push((name.to_string(), value));
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl MetricsSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        async fn publish(&self, _name: &str, _value: Option<f64>) -> Result<(), MetricsError> {
            Err(MetricsError::Unavailable("collector down".into()))
        }
    }

    #[test]
    fn skip_publishes_counter_only() {
        let emitter = OutcomeEmitter::new(Arc::new(NullSink), JobStats::new(), "keeper.");
        let points = emitter.metric_points(&RunKey::global("price-refresh"), &Outcome::skipped());
        assert_eq!(points, vec![("keeper.price-refresh.skipped".to_string(), Some(1.0))]);
    }

    #[test]
    fn success_publishes_counter_and_duration() {
        let emitter = OutcomeEmitter::new(Arc::new(NullSink), JobStats::new(), "");
        let outcome = Outcome::succeeded(Duration::from_millis(250), 3);
        let points = emitter.metric_points(&RunKey::global("pool-sync-ethereum"), &outcome);
        assert_eq!(
            points,
            vec![
                ("pool-sync-ethereum.succeeded".to_string(), Some(1.0)),
                ("pool-sync-ethereum.duration_ms".to_string(), Some(250.0)),
            ]
        );
    }

    #[tokio::test]
    async fn emit_reaches_sink_and_stats() {
        let sink = Arc::new(RecordingSink::default());
        let stats = JobStats::new();
        let emitter = OutcomeEmitter::new(sink.clone(), Arc::clone(&stats), "");
        let key = RunKey::global("staking-sync-ethereum");

        emitter.emit(&key, &Outcome::timed_out(Duration::from_millis(1_000), Duration::from_millis(1_000)));
        // Publishing runs on a spawned task.
        for _ in 0..10 {
            if sink.points.lock().unwrap().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let points = sink.points.lock().unwrap().clone();
        assert_eq!(points[0].0, "staking-sync-ethereum.timed_out");
        assert_eq!(stats.get(&key).unwrap().timed_out, 1);
    }

    #[tokio::test]
    async fn failing_sink_is_contained() {
        let stats = JobStats::new();
        let emitter = OutcomeEmitter::new(Arc::new(BrokenSink), Arc::clone(&stats), "");
        let key = RunKey::global("pool-sync-polygon");
        emitter.emit(&key, &Outcome::errored(Duration::from_millis(5), "rpc down".into()));
        tokio::task::yield_now().await;
        assert_eq!(stats.get(&key).unwrap().errored, 1);
    }
}
