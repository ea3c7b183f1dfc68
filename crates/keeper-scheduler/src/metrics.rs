//! Metrics sinks. Publishing is best-effort: the emitter spawns the call and
//! only logs failures.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::error::MetricsError;

/// Destination for `name[=value]` metric points.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, name: &str, value: Option<f64>) -> Result<(), MetricsError>;
}

/// Emits each metric as an `info` tracing event.
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, name: &str, value: Option<f64>) -> Result<(), MetricsError> {
        match value {
            Some(v) => info!(metric = %name, value = v, "metric"),
            None => info!(metric = %name, "metric"),
        }
        Ok(())
    }
}

/// Drops every metric.
pub struct NullSink;

#[async_trait]
impl MetricsSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    async fn publish(&self, _name: &str, _value: Option<f64>) -> Result<(), MetricsError> {
        Ok(())
    }
}

/// POSTs `{"name", "value", "ts"}` JSON to a collector endpoint.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

/// Per-request budget so a stuck collector cannot pile up publish tasks.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

impl WebhookSink {
    pub fn new(url: &str) -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl MetricsSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(&self, name: &str, value: Option<f64>) -> Result<(), MetricsError> {
        let body = json!({
            "name": name,
            "value": value,
            "ts": chrono::Utc::now().to_rfc3339(),
        });
        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
