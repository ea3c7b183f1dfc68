use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{KeeperError, Result};
use crate::types::{ChainId, JobDefinition, ScheduledJob, SyncCategory};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Upper bound on blocks scanned by one sync cycle.
pub const DEFAULT_MAX_WINDOW_BLOCKS: u64 = 2_000;
/// Entities refetched per upstream request.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Top-level config (keeper.toml + KEEPER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeeperConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Per-network job lists.
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    /// Jobs that are not bound to a network.
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// When set, `POST /jobs/trigger` requires `Authorization: Bearer <token>`.
    #[serde(default)]
    pub trigger_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            trigger_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Where job outcomes are published.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MetricsSinkKind {
    /// Emit metrics as tracing events.
    #[default]
    Log,
    /// POST each metric as JSON to `webhook_url`.
    Webhook,
    /// Drop everything.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub sink: MetricsSinkKind,
    pub webhook_url: Option<String>,
    /// Prepended to every metric name, e.g. "keeper." → "keeper.pool-sync-ethereum.success".
    #[serde(default)]
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sink: MetricsSinkKind::Log,
            webhook_url: None,
            prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: ChainId,
    /// JSON-RPC endpoint used by the sync adapters.
    pub rpc_url: String,
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
    /// Sync pipelines; each one backs a job of the same name in `jobs`.
    #[serde(default)]
    pub sync: Vec<SyncJobConfig>,
}

/// Settings for one incremental sync pipeline on one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJobConfig {
    /// Name of the job in the chain's `jobs` list that runs this pipeline.
    pub job: String,
    pub category: SyncCategory,
    #[serde(default = "default_max_window_blocks")]
    pub max_window_blocks: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Contracts whose logs mark entities as changed. Empty means any address.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Log topic filter (topic0 alternatives).
    #[serde(default)]
    pub topics: Vec<String>,
    /// Calldata sent with `eth_call` to refetch an entity's state.
    pub call_data: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_max_window_blocks() -> u64 {
    DEFAULT_MAX_WINDOW_BLOCKS
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.keeper/keeper.db", home)
}

impl KeeperConfig {
    /// Load config from a TOML file with KEEPER_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.keeper/keeper.toml
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("KEEPER_").split("_")),
        )
    }

    /// Parse config from an in-memory TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: KeeperConfig = figment
            .extract()
            .map_err(|e| KeeperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject definitions the dispatcher cannot run.
    pub fn validate(&self) -> Result<()> {
        let mut chain_ids = HashSet::new();
        for chain in &self.chains {
            if !chain_ids.insert(&chain.id) {
                return Err(KeeperError::Config(format!(
                    "chain {} is configured twice",
                    chain.id
                )));
            }
            validate_jobs(&chain.jobs)?;
            let mut piped = HashSet::new();
            for sync in &chain.sync {
                if !piped.insert(sync.job.as_str()) {
                    return Err(invalid(
                        &sync.job,
                        &format!("has two sync pipelines on {}", chain.id),
                    ));
                }
                let Some(def) = chain.jobs.iter().find(|j| j.name == sync.job) else {
                    return Err(KeeperError::Config(format!(
                        "sync pipeline on {} references unknown job {}",
                        chain.id, sync.job
                    )));
                };
                if !def.chain_scoped {
                    return Err(invalid(&sync.job, "sync jobs must be chain-scoped"));
                }
                if sync.max_window_blocks == 0 {
                    return Err(invalid(&sync.job, "max_window_blocks must be at least 1"));
                }
                if sync.batch_size == 0 {
                    return Err(invalid(&sync.job, "batch_size must be at least 1"));
                }
            }
        }
        self.validate_sync_coverage()?;
        validate_jobs(&self.jobs)?;
        if let Some(job) = self.jobs.iter().find(|j| j.chain_scoped) {
            return Err(invalid(
                &job.name,
                "top-level jobs must set chain_scoped = false",
            ));
        }
        Ok(())
    }

    /// A job backed by a sync pipeline on one chain is only runnable on chains
    /// that configure a pipeline for it too.
    fn validate_sync_coverage(&self) -> Result<()> {
        let synced: HashSet<&str> = self
            .chains
            .iter()
            .flat_map(|c| c.sync.iter().map(|s| s.job.as_str()))
            .collect();
        for chain in &self.chains {
            for job in &chain.jobs {
                let name = job.name.as_str();
                if synced.contains(name) && !chain.sync.iter().any(|s| s.job == name) {
                    return Err(invalid(
                        name,
                        &format!("no sync pipeline configured on {}", chain.id),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Flatten per-chain and global jobs into the list the dispatcher runs.
    pub fn scheduled_jobs(&self) -> Vec<ScheduledJob> {
        let mut out: Vec<ScheduledJob> = self
            .chains
            .iter()
            .flat_map(|chain| {
                chain.jobs.iter().map(|def| ScheduledJob {
                    definition: def.clone(),
                    chain: Some(chain.id.clone()),
                })
            })
            .collect();
        out.extend(self.jobs.iter().map(|def| ScheduledJob {
            definition: def.clone(),
            chain: None,
        }));
        out
    }

    pub fn chain(&self, id: &ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| &c.id == id)
    }
}

fn validate_jobs(jobs: &[JobDefinition]) -> Result<()> {
    let mut names = HashSet::new();
    for job in jobs {
        if job.name.is_empty() {
            return Err(invalid("<empty>", "name must not be empty"));
        }
        if !names.insert(job.name.as_str()) {
            return Err(invalid(&job.name, "defined twice in the same list"));
        }
        if job.cadence_ms == 0 {
            return Err(invalid(&job.name, "cadence_ms must be positive"));
        }
        if job.timeout_ms == 0 {
            return Err(invalid(&job.name, "timeout_ms must be positive"));
        }
    }
    Ok(())
}

fn invalid(name: &str, reason: &str) -> KeeperError {
    KeeperError::InvalidJob {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.keeper/keeper.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CadencePolicy;

    const SAMPLE: &str = r#"
        [gateway]
        port = 9000

        [metrics]
        sink = "webhook"
        webhook_url = "http://localhost:9100/metrics"
        prefix = "keeper."

        [[chains]]
        id = "ethereum"
        rpc_url = "http://localhost:8545"

        [[chains.jobs]]
        name = "pool-sync"
        cadence_ms = 60000
        timeout_ms = 45000

        [[chains.jobs]]
        name = "staking-sync"
        cadence_ms = 300000
        timeout_ms = 120000
        policy = "fixed_delay"

        [[chains.sync]]
        job = "pool-sync"
        category = "pools"
        topics = ["0x1c411e9a96e071241c2f21f7726b17ae89e3cab4c78be50e062b03a9fffbbad1"]
        call_data = "0x0902f1ac"

        [[jobs]]
        name = "price-refresh"
        cadence_ms = 30000
        timeout_ms = 20000
        chain_scoped = false
    "#;

    #[test]
    fn parses_full_sample() {
        let config = KeeperConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.bind, DEFAULT_BIND);
        assert_eq!(config.metrics.sink, MetricsSinkKind::Webhook);
        assert_eq!(config.chains.len(), 1);

        let chain = &config.chains[0];
        assert_eq!(chain.jobs[1].policy, CadencePolicy::FixedDelay);
        assert_eq!(chain.sync[0].category, SyncCategory::Pools);
        assert_eq!(chain.sync[0].max_window_blocks, DEFAULT_MAX_WINDOW_BLOCKS);
        assert_eq!(chain.sync[0].batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn scheduled_jobs_flattens_chains_and_globals() {
        let config = KeeperConfig::from_toml_str(SAMPLE).unwrap();
        let keys: Vec<String> = config
            .scheduled_jobs()
            .iter()
            .map(|j| j.run_key().to_string())
            .collect();
        assert_eq!(
            keys,
            vec!["pool-sync-ethereum", "staking-sync-ethereum", "price-refresh"]
        );
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = KeeperConfig::from_toml_str("").unwrap();
        assert_eq!(config.gateway.port, DEFAULT_PORT);
        assert!(config.scheduled_jobs().is_empty());
    }

    #[test]
    fn rejects_sync_for_unknown_job() {
        let toml = r#"
            [[chains]]
            id = "ethereum"
            rpc_url = "http://localhost:8545"

            [[chains.sync]]
            job = "missing"
            category = "pools"
            call_data = "0x"
        "#;
        let err = KeeperConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("unknown job missing"));
    }

    #[test]
    fn rejects_synced_job_without_pipeline_on_its_chain() {
        let toml = r#"
            [[chains]]
            id = "ethereum"
            rpc_url = "http://localhost:8545"

            [[chains.jobs]]
            name = "pool-sync"
            cadence_ms = 60000
            timeout_ms = 45000

            [[chains.sync]]
            job = "pool-sync"
            category = "pools"
            call_data = "0x0902f1ac"

            [[chains]]
            id = "polygon"
            rpc_url = "http://localhost:8546"

            [[chains.jobs]]
            name = "pool-sync"
            cadence_ms = 60000
            timeout_ms = 45000
        "#;
        let err = KeeperConfig::from_toml_str(toml).unwrap_err();
        assert_eq!(err.code(), "INVALID_JOB");
        assert!(err.to_string().contains("no sync pipeline configured on polygon"));
    }

    #[test]
    fn rejects_two_pipelines_for_one_job() {
        let toml = r#"
            [[chains]]
            id = "ethereum"
            rpc_url = "http://localhost:8545"

            [[chains.jobs]]
            name = "pool-sync"
            cadence_ms = 60000
            timeout_ms = 45000

            [[chains.sync]]
            job = "pool-sync"
            category = "pools"
            call_data = "0x0902f1ac"

            [[chains.sync]]
            job = "pool-sync"
            category = "staking"
            call_data = "0x0902f1ac"
        "#;
        let err = KeeperConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("two sync pipelines on ethereum"));
    }

    #[test]
    fn rejects_zero_cadence() {
        let toml = r#"
            [[jobs]]
            name = "broken"
            cadence_ms = 0
            timeout_ms = 10
            chain_scoped = false
        "#;
        let err = KeeperConfig::from_toml_str(toml).unwrap_err();
        assert_eq!(err.code(), "INVALID_JOB");
    }

    #[test]
    fn rejects_duplicate_chain() {
        let toml = r#"
            [[chains]]
            id = "ethereum"
            rpc_url = "a"

            [[chains]]
            id = "ethereum"
            rpc_url = "b"
        "#;
        assert!(KeeperConfig::from_toml_str(toml).is_err());
    }
}
