use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Network identifier used to scope jobs and checkpoints (e.g. "ethereum").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub String);

impl ChainId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ChainId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How the next tick of a job is armed once the current one finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadencePolicy {
    /// Next tick fires `cadence` after this tick completed.
    FixedDelay,
    /// Next tick fires `cadence` after this tick started; slow runs shrink the gap.
    #[default]
    MinimumInterval,
}

impl CadencePolicy {
    /// Delay to wait after a tick that took `elapsed` to complete.
    pub fn next_delay(&self, cadence: Duration, elapsed: Duration) -> Duration {
        match self {
            CadencePolicy::FixedDelay => cadence,
            CadencePolicy::MinimumInterval => cadence.saturating_sub(elapsed),
        }
    }
}

impl fmt::Display for CadencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CadencePolicy::FixedDelay => write!(f, "fixed_delay"),
            CadencePolicy::MinimumInterval => write!(f, "minimum_interval"),
        }
    }
}

/// Static description of a recurring job. Loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Handler lookup name, unique within the registry.
    pub name: String,
    /// Target gap between ticks, in milliseconds.
    pub cadence_ms: u64,
    /// Deadline for a single execution, in milliseconds.
    pub timeout_ms: u64,
    /// When true, one loop runs per configured chain.
    #[serde(default = "bool_true")]
    pub chain_scoped: bool,
    #[serde(default)]
    pub policy: CadencePolicy,
}

fn bool_true() -> bool {
    true
}

impl JobDefinition {
    pub fn new(name: &str, cadence_ms: u64, timeout_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            cadence_ms,
            timeout_ms,
            chain_scoped: true,
            policy: CadencePolicy::default(),
        }
    }

    pub fn global(mut self) -> Self {
        self.chain_scoped = false;
        self
    }

    pub fn with_policy(mut self, policy: CadencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Build the run key for this job on `chain`.
    ///
    /// Non chain-scoped jobs ignore the chain entirely.
    pub fn run_key(&self, chain: Option<&ChainId>) -> RunKey {
        match chain {
            Some(chain) if self.chain_scoped => RunKey::scoped(&self.name, chain),
            _ => RunKey::global(&self.name),
        }
    }
}

/// `job-chain` (or just `job`): identifies at most one concurrent execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunKey(String);

impl RunKey {
    pub fn scoped(job: &str, chain: &ChainId) -> Self {
        Self(format!("{}-{}", job, chain))
    }

    pub fn global(job: &str) -> Self {
        Self(job.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job definition bound to the chain it runs on (`None` for global jobs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub definition: JobDefinition,
    pub chain: Option<ChainId>,
}

impl ScheduledJob {
    pub fn run_key(&self) -> RunKey {
        self.definition.run_key(self.chain.as_ref())
    }
}

/// Kind of data a sync pipeline maintains; one checkpoint per category and chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCategory {
    Pools,
    Staking,
    Tokens,
}

impl SyncCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncCategory::Pools => "pools",
            SyncCategory::Staking => "staking",
            SyncCategory::Tokens => "tokens",
        }
    }
}

impl fmt::Display for SyncCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SyncCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pools" => Ok(SyncCategory::Pools),
            "staking" => Ok(SyncCategory::Staking),
            "tokens" => Ok(SyncCategory::Tokens),
            other => Err(format!("unknown sync category: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_category_string_round_trip() {
        for cat in [SyncCategory::Pools, SyncCategory::Staking, SyncCategory::Tokens] {
            assert_eq!(cat.as_str().parse::<SyncCategory>().unwrap(), cat);
        }
        assert!("prices".parse::<SyncCategory>().is_err());
    }

    #[test]
    fn run_key_joins_job_and_chain() {
        let def = JobDefinition::new("pool-sync", 60_000, 30_000);
        let key = def.run_key(Some(&ChainId::new("polygon")));
        assert_eq!(key.as_str(), "pool-sync-polygon");
    }

    #[test]
    fn global_job_ignores_chain() {
        let def = JobDefinition::new("price-refresh", 60_000, 30_000).global();
        assert_eq!(def.run_key(Some(&ChainId::new("ethereum"))).as_str(), "price-refresh");
        assert_eq!(def.run_key(None).as_str(), "price-refresh");
    }

    #[test]
    fn fixed_delay_ignores_elapsed() {
        let d = CadencePolicy::FixedDelay
            .next_delay(Duration::from_secs(10), Duration::from_secs(4));
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn minimum_interval_compresses_gap() {
        let policy = CadencePolicy::MinimumInterval;
        assert_eq!(
            policy.next_delay(Duration::from_secs(10), Duration::from_secs(4)),
            Duration::from_secs(6)
        );
        // A run slower than the cadence re-arms immediately.
        assert_eq!(
            policy.next_delay(Duration::from_secs(10), Duration::from_secs(15)),
            Duration::ZERO
        );
    }

    #[test]
    fn definition_defaults_from_toml_shape() {
        let def: JobDefinition =
            serde_json::from_str(r#"{"name":"x","cadence_ms":1000,"timeout_ms":500}"#).unwrap();
        assert!(def.chain_scoped);
        assert_eq!(def.policy, CadencePolicy::MinimumInterval);
    }
}
