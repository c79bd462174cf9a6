//! Replica configuration
//!
//! Everything here is plain serde data so a deployment can describe its replicas in a
//! JSON file. Durations are given in milliseconds.

use crate::chain::Chain;
use crate::errors::ReplicaError;
use crate::pools::{IntegralConfig, LbPairConfig, PoolKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const INITIAL_BACKOFF_MS: u64 = 1000;
pub const MAX_BACKOFF_MS: u64 = 60_000;
pub const JITTER_MS: u64 = 100;
pub const ESCALATE_AFTER: u32 = 5;

/// Retry schedule of a degraded replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Upper bound of the random delay added to every backoff
    pub jitter_ms: u64,
    /// Failed attempts after which failures are logged as errors
    pub escalate_after: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            jitter_ms: JITTER_MS,
            escalate_after: ESCALATE_AFTER,
        }
    }
}

impl RetryConfig {
    /// Delay before the next try once `attempt` tries have failed
    ///
    /// Doubles from `initial_backoff_ms`, capped at `max_backoff_ms`, plus up to
    /// `jitter_ms` of random delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let base = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_backoff_ms);
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            fastrand::u64(0..=self.jitter_ms)
        };
        Duration::from_millis(base.saturating_add(jitter))
    }
}

/// Controller settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub retry: RetryConfig,
    /// Abandon an authoritative build after this long, unbounded when unset
    pub build_timeout_ms: Option<u64>,
}

impl SyncConfig {
    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout_ms.map(Duration::from_millis)
    }
}

/// One replicated pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolConfig {
    #[serde(rename = "trader_joe_v2_1")]
    TraderJoeV21(LbPairConfig),
    Integral(IntegralConfig),
}

impl PoolConfig {
    pub fn kind(&self) -> PoolKind {
        match self {
            PoolConfig::TraderJoeV21(_) => PoolKind::TraderJoeV21,
            PoolConfig::Integral(_) => PoolKind::Integral,
        }
    }
}

/// Top level configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub chain: Chain,
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl ReplicaConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReplicaError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ReplicaError> {
        let config: ReplicaConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Every pool kind must exist on the chain and retries must make progress
    pub fn validate(&self) -> Result<(), ReplicaError> {
        for pool in &self.pools {
            if !self.chain.supported(&pool.kind()) {
                return Err(ReplicaError::UnsupportedPoolType {
                    kind: pool.kind().to_string(),
                    chain: self.chain.to_string(),
                });
            }
            if let PoolConfig::TraderJoeV21(pair) = pool {
                if pair.max_bins == 0 {
                    return Err(ReplicaError::InvalidConfig(format!(
                        "pair {} reads no bins",
                        pair.pair
                    )));
                }
            }
        }
        let retry = &self.sync.retry;
        if retry.initial_backoff_ms == 0 || retry.max_backoff_ms < retry.initial_backoff_ms {
            return Err(ReplicaError::InvalidConfig(format!(
                "retry backoff must grow from a non zero start, got {}ms..{}ms",
                retry.initial_backoff_ms, retry.max_backoff_ms
            )));
        }
        Ok(())
    }
}
