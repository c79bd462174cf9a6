//! ReplicaSet Builder Implementation
//!
//! This module provides a builder pattern for constructing a ReplicaSet, allowing for
//! flexible configuration of the pools to replicate and the chain they live on.

use crate::config::{PoolConfig, ReplicaConfig, SyncConfig};
use crate::controller::{Replica, SyncController};
use crate::errors::ReplicaError;
use crate::pools::{IntegralPool, TraderJoeV21Pool};
use crate::reader::StateReader;
use crate::replica_set::ReplicaSet;
use crate::Chain;
use std::sync::Arc;

/// Builder for constructing a ReplicaSet
#[derive(Default)]
pub struct ReplicaBuilder {
    /// The pools to replicate, in registration order
    pools: Vec<PoolConfig>,
    /// The chain the pools live on
    chain: Option<Chain>,
    /// Controller settings shared by every replica
    sync: SyncConfig,
}

impl ReplicaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration file
    pub fn from_config(config: ReplicaConfig) -> Self {
        Self {
            pools: config.pools,
            chain: Some(config.chain),
            sync: config.sync,
        }
    }

    /// Adds a pool to be replicated
    /// The builder instance for method chaining
    pub fn add_pool(mut self, pool: PoolConfig) -> Self {
        self.pools.push(pool);
        self
    }

    /// Add multiple pools to be replicated
    pub fn add_pools(mut self, pools: &[PoolConfig]) -> Self {
        self.pools.extend_from_slice(pools);
        self
    }

    /// Sets the chain the pools live on
    /// The builder instance for method chaining
    pub fn chain(mut self, chain: Chain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Set the retry and timeout policy of every replica
    pub fn sync_config(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Consumes the builder and produces one controller per pool, reading through `reader`
    pub fn build(self, reader: Arc<dyn StateReader>) -> Result<ReplicaSet, ReplicaError> {
        // Ensure the chain is set
        let chain = self.chain.ok_or(ReplicaError::ChainNotSet)?;

        // Ensure all the pools are supported and the settings hold up
        let config = ReplicaConfig {
            chain,
            pools: self.pools,
            sync: self.sync,
        };
        config.validate()?;

        let replicas = config
            .pools
            .into_iter()
            .map(|pool| -> Arc<dyn Replica> {
                match pool {
                    PoolConfig::TraderJoeV21(pair) => Arc::new(SyncController::new(
                        TraderJoeV21Pool::new(pair),
                        reader.clone(),
                        config.sync.clone(),
                    )),
                    PoolConfig::Integral(relayer) => Arc::new(SyncController::new(
                        IntegralPool::new(relayer),
                        reader.clone(),
                        config.sync.clone(),
                    )),
                }
            })
            .collect();

        Ok(ReplicaSet::new(chain, replicas))
    }
}
