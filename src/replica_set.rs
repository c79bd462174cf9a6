//! The set of replicas fed by one log stream

use crate::chain::Chain;
use crate::controller::{LogOutcome, Replica, SyncPhase};
use crate::errors::SyncFault;
use crate::raw_log::RawLog;
use crate::subscription::SubscriptionRegistry;
use alloy::rpc::types::Filter;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// Every replica of a chain plus the registry routing logs to them
pub struct ReplicaSet {
    chain: Chain,
    replicas: Vec<Arc<dyn Replica>>,
    registry: SubscriptionRegistry<usize>,
}

impl ReplicaSet {
    pub fn new(chain: Chain, replicas: Vec<Arc<dyn Replica>>) -> Self {
        let mut registry = SubscriptionRegistry::new();
        for (index, replica) in replicas.iter().enumerate() {
            registry.register(index, replica.subscription().clone());
        }
        Self {
            chain,
            replicas,
            registry,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn replicas(&self) -> &[Arc<dyn Replica>] {
        &self.replicas
    }

    pub fn registry(&self) -> &SubscriptionRegistry<usize> {
        &self.registry
    }

    /// `eth_getLogs` filter covering every replica
    pub fn filter(&self) -> Filter {
        self.registry.filter()
    }

    /// Cold start every replica concurrently
    ///
    /// Pools are independent: a replica that fails to build keeps retrying on its own
    /// while the others serve.
    pub async fn initialize(&self) -> Vec<Result<(), SyncFault>> {
        let results = join_all(self.replicas.iter().map(|replica| replica.initialize())).await;
        let synced = results.iter().filter(|result| result.is_ok()).count();
        info!(chain = %self.chain, synced, total = self.replicas.len(), "Replicas initialized");
        results
    }

    /// Hand a log to every replica subscribed to it
    pub fn dispatch(&self, log: &RawLog) -> Vec<(usize, LogOutcome)> {
        self.registry
            .route(log)
            .map(|index| (*index, self.replicas[*index].on_log(log)))
            .collect()
    }

    /// A log was removed by a reorg, every replica that could have applied it resyncs
    pub fn reorged(&self, log: &RawLog) {
        for index in self.registry.route(log) {
            let replica = &self.replicas[*index];
            warn!(
                pool = replica.name(),
                block = log.block_number,
                index = log.log_index,
                "Log removed by reorg"
            );
            replica.invalidate("log removed by reorg");
        }
    }

    pub fn phases(&self) -> Vec<(String, SyncPhase)> {
        self.replicas
            .iter()
            .map(|replica| (replica.name().to_string(), replica.phase()))
            .collect()
    }

    pub fn shutdown(&self) {
        for replica in &self.replicas {
            replica.shutdown();
        }
    }
}
