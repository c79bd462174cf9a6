//! Subscription descriptors and the registry routing delivered logs to replicas
//!
//! A descriptor is built once from a pool's configuration and never changes: the
//! addresses of a pool do not move. The registry is what a log delivery loop uses to
//! build its filter and to decide which replicas see a given log.

use crate::raw_log::RawLog;
use alloy::primitives::{Address, B256};
use alloy::rpc::types::Filter;
use std::collections::HashMap;
use std::hash::Hash;

/// One watched contract, optionally narrowed to a set of event signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub address: Address,
    /// Empty means every topic emitted by `address`
    pub topics: Vec<B256>,
}

impl SubscriptionFilter {
    pub fn all(address: Address) -> Self {
        Self {
            address,
            topics: Vec::new(),
        }
    }

    pub fn topics(address: Address, topics: impl IntoIterator<Item = B256>) -> Self {
        Self {
            address,
            topics: topics.into_iter().collect(),
        }
    }

    pub fn matches(&self, log: &RawLog) -> bool {
        if log.address != self.address {
            return false;
        }
        self.topics.is_empty()
            || log
                .topic0()
                .map(|topic| self.topics.contains(topic))
                .unwrap_or(false)
    }
}

/// The set of addresses and topics a single replica must receive logs for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDescriptor {
    filters: Vec<SubscriptionFilter>,
}

impl SubscriptionDescriptor {
    pub fn new(filters: Vec<SubscriptionFilter>) -> Self {
        Self { filters }
    }

    pub fn filters(&self) -> &[SubscriptionFilter] {
        &self.filters
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.filters.iter().map(|filter| filter.address)
    }

    pub fn matches(&self, log: &RawLog) -> bool {
        self.filters.iter().any(|filter| filter.matches(log))
    }
}

/// Routes logs to every replica whose descriptor matches
#[derive(Debug, Default)]
pub struct SubscriptionRegistry<K> {
    descriptors: Vec<(K, SubscriptionDescriptor)>,
    by_address: HashMap<Address, Vec<usize>>,
}

impl<K: Clone + Eq + Hash> SubscriptionRegistry<K> {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            by_address: HashMap::new(),
        }
    }

    /// Register a replica under `key`
    pub fn register(&mut self, key: K, descriptor: SubscriptionDescriptor) {
        let slot = self.descriptors.len();
        for address in descriptor.addresses() {
            let slots = self.by_address.entry(address).or_default();
            if !slots.contains(&slot) {
                slots.push(slot);
            }
        }
        self.descriptors.push((key, descriptor));
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Keys of the replicas that want this log
    pub fn route<'a>(&'a self, log: &'a RawLog) -> impl Iterator<Item = &'a K> + 'a {
        self.by_address
            .get(&log.address)
            .into_iter()
            .flatten()
            .filter_map(move |slot| {
                let (key, descriptor) = &self.descriptors[*slot];
                descriptor.matches(log).then_some(key)
            })
    }

    /// Every watched address, deduplicated
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.by_address.keys().copied().collect();
        addresses.sort();
        addresses
    }

    /// An `eth_getLogs` filter covering every registered replica
    ///
    /// Topic narrowing is applied by `route`, the node filter only narrows by address.
    pub fn filter(&self) -> Filter {
        Filter::new().address(self.addresses())
    }
}
