//! Chain Support and Pool Kind Management
//!
//! This module defines the supported blockchain networks (Chains) and manages
//! the mapping of replicable pool kinds for each chain.

use crate::PoolKind;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

/// Enum representing supported blockchain networks
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Ethereum mainnet
    Ethereum,
    /// Arbitrum One
    Arbitrum,
    /// Avalanche C-Chain
    Avalanche,
    /// BNB Smart Chain
    Bsc,
}

/// Static mapping of supported pool kinds for each chain
///
/// Not every protocol is deployed on every chain, a replica for a kind that
/// does not exist on its chain is a configuration error.
static CHAIN_POOLS: LazyLock<HashMap<Chain, HashSet<PoolKind>>> = LazyLock::new(|| {
    let mut m = HashMap::new();

    m.insert(
        Chain::Ethereum,
        [PoolKind::TraderJoeV21, PoolKind::Integral]
            .iter()
            .cloned()
            .collect(),
    );
    m.insert(
        Chain::Arbitrum,
        [PoolKind::TraderJoeV21, PoolKind::Integral]
            .iter()
            .cloned()
            .collect(),
    );
    m.insert(
        Chain::Avalanche,
        [PoolKind::TraderJoeV21].iter().cloned().collect(),
    );
    m.insert(Chain::Bsc, [PoolKind::TraderJoeV21].iter().cloned().collect());

    m
});

impl Chain {
    /// Determines if a given pool kind is supported on this chain
    pub fn supported(&self, kind: &PoolKind) -> bool {
        CHAIN_POOLS
            .get(self)
            .map(|pools| pools.contains(kind))
            .unwrap_or(false)
    }

    /// EIP-155 chain id
    pub fn id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Arbitrum => 42161,
            Chain::Avalanche => 43114,
            Chain::Bsc => 56,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
