//! Event driven replicas of on-chain liquidity pool state
//!
//! Each replica keeps one pool's state in sync by applying the pool's logs one at a
//! time and falls back to reading the full state from the chain whenever the log
//! stream can no longer be trusted.

pub use builder::ReplicaBuilder;
pub use chain::Chain;
pub use config::{PoolConfig, ReplicaConfig, RetryConfig, SyncConfig};
pub use controller::{LogOutcome, Replica, Snapshot, SyncController, SyncPhase};
pub use pools::{PoolFamily, PoolKind, Transition};
pub use raw_log::{DecodedEvent, LogPosition, Provenance, RawLog};
pub use reader::{ReadCall, RpcStateReader, StateReader};
pub use reducer::{reduce, Reduction};
pub use replica_set::ReplicaSet;
pub use subscription::{SubscriptionDescriptor, SubscriptionFilter, SubscriptionRegistry};

mod builder;
mod chain;
pub mod codec;
mod config;
mod controller;
pub mod errors;
pub mod onchain;
pub mod pools;
mod raw_log;
pub mod reader;
mod reducer;
mod replica_set;
mod subscription;
