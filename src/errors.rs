//! Replica Error Types
//!
//! This module defines the error types used throughout the replica. Most of them never
//! reach a reader of pool state: decode and semantic failures are turned into a rebuild
//! by the controller, and rebuild failures into a degraded phase with retries.

use std::time::Duration;
use thiserror::Error;

/// A log matched a known event signature but its payload could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The ABI payload or topics do not match the event layout
    #[error("Malformed {event} log: {reason}")]
    Malformed { event: &'static str, reason: String },

    /// Packed values are at most one 256 bit word
    #[error("Packed value is {0} bytes wide, expected at most 32")]
    PackedTooWide(usize),
}

/// Why the reducer refused to produce a next state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("Decode failure: {0}")]
    DecodeFailure(#[from] DecodeError),

    /// The event decoded fine but violates an invariant of its transition
    #[error("Semantic failure: {0}")]
    SemanticFailure(String),
}

/// Failures of the batched on-chain read collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// Represents errors that occur when interacting with the blockchain provider
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// The node has not reached the height we asked for
    #[error("Node is at block {latest}, requested block {requested}")]
    StaleNode { requested: u64, latest: u64 },

    /// One call of the batch reverted, the whole batch is discarded
    #[error("Call {index} to {target} reverted: {reason}")]
    Reverted {
        index: usize,
        target: String,
        reason: String,
    },

    #[error("Batch returned {got} results for {expected} calls")]
    ResultCount { expected: usize, got: usize },
}

/// Failures of the authoritative state builder
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RebuildError {
    #[error("Read failed: {0}")]
    Read(#[from] ReadError),

    #[error("Failed to decode {call} result: {reason}")]
    ReturnDecode { call: &'static str, reason: String },

    /// The chain reports something that contradicts the replica configuration
    #[error("Configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// The reads succeeded but do not describe a coherent pool
    #[error("Inconsistent on-chain state: {0}")]
    Inconsistent(String),

    #[error("Build timed out after {0:?}")]
    Timeout(Duration),
}

/// The reason a controller left the synced phase
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncFault {
    #[error("Decode failure at block {block}: {error}")]
    DecodeFailure { block: u64, error: DecodeError },

    #[error("Semantic failure at block {block}: {reason}")]
    SemanticFailure { block: u64, reason: String },

    /// A log arrived behind the replica's position, a predecessor was missed or the chain reorged
    #[error("Ordering anomaly: log at {got_block}/{got_index} behind {last_block}/{last_index}")]
    OrderingAnomaly {
        last_block: u64,
        last_index: u64,
        got_block: u64,
        got_index: u64,
    },

    /// An external watchdog or a removed log asked for a resync
    #[error("Invalidated: {0}")]
    Invalidated(String),

    #[error("Rebuild failure: {0}")]
    RebuildFailure(#[from] RebuildError),
}

impl SyncFault {
    pub(crate) fn from_reject(block: u64, reason: RejectReason) -> Self {
        match reason {
            RejectReason::DecodeFailure(error) => SyncFault::DecodeFailure { block, error },
            RejectReason::SemanticFailure(reason) => SyncFault::SemanticFailure { block, reason },
        }
    }
}

/// Enumerates the errors of constructing and configuring replicas
#[derive(Error, Debug)]
pub enum ReplicaError {
    /// Represents I/O errors that may occur while reading configuration
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Represents errors that occur during JSON deserialization of configuration
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Indicates that the pool kind is not deployed on the configured chain
    #[error("Pool kind {kind} not supported on {chain}")]
    UnsupportedPoolType { kind: String, chain: String },

    /// Indicates that the chain was not set when it was required
    #[error("Chain not set")]
    ChainNotSet,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
