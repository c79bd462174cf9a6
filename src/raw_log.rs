//! Logs as delivered to the replica and the provenance carried by decoded events

use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::Log;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A log exactly as the delivery collaborator hands it over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
}

impl RawLog {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }

    pub fn position(&self) -> LogPosition {
        LogPosition {
            block_number: self.block_number,
            log_index: self.log_index,
            transaction_hash: self.transaction_hash,
        }
    }

    pub fn provenance(&self) -> Provenance {
        self.position()
    }
}

/// Where a log sits in chain history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
}

impl LogPosition {
    /// Chain order, ignoring the transaction hash
    pub fn order(&self, other: &LogPosition) -> Ordering {
        (self.block_number, self.log_index).cmp(&(other.block_number, other.log_index))
    }
}

/// Provenance of a decoded event, used for ordering and duplicate detection
pub type Provenance = LogPosition;

/// A typed event along with the position of the log it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent<E> {
    pub event: E,
    pub provenance: Provenance,
}

/// Conversion errors for RPC logs that are not yet part of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LogConversionError {
    #[error("Log is missing its {0}")]
    Missing(&'static str),
}

impl TryFrom<&Log> for RawLog {
    type Error = LogConversionError;

    fn try_from(log: &Log) -> Result<Self, Self::Error> {
        Ok(RawLog {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log
                .block_number
                .ok_or(LogConversionError::Missing("block number"))?,
            log_index: log.log_index.ok_or(LogConversionError::Missing("log index"))?,
            transaction_hash: log
                .transaction_hash
                .ok_or(LogConversionError::Missing("transaction hash"))?,
        })
    }
}
