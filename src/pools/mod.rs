//! Core definitions for replicated pool families
//!
//! A pool family knows three things about its contracts: how to decode their logs into a
//! closed set of typed events, how each event moves the family's state, and how to read
//! the same state directly from the chain at a given block. Everything else (ordering,
//! commits, recovery) is family agnostic and lives in the controller.

use crate::errors::{DecodeError, RebuildError};
use crate::raw_log::RawLog;
use crate::reader::StateReader;
use crate::subscription::SubscriptionDescriptor;
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod integral;
pub mod trader_joe;

pub use integral::{IntegralConfig, IntegralEvent, IntegralPool, IntegralPoolState};
pub use trader_joe::{LbPairConfig, LbPairEvent, LbPairState, TraderJoeV21Pool};

/// Enumerates the replicable pool kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    TraderJoeV21,
    Integral,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Outcome of applying one event to a state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<S> {
    /// The event moved the state
    Next(S),
    /// The event carries nothing the replica tracks
    NoOp,
    /// The event contradicts the state it is applied to
    Invalid(String),
}

#[cfg(test)]
impl<S> Transition<S> {
    pub fn is_noop(&self) -> bool {
        matches!(self, Transition::NoOp)
    }
}

/// Shorthand for building `Transition::Invalid` out of a failed checked operation
pub(crate) fn invalid<S>(reason: impl Into<String>) -> Transition<S> {
    Transition::Invalid(reason.into())
}

/// Decode `log` as event `E`, naming the event in the error
pub(crate) fn decode_event<E: SolEvent>(name: &'static str, log: &RawLog) -> Result<E, DecodeError> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data).map_err(|e| DecodeError::Malformed {
        event: name,
        reason: e.to_string(),
    })
}

/// A family of pools whose state can be replicated from logs
///
/// `decode` and `transition` must be pure: the same inputs always give the same output,
/// and neither may panic on well formed input.
#[async_trait]
pub trait PoolFamily: Send + Sync + 'static {
    type State: Clone + PartialEq + Eq + fmt::Debug + Send + Sync + 'static;
    type Event: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Returns the kind of pool this family replicates
    fn kind(&self) -> PoolKind;

    /// A short name for logs
    fn name(&self) -> String;

    /// Addresses and topics this replica needs delivered
    fn subscription(&self) -> &SubscriptionDescriptor;

    /// `Ok(None)` when the log is not one of ours, `Err` when it is ours but malformed
    fn decode(&self, log: &RawLog) -> Result<Option<Self::Event>, DecodeError>;

    /// The event handler table
    fn transition(&self, event: &Self::Event, state: &Self::State) -> Transition<Self::State>;

    /// Read the full state at `block` straight from the chain
    async fn build_state(
        &self,
        reader: &dyn StateReader,
        block: u64,
    ) -> Result<Self::State, RebuildError>;
}
