//! Batched on-chain reads pinned to a block height
//!
//! The authoritative builders only ever talk to the chain through [`StateReader`]. A batch
//! is all or nothing: if the node cannot serve the height or any call reverts, the whole
//! batch fails and the rebuild with it.

use crate::errors::{ReadError, RebuildError};
use alloy::eips::BlockId;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// A single `eth_call` of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCall {
    pub target: Address,
    pub calldata: Bytes,
}

impl ReadCall {
    pub fn new<C: SolCall>(target: Address, call: &C) -> Self {
        Self {
            target,
            calldata: call.abi_encode().into(),
        }
    }
}

/// The on-chain read collaborator
#[async_trait]
pub trait StateReader: Send + Sync {
    /// Latest block the node can serve
    async fn latest_block(&self) -> Result<u64, ReadError>;

    /// Execute every call at `block`, results in call order
    async fn call_batch(&self, block: u64, calls: Vec<ReadCall>) -> Result<Vec<Bytes>, ReadError>;
}

#[async_trait]
impl<R: StateReader + ?Sized> StateReader for Arc<R> {
    async fn latest_block(&self) -> Result<u64, ReadError> {
        (**self).latest_block().await
    }

    async fn call_batch(&self, block: u64, calls: Vec<ReadCall>) -> Result<Vec<Bytes>, ReadError> {
        (**self).call_batch(block, calls).await
    }
}

/// Index of a call queued in a [`Batch`], remembers the return type to decode with
pub struct Slot<C> {
    index: usize,
    _call: PhantomData<C>,
}

/// Accumulates typed calls, executes them as one batch and decodes each result
/// with the return type of the call that produced it
#[derive(Default)]
pub struct Batch {
    calls: Vec<ReadCall>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<C: SolCall>(&mut self, target: Address, call: C) -> Slot<C> {
        self.calls.push(ReadCall::new(target, &call));
        Slot {
            index: self.calls.len() - 1,
            _call: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub async fn execute(
        self,
        reader: &dyn StateReader,
        block: u64,
    ) -> Result<BatchResults, RebuildError> {
        let expected = self.calls.len();
        let results = reader.call_batch(block, self.calls).await?;
        if results.len() != expected {
            return Err(ReadError::ResultCount {
                expected,
                got: results.len(),
            }
            .into());
        }
        Ok(BatchResults { results })
    }
}

/// Raw results of an executed [`Batch`]
pub struct BatchResults {
    results: Vec<Bytes>,
}

impl BatchResults {
    pub fn decode<C: SolCall>(&self, slot: &Slot<C>) -> Result<C::Return, RebuildError> {
        C::abi_decode_returns(&self.results[slot.index]).map_err(|e| RebuildError::ReturnDecode {
            call: C::SIGNATURE,
            reason: e.to_string(),
        })
    }
}

/// [`StateReader`] backed by an alloy provider
pub struct RpcStateReader<P> {
    provider: Arc<P>,
}

impl<P> RpcStateReader<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P> StateReader for RpcStateReader<P>
where
    P: Provider + 'static,
{
    async fn latest_block(&self) -> Result<u64, ReadError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ReadError::ProviderError(e.to_string()))
    }

    async fn call_batch(&self, block: u64, calls: Vec<ReadCall>) -> Result<Vec<Bytes>, ReadError> {
        // Refuse to read from a node lagging behind the requested height
        let latest = self.latest_block().await?;
        if latest < block {
            return Err(ReadError::StaleNode {
                requested: block,
                latest,
            });
        }

        debug!(block, calls = calls.len(), "Executing read batch");
        let futures = calls.into_iter().enumerate().map(|(index, call)| {
            let provider = self.provider.clone();
            async move {
                let tx = TransactionRequest::default()
                    .with_to(call.target)
                    .with_input(call.calldata);
                provider
                    .call(tx)
                    .block(BlockId::number(block))
                    .await
                    .map_err(|e| ReadError::Reverted {
                        index,
                        target: call.target.to_string(),
                        reason: e.to_string(),
                    })
            }
        });
        try_join_all(futures).await
    }
}
