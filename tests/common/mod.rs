//! An in-memory chain answering the reads of both pool families
#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolEvent, SolValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use pool_replica::codec::Amounts;
use pool_replica::errors::ReadError;
use pool_replica::onchain::{IntegralRelayer, LBPair, ERC20};
use pool_replica::pools::{IntegralConfig, IntegralPoolState, LbPairConfig, LbPairState};
use pool_replica::{PoolFamily, RawLog, ReadCall, StateReader, SyncController, SyncPhase};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub const PAIR: Address = Address::repeat_byte(0x11);
pub const TOKEN_X: Address = Address::repeat_byte(0xaa);
pub const TOKEN_Y: Address = Address::repeat_byte(0xbb);
pub const RELAYER: Address = Address::repeat_byte(0x01);
pub const INTEGRAL_PAIR: Address = Address::repeat_byte(0x02);
pub const TOKEN0: Address = Address::repeat_byte(0x0a);
pub const TOKEN1: Address = Address::repeat_byte(0x0b);

/// uint24 max, what `getNextNonEmptyBin` answers going down past the last bin
const NO_BIN_BELOW: u32 = (1 << 24) - 1;

pub fn lb_config() -> LbPairConfig {
    LbPairConfig {
        pair: PAIR,
        token_x: TOKEN_X,
        token_y: TOKEN_Y,
        bin_step: 25,
        max_bins: 64,
    }
}

pub fn integral_config() -> IntegralConfig {
    IntegralConfig {
        relayer: RELAYER,
        pair: INTEGRAL_PAIR,
        token0: TOKEN0,
        token1: TOKEN1,
    }
}

pub fn amounts(x: u64, y: u64) -> Amounts {
    Amounts::new(U256::from(x), U256::from(y))
}

/// Chain history: the state of each pool from a height onwards
#[derive(Default)]
pub struct FakeChain {
    pub head: AtomicU64,
    pub down: AtomicBool,
    pub calls: AtomicUsize,
    lb: Mutex<BTreeMap<u64, LbPairState>>,
    integral: Mutex<BTreeMap<u64, IntegralPoolState>>,
}

impl FakeChain {
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.head.store(head, Ordering::SeqCst);
        chain
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn set_lb(&self, block: u64, state: LbPairState) {
        self.lb.lock().insert(block, state);
    }

    pub fn set_integral(&self, block: u64, state: IntegralPoolState) {
        self.integral.lock().insert(block, state);
    }

    fn lb_at(&self, block: u64) -> Result<LbPairState, String> {
        self.lb
            .lock()
            .range(..=block)
            .next_back()
            .map(|(_, state)| state.clone())
            .ok_or_else(|| format!("pair not deployed at {block}"))
    }

    fn integral_at(&self, block: u64) -> Result<IntegralPoolState, String> {
        self.integral
            .lock()
            .range(..=block)
            .next_back()
            .map(|(_, state)| state.clone())
            .ok_or_else(|| format!("relayer not deployed at {block}"))
    }

    fn answer(&self, block: u64, call: &ReadCall) -> Result<Vec<u8>, String> {
        let data = call.calldata.as_ref();
        if data.len() < 4 {
            return Err("calldata without selector".to_string());
        }
        let selector: [u8; 4] = data[..4].try_into().map_err(|_| "bad selector")?;
        let word = |n: usize| -> Result<U256, String> {
            data.get(4 + 32 * n..36 + 32 * n)
                .map(U256::from_be_slice)
                .ok_or_else(|| format!("missing argument {n}"))
        };
        let address_arg = |n: usize| -> Result<Address, String> {
            word(n).map(|value| Address::from_word(B256::from(value.to_be_bytes::<32>())))
        };

        if call.target == PAIR {
            let state = self.lb_at(block)?;
            let pair = |amounts: Amounts| (amounts.x.to::<u128>(), amounts.y.to::<u128>());
            let encoded = match selector {
                LBPair::getTokenXCall::SELECTOR => TOKEN_X.abi_encode(),
                LBPair::getTokenYCall::SELECTOR => TOKEN_Y.abi_encode(),
                LBPair::getBinStepCall::SELECTOR => state.bin_step.abi_encode(),
                LBPair::getActiveIdCall::SELECTOR => U256::from(state.active_id).abi_encode(),
                LBPair::getReservesCall::SELECTOR => pair(state.net_reserves()).abi_encode_params(),
                LBPair::getProtocolFeesCall::SELECTOR => pair(state.protocol_fees).abi_encode_params(),
                LBPair::getStaticFeeParametersCall::SELECTOR => {
                    let fee = state.static_fee;
                    (
                        fee.base_factor,
                        fee.filter_period,
                        fee.decay_period,
                        fee.reduction_factor,
                        U256::from(fee.variable_fee_control),
                        fee.protocol_share,
                        U256::from(fee.max_volatility_accumulator),
                    )
                        .abi_encode_params()
                }
                LBPair::getVariableFeeParametersCall::SELECTOR => {
                    let fee = state.variable_fee;
                    (
                        U256::from(fee.volatility_accumulator),
                        U256::from(fee.volatility_reference),
                        U256::from(fee.id_reference),
                        U256::from(block),
                    )
                        .abi_encode_params()
                }
                LBPair::getBinCall::SELECTOR => {
                    let id = word(0)?.to::<u32>();
                    pair(state.bin(id)).abi_encode_params()
                }
                LBPair::getNextNonEmptyBinCall::SELECTOR => {
                    let swap_for_y = !word(0)?.is_zero();
                    let id = word(1)?.to::<u32>();
                    let next = if swap_for_y {
                        state.bins.range(..id).next_back().map(|(id, _)| *id).unwrap_or(NO_BIN_BELOW)
                    } else {
                        state
                            .bins
                            .range(id.saturating_add(1)..)
                            .next()
                            .map(|(id, _)| *id)
                            .unwrap_or(0)
                    };
                    U256::from(next).abi_encode()
                }
                _ => return Err(format!("unknown pair selector {selector:?}")),
            };
            return Ok(encoded);
        }

        let state = self.integral_at(block)?;
        if call.target == RELAYER {
            let encoded = match selector {
                IntegralRelayer::getPriceByPairAddressCall::SELECTOR => {
                    let inverted = !word(1)?.is_zero();
                    let price = if inverted { state.inverted_price } else { state.price };
                    (U256::from(18), U256::from(18), price).abi_encode_params()
                }
                IntegralRelayer::swapFeeCall::SELECTOR => state.fee.abi_encode(),
                IntegralRelayer::tokenLimitMinCall::SELECTOR => {
                    let token = address_arg(0)?;
                    let limit = if token == TOKEN0 { state.limits0[0] } else { state.limits1[0] };
                    limit.abi_encode()
                }
                IntegralRelayer::tokenLimitMaxMultiplierCall::SELECTOR => {
                    let token = address_arg(0)?;
                    let multiplier = if token == TOKEN0 {
                        state.max_multiplier0
                    } else {
                        state.max_multiplier1
                    };
                    multiplier.abi_encode()
                }
                _ => return Err(format!("unknown relayer selector {selector:?}")),
            };
            return Ok(encoded);
        }

        if selector == ERC20::balanceOfCall::SELECTOR && address_arg(0)? == RELAYER {
            if call.target == TOKEN0 {
                return Ok(state.balance0.abi_encode());
            }
            if call.target == TOKEN1 {
                return Ok(state.balance1.abi_encode());
            }
        }
        Err(format!("no contract answers at {}", call.target))
    }
}

#[async_trait]
impl StateReader for FakeChain {
    async fn latest_block(&self) -> Result<u64, ReadError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ReadError::ProviderError("connection refused".to_string()));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn call_batch(&self, block: u64, calls: Vec<ReadCall>) -> Result<Vec<Bytes>, ReadError> {
        let latest = self.latest_block().await?;
        if latest < block {
            return Err(ReadError::StaleNode {
                requested: block,
                latest,
            });
        }
        self.calls.fetch_add(calls.len(), Ordering::SeqCst);
        calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                self.answer(block, call)
                    .map(Bytes::from)
                    .map_err(|reason| ReadError::Reverted {
                        index,
                        target: call.target.to_string(),
                        reason,
                    })
            })
            .collect()
    }
}

/// Wrap an event into a log of `address` at a chain position
pub fn log_of<E: SolEvent>(address: Address, event: &E, block: u64, index: u64) -> RawLog {
    let data = event.encode_log_data();
    RawLog {
        address,
        topics: data.topics().to_vec(),
        data: data.data,
        block_number: block,
        log_index: index,
        transaction_hash: B256::left_padding_from(&(block * 1_000 + index).to_be_bytes()),
    }
}

/// Wait until the controller publishes a synced phase, returns its height
pub async fn synced<F: PoolFamily>(controller: &SyncController<F>) -> u64 {
    let mut phase = controller.subscribe_phase();
    let phase = tokio::time::timeout(
        Duration::from_secs(10),
        phase.wait_for(|phase| matches!(phase, SyncPhase::Synced(_))),
    )
    .await
    .expect("replica never synced")
    .expect("phase channel closed")
    .clone();
    match phase {
        SyncPhase::Synced(block) => block,
        other => panic!("unexpected phase {other:?}"),
    }
}
