//! Trader Joe Liquidity Book v2.1 pairs
//!
//! Liquidity sits in discrete price bins. Every event the pair emits that moves bins,
//! reserves or fees has a transition here, so a replica fed the complete log stream of
//! the pair tracks `getReserves()`, `getProtocolFees()` and every `getBin()` exactly.
//!
//! The volatility and id references of the variable fee are refreshed by the pair
//! from `block.timestamp` on every swap and never logged. The replica only moves them
//! on `ForcedDecay` and on a rebuild.

use crate::codec::{decode_amounts, Amounts};
use crate::errors::{DecodeError, RebuildError};
use crate::onchain::LBPair;
use crate::pools::{decode_event, PoolFamily, PoolKind, Transition};
use crate::raw_log::RawLog;
use crate::reader::StateReader;
use crate::subscription::{SubscriptionDescriptor, SubscriptionFilter};
use alloy::primitives::{Address, B256, U256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod fetch;
mod state;

pub use state::{LbPairState, StaticFeeParameters, VariableFeeParameters, MAX_BIN_ID};

/// Upper bound on non-empty bins read by a rebuild when none is configured
pub const DEFAULT_MAX_BINS: usize = 2_000;

/// Immutable identity of a replicated pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbPairConfig {
    pub pair: Address,
    pub token_x: Address,
    pub token_y: Address,
    pub bin_step: u16,
    #[serde(default = "default_max_bins")]
    pub max_bins: usize,
}

fn default_max_bins() -> usize {
    DEFAULT_MAX_BINS
}

/// Typed events of an LB pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LbPairEvent {
    Swap {
        id: u32,
        amounts_in: Amounts,
        amounts_out: Amounts,
        volatility_accumulator: u32,
        total_fees: Amounts,
        protocol_fees: Amounts,
    },
    DepositedToBins {
        ids: Vec<U256>,
        amounts: Vec<Amounts>,
    },
    WithdrawnFromBins {
        ids: Vec<U256>,
        amounts: Vec<Amounts>,
    },
    CompositionFees {
        id: u32,
        total_fees: Amounts,
        protocol_fees: Amounts,
    },
    CollectedProtocolFees {
        protocol_fees: Amounts,
    },
    FlashLoan {
        active_id: u32,
        amounts: Amounts,
        total_fees: Amounts,
        protocol_fees: Amounts,
    },
    StaticFeeParametersSet(StaticFeeParameters),
    ForcedDecay {
        id_reference: u32,
        volatility_reference: u32,
    },
    /// Transfers of LB shares between holders
    TransferBatch,
    /// A known pair event the replica does not track
    Unknown(String),
}

/// Replicates a single LB v2.1 pair
#[derive(Debug, Clone)]
pub struct TraderJoeV21Pool {
    config: LbPairConfig,
    subscription: SubscriptionDescriptor,
}

impl TraderJoeV21Pool {
    pub fn new(config: LbPairConfig) -> Self {
        let subscription = SubscriptionDescriptor::new(vec![SubscriptionFilter::all(config.pair)]);
        Self {
            config,
            subscription,
        }
    }

    pub fn config(&self) -> &LbPairConfig {
        &self.config
    }
}

#[async_trait]
impl PoolFamily for TraderJoeV21Pool {
    type State = LbPairState;
    type Event = LbPairEvent;

    fn kind(&self) -> PoolKind {
        PoolKind::TraderJoeV21
    }

    fn name(&self) -> String {
        format!("lb:{}", self.config.pair)
    }

    fn subscription(&self) -> &SubscriptionDescriptor {
        &self.subscription
    }

    fn decode(&self, log: &RawLog) -> Result<Option<LbPairEvent>, DecodeError> {
        if log.address != self.config.pair {
            return Ok(None);
        }
        let Some(event_sig) = log.topic0() else {
            return Ok(None);
        };

        let event = if *event_sig == LBPair::Swap::SIGNATURE_HASH {
            let swap = decode_event::<LBPair::Swap>("Swap", log)?;
            LbPairEvent::Swap {
                id: swap.id.to::<u32>(),
                amounts_in: packed(&swap.amountsIn)?,
                amounts_out: packed(&swap.amountsOut)?,
                volatility_accumulator: swap.volatilityAccumulator.to::<u32>(),
                total_fees: packed(&swap.totalFees)?,
                protocol_fees: packed(&swap.protocolFees)?,
            }
        } else if *event_sig == LBPair::DepositedToBins::SIGNATURE_HASH {
            let deposit = decode_event::<LBPair::DepositedToBins>("DepositedToBins", log)?;
            LbPairEvent::DepositedToBins {
                amounts: packed_all(&deposit.amounts)?,
                ids: deposit.ids,
            }
        } else if *event_sig == LBPair::WithdrawnFromBins::SIGNATURE_HASH {
            let withdrawal = decode_event::<LBPair::WithdrawnFromBins>("WithdrawnFromBins", log)?;
            LbPairEvent::WithdrawnFromBins {
                amounts: packed_all(&withdrawal.amounts)?,
                ids: withdrawal.ids,
            }
        } else if *event_sig == LBPair::CompositionFees::SIGNATURE_HASH {
            let fees = decode_event::<LBPair::CompositionFees>("CompositionFees", log)?;
            LbPairEvent::CompositionFees {
                id: fees.id.to::<u32>(),
                total_fees: packed(&fees.totalFees)?,
                protocol_fees: packed(&fees.protocolFees)?,
            }
        } else if *event_sig == LBPair::CollectedProtocolFees::SIGNATURE_HASH {
            let collected =
                decode_event::<LBPair::CollectedProtocolFees>("CollectedProtocolFees", log)?;
            LbPairEvent::CollectedProtocolFees {
                protocol_fees: packed(&collected.protocolFees)?,
            }
        } else if *event_sig == LBPair::FlashLoan::SIGNATURE_HASH {
            let loan = decode_event::<LBPair::FlashLoan>("FlashLoan", log)?;
            LbPairEvent::FlashLoan {
                active_id: loan.activeId.to::<u32>(),
                amounts: packed(&loan.amounts)?,
                total_fees: packed(&loan.totalFees)?,
                protocol_fees: packed(&loan.protocolFees)?,
            }
        } else if *event_sig == LBPair::StaticFeeParametersSet::SIGNATURE_HASH {
            let params =
                decode_event::<LBPair::StaticFeeParametersSet>("StaticFeeParametersSet", log)?;
            LbPairEvent::StaticFeeParametersSet(StaticFeeParameters {
                base_factor: params.baseFactor,
                filter_period: params.filterPeriod,
                decay_period: params.decayPeriod,
                reduction_factor: params.reductionFactor,
                variable_fee_control: params.variableFeeControl.to::<u32>(),
                protocol_share: params.protocolShare,
                max_volatility_accumulator: params.maxVolatilityAccumulator.to::<u32>(),
            })
        } else if *event_sig == LBPair::ForcedDecay::SIGNATURE_HASH {
            let decay = decode_event::<LBPair::ForcedDecay>("ForcedDecay", log)?;
            LbPairEvent::ForcedDecay {
                id_reference: decay.idReference.to::<u32>(),
                volatility_reference: decay.volatilityReference.to::<u32>(),
            }
        } else if *event_sig == LBPair::TransferBatch::SIGNATURE_HASH {
            decode_event::<LBPair::TransferBatch>("TransferBatch", log)?;
            LbPairEvent::TransferBatch
        } else if *event_sig == LBPair::OracleLengthIncreased::SIGNATURE_HASH {
            LbPairEvent::Unknown("OracleLengthIncreased".to_string())
        } else if *event_sig == LBPair::ApprovalForAll::SIGNATURE_HASH {
            LbPairEvent::Unknown("ApprovalForAll".to_string())
        } else {
            return Ok(None);
        };
        Ok(Some(event))
    }

    fn transition(&self, event: &LbPairEvent, state: &LbPairState) -> Transition<LbPairState> {
        match event {
            LbPairEvent::Swap {
                id,
                amounts_in,
                amounts_out,
                volatility_accumulator,
                total_fees,
                protocol_fees,
            } => state.apply_swap(
                *id,
                *amounts_in,
                *amounts_out,
                *volatility_accumulator,
                *total_fees,
                *protocol_fees,
            ),
            LbPairEvent::DepositedToBins { ids, amounts } => state.apply_deposit(ids, amounts),
            LbPairEvent::WithdrawnFromBins { ids, amounts } => state.apply_withdraw(ids, amounts),
            LbPairEvent::CompositionFees {
                id,
                total_fees,
                protocol_fees,
            } => state.apply_composition_fees(*id, *total_fees, *protocol_fees),
            LbPairEvent::FlashLoan {
                active_id,
                total_fees,
                protocol_fees,
                ..
            } => state.apply_flash_loan(*active_id, *total_fees, *protocol_fees),
            LbPairEvent::CollectedProtocolFees { protocol_fees } => {
                state.apply_collected_fees(*protocol_fees)
            }
            LbPairEvent::StaticFeeParametersSet(params) => state.apply_static_fee(*params),
            LbPairEvent::ForcedDecay {
                id_reference,
                volatility_reference,
            } => state.apply_forced_decay(*id_reference, *volatility_reference),
            // Share transfers move ownership, not liquidity
            LbPairEvent::TransferBatch => Transition::NoOp,
            LbPairEvent::Unknown(_) => Transition::NoOp,
        }
    }

    async fn build_state(
        &self,
        reader: &dyn StateReader,
        block: u64,
    ) -> Result<LbPairState, RebuildError> {
        fetch::fetch_pair(&self.config, reader, block).await
    }
}

fn packed(word: &B256) -> Result<Amounts, DecodeError> {
    decode_amounts(word.as_slice()).map(Amounts::from)
}

fn packed_all(words: &[B256]) -> Result<Vec<Amounts>, DecodeError> {
    words.iter().map(packed).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_amounts;
    use alloy::primitives::{Bytes, LogData};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn pool() -> TraderJoeV21Pool {
        TraderJoeV21Pool::new(LbPairConfig {
            pair: Address::repeat_byte(0x11),
            token_x: Address::repeat_byte(0xaa),
            token_y: Address::repeat_byte(0xbb),
            bin_step: 20,
            max_bins: 16,
        })
    }

    fn raw(address: Address, data: LogData) -> RawLog {
        RawLog {
            address,
            topics: data.topics().to_vec(),
            data: data.data,
            block_number: 10,
            log_index: 0,
            transaction_hash: B256::repeat_byte(1),
        }
    }

    fn swap_log(id: u32, amount_in_x: u128, amount_out_y: u128) -> RawLog {
        let event = LBPair::Swap {
            sender: Address::ZERO,
            to: Address::ZERO,
            id: alloy::primitives::aliases::U24::from(id),
            amountsIn: encode_amounts(amount_in_x, 0),
            amountsOut: encode_amounts(0, amount_out_y),
            volatilityAccumulator: alloy::primitives::aliases::U24::from(9u32),
            totalFees: encode_amounts(1, 0),
            protocolFees: encode_amounts(0, 0),
        };
        raw(pool().config.pair, event.encode_log_data())
    }

    fn state() -> LbPairState {
        let mut bins = BTreeMap::new();
        bins.insert(
            8_388_608,
            Amounts::new(U256::from(1_000), U256::from(1_000)),
        );
        LbPairState {
            bin_step: 20,
            active_id: 8_388_608,
            reserves: Amounts::new(U256::from(1_000), U256::from(1_000)),
            bins,
            ..Default::default()
        }
    }

    #[test]
    fn decodes_swap_with_packed_amounts() {
        let event = pool().decode(&swap_log(8_388_608, 100, 90)).unwrap().unwrap();
        assert_eq!(
            event,
            LbPairEvent::Swap {
                id: 8_388_608,
                amounts_in: Amounts::new(U256::from(100), U256::ZERO),
                amounts_out: Amounts::new(U256::ZERO, U256::from(90)),
                volatility_accumulator: 9,
                total_fees: Amounts::new(U256::from(1), U256::ZERO),
                protocol_fees: Amounts::ZERO,
            }
        );
    }

    #[test]
    fn foreign_logs_are_not_applicable() {
        let mut log = swap_log(1, 1, 1);
        log.address = Address::repeat_byte(0x22);
        assert_eq!(pool().decode(&log), Ok(None));

        let mut log = swap_log(1, 1, 1);
        log.topics[0] = B256::repeat_byte(0xee);
        assert_eq!(pool().decode(&log), Ok(None));

        let mut log = swap_log(1, 1, 1);
        log.topics.clear();
        assert_eq!(pool().decode(&log), Ok(None));
    }

    #[test]
    fn truncated_payload_is_a_decode_error() {
        let mut log = swap_log(1, 1, 1);
        log.data = Bytes::from(log.data[..40].to_vec());
        assert!(matches!(
            pool().decode(&log),
            Err(DecodeError::Malformed { event: "Swap", .. })
        ));
    }

    #[test]
    fn untracked_events_decode_to_unknown() {
        let approval = LBPair::ApprovalForAll {
            account: Address::ZERO,
            sender: Address::ZERO,
            approved: true,
        };
        let log = raw(pool().config.pair, approval.encode_log_data());
        let event = pool().decode(&log).unwrap().unwrap();
        assert_eq!(event, LbPairEvent::Unknown("ApprovalForAll".to_string()));
        assert!(pool().transition(&event, &state()).is_noop());
    }

    #[test]
    fn share_transfers_are_noops() {
        let transfer = LBPair::TransferBatch {
            sender: Address::ZERO,
            from: Address::repeat_byte(1),
            to: Address::repeat_byte(2),
            ids: vec![U256::from(8_388_608)],
            amounts: vec![U256::from(5)],
        };
        let log = raw(pool().config.pair, transfer.encode_log_data());
        let event = pool().decode(&log).unwrap().unwrap();
        assert_eq!(event, LbPairEvent::TransferBatch);
        assert!(pool().transition(&event, &state()).is_noop());
    }

    #[test]
    fn deposit_log_round_trips_through_the_table() {
        let deposit = LBPair::DepositedToBins {
            sender: Address::ZERO,
            to: Address::ZERO,
            ids: vec![U256::from(8_388_608), U256::from(8_388_609)],
            amounts: vec![encode_amounts(10, 20), encode_amounts(30, 0)],
        };
        let log = raw(pool().config.pair, deposit.encode_log_data());
        let event = pool().decode(&log).unwrap().unwrap();
        let Transition::Next(next) = pool().transition(&event, &state()) else {
            panic!("deposit must move the state");
        };
        assert_eq!(
            next.bin(8_388_609),
            Amounts::new(U256::from(30), U256::ZERO)
        );
        assert_eq!(
            next.reserves,
            Amounts::new(U256::from(1_040), U256::from(1_020))
        );
        assert!(next.is_consistent());
    }

    proptest! {
        #[test]
        fn swap_transition_is_deterministic(amount_in in 0u64..2_000, amount_out in 0u64..2_000) {
            let pool = pool();
            let event = pool.decode(&swap_log(8_388_608, amount_in.into(), amount_out.into())).unwrap().unwrap();
            let first = pool.transition(&event, &state());
            let second = pool.transition(&event, &state());
            prop_assert_eq!(&first, &second);
            if let Transition::Next(next) = first {
                prop_assert!(next.is_consistent());
            }
        }
    }
}
