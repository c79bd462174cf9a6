//! Integral TWAP relayer
//!
//! The relayer quotes from an oracle, so its price never moves with a swap. What the
//! replica follows is the relayer configuration for one pair (fee, token limits) and
//! the relayer's balances of the pair tokens, which bound the max limits.
//!
//! The oracle price is a time weighted average and drifts block by block without the
//! relayer emitting anything. The incremental path keeps the price of the last build,
//! so a caller quoting from `price` or `inverted_price` has to `invalidate` the replica
//! on its own schedule to pick up the current one.

use crate::errors::{DecodeError, RebuildError};
use crate::onchain::{IntegralRelayer, ERC20};
use crate::pools::{decode_event, invalid, PoolFamily, PoolKind, Transition};
use crate::raw_log::RawLog;
use crate::reader::{Batch, StateReader};
use crate::subscription::{SubscriptionDescriptor, SubscriptionFilter};
use alloy::primitives::{Address, U256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Fixed point scale of the max limit multipliers
pub const PRECISION: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Immutable identity of a replicated relayer pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegralConfig {
    pub relayer: Address,
    pub pair: Address,
    pub token0: Address,
    pub token1: Address,
}

/// Relayer view of one pair
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntegralPoolState {
    pub price: U256,
    pub inverted_price: U256,
    pub fee: U256,
    /// `[min, max]` for token0
    pub limits0: [U256; 2],
    /// `[min, max]` for token1
    pub limits1: [U256; 2],
    pub balance0: U256,
    pub balance1: U256,
    pub max_multiplier0: U256,
    pub max_multiplier1: U256,
}

impl IntegralPoolState {
    fn recompute_max(&mut self) -> Option<()> {
        self.limits0[1] = max_limit(self.balance0, self.max_multiplier0)?;
        self.limits1[1] = max_limit(self.balance1, self.max_multiplier1)?;
        Some(())
    }
}

fn max_limit(balance: U256, multiplier: U256) -> Option<U256> {
    balance.checked_mul(multiplier).map(|scaled| scaled / PRECISION)
}

/// Typed relayer and token events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegralEvent {
    Swap {
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        amount_out: U256,
    },
    SwapFeeSet {
        pair: Address,
        fee: U256,
    },
    TokenLimitMinSet {
        token: Address,
        limit: U256,
    },
    TokenLimitMaxMultiplierSet {
        token: Address,
        multiplier: U256,
    },
    /// ERC20 transfer of one of the pair tokens
    Transfer {
        token: Address,
        from: Address,
        to: Address,
        value: U256,
    },
    Unknown(String),
}

/// Replicates the relayer's view of a single pair
#[derive(Debug, Clone)]
pub struct IntegralPool {
    config: IntegralConfig,
    subscription: SubscriptionDescriptor,
}

impl IntegralPool {
    pub fn new(config: IntegralConfig) -> Self {
        let transfer = [ERC20::Transfer::SIGNATURE_HASH];
        let subscription = SubscriptionDescriptor::new(vec![
            SubscriptionFilter::all(config.relayer),
            SubscriptionFilter::topics(config.token0, transfer),
            SubscriptionFilter::topics(config.token1, transfer),
        ]);
        Self {
            config,
            subscription,
        }
    }

    pub fn config(&self) -> &IntegralConfig {
        &self.config
    }

    fn decode_relayer(&self, log: &RawLog) -> Result<Option<IntegralEvent>, DecodeError> {
        let Some(event_sig) = log.topic0() else {
            return Ok(None);
        };
        let event = if *event_sig == IntegralRelayer::Swap::SIGNATURE_HASH {
            let swap = decode_event::<IntegralRelayer::Swap>("Swap", log)?;
            IntegralEvent::Swap {
                token_in: swap.tokenIn,
                token_out: swap.tokenOut,
                amount_in: swap.amountIn,
                amount_out: swap.amountOut,
            }
        } else if *event_sig == IntegralRelayer::SwapFeeSet::SIGNATURE_HASH {
            let set = decode_event::<IntegralRelayer::SwapFeeSet>("SwapFeeSet", log)?;
            IntegralEvent::SwapFeeSet {
                pair: set.pair,
                fee: set.fee,
            }
        } else if *event_sig == IntegralRelayer::TokenLimitMinSet::SIGNATURE_HASH {
            let set = decode_event::<IntegralRelayer::TokenLimitMinSet>("TokenLimitMinSet", log)?;
            IntegralEvent::TokenLimitMinSet {
                token: set.token,
                limit: set.limit,
            }
        } else if *event_sig == IntegralRelayer::TokenLimitMaxMultiplierSet::SIGNATURE_HASH {
            let set = decode_event::<IntegralRelayer::TokenLimitMaxMultiplierSet>(
                "TokenLimitMaxMultiplierSet",
                log,
            )?;
            IntegralEvent::TokenLimitMaxMultiplierSet {
                token: set.token,
                multiplier: set.limit,
            }
        } else if let Some(name) = untracked(event_sig) {
            IntegralEvent::Unknown(name.to_string())
        } else {
            return Ok(None);
        };
        Ok(Some(event))
    }
}

fn untracked(event_sig: &alloy::primitives::B256) -> Option<&'static str> {
    [
        (IntegralRelayer::OwnerSet::SIGNATURE_HASH, "OwnerSet"),
        (IntegralRelayer::PairEnabledSet::SIGNATURE_HASH, "PairEnabledSet"),
        (IntegralRelayer::TwapIntervalSet::SIGNATURE_HASH, "TwapIntervalSet"),
        (IntegralRelayer::RebalancerSet::SIGNATURE_HASH, "RebalancerSet"),
        (IntegralRelayer::DelaySet::SIGNATURE_HASH, "DelaySet"),
    ]
    .into_iter()
    .find_map(|(sig, name)| (sig == *event_sig).then_some(name))
}

#[async_trait]
impl PoolFamily for IntegralPool {
    type State = IntegralPoolState;
    type Event = IntegralEvent;

    fn kind(&self) -> PoolKind {
        PoolKind::Integral
    }

    fn name(&self) -> String {
        format!("integral:{}", self.config.pair)
    }

    fn subscription(&self) -> &SubscriptionDescriptor {
        &self.subscription
    }

    fn decode(&self, log: &RawLog) -> Result<Option<IntegralEvent>, DecodeError> {
        if log.address == self.config.relayer {
            return self.decode_relayer(log);
        }
        let is_token = log.address == self.config.token0 || log.address == self.config.token1;
        if !is_token || log.topic0() != Some(&ERC20::Transfer::SIGNATURE_HASH) {
            return Ok(None);
        }
        let transfer = decode_event::<ERC20::Transfer>("Transfer", log)?;
        Ok(Some(IntegralEvent::Transfer {
            token: log.address,
            from: transfer.from,
            to: transfer.to,
            value: transfer.value,
        }))
    }

    fn transition(
        &self,
        event: &IntegralEvent,
        state: &IntegralPoolState,
    ) -> Transition<IntegralPoolState> {
        let config = &self.config;
        match event {
            // Quotes come from the oracle and balances move through the token transfers
            IntegralEvent::Swap { .. } => Transition::NoOp,
            IntegralEvent::SwapFeeSet { pair, fee } => {
                if *pair != config.pair {
                    return Transition::NoOp;
                }
                let mut next = state.clone();
                next.fee = *fee;
                Transition::Next(next)
            }
            IntegralEvent::TokenLimitMinSet { token, limit } => {
                let mut next = state.clone();
                if *token == config.token0 {
                    next.limits0[0] = *limit;
                } else if *token == config.token1 {
                    next.limits1[0] = *limit;
                } else {
                    return Transition::NoOp;
                }
                Transition::Next(next)
            }
            IntegralEvent::TokenLimitMaxMultiplierSet { token, multiplier } => {
                let mut next = state.clone();
                if *token == config.token0 {
                    next.max_multiplier0 = *multiplier;
                } else if *token == config.token1 {
                    next.max_multiplier1 = *multiplier;
                } else {
                    return Transition::NoOp;
                }
                match next.recompute_max() {
                    Some(()) => Transition::Next(next),
                    None => invalid(format!("max limit of {token} overflows")),
                }
            }
            IntegralEvent::Transfer {
                token,
                from,
                to,
                value,
            } => {
                if *from != config.relayer && *to != config.relayer {
                    return Transition::NoOp;
                }
                let mut next = state.clone();
                let balance = if *token == config.token0 {
                    &mut next.balance0
                } else if *token == config.token1 {
                    &mut next.balance1
                } else {
                    return Transition::NoOp;
                };
                if *from == config.relayer {
                    let Some(remaining) = balance.checked_sub(*value) else {
                        return invalid(format!("relayer sends more {token} than it holds"));
                    };
                    *balance = remaining;
                }
                if *to == config.relayer {
                    let Some(received) = balance.checked_add(*value) else {
                        return invalid(format!("relayer balance of {token} overflows"));
                    };
                    *balance = received;
                }
                match next.recompute_max() {
                    Some(()) => Transition::Next(next),
                    None => invalid(format!("max limit of {token} overflows")),
                }
            }
            IntegralEvent::Unknown(_) => Transition::NoOp,
        }
    }

    async fn build_state(
        &self,
        reader: &dyn StateReader,
        block: u64,
    ) -> Result<IntegralPoolState, RebuildError> {
        let IntegralConfig {
            relayer,
            pair,
            token0,
            token1,
        } = self.config;

        let mut batch = Batch::new();
        let price = batch.add(
            relayer,
            IntegralRelayer::getPriceByPairAddressCall {
                pair,
                inverted: false,
            },
        );
        let inverted_price = batch.add(
            relayer,
            IntegralRelayer::getPriceByPairAddressCall {
                pair,
                inverted: true,
            },
        );
        let fee = batch.add(relayer, IntegralRelayer::swapFeeCall { pair });
        let min0 = batch.add(relayer, IntegralRelayer::tokenLimitMinCall { token: token0 });
        let min1 = batch.add(relayer, IntegralRelayer::tokenLimitMinCall { token: token1 });
        let multiplier0 =
            batch.add(relayer, IntegralRelayer::tokenLimitMaxMultiplierCall { token: token0 });
        let multiplier1 =
            batch.add(relayer, IntegralRelayer::tokenLimitMaxMultiplierCall { token: token1 });
        let balance0 = batch.add(token0, ERC20::balanceOfCall { account: relayer });
        let balance1 = batch.add(token1, ERC20::balanceOfCall { account: relayer });
        let results = batch.execute(reader, block).await?;

        let mut state = IntegralPoolState {
            price: results.decode(&price)?.price,
            inverted_price: results.decode(&inverted_price)?.price,
            fee: results.decode(&fee)?,
            limits0: [results.decode(&min0)?, U256::ZERO],
            limits1: [results.decode(&min1)?, U256::ZERO],
            balance0: results.decode(&balance0)?,
            balance1: results.decode(&balance1)?,
            max_multiplier0: results.decode(&multiplier0)?,
            max_multiplier1: results.decode(&multiplier1)?,
        };
        state
            .recompute_max()
            .ok_or_else(|| RebuildError::Inconsistent(format!("max limits of {pair} overflow")))?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData, B256};

    fn config() -> IntegralConfig {
        IntegralConfig {
            relayer: Address::repeat_byte(0x01),
            pair: Address::repeat_byte(0x02),
            token0: Address::repeat_byte(0x0a),
            token1: Address::repeat_byte(0x0b),
        }
    }

    fn raw(address: Address, data: LogData) -> RawLog {
        RawLog {
            address,
            topics: data.topics().to_vec(),
            data: data.data,
            block_number: 5,
            log_index: 1,
            transaction_hash: B256::repeat_byte(3),
        }
    }

    fn seeded() -> IntegralPoolState {
        IntegralPoolState {
            price: U256::from(1),
            inverted_price: U256::from(2),
            fee: U256::from(3),
            balance0: U256::from(1_000),
            max_multiplier0: PRECISION / U256::from(2),
            limits0: [U256::ZERO, U256::from(500)],
            ..Default::default()
        }
    }

    fn apply(event: IntegralEvent, state: &IntegralPoolState) -> Transition<IntegralPoolState> {
        IntegralPool::new(config()).transition(&event, state)
    }

    #[test]
    fn swap_is_a_noop_by_policy() {
        let pool = IntegralPool::new(config());
        let swap = IntegralRelayer::Swap {
            user: Address::ZERO,
            tokenIn: config().token0,
            tokenOut: config().token1,
            amountIn: U256::ZERO,
            amountOut: U256::ZERO,
            to: Address::ZERO,
        };
        let event = pool
            .decode(&raw(config().relayer, swap.encode_log_data()))
            .unwrap()
            .unwrap();
        assert!(matches!(event, IntegralEvent::Swap { .. }));
        assert!(pool.transition(&event, &seeded()).is_noop());
    }

    #[test]
    fn fee_updates_only_for_our_pair() {
        let state = seeded();
        let ours = IntegralEvent::SwapFeeSet {
            pair: config().pair,
            fee: U256::from(30),
        };
        let Transition::Next(next) = apply(ours, &state) else {
            panic!("fee of our pair must apply");
        };
        assert_eq!(next.fee, U256::from(30));

        let theirs = IntegralEvent::SwapFeeSet {
            pair: Address::repeat_byte(0x99),
            fee: U256::from(30),
        };
        assert!(apply(theirs, &state).is_noop());
    }

    #[test]
    fn limits_follow_multiplier_and_balance() {
        let state = seeded();
        let Transition::Next(next) = apply(
            IntegralEvent::TokenLimitMaxMultiplierSet {
                token: config().token0,
                multiplier: PRECISION,
            },
            &state,
        ) else {
            panic!("multiplier must apply");
        };
        assert_eq!(next.limits0[1], U256::from(1_000));

        let Transition::Next(next) = apply(
            IntegralEvent::Transfer {
                token: config().token0,
                from: Address::repeat_byte(0x77),
                to: config().relayer,
                value: U256::from(200),
            },
            &next,
        ) else {
            panic!("inbound transfer must apply");
        };
        assert_eq!(next.balance0, U256::from(1_200));
        assert_eq!(next.limits0[1], U256::from(1_200));

        let Transition::Next(next) = apply(
            IntegralEvent::TokenLimitMinSet {
                token: config().token1,
                limit: U256::from(7),
            },
            &next,
        ) else {
            panic!("min limit must apply");
        };
        assert_eq!(next.limits1[0], U256::from(7));
    }

    #[test]
    fn transfers_out_cannot_overdraw() {
        let outbound = IntegralEvent::Transfer {
            token: config().token0,
            from: config().relayer,
            to: Address::repeat_byte(0x77),
            value: U256::from(1_001),
        };
        assert!(matches!(apply(outbound, &seeded()), Transition::Invalid(_)));

        let unrelated = IntegralEvent::Transfer {
            token: config().token0,
            from: Address::repeat_byte(0x76),
            to: Address::repeat_byte(0x77),
            value: U256::from(1_001),
        };
        assert!(apply(unrelated, &seeded()).is_noop());
    }

    #[test]
    fn decodes_token_transfers_and_ignores_other_token_logs() {
        let pool = IntegralPool::new(config());
        let transfer = ERC20::Transfer {
            from: config().relayer,
            to: Address::repeat_byte(0x55),
            value: U256::from(10),
        };
        let event = pool
            .decode(&raw(config().token1, transfer.encode_log_data()))
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            IntegralEvent::Transfer {
                token: config().token1,
                from: config().relayer,
                to: Address::repeat_byte(0x55),
                value: U256::from(10),
            }
        );

        // Same transfer emitted by a token outside the pair
        let foreign = raw(Address::repeat_byte(0x0c), transfer.encode_log_data());
        assert_eq!(pool.decode(&foreign), Ok(None));

        let mut approval = raw(config().token1, transfer.encode_log_data());
        approval.topics[0] = B256::repeat_byte(0x8c);
        assert_eq!(pool.decode(&approval), Ok(None));

        let mut truncated = raw(config().token1, transfer.encode_log_data());
        truncated.data = Bytes::new();
        assert!(matches!(
            pool.decode(&truncated),
            Err(DecodeError::Malformed { event: "Transfer", .. })
        ));
    }

    #[test]
    fn administrative_events_are_unknown() {
        let pool = IntegralPool::new(config());
        let owner = IntegralRelayer::OwnerSet {
            owner: Address::repeat_byte(0x42),
        };
        let event = pool
            .decode(&raw(config().relayer, owner.encode_log_data()))
            .unwrap()
            .unwrap();
        assert_eq!(event, IntegralEvent::Unknown("OwnerSet".to_string()));
        assert!(pool.transition(&event, &seeded()).is_noop());
    }

    #[test]
    fn subscribes_to_relayer_and_token_transfers() {
        let pool = IntegralPool::new(config());
        let filters = pool.subscription().filters();
        assert_eq!(filters.len(), 3);
        assert!(filters[0].topics.is_empty());
        assert_eq!(filters[1].topics, vec![ERC20::Transfer::SIGNATURE_HASH]);
    }
}
