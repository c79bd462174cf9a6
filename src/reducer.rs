//! Single log application
//!
//! `reduce` glues a family's decoder and handler table together and collapses their
//! outcomes into the three cases the controller cares about.

use crate::errors::RejectReason;
use crate::pools::{PoolFamily, Transition};
use crate::raw_log::{DecodedEvent, RawLog};

/// Result of applying one raw log to a state
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction<E, S> {
    /// The log moved the state
    Next(DecodedEvent<E>, S),
    /// Not ours, or ours but carries nothing tracked
    Unchanged,
    /// The log cannot be applied, the state can no longer be trusted
    Reject(RejectReason),
}

/// Apply `log` to `state` with `family`'s decoder and handler table
pub fn reduce<F: PoolFamily>(
    family: &F,
    log: &RawLog,
    state: &F::State,
) -> Reduction<F::Event, F::State> {
    let event = match family.decode(log) {
        Ok(Some(event)) => event,
        Ok(None) => return Reduction::Unchanged,
        Err(e) => return Reduction::Reject(e.into()),
    };

    match family.transition(&event, state) {
        Transition::Next(next) => Reduction::Next(
            DecodedEvent {
                event,
                provenance: log.provenance(),
            },
            next,
        ),
        Transition::NoOp => Reduction::Unchanged,
        Transition::Invalid(reason) => Reduction::Reject(RejectReason::SemanticFailure(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_amounts, Amounts};
    use crate::errors::DecodeError;
    use crate::onchain::LBPair;
    use crate::pools::{LbPairConfig, LbPairState, TraderJoeV21Pool};
    use alloy::primitives::aliases::U24;
    use alloy::primitives::{Address, Bytes, B256, U256};
    use alloy_sol_types::SolEvent;

    fn pool() -> TraderJoeV21Pool {
        TraderJoeV21Pool::new(LbPairConfig {
            pair: Address::repeat_byte(0x11),
            token_x: Address::repeat_byte(0xaa),
            token_y: Address::repeat_byte(0xbb),
            bin_step: 10,
            max_bins: 8,
        })
    }

    fn collected(x: u128, y: u128) -> RawLog {
        let data = LBPair::CollectedProtocolFees {
            feeRecipient: Address::ZERO,
            protocolFees: encode_amounts(x, y),
        }
        .encode_log_data();
        RawLog {
            address: Address::repeat_byte(0x11),
            topics: data.topics().to_vec(),
            data: data.data,
            block_number: 42,
            log_index: 7,
            transaction_hash: B256::repeat_byte(0xab),
        }
    }

    fn state() -> LbPairState {
        LbPairState {
            bin_step: 10,
            reserves: Amounts::new(U256::from(10), U256::from(10)),
            protocol_fees: Amounts::new(U256::from(10), U256::from(10)),
            ..Default::default()
        }
    }

    #[test]
    fn next_carries_provenance() {
        let log = collected(4, 6);
        match reduce(&pool(), &log, &state()) {
            Reduction::Next(decoded, next) => {
                assert_eq!(decoded.provenance, log.position());
                assert_eq!(next.protocol_fees, Amounts::new(U256::from(6), U256::from(4)));
            }
            other => panic!("expected next, got {other:?}"),
        }
    }

    #[test]
    fn invalid_transition_rejects() {
        let reduction = reduce(&pool(), &collected(11, 0), &state());
        assert!(matches!(
            reduction,
            Reduction::Reject(RejectReason::SemanticFailure(_))
        ));
    }

    #[test]
    fn malformed_log_rejects_with_decode_failure() {
        let mut log = collected(1, 1);
        log.data = Bytes::from(vec![0u8; 3]);
        assert!(matches!(
            reduce(&pool(), &log, &state()),
            Reduction::Reject(RejectReason::DecodeFailure(DecodeError::Malformed { .. }))
        ));
    }

    #[test]
    fn foreign_and_untracked_logs_leave_state_unchanged() {
        let mut foreign = collected(1, 1);
        foreign.address = Address::repeat_byte(0x33);
        assert_eq!(reduce(&pool(), &foreign, &state()), Reduction::Unchanged);

        let data = LBPair::OracleLengthIncreased {
            sender: Address::ZERO,
            oracleLength: 100,
        }
        .encode_log_data();
        let oracle = RawLog {
            topics: data.topics().to_vec(),
            data: data.data,
            ..collected(0, 0)
        };
        assert_eq!(reduce(&pool(), &oracle, &state()), Reduction::Unchanged);
    }

    #[test]
    fn swap_in_empty_pair_is_rejected() {
        let data = LBPair::Swap {
            sender: Address::ZERO,
            to: Address::ZERO,
            id: U24::from(0u32),
            amountsIn: encode_amounts(0, 5),
            amountsOut: encode_amounts(5, 0),
            volatilityAccumulator: U24::ZERO,
            totalFees: B256::ZERO,
            protocolFees: B256::ZERO,
        }
        .encode_log_data();
        let swap = RawLog {
            topics: data.topics().to_vec(),
            data: data.data,
            ..collected(0, 0)
        };
        assert!(matches!(
            reduce(&pool(), &swap, &state()),
            Reduction::Reject(RejectReason::SemanticFailure(_))
        ));
    }
}
