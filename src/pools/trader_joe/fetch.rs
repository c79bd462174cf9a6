use super::state::{LbPairState, StaticFeeParameters, VariableFeeParameters};
use super::LbPairConfig;
use crate::codec::Amounts;
use crate::errors::RebuildError;
use crate::onchain::LBPair;
use crate::reader::{Batch, StateReader};
use alloy::primitives::aliases::U24;
use alloy::primitives::{Address, U256};
use std::collections::BTreeMap;
use tracing::debug;

/// Read a pair's full state at `block`
///
/// The pair has no view returning every bin, so the non-empty bins are found by walking
/// the bin tree away from the active id in both directions, then read in one batch.
pub(super) async fn fetch_pair(
    config: &LbPairConfig,
    reader: &dyn StateReader,
    block: u64,
) -> Result<LbPairState, RebuildError> {
    let pair = config.pair;

    let mut batch = Batch::new();
    let token_x = batch.add(pair, LBPair::getTokenXCall {});
    let token_y = batch.add(pair, LBPair::getTokenYCall {});
    let bin_step = batch.add(pair, LBPair::getBinStepCall {});
    let active_id = batch.add(pair, LBPair::getActiveIdCall {});
    let reserves = batch.add(pair, LBPair::getReservesCall {});
    let protocol_fees = batch.add(pair, LBPair::getProtocolFeesCall {});
    let static_fee = batch.add(pair, LBPair::getStaticFeeParametersCall {});
    let variable_fee = batch.add(pair, LBPair::getVariableFeeParametersCall {});
    let results = batch.execute(reader, block).await?;

    let token_x = results.decode(&token_x)?;
    let token_y = results.decode(&token_y)?;
    let bin_step = results.decode(&bin_step)?;
    if token_x != config.token_x || token_y != config.token_y {
        return Err(RebuildError::ConfigMismatch(format!(
            "pair {pair} trades {token_x}/{token_y}, configured {}/{}",
            config.token_x, config.token_y
        )));
    }
    if bin_step != config.bin_step {
        return Err(RebuildError::ConfigMismatch(format!(
            "pair {pair} has bin step {bin_step}, configured {}",
            config.bin_step
        )));
    }

    let active_id = results.decode(&active_id)?.to::<u32>();
    let reserves = results.decode(&reserves)?;
    let net_reserves = Amounts::new(U256::from(reserves.reserveX), U256::from(reserves.reserveY));
    let protocol_fees = results.decode(&protocol_fees)?;
    let protocol_fees = Amounts::new(
        U256::from(protocol_fees.protocolFeeX),
        U256::from(protocol_fees.protocolFeeY),
    );
    let static_fee = results.decode(&static_fee)?;
    let variable_fee = results.decode(&variable_fee)?;

    // Active bin first, then everything below and above it
    let mut ids = vec![active_id];
    walk_bins(pair, reader, block, active_id, true, config.max_bins, &mut ids).await?;
    walk_bins(pair, reader, block, active_id, false, config.max_bins, &mut ids).await?;
    debug!(%pair, block, bins = ids.len(), "Reading bins");

    let mut batch = Batch::new();
    let slots: Vec<_> = ids
        .iter()
        .map(|id| {
            (
                *id,
                batch.add(pair, LBPair::getBinCall { id: U24::from(*id) }),
            )
        })
        .collect();
    let results = batch.execute(reader, block).await?;

    let mut bins = BTreeMap::new();
    for (id, slot) in &slots {
        let bin = results.decode(slot)?;
        let amounts = Amounts::new(U256::from(bin.binReserveX), U256::from(bin.binReserveY));
        if !amounts.is_zero() {
            bins.insert(*id, amounts);
        }
    }

    let state = LbPairState {
        bin_step,
        active_id,
        reserves: net_reserves
            .checked_add(&protocol_fees)
            .ok_or_else(|| RebuildError::Inconsistent("reserves overflow".to_string()))?,
        protocol_fees,
        bins,
        static_fee: StaticFeeParameters {
            base_factor: static_fee.baseFactor,
            filter_period: static_fee.filterPeriod,
            decay_period: static_fee.decayPeriod,
            reduction_factor: static_fee.reductionFactor,
            variable_fee_control: static_fee.variableFeeControl.to::<u32>(),
            protocol_share: static_fee.protocolShare,
            max_volatility_accumulator: static_fee.maxVolatilityAccumulator.to::<u32>(),
        },
        variable_fee: VariableFeeParameters {
            volatility_accumulator: variable_fee.volatilityAccumulator.to::<u32>(),
            volatility_reference: variable_fee.volatilityReference.to::<u32>(),
            id_reference: variable_fee.idReference.to::<u32>(),
        },
        unsettled_composition: None,
    };

    let total = state.bin_total();
    if total != Some(net_reserves) {
        return Err(RebuildError::Inconsistent(format!(
            "bins of {pair} sum to {total:?}, reserves are {net_reserves:?}"
        )));
    }
    Ok(state)
}

/// Follow `getNextNonEmptyBin` from `from` until the tree runs out
///
/// Going down (`swap_for_y`) the pair answers `type(uint24).max` once there is nothing
/// left, going up it answers 0. Any answer that does not move away from the cursor ends
/// the walk.
async fn walk_bins(
    pair: Address,
    reader: &dyn StateReader,
    block: u64,
    from: u32,
    swap_for_y: bool,
    max_bins: usize,
    ids: &mut Vec<u32>,
) -> Result<(), RebuildError> {
    let mut cursor = from;
    loop {
        let mut batch = Batch::new();
        let next = batch.add(
            pair,
            LBPair::getNextNonEmptyBinCall {
                swapForY: swap_for_y,
                id: U24::from(cursor),
            },
        );
        let next = batch.execute(reader, block).await?.decode(&next)?.to::<u32>();

        let advanced = if swap_for_y {
            next < cursor
        } else {
            next > cursor
        };
        if !advanced {
            return Ok(());
        }
        if ids.len() >= max_bins {
            return Err(RebuildError::Inconsistent(format!(
                "pair {pair} has more than {max_bins} non-empty bins"
            )));
        }
        ids.push(next);
        cursor = next;
    }
}
