use crate::codec::Amounts;
use crate::pools::{invalid, Transition};
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Highest bin id a pair can address (uint24)
pub const MAX_BIN_ID: u32 = (1 << 24) - 1;

/// Fee configuration set by the factory owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StaticFeeParameters {
    pub base_factor: u16,
    pub filter_period: u16,
    pub decay_period: u16,
    pub reduction_factor: u16,
    pub variable_fee_control: u32,
    pub protocol_share: u16,
    pub max_volatility_accumulator: u32,
}

/// The volatility tracking part of the fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VariableFeeParameters {
    pub volatility_accumulator: u32,
    pub volatility_reference: u32,
    pub id_reference: u32,
}

/// Replicated state of a Liquidity Book v2.1 pair
///
/// `reserves` is the pair's total accounting and includes the protocol fees of the
/// current epoch, so `sum(bins) + protocol_fees == reserves` holds between
/// transactions.
///
/// A mint emits `CompositionFees` before `DepositedToBins`, and the deposit reports the
/// amounts including the protocol share that never reaches the bin. That share is
/// held in `unsettled_composition` until the deposit into its bin lands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LbPairState {
    pub bin_step: u16,
    pub active_id: u32,
    pub reserves: Amounts,
    pub protocol_fees: Amounts,
    pub bins: BTreeMap<u32, Amounts>,
    pub static_fee: StaticFeeParameters,
    pub variable_fee: VariableFeeParameters,
    /// Protocol share of a composition fee awaiting its deposit, by bin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsettled_composition: Option<(u32, Amounts)>,
}

impl LbPairState {
    /// What the pair reports from `getReserves()`
    pub fn net_reserves(&self) -> Amounts {
        self.reserves - self.protocol_fees
    }

    pub fn bin(&self, id: u32) -> Amounts {
        self.bins.get(&id).copied().unwrap_or(Amounts::ZERO)
    }

    /// Sum of every bin's reserves, `None` on overflow
    pub fn bin_total(&self) -> Option<Amounts> {
        self.bins
            .values()
            .try_fold(Amounts::ZERO, |total, bin| total.checked_add(bin))
    }

    /// Whether the bins and fee accumulators add up to the reserves
    pub fn is_consistent(&self) -> bool {
        let unsettled = self
            .unsettled_composition
            .map(|(_, fees)| fees)
            .unwrap_or(Amounts::ZERO);
        let held = self
            .bin_total()
            .and_then(|bins| bins.checked_add(&self.protocol_fees));
        let owed = self.reserves.checked_add(&unsettled);
        matches!((held, owed), (Some(held), Some(owed)) if held == owed)
    }

    fn set_bin(&mut self, id: u32, amounts: Amounts) {
        if amounts.is_zero() {
            self.bins.remove(&id);
        } else {
            self.bins.insert(id, amounts);
        }
    }

    pub(super) fn apply_swap(
        &self,
        id: u32,
        amounts_in: Amounts,
        amounts_out: Amounts,
        volatility_accumulator: u32,
        total_fees: Amounts,
        protocol_fees: Amounts,
    ) -> Transition<Self> {
        if id > MAX_BIN_ID {
            return invalid(format!("swap in bin {id} beyond the last bin"));
        }
        let swap_for_y = !amounts_in.x.is_zero();
        let swap_for_x = !amounts_in.y.is_zero();
        if swap_for_y && swap_for_x {
            return invalid("swap input on both tokens");
        }
        if swap_for_y {
            if !amounts_out.x.is_zero() {
                return invalid("swap of X pays out X");
            }
            if id > self.active_id {
                return invalid(format!(
                    "swap of X moved the active bin up from {} to {id}",
                    self.active_id
                ));
            }
        } else if swap_for_x {
            if !amounts_out.y.is_zero() {
                return invalid("swap of Y pays out Y");
            }
            if id < self.active_id {
                return invalid(format!(
                    "swap of Y moved the active bin down from {} to {id}",
                    self.active_id
                ));
            }
        } else if !amounts_out.is_zero() {
            return invalid("swap pays out without any input");
        }
        if !protocol_fees.all_le(&total_fees) {
            return invalid("swap protocol fees exceed total fees");
        }
        // The emitted input already excludes the protocol share of the fees
        let Some(received) = amounts_in.checked_add(&protocol_fees) else {
            return invalid("swap input overflows");
        };
        if !total_fees.all_le(&received) {
            return invalid("swap fees exceed the input");
        }

        let Some(bin) = self
            .bin(id)
            .checked_add(&amounts_in)
            .and_then(|bin| bin.checked_sub(&amounts_out))
        else {
            return invalid(format!("swap drains more than bin {id} holds"));
        };
        let Some(reserves) = self
            .reserves
            .checked_add(&received)
            .and_then(|reserves| reserves.checked_sub(&amounts_out))
        else {
            return invalid("swap drains more than the reserves");
        };
        let Some(fees) = self.protocol_fees.checked_add(&protocol_fees) else {
            return invalid("protocol fees overflow");
        };

        let mut next = self.clone();
        next.set_bin(id, bin);
        next.reserves = reserves;
        next.protocol_fees = fees;
        next.active_id = id;
        next.variable_fee.volatility_accumulator = volatility_accumulator;
        Transition::Next(next)
    }

    pub(super) fn apply_deposit(&self, ids: &[U256], amounts: &[Amounts]) -> Transition<Self> {
        if ids.len() != amounts.len() {
            return invalid(format!(
                "deposit of {} ids with {} amounts",
                ids.len(),
                amounts.len()
            ));
        }
        let mut next = self.clone();
        let mut unsettled = next.unsettled_composition.take();
        for (id, amount) in ids.iter().zip(amounts) {
            let Some(id) = bin_id(id) else {
                return invalid(format!("deposit into bin {id} beyond the last bin"));
            };
            let credited = match unsettled {
                Some((fee_bin, fees)) if fee_bin == id => {
                    unsettled = None;
                    let Some(credited) = amount.checked_sub(&fees) else {
                        return invalid(format!(
                            "deposit into bin {id} is smaller than its composition fee"
                        ));
                    };
                    credited
                }
                _ => *amount,
            };
            let (Some(bin), Some(reserves)) = (
                next.bin(id).checked_add(&credited),
                next.reserves.checked_add(amount),
            ) else {
                return invalid(format!("deposit into bin {id} overflows"));
            };
            next.set_bin(id, bin);
            next.reserves = reserves;
        }
        if let Some((fee_bin, _)) = unsettled {
            return invalid(format!("composition fee on bin {fee_bin} without a deposit into it"));
        }
        Transition::Next(next)
    }

    pub(super) fn apply_withdraw(&self, ids: &[U256], amounts: &[Amounts]) -> Transition<Self> {
        if ids.len() != amounts.len() {
            return invalid(format!(
                "withdrawal of {} ids with {} amounts",
                ids.len(),
                amounts.len()
            ));
        }
        let mut next = self.clone();
        for (id, amount) in ids.iter().zip(amounts) {
            let Some(id) = bin_id(id) else {
                return invalid(format!("withdrawal from bin {id} beyond the last bin"));
            };
            let Some(bin) = next.bin(id).checked_sub(amount) else {
                return invalid(format!("withdrawal exceeds the reserves of bin {id}"));
            };
            let Some(reserves) = next.reserves.checked_sub(amount) else {
                return invalid("withdrawal exceeds the pair reserves");
            };
            next.set_bin(id, bin);
            next.reserves = reserves;
        }
        Transition::Next(next)
    }

    /// The protocol share moves to the fee accumulator, the reserves only change with
    /// the deposit that follows
    pub(super) fn apply_composition_fees(
        &self,
        id: u32,
        total_fees: Amounts,
        protocol_fees: Amounts,
    ) -> Transition<Self> {
        if !protocol_fees.all_le(&total_fees) {
            return invalid("composition protocol fees exceed total fees");
        }
        if let Some((fee_bin, _)) = self.unsettled_composition {
            return invalid(format!(
                "composition fee on bin {id} while bin {fee_bin} awaits its deposit"
            ));
        }
        if protocol_fees.is_zero() {
            return Transition::NoOp;
        }
        let Some(fees) = self.protocol_fees.checked_add(&protocol_fees) else {
            return invalid("composition fees overflow");
        };
        let mut next = self.clone();
        next.protocol_fees = fees;
        next.unsettled_composition = Some((id, protocol_fees));
        Transition::Next(next)
    }

    pub(super) fn apply_flash_loan(
        &self,
        active_id: u32,
        total_fees: Amounts,
        protocol_fees: Amounts,
    ) -> Transition<Self> {
        if !protocol_fees.all_le(&total_fees) {
            return invalid("flash loan protocol fees exceed total fees");
        }
        let Some(bin) = total_fees
            .checked_sub(&protocol_fees)
            .and_then(|lp_fees| self.bin(active_id).checked_add(&lp_fees))
        else {
            return invalid(format!("flash loan fees overflow bin {active_id}"));
        };
        let (Some(reserves), Some(fees)) = (
            self.reserves.checked_add(&total_fees),
            self.protocol_fees.checked_add(&protocol_fees),
        ) else {
            return invalid("flash loan fees overflow");
        };
        let mut next = self.clone();
        next.set_bin(active_id, bin);
        next.reserves = reserves;
        next.protocol_fees = fees;
        Transition::Next(next)
    }

    pub(super) fn apply_collected_fees(&self, collected: Amounts) -> Transition<Self> {
        let (Some(fees), Some(reserves)) = (
            self.protocol_fees.checked_sub(&collected),
            self.reserves.checked_sub(&collected),
        ) else {
            return invalid("collected more protocol fees than accrued");
        };
        let mut next = self.clone();
        next.protocol_fees = fees;
        next.reserves = reserves;
        Transition::Next(next)
    }

    pub(super) fn apply_static_fee(&self, params: StaticFeeParameters) -> Transition<Self> {
        if params == self.static_fee {
            return Transition::NoOp;
        }
        let mut next = self.clone();
        next.static_fee = params;
        Transition::Next(next)
    }

    pub(super) fn apply_forced_decay(
        &self,
        id_reference: u32,
        volatility_reference: u32,
    ) -> Transition<Self> {
        let mut next = self.clone();
        next.variable_fee.id_reference = id_reference;
        next.variable_fee.volatility_reference = volatility_reference;
        Transition::Next(next)
    }
}

fn bin_id(id: &U256) -> Option<u32> {
    u32::try_from(*id).ok().filter(|id| *id <= MAX_BIN_ID)
}
