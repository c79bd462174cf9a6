//! Packed amount encoding shared by bin based pools
//!
//! Liquidity Book packs a pair of 128 bit amounts into a single `bytes32`:
//! the low 128 bits hold the token X component, the high 128 bits the token Y
//! component. Fees reported on their own only use the low half.

use crate::errors::DecodeError;
use alloy::primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Two token amounts decoded from (or destined to) a packed word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PackedAmounts {
    pub x: u128,
    pub y: u128,
}

/// Decode a big endian word of at most 256 bits into its two 128 bit halves
pub fn decode_amounts(packed: &[u8]) -> Result<PackedAmounts, DecodeError> {
    let value = word(packed)?;
    Ok(PackedAmounts {
        x: low_half(value),
        y: (value >> 128usize).to::<u128>(),
    })
}

/// Decode a single fee value from the low 128 bits, the high bits are discarded
pub fn decode_fee(packed: &[u8]) -> Result<u128, DecodeError> {
    word(packed).map(low_half)
}

/// Pack two amounts, x in the low half
pub fn encode_amounts(x: u128, y: u128) -> B256 {
    let value = (U256::from(y) << 128usize) | U256::from(x);
    B256::from(value.to_be_bytes::<32>())
}

fn word(packed: &[u8]) -> Result<U256, DecodeError> {
    if packed.len() > 32 {
        return Err(DecodeError::PackedTooWide(packed.len()));
    }
    U256::try_from_be_slice(packed).ok_or(DecodeError::PackedTooWide(packed.len()))
}

fn low_half(value: U256) -> u128 {
    (value & U256::from(u128::MAX)).to::<u128>()
}

/// Per token amounts held in pool state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Amounts {
    pub x: U256,
    pub y: U256,
}

impl Amounts {
    pub const ZERO: Amounts = Amounts {
        x: U256::ZERO,
        y: U256::ZERO,
    };

    pub fn new(x: U256, y: U256) -> Self {
        Self { x, y }
    }

    pub fn is_zero(&self) -> bool {
        self.x.is_zero() && self.y.is_zero()
    }

    /// Componentwise `<=`
    pub fn all_le(&self, other: &Amounts) -> bool {
        self.x <= other.x && self.y <= other.y
    }

    pub fn checked_add(&self, other: &Amounts) -> Option<Amounts> {
        Some(Amounts {
            x: self.x.checked_add(other.x)?,
            y: self.y.checked_add(other.y)?,
        })
    }

    pub fn checked_sub(&self, other: &Amounts) -> Option<Amounts> {
        Some(Amounts {
            x: self.x.checked_sub(other.x)?,
            y: self.y.checked_sub(other.y)?,
        })
    }
}

impl From<PackedAmounts> for Amounts {
    fn from(packed: PackedAmounts) -> Self {
        Amounts {
            x: U256::from(packed.x),
            y: U256::from(packed.y),
        }
    }
}

// Saturating forms for test fixtures and summaries, transitions use the checked ones
impl Add for Amounts {
    type Output = Amounts;

    fn add(self, rhs: Amounts) -> Amounts {
        Amounts {
            x: self.x.saturating_add(rhs.x),
            y: self.y.saturating_add(rhs.y),
        }
    }
}

impl Sub for Amounts {
    type Output = Amounts;

    fn sub(self, rhs: Amounts) -> Amounts {
        Amounts {
            x: self.x.saturating_sub(rhs.x),
            y: self.y.saturating_sub(rhs.y),
        }
    }
}
