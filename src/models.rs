// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Billing Data Models
//!
//! Types exchanged with the billing hub.
//!
//! ## Amounts
//!
//! Bill amounts are currency values with a fractional part (`3.00`,
//! `2.5`, `0.000125`). They are held as exact decimals in
//! [`DecimalAmount`] and only converted to integer token units, rounding
//! up, at the moment a payment is authorized. Floating point never enters
//! the settlement path.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

/// Largest supported number of fractional digits.
pub const MAX_SCALE: u32 = 38;

// =============================================================================
// Decimal Amount
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid decimal amount: {0}")]
pub struct AmountError(String);

/// Exact decimal value `mantissa / 10^scale`.
///
/// Always kept in lowest terms (no trailing fractional zeros), so `5.50`
/// and `5.5` compare and hash equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "RawAmount")]
pub struct DecimalAmount {
    mantissa: i128,
    scale: u32,
}

/// Hubs send amounts either as JSON numbers or as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Number(serde_json::Number),
    Text(String),
}

impl TryFrom<RawAmount> for DecimalAmount {
    type Error = AmountError;

    fn try_from(raw: RawAmount) -> Result<Self, Self::Error> {
        match raw {
            RawAmount::Number(n) => n.to_string().parse(),
            RawAmount::Text(s) => s.parse(),
        }
    }
}

impl DecimalAmount {
    pub const ZERO: DecimalAmount = DecimalAmount {
        mantissa: 0,
        scale: 0,
    };

    pub fn new(mut mantissa: i128, mut scale: u32) -> Self {
        while scale > 0 && mantissa % 10 == 0 {
            mantissa /= 10;
            scale -= 1;
        }
        Self { mantissa, scale }
    }

    /// Interpret an integer token amount with the token's decimals.
    pub fn from_atomic(atomic: U256, decimals: u8) -> Option<Self> {
        let scale = u32::from(decimals);
        if scale > MAX_SCALE {
            return None;
        }
        let mantissa = i128::try_from(u128::try_from(atomic).ok()?).ok()?;
        Some(Self::new(mantissa, scale))
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    pub fn is_positive(&self) -> bool {
        self.mantissa > 0
    }

    fn mantissa_at(&self, scale: u32) -> Option<i128> {
        let factor = 10i128.checked_pow(scale.checked_sub(self.scale)?)?;
        self.mantissa.checked_mul(factor)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        let scale = self.scale.max(other.scale);
        let sum = self.mantissa_at(scale)?.checked_add(other.mantissa_at(scale)?)?;
        Some(Self::new(sum, scale))
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        let scale = self.scale.max(other.scale);
        let diff = self.mantissa_at(scale)?.checked_sub(other.mantissa_at(scale)?)?;
        Some(Self::new(diff, scale))
    }

    /// Integer token units for this amount, rounding any remainder up.
    ///
    /// Returns `None` for negative amounts or on overflow.
    pub fn to_atomic_ceil(&self, decimals: u8) -> Option<U256> {
        if self.mantissa < 0 {
            return None;
        }
        let target = u32::from(decimals);

        if self.scale <= target {
            let factor = U256::from(10u8).checked_pow(U256::from(target - self.scale))?;
            return U256::from(self.mantissa as u128).checked_mul(factor);
        }

        let divisor = 10i128.checked_pow(self.scale - target)?;
        let mut units = self.mantissa / divisor;
        if self.mantissa % divisor != 0 {
            units += 1;
        }
        Some(U256::from(units as u128))
    }
}

impl Ord for DecimalAmount {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        match (self.mantissa_at(scale), other.mantissa_at(scale)) {
            (Some(a), Some(b)) => a.cmp(&b),
            // Only reachable near the i128 limit.
            _ => {
                let a = self.mantissa as f64 / 10f64.powi(self.scale as i32);
                let b = other.mantissa as f64 / 10f64.powi(other.scale as i32);
                a.total_cmp(&b)
            }
        }
    }
}

impl PartialOrd for DecimalAmount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for DecimalAmount {
    type Err = AmountError;

    /// Accepts `[+-]digits[.digits][(e|E)[+-]digits]`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || AmountError(input.to_string());
        let s = input.trim();

        let (negative, rest) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let (number, exponent) = match rest.find(['e', 'E']) {
            Some(i) => (&rest[..i], rest[i + 1..].parse::<i64>().map_err(|_| invalid())?),
            None => (rest, 0),
        };

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        let digits = format!("{int_part}{frac_part}");
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let mut mantissa: i128 = digits.parse().map_err(|_| invalid())?;
        let mut scale = i64::try_from(frac_part.len())
            .ok()
            .and_then(|len| len.checked_sub(exponent))
            .ok_or_else(invalid)?;
        if scale < 0 {
            let factor = scale
                .checked_neg()
                .and_then(|shift| u32::try_from(shift).ok())
                .and_then(|e| 10i128.checked_pow(e))
                .ok_or_else(invalid)?;
            mantissa = mantissa.checked_mul(factor).ok_or_else(invalid)?;
            scale = 0;
        }
        if scale > i64::from(MAX_SCALE) {
            return Err(invalid());
        }

        if negative {
            mantissa = -mantissa;
        }
        Ok(Self::new(mantissa, scale as u32))
    }
}

impl fmt::Display for DecimalAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let digits = format!(
            "{:0>width$}",
            self.mantissa.unsigned_abs(),
            width = self.scale as usize + 1
        );
        let (int_part, frac_part) = digits.split_at(digits.len() - self.scale as usize);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

/// Render an atomic token amount in whole units, for logs.
pub fn format_units(atomic: U256, decimals: u8) -> String {
    match DecimalAmount::from_atomic(atomic, decimals) {
        Some(amount) => amount.to_string(),
        None => format!("{atomic}e-{decimals}"),
    }
}

// =============================================================================
// Bills
// =============================================================================

/// Hub-assigned bill identifier.
///
/// Opaque to the agent; echoed back verbatim when paying.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BillId {
    Number(u64),
    Text(String),
}

impl fmt::Display for BillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillId::Number(n) => write!(f, "{n}"),
            BillId::Text(s) => f.write_str(s),
        }
    }
}

/// An unpaid bill as reported by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Bill {
    pub bill_id: BillId,
    pub amount: DecimalAmount,
}

/// Sum the amounts of a batch of bills. `None` on overflow.
pub fn total_due(bills: &[Bill]) -> Option<DecimalAmount> {
    bills
        .iter()
        .try_fold(DecimalAmount::ZERO, |sum, bill| sum.checked_add(bill.amount))
}
