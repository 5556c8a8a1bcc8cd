//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Used at the edges of the ledger: parsing human-entered rates ("0.02") and
//! rendering base-unit amounts for logs and reports. Accounting itself never
//! runs on decimals; see [`crate::domain::fixed`].

use primitive_types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest scale rust_decimal can represent.
const MAX_SCALE: u8 = 28;

/// Human-facing decimal amount. Serializes as a JSON number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        let normalized = self.0.normalize();
        format!("{}", normalized)
    }

    /// Returns true if the value is < 0.
    pub fn is_negative(&self) -> bool {
        !self.0.is_zero() && self.0.is_sign_negative()
    }

    /// Scale to an integer amount with `decimals` fractional digits, truncating
    /// anything finer.
    ///
    /// Returns None for negative values or when the scaled value does not fit.
    pub fn to_base_units(&self, decimals: u8) -> Option<U256> {
        if self.is_negative() || decimals > MAX_SCALE {
            return None;
        }
        let factor = RustDecimal::from_i128_with_scale(10i128.pow(decimals as u32), 0);
        let scaled = self.0.checked_mul(factor)?.trunc();
        scaled.to_u128().map(U256::from)
    }

    /// Interpret an integer amount with `decimals` fractional digits.
    ///
    /// Returns None when the amount exceeds rust_decimal's 96-bit mantissa.
    pub fn from_base_units(amount: U256, decimals: u8) -> Option<Self> {
        if amount.bits() > 96 || decimals > MAX_SCALE {
            return None;
        }
        let raw = i128::try_from(amount.as_u128()).ok()?;
        RustDecimal::try_from_i128_with_scale(raw, decimals as u32)
            .ok()
            .map(Decimal)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

/// Render a base-unit amount for logs, falling back to the raw integer when it
/// is too large for a decimal.
pub fn display_units(amount: U256, decimals: u8) -> String {
    match Decimal::from_base_units(amount, decimals) {
        Some(d) => d.to_canonical_string(),
        None => format!("{} (base units)", amount),
    }
}
