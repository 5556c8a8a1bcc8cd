//! Unsigned fixed-point arithmetic on 256-bit integers.
//!
//! Every amount in the ledger (asset quantities, values, share balances,
//! rates, prices) is a `U256` in the smallest unit of its domain. Products are
//! widened to 512 bits before dividing, so `a * b / c` only fails when the
//! final quotient does not fit. All divisions floor unless the `_ceil` variant
//! is used explicitly.

use crate::error::ArithmeticViolation;
use primitive_types::{U256, U512};

/// Share units per whole share (shares carry 18 decimals).
pub const SHARE_DECIMALS: u8 = 18;

/// Implied decimals of oracle rates and fee rates.
pub const RATE_DECIMALS: u8 = 18;

/// Largest `n` for which `10^n` fits in a U256.
pub const MAX_DECIMALS: u8 = 77;

/// Milliseconds in a 365-day year.
pub const MS_PER_YEAR: u64 = 365 * 24 * 60 * 60 * 1000;

/// `10^18`: the number of share units in one share.
pub fn units_per_share() -> U256 {
    U256::exp10(SHARE_DECIMALS as usize)
}

/// `10^18`: the fixed precision of rates (1.0 == `rate_precision()`).
pub fn rate_precision() -> U256 {
    U256::exp10(RATE_DECIMALS as usize)
}

/// `10^exp` as a U256. Decimals come from oracles, so an absurd exponent is
/// an error rather than a panic.
pub fn pow10(exp: u8) -> Result<U256, ArithmeticViolation> {
    if exp > MAX_DECIMALS {
        return Err(ArithmeticViolation::Overflow);
    }
    Ok(U256::exp10(exp as usize))
}

/// `a * b / denominator`, rounded toward zero.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, ArithmeticViolation> {
    if denominator.is_zero() {
        return Err(ArithmeticViolation::DivisionByZero);
    }
    let quotient = a.full_mul(b) / U512::from(denominator);
    narrow(quotient)
}

/// `a * b / denominator`, rounded away from zero.
///
/// Only used for quantities the fund receives, so rounding is never in the
/// counterparty's favour.
pub fn mul_div_ceil(a: U256, b: U256, denominator: U256) -> Result<U256, ArithmeticViolation> {
    if denominator.is_zero() {
        return Err(ArithmeticViolation::DivisionByZero);
    }
    let product = a.full_mul(b);
    let denominator = U512::from(denominator);
    let mut quotient = product / denominator;
    if !(product % denominator).is_zero() {
        quotient += U512::one();
    }
    narrow(quotient)
}

pub fn checked_add(a: U256, b: U256) -> Result<U256, ArithmeticViolation> {
    a.checked_add(b).ok_or(ArithmeticViolation::Overflow)
}

pub fn checked_sub(a: U256, b: U256) -> Result<U256, ArithmeticViolation> {
    a.checked_sub(b).ok_or(ArithmeticViolation::Underflow)
}

pub fn checked_mul(a: U256, b: U256) -> Result<U256, ArithmeticViolation> {
    a.checked_mul(b).ok_or(ArithmeticViolation::Overflow)
}

/// Convert `amount` of an asset with `from_decimals` into an asset with
/// `to_decimals` at `rate` (whole-to-whole, `RATE_DECIMALS` implied).
///
/// Computes `amount * rate * 10^to / (10^from * 10^18)` as one `mul_div`,
/// folding the decimal difference into whichever side keeps it integral.
pub fn convert_quantity(
    amount: U256,
    from_decimals: u8,
    to_decimals: u8,
    rate: U256,
) -> Result<U256, ArithmeticViolation> {
    if to_decimals >= from_decimals {
        let scaled_rate = checked_mul(rate, pow10(to_decimals)? / pow10(from_decimals)?)?;
        mul_div(amount, scaled_rate, rate_precision())
    } else {
        let denominator = checked_mul(rate_precision(), pow10(from_decimals)? / pow10(to_decimals)?)?;
        mul_div(amount, rate, denominator)
    }
}

fn narrow(value: U512) -> Result<U256, ArithmeticViolation> {
    if value.bits() > 256 {
        return Err(ArithmeticViolation::Overflow);
    }
    let words = value.0;
    Ok(U256([words[0], words[1], words[2], words[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u128) -> U256 {
        U256::from(v)
    }

    #[test]
    fn test_mul_div_floors() {
        assert_eq!(mul_div(u(10), u(10), u(3)).unwrap(), u(33));
        assert_eq!(mul_div_ceil(u(10), u(10), u(3)).unwrap(), u(34));
        assert_eq!(mul_div_ceil(u(10), u(9), u(3)).unwrap(), u(30));
    }

    #[test]
    fn test_mul_div_rejects_zero_denominator() {
        assert_eq!(
            mul_div(u(1), u(1), U256::zero()),
            Err(ArithmeticViolation::DivisionByZero)
        );
        assert_eq!(
            mul_div_ceil(u(1), u(1), U256::zero()),
            Err(ArithmeticViolation::DivisionByZero)
        );
    }

    #[test]
    fn test_mul_div_survives_wide_intermediate() {
        // MAX * 4 overflows 256 bits, but dividing by 8 brings it back.
        let result = mul_div(U256::MAX, u(4), u(8)).unwrap();
        assert_eq!(result, U256::MAX / 2);
    }

    #[test]
    fn test_mul_div_reports_overflowing_quotient() {
        assert_eq!(
            mul_div(U256::MAX, u(2), u(1)),
            Err(ArithmeticViolation::Overflow)
        );
    }

    #[test]
    fn test_convert_quantity_scales_decimals_up() {
        // 2 whole units of a 6-decimal asset at rate 1.5 into an 18-decimal quote.
        let amount = u(2_000_000);
        let rate = u(1_500_000_000_000_000_000);
        let value = convert_quantity(amount, 6, 18, rate).unwrap();
        assert_eq!(value, u(3_000_000_000_000_000_000));
    }

    #[test]
    fn test_convert_quantity_scales_decimals_down() {
        // 1 whole unit of an 18-decimal asset at rate 2000 into a 6-decimal quote.
        let amount = units_per_share();
        let rate = u(2000) * rate_precision();
        let value = convert_quantity(amount, 18, 6, rate).unwrap();
        assert_eq!(value, u(2_000_000_000));
    }

    #[test]
    fn test_convert_quantity_truncates_dust() {
        // 1 base unit of an 18-decimal asset is far below one 6-decimal base unit.
        let value = convert_quantity(u(1), 18, 6, rate_precision()).unwrap();
        assert_eq!(value, U256::zero());
    }

    #[test]
    fn test_pow10_rejects_exponents_past_u256() {
        assert_eq!(pow10(MAX_DECIMALS).unwrap(), U256::exp10(77));
        assert_eq!(pow10(78), Err(ArithmeticViolation::Overflow));
        assert_eq!(
            convert_quantity(u(1), 100, 18, rate_precision()),
            Err(ArithmeticViolation::Overflow)
        );
        assert_eq!(
            convert_quantity(u(1), 18, 200, rate_precision()),
            Err(ArithmeticViolation::Overflow)
        );
    }

    #[test]
    fn test_checked_helpers() {
        assert_eq!(checked_sub(u(1), u(2)), Err(ArithmeticViolation::Underflow));
        assert_eq!(
            checked_add(U256::MAX, u(1)),
            Err(ArithmeticViolation::Overflow)
        );
        assert_eq!(checked_mul(u(3), u(4)).unwrap(), u(12));
    }
}
