//! Management and performance fee accrual.
//!
//! Fees are expressed in quote base units and crystallized by minting new
//! shares to the manager. The management fee grows linearly with time and
//! GAV; the performance fee is charged only on the part of the share price
//! above the high-water-mark.

use crate::domain::fixed::{
    checked_add, checked_mul, checked_sub, mul_div, rate_precision, units_per_share, MS_PER_YEAR,
};
use crate::domain::{Calculations, TimeMs};
use crate::error::ArithmeticViolation;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name} fee rate {rate} exceeds 100% ({max})")]
pub struct InvalidFeeRate {
    pub name: &'static str,
    pub rate: U256,
    pub max: U256,
}

/// Fee rates with 18 implied decimals (`10^18` == 100%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Charged per 365-day year on GAV.
    management_rate: U256,
    /// Charged on gains above the high-water-mark.
    performance_rate: U256,
}

impl FeeSchedule {
    pub fn new(management_rate: U256, performance_rate: U256) -> Result<Self, InvalidFeeRate> {
        let max = rate_precision();
        if management_rate > max {
            return Err(InvalidFeeRate {
                name: "management",
                rate: management_rate,
                max,
            });
        }
        if performance_rate > max {
            return Err(InvalidFeeRate {
                name: "performance",
                rate: performance_rate,
                max,
            });
        }
        Ok(Self {
            management_rate,
            performance_rate,
        })
    }

    pub fn none() -> Self {
        Self {
            management_rate: U256::zero(),
            performance_rate: U256::zero(),
        }
    }

    pub fn management_rate(&self) -> U256 {
        self.management_rate
    }

    pub fn performance_rate(&self) -> U256 {
        self.performance_rate
    }
}

/// Fees accrued since the last settlement, in quote base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccruedFees {
    pub management: U256,
    pub performance: U256,
}

impl AccruedFees {
    pub fn total(&self) -> Result<U256, ArithmeticViolation> {
        checked_add(self.management, self.performance)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeeEngine {
    schedule: FeeSchedule,
}

impl FeeEngine {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// Fees accrued over `elapsed_ms` on `gav`.
    ///
    /// With no shares outstanding there is nobody to charge and both fees
    /// are zero. The performance fee compares the share price net of the
    /// management fee against `high_water_mark`.
    ///
    /// # Errors
    /// `FeeExceedsGav` if the total would exceed `gav`, plus the usual
    /// overflow conditions.
    pub fn accrue(
        &self,
        gav: U256,
        elapsed_ms: u64,
        total_supply: U256,
        high_water_mark: U256,
    ) -> Result<AccruedFees, ArithmeticViolation> {
        if total_supply.is_zero() || gav.is_zero() {
            return Ok(AccruedFees::default());
        }

        let rate_time = checked_mul(self.schedule.management_rate, U256::from(elapsed_ms))?;
        let per_year = checked_mul(rate_precision(), U256::from(MS_PER_YEAR))?;
        let management = mul_div(gav, rate_time, per_year)?.min(gav);

        let price_excl_management =
            mul_div(checked_sub(gav, management)?, units_per_share(), total_supply)?;
        let performance = if price_excl_management > high_water_mark {
            let gain = mul_div(
                price_excl_management - high_water_mark,
                total_supply,
                units_per_share(),
            )?;
            mul_div(gain, self.schedule.performance_rate, rate_precision())?
        } else {
            U256::zero()
        };

        let fees = AccruedFees {
            management,
            performance,
        };
        let total = fees.total()?;
        if total > gav {
            return Err(ArithmeticViolation::FeeExceedsGav { fees: total, gav });
        }
        Ok(fees)
    }

    /// Shares that crystallize `unclaimed` fees: `supply * unclaimed / gav`.
    pub fn fee_shares(
        total_supply: U256,
        unclaimed: U256,
        gav: U256,
    ) -> Result<U256, ArithmeticViolation> {
        if gav.is_zero() || unclaimed.is_zero() {
            return Ok(U256::zero());
        }
        mul_div(total_supply, unclaimed, gav)
    }

    /// Build the snapshot a settlement at `now` would write.
    ///
    /// `total_supply` in the result includes the fee shares, which is the
    /// supply once they are minted. The high-water-mark carries over from
    /// `previous` and only moves up.
    pub fn snapshot(
        &self,
        gav: U256,
        total_supply: U256,
        previous: &Calculations,
        initial_share_price: U256,
        now: TimeMs,
    ) -> Result<Calculations, ArithmeticViolation> {
        let elapsed = now.elapsed_since(previous.timestamp);
        let fees = self.accrue(gav, elapsed, total_supply, previous.high_water_mark)?;
        let unclaimed = fees.total()?;
        let fee_share_quantity = Self::fee_shares(total_supply, unclaimed, gav)?;
        let supply_after = checked_add(total_supply, fee_share_quantity)?;

        let share_price = if total_supply.is_zero() {
            initial_share_price
        } else {
            mul_div(gav, units_per_share(), supply_after)?
        };

        Ok(Calculations {
            gross_asset_value: gav,
            unclaimed_management_fee: fees.management,
            unclaimed_performance_fee: fees.performance,
            net_asset_value: checked_sub(gav, unclaimed)?,
            share_price,
            high_water_mark: previous.high_water_mark.max(share_price),
            fee_share_quantity,
            total_supply: supply_after,
            timestamp: now,
        })
    }
}
