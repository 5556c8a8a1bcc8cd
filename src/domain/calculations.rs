//! Point-in-time accounting snapshot.

use crate::domain::TimeMs;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Consistent point-in-time view of a fund's accounts.
///
/// The snapshot stored on a fund is replaced wholesale on every fee
/// settlement and is never edited field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calculations {
    pub gross_asset_value: U256,
    pub unclaimed_management_fee: U256,
    pub unclaimed_performance_fee: U256,
    pub net_asset_value: U256,
    /// Quote base units per whole share.
    pub share_price: U256,
    /// Highest share price fees have been assessed at; never decreases.
    pub high_water_mark: U256,
    /// Shares that fees convert into at this point.
    pub fee_share_quantity: U256,
    pub total_supply: U256,
    pub timestamp: TimeMs,
}

impl Calculations {
    /// Snapshot of a fund that has never been valued.
    pub fn initial(initial_share_price: U256, timestamp: TimeMs) -> Self {
        Self {
            gross_asset_value: U256::zero(),
            unclaimed_management_fee: U256::zero(),
            unclaimed_performance_fee: U256::zero(),
            net_asset_value: U256::zero(),
            share_price: initial_share_price,
            high_water_mark: initial_share_price,
            fee_share_quantity: U256::zero(),
            total_supply: U256::zero(),
            timestamp,
        }
    }

    pub fn unclaimed_fees(&self) -> U256 {
        self.unclaimed_management_fee
            .saturating_add(self.unclaimed_performance_fee)
    }
}
