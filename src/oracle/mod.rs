//! Price oracle abstraction for primitive and derivative assets.

use crate::domain::{AssetId, Rate};
use primitive_types::U256;
use std::fmt;

pub mod mock;

pub use mock::MockPriceOracle;

/// Source of conversion rates between registered assets and a quote asset.
///
/// Implementations never fail: an asset they cannot price yields a rate with
/// `is_valid == false`, and the caller decides what that means.
pub trait PriceOracle: Send + Sync + fmt::Debug {
    /// Asset every rate from this oracle is quoted in.
    fn quote_asset(&self) -> &AssetId;

    /// Decimals of a registered primitive asset, or None if unregistered.
    fn decimals(&self, asset: &AssetId) -> Option<u8>;

    /// Aggregated, validated rate suitable for settlement.
    ///
    /// # Returns
    /// Quote whole units per whole `asset` unit, 18 implied decimals, plus the
    /// time the rate was produced.
    fn canonical_rate(&self, asset: &AssetId, quote: &AssetId) -> Rate;

    /// Spot rate for read-only quotes. Carries no timestamp.
    fn live_rate(&self, asset: &AssetId, quote: &AssetId) -> Rate;
}

/// Breakdown of one derivative unit into its underlyings.
///
/// `underlyings` and `rates` are parallel arrays; `rates[i]` is the number of
/// whole `underlyings[i]` units per whole derivative unit, 18 implied decimals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeRates {
    pub underlyings: Vec<AssetId>,
    pub rates: Vec<U256>,
}

impl DerivativeRates {
    /// Pair underlyings with their rates, or None if the arrays are malformed.
    pub fn components(&self) -> Option<Vec<(&AssetId, U256)>> {
        if self.underlyings.is_empty() || self.underlyings.len() != self.rates.len() {
            return None;
        }
        Some(self.underlyings.iter().zip(self.rates.iter().copied()).collect())
    }
}

/// Source of derivative-to-underlying conversion rates.
pub trait DerivativeOracle: Send + Sync + fmt::Debug {
    /// Decimals of a registered derivative, or None if unregistered.
    fn decimals(&self, derivative: &AssetId) -> Option<u8>;

    /// Per-unit breakdown, or None if `derivative` is not registered.
    fn rates_to_underlyings(&self, derivative: &AssetId) -> Option<DerivativeRates>;
}
