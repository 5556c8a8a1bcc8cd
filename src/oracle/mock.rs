//! Mock oracle for testing without a price network.

use super::{DerivativeOracle, DerivativeRates, PriceOracle};
use crate::domain::{AssetId, Rate, TimeMs};
use primitive_types::U256;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Mock oracle that returns predefined rates.
///
/// Implements both [`PriceOracle`] and [`DerivativeOracle`] so one instance
/// can back a whole valuation. Canonical rates sit behind a lock so a shared
/// instance can be repriced mid-scenario.
#[derive(Debug)]
pub struct MockPriceOracle {
    quote: AssetId,
    decimals: HashMap<AssetId, u8>,
    canonical: RwLock<HashMap<AssetId, Rate>>,
    live: HashMap<AssetId, Rate>,
    derivative_decimals: HashMap<AssetId, u8>,
    derivatives: HashMap<AssetId, DerivativeRates>,
}

impl MockPriceOracle {
    /// Create a mock oracle quoting in `quote` with `quote_decimals`.
    pub fn new(quote: AssetId, quote_decimals: u8) -> Self {
        let mut decimals = HashMap::new();
        decimals.insert(quote.clone(), quote_decimals);
        Self {
            quote,
            decimals,
            canonical: RwLock::new(HashMap::new()),
            live: HashMap::new(),
            derivative_decimals: HashMap::new(),
            derivatives: HashMap::new(),
        }
    }

    /// Register a primitive asset.
    pub fn with_asset(mut self, asset: AssetId, decimals: u8) -> Self {
        self.decimals.insert(asset, decimals);
        self
    }

    /// Set a valid canonical rate produced at `timestamp`.
    pub fn with_rate(self, asset: AssetId, rate: U256, timestamp: TimeMs) -> Self {
        self.set_rate(asset, rate, timestamp);
        self
    }

    /// Set a valid live rate.
    pub fn with_live_rate(mut self, asset: AssetId, rate: U256) -> Self {
        self.live.insert(asset, Rate::valid(rate, None));
        self
    }

    /// Mark the canonical rate of `asset` invalid, keeping its value.
    pub fn with_invalid_rate(self, asset: AssetId) -> Self {
        self.invalidate(asset);
        self
    }

    /// Register a derivative and its per-unit breakdown.
    pub fn with_derivative(
        mut self,
        derivative: AssetId,
        decimals: u8,
        underlyings: Vec<(AssetId, U256)>,
    ) -> Self {
        let (underlyings, rates): (Vec<AssetId>, Vec<U256>) = underlyings.into_iter().unzip();
        self.derivative_decimals.insert(derivative.clone(), decimals);
        self.derivatives
            .insert(derivative, DerivativeRates { underlyings, rates });
        self
    }

    /// Replace the canonical rate in place, for scenarios where prices move.
    pub fn set_rate(&self, asset: AssetId, rate: U256, timestamp: TimeMs) {
        self.canonical
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(asset, Rate::valid(rate, Some(timestamp)));
    }

    /// Flag the canonical rate of `asset` invalid in place.
    pub fn invalidate(&self, asset: AssetId) {
        let mut canonical = self.canonical.write().unwrap_or_else(PoisonError::into_inner);
        canonical.entry(asset).or_insert_with(Rate::invalid).is_valid = false;
    }

    fn canonical_entry(&self, asset: &AssetId) -> Option<Rate> {
        self.canonical
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset)
            .copied()
    }
}

impl PriceOracle for MockPriceOracle {
    fn quote_asset(&self) -> &AssetId {
        &self.quote
    }

    fn decimals(&self, asset: &AssetId) -> Option<u8> {
        self.decimals.get(asset).copied()
    }

    fn canonical_rate(&self, asset: &AssetId, quote: &AssetId) -> Rate {
        if quote != &self.quote || !self.decimals.contains_key(asset) {
            return Rate::invalid();
        }
        self.canonical_entry(asset).unwrap_or_else(Rate::invalid)
    }

    fn live_rate(&self, asset: &AssetId, quote: &AssetId) -> Rate {
        if quote != &self.quote || !self.decimals.contains_key(asset) {
            return Rate::invalid();
        }
        // Fall back to the canonical value when no spot quote was set.
        self.live.get(asset).copied().unwrap_or_else(|| {
            let canonical = self.canonical_entry(asset).unwrap_or_else(Rate::invalid);
            Rate {
                timestamp: None,
                ..canonical
            }
        })
    }
}

impl DerivativeOracle for MockPriceOracle {
    fn decimals(&self, derivative: &AssetId) -> Option<u8> {
        self.derivative_decimals.get(derivative).copied()
    }

    fn rates_to_underlyings(&self, derivative: &AssetId) -> Option<DerivativeRates> {
        self.derivatives.get(derivative).cloned()
    }
}
