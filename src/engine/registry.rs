use crate::domain::AssetId;
use crate::error::PreconditionViolation;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Default capacity of the owned assets list.
pub const DEFAULT_MAX_OWNED_ASSETS: usize = 20;

/// Ordered set of assets tracked for valuation.
///
/// The quote asset is always present: it is inserted on construction and
/// `refresh` never prunes it, even at zero balance. Every other asset is
/// present iff it was tracked and its balance has not been measured at zero
/// during a refresh since.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedAssets {
    quote: AssetId,
    assets: Vec<AssetId>,
    limit: usize,
}

impl OwnedAssets {
    pub fn new(quote: AssetId, limit: usize) -> Self {
        Self {
            assets: vec![quote.clone()],
            quote,
            limit: limit.max(1),
        }
    }

    /// Rebuild from a persisted ordering. Duplicates are dropped and the
    /// quote asset is prepended if missing.
    pub fn restore(quote: AssetId, limit: usize, assets: impl IntoIterator<Item = AssetId>) -> Self {
        let mut owned = Self::new(quote, limit);
        for asset in assets {
            if !owned.contains(&asset) {
                owned.assets.push(asset);
            }
        }
        owned
    }

    pub fn quote(&self) -> &AssetId {
        &self.quote
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn contains(&self, asset: &AssetId) -> bool {
        self.assets.iter().any(|a| a == asset)
    }

    pub fn as_slice(&self) -> &[AssetId] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Append `asset` if absent.
    ///
    /// # Returns
    /// `true` if the asset was newly added.
    ///
    /// # Errors
    /// `TooManyAssets` when the list is full and `asset` is not yet tracked.
    pub fn track(&mut self, asset: &AssetId) -> Result<bool, PreconditionViolation> {
        if self.contains(asset) {
            return Ok(false);
        }
        if self.assets.len() >= self.limit {
            return Err(PreconditionViolation::TooManyAssets {
                asset: asset.clone(),
                limit: self.limit,
            });
        }
        self.assets.push(asset.clone());
        Ok(true)
    }

    /// Prune every non-quote asset whose measured balance is exactly zero.
    ///
    /// Surviving assets keep their relative order, so calling this twice with
    /// unchanged balances yields the same list.
    ///
    /// # Returns
    /// The pruned assets, in list order.
    pub fn refresh(&mut self, balance_of: impl Fn(&AssetId) -> U256) -> Vec<AssetId> {
        let quote = &self.quote;
        let mut pruned = Vec::new();
        self.assets.retain(|asset| {
            if asset == quote || !balance_of(asset).is_zero() {
                true
            } else {
                pruned.push(asset.clone());
                false
            }
        });
        pruned
    }
}
