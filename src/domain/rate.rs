//! Price rates, valuation results and asset quantities.

use crate::domain::{AssetId, TimeMs};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Which oracle rate a computation reads.
///
/// Canonical rates are aggregated and validated; they are the only rates
/// allowed to drive fee settlement or share minting/burning. Live rates are
/// spot quotes for read-only views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateMode {
    Canonical,
    Live,
}

impl std::fmt::Display for RateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateMode::Canonical => write!(f, "canonical"),
            RateMode::Live => write!(f, "live"),
        }
    }
}

/// A conversion rate with 18 implied decimals, as reported by an oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pub value: U256,
    pub is_valid: bool,
    /// When the rate was produced; live rates carry none.
    pub timestamp: Option<TimeMs>,
}

impl Rate {
    pub fn valid(value: U256, timestamp: Option<TimeMs>) -> Self {
        Self {
            value,
            is_valid: true,
            timestamp,
        }
    }

    pub fn invalid() -> Self {
        Self {
            value: U256::zero(),
            is_valid: false,
            timestamp: None,
        }
    }

    /// Whether this rate may be used at `now`.
    ///
    /// A zero rate is never usable: it cannot be told apart from a broken feed.
    pub fn is_usable(&self, now: TimeMs, max_age_ms: Option<i64>) -> bool {
        if !self.is_valid || self.value.is_zero() {
            return false;
        }
        match (max_age_ms, self.timestamp) {
            (Some(max_age), Some(ts)) => now.as_ms().saturating_sub(ts.as_ms()) <= max_age,
            _ => true,
        }
    }
}

/// Value of a quantity in the quote asset, tagged with its validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Valuation {
    pub value: U256,
    pub is_valid: bool,
}

impl Valuation {
    pub fn valid(value: U256) -> Self {
        Self {
            value,
            is_valid: true,
        }
    }

    /// The `(0, invalid)` result for assets that cannot be valued.
    pub fn invalid() -> Self {
        Self {
            value: U256::zero(),
            is_valid: false,
        }
    }
}

/// A quantity of one asset in its smallest unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset: AssetId,
    pub amount: U256,
}

impl AssetAmount {
    pub fn new(asset: AssetId, amount: U256) -> Self {
        Self { asset, amount }
    }
}
