//! Asset valuation against a quote asset.
//!
//! Each asset is resolved once into a [`PriceFeedKind`]. Primitives are
//! priced directly by the [`PriceOracle`]; derivatives are decomposed
//! depth-first into underlyings, with the current path kept for cycle
//! detection. Validity is AND-reduced across every leaf, and the traversal
//! never stops early so a cycle deep in the tree is always reported.

use crate::domain::fixed::{checked_add, convert_quantity};
use crate::domain::{AssetId, RateMode, TimeMs, Valuation};
use crate::error::FundError;
use crate::oracle::{DerivativeOracle, DerivativeRates, PriceOracle};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How an asset is priced, resolved once per valuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceFeedKind {
    Quote,
    Primitive { decimals: u8 },
    Derivative { decimals: u8, rates: DerivativeRates },
    Unregistered,
}

/// Value of one holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingValuation {
    pub asset: AssetId,
    pub amount: U256,
    pub value: Valuation,
}

/// Result of valuing every owned asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GavReport {
    pub gav: U256,
    pub is_valid: bool,
    pub holdings: Vec<HoldingValuation>,
}

impl GavReport {
    /// Assets whose valuation came back invalid.
    pub fn invalid_assets(&self) -> Vec<AssetId> {
        self.holdings
            .iter()
            .filter(|h| !h.value.is_valid)
            .map(|h| h.asset.clone())
            .collect()
    }

    /// The GAV, or `InvalidValuation` naming the offending assets.
    pub fn require_valid(&self) -> Result<U256, FundError> {
        if self.is_valid {
            Ok(self.gav)
        } else {
            Err(FundError::InvalidValuation {
                assets: self.invalid_assets(),
            })
        }
    }
}

/// Values assets in a fixed quote asset with a fixed rate mode.
///
/// The mode is chosen at construction so one settlement can never mix
/// canonical and live rates.
#[derive(Debug, Clone, Copy)]
pub struct ValuationEngine<'a> {
    prices: &'a dyn PriceOracle,
    derivatives: Option<&'a dyn DerivativeOracle>,
    quote: &'a AssetId,
    quote_decimals: u8,
    mode: RateMode,
    now: TimeMs,
    max_rate_age_ms: Option<i64>,
}

impl<'a> ValuationEngine<'a> {
    pub fn new(
        prices: &'a dyn PriceOracle,
        quote: &'a AssetId,
        quote_decimals: u8,
        mode: RateMode,
        now: TimeMs,
    ) -> Self {
        Self {
            prices,
            derivatives: None,
            quote,
            quote_decimals,
            mode,
            now,
            max_rate_age_ms: None,
        }
    }

    pub fn with_derivatives(mut self, derivatives: Option<&'a dyn DerivativeOracle>) -> Self {
        self.derivatives = derivatives;
        self
    }

    /// Treat canonical rates older than `max_age_ms` as invalid.
    pub fn with_max_rate_age(mut self, max_age_ms: Option<i64>) -> Self {
        self.max_rate_age_ms = max_age_ms;
        self
    }

    pub fn mode(&self) -> RateMode {
        self.mode
    }

    /// Fail unless both the oracle and the caller quote in the fund's asset.
    pub fn ensure_quote(&self, quote: &AssetId) -> Result<(), FundError> {
        let oracle_quote = self.prices.quote_asset();
        if oracle_quote != self.quote {
            return Err(FundError::QuoteAssetMismatch {
                expected: self.quote.clone(),
                actual: oracle_quote.clone(),
            });
        }
        if quote != self.quote {
            return Err(FundError::QuoteAssetMismatch {
                expected: self.quote.clone(),
                actual: quote.clone(),
            });
        }
        Ok(())
    }

    pub fn resolve(&self, asset: &AssetId) -> PriceFeedKind {
        if asset == self.quote {
            return PriceFeedKind::Quote;
        }
        if let Some(decimals) = self.prices.decimals(asset) {
            return PriceFeedKind::Primitive { decimals };
        }
        if let Some(derivatives) = self.derivatives {
            if let (Some(decimals), Some(rates)) = (
                derivatives.decimals(asset),
                derivatives.rates_to_underlyings(asset),
            ) {
                return PriceFeedKind::Derivative { decimals, rates };
            }
        }
        PriceFeedKind::Unregistered
    }

    /// Value `amount` of `asset` in `quote`.
    ///
    /// An unpriceable asset yields `(0, invalid)`; only a quote mismatch,
    /// a derivative cycle or arithmetic failure is an error.
    pub fn value_of_asset(
        &self,
        asset: &AssetId,
        amount: U256,
        quote: &AssetId,
    ) -> Result<Valuation, FundError> {
        self.ensure_quote(quote)?;
        let mut path = Vec::new();
        self.value_in_path(asset, amount, &mut path)
    }

    /// Sum the value of `holdings` into a [`GavReport`].
    pub fn fund_gav<'h>(
        &self,
        holdings: impl IntoIterator<Item = (&'h AssetId, U256)>,
    ) -> Result<GavReport, FundError> {
        self.ensure_quote(self.quote)?;

        let mut gav = U256::zero();
        let mut is_valid = true;
        let mut valued = Vec::new();
        for (asset, amount) in holdings {
            let mut path = Vec::new();
            let value = self.value_in_path(asset, amount, &mut path)?;
            if value.is_valid {
                gav = checked_add(gav, value.value)?;
            } else {
                is_valid = false;
                warn!(asset = %asset, amount = %amount, mode = %self.mode, "Invalid valuation");
            }
            valued.push(HoldingValuation {
                asset: asset.clone(),
                amount,
                value,
            });
        }

        Ok(GavReport {
            gav: if is_valid { gav } else { U256::zero() },
            is_valid,
            holdings: valued,
        })
    }

    fn value_in_path(
        &self,
        asset: &AssetId,
        amount: U256,
        path: &mut Vec<AssetId>,
    ) -> Result<Valuation, FundError> {
        match self.resolve(asset) {
            PriceFeedKind::Quote => Ok(Valuation::valid(amount)),
            PriceFeedKind::Primitive { decimals } => self.value_primitive(asset, amount, decimals),
            PriceFeedKind::Derivative { decimals, rates } => {
                if path.contains(asset) {
                    let mut cycle = path.clone();
                    cycle.push(asset.clone());
                    return Err(FundError::DerivativeCycle {
                        asset: asset.clone(),
                        path: cycle,
                    });
                }
                path.push(asset.clone());
                let result = self.value_derivative(asset, amount, decimals, &rates, path);
                path.pop();
                result
            }
            PriceFeedKind::Unregistered => {
                debug!(asset = %asset, "Asset not registered with any oracle");
                Ok(Valuation::invalid())
            }
        }
    }

    fn value_primitive(
        &self,
        asset: &AssetId,
        amount: U256,
        decimals: u8,
    ) -> Result<Valuation, FundError> {
        let rate = match self.mode {
            RateMode::Canonical => self.prices.canonical_rate(asset, self.quote),
            RateMode::Live => self.prices.live_rate(asset, self.quote),
        };
        if !rate.is_usable(self.now, self.max_rate_age_ms) {
            debug!(asset = %asset, rate = %rate.value, valid = rate.is_valid, "Unusable rate");
            return Ok(Valuation::invalid());
        }
        let value = convert_quantity(amount, decimals, self.quote_decimals, rate.value)?;
        debug!(asset = %asset, amount = %amount, value = %value, "Valued primitive");
        Ok(Valuation::valid(value))
    }

    fn value_derivative(
        &self,
        asset: &AssetId,
        amount: U256,
        decimals: u8,
        rates: &DerivativeRates,
        path: &mut Vec<AssetId>,
    ) -> Result<Valuation, FundError> {
        let Some(components) = rates.components() else {
            debug!(asset = %asset, "Malformed derivative breakdown");
            return Ok(Valuation::invalid());
        };

        let mut total = U256::zero();
        let mut is_valid = true;
        for (underlying, rate) in components {
            let Some(underlying_decimals) = self.decimals_of(underlying) else {
                is_valid = false;
                continue;
            };
            let underlying_amount = convert_quantity(amount, decimals, underlying_decimals, rate)?;
            let value = self.value_in_path(underlying, underlying_amount, path)?;
            is_valid &= value.is_valid;
            if value.is_valid {
                total = checked_add(total, value.value)?;
            }
        }

        if !is_valid {
            return Ok(Valuation::invalid());
        }
        debug!(asset = %asset, amount = %amount, value = %total, "Valued derivative");
        Ok(Valuation::valid(total))
    }

    fn decimals_of(&self, asset: &AssetId) -> Option<u8> {
        if asset == self.quote {
            return Some(self.quote_decimals);
        }
        self.prices
            .decimals(asset)
            .or_else(|| self.derivatives.and_then(|d| d.decimals(asset)))
    }
}
