//! Trade venue contract.
//!
//! A venue swaps assets held by the vault. Order encoding for any real
//! exchange lives outside this crate; the fund only needs the fill amount
//! and the custody movements the venue performs.

use crate::custody::{AssetCustody, FundView, Transfer};
use crate::domain::fixed::convert_quantity;
use crate::domain::{Address, AssetId};
use crate::error::{ArithmeticViolation, PreconditionViolation, TransferError};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VenueError {
    #[error("Venue does not trade {sell} for {buy}")]
    UnsupportedPair { sell: AssetId, buy: AssetId },
    #[error("Venue transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("Venue arithmetic failed: {0}")]
    Arithmetic(#[from] ArithmeticViolation),
    #[error("Venue rejected order: {0}")]
    Rejected(String),
}

/// Sell `sell_amount` of `sell_asset` for at least `min_buy_amount` of
/// `buy_asset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOrder {
    pub sell_asset: AssetId,
    pub sell_amount: U256,
    pub buy_asset: AssetId,
    pub min_buy_amount: U256,
}

impl TradeOrder {
    pub fn validate(&self) -> Result<(), PreconditionViolation> {
        if self.sell_amount.is_zero() {
            return Err(PreconditionViolation::ZeroAmount);
        }
        if self.sell_asset == self.buy_asset {
            return Err(PreconditionViolation::InvalidOrder(format!(
                "cannot trade {} for itself",
                self.sell_asset
            )));
        }
        Ok(())
    }
}

pub trait TradeVenue: Send + fmt::Debug {
    fn name(&self) -> &str;

    /// Fill `order` for `vault`, moving the sold asset out of the vault and
    /// the bought asset in.
    ///
    /// # Returns
    /// The amount of `order.buy_asset` delivered to the vault.
    fn execute(
        &mut self,
        order: &TradeOrder,
        vault: &Address,
        custody: &mut dyn AssetCustody,
        fund: &FundView<'_>,
    ) -> Result<U256, VenueError>;
}

/// Venue that fills every supported pair at a fixed rate from its own
/// inventory in custody.
#[derive(Debug, Clone)]
pub struct FixedRateVenue {
    address: Address,
    decimals: HashMap<AssetId, u8>,
    /// Whole buy units per whole sell unit, 18 implied decimals.
    rates: HashMap<(AssetId, AssetId), U256>,
}

impl FixedRateVenue {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            decimals: HashMap::new(),
            rates: HashMap::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn with_asset(mut self, asset: AssetId, decimals: u8) -> Self {
        self.decimals.insert(asset, decimals);
        self
    }

    pub fn with_pair(mut self, sell: AssetId, buy: AssetId, rate: U256) -> Self {
        self.rates.insert((sell, buy), rate);
        self
    }

    pub fn quote(&self, order: &TradeOrder) -> Result<U256, VenueError> {
        let unsupported = || VenueError::UnsupportedPair {
            sell: order.sell_asset.clone(),
            buy: order.buy_asset.clone(),
        };
        let rate = self
            .rates
            .get(&(order.sell_asset.clone(), order.buy_asset.clone()))
            .copied()
            .ok_or_else(unsupported)?;
        let sell_decimals = self.decimals.get(&order.sell_asset).copied().ok_or_else(unsupported)?;
        let buy_decimals = self.decimals.get(&order.buy_asset).copied().ok_or_else(unsupported)?;
        Ok(convert_quantity(
            order.sell_amount,
            sell_decimals,
            buy_decimals,
            rate,
        )?)
    }
}

impl TradeVenue for FixedRateVenue {
    fn name(&self) -> &str {
        "fixed-rate"
    }

    fn execute(
        &mut self,
        order: &TradeOrder,
        vault: &Address,
        custody: &mut dyn AssetCustody,
        fund: &FundView<'_>,
    ) -> Result<U256, VenueError> {
        let filled = self.quote(order)?;
        custody.transfer(
            &Transfer::outbound(
                order.sell_asset.clone(),
                vault.clone(),
                self.address.clone(),
                order.sell_amount,
            ),
            fund,
        )?;
        custody.transfer(
            &Transfer::inbound(
                order.buy_asset.clone(),
                self.address.clone(),
                vault.clone(),
                filled,
            ),
            fund,
        )?;
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::InMemoryCustody;
    use crate::domain::FundId;
    use crate::engine::{OwnedAssets, ShareLedger};

    fn usdc() -> AssetId {
        AssetId::new("USDC")
    }

    fn weth() -> AssetId {
        AssetId::new("WETH")
    }

    fn venue() -> FixedRateVenue {
        FixedRateVenue::new(Address::new("dex"))
            .with_asset(usdc(), 6)
            .with_asset(weth(), 18)
            // 1 USDC buys 0.0005 WETH.
            .with_pair(usdc(), weth(), U256::from(5u8) * U256::exp10(14))
    }

    #[test]
    fn test_validate_rejects_self_trade() {
        let order = TradeOrder {
            sell_asset: usdc(),
            sell_amount: U256::one(),
            buy_asset: usdc(),
            min_buy_amount: U256::zero(),
        };
        assert!(matches!(
            order.validate(),
            Err(PreconditionViolation::InvalidOrder(_))
        ));
    }

    #[test]
    fn test_fixed_rate_venue_swaps_through_custody() {
        let vault = Address::new("vault");
        let fund_id = FundId::generate();
        let ledger = ShareLedger::new();
        let owned = OwnedAssets::new(usdc(), 4);
        let view = FundView::new(&fund_id, &ledger, &owned, true);

        let mut custody = InMemoryCustody::new()
            .with_balance(&usdc(), &vault, U256::from(2_000_000_000u64))
            .with_balance(&weth(), &Address::new("dex"), U256::exp10(19));
        let order = TradeOrder {
            sell_asset: usdc(),
            sell_amount: U256::from(2_000_000_000u64),
            buy_asset: weth(),
            min_buy_amount: U256::zero(),
        };

        let filled = venue().execute(&order, &vault, &mut custody, &view).unwrap();

        assert_eq!(filled, U256::exp10(18));
        assert_eq!(custody.balance_of(&weth(), &vault), U256::exp10(18));
        assert!(custody.balance_of(&usdc(), &vault).is_zero());
    }

    #[test]
    fn test_unsupported_pair() {
        let order = TradeOrder {
            sell_asset: weth(),
            sell_amount: U256::one(),
            buy_asset: usdc(),
            min_buy_amount: U256::zero(),
        };
        assert!(matches!(
            venue().quote(&order),
            Err(VenueError::UnsupportedPair { .. })
        ));
    }
}
