//! Results of committed fund transitions.

use crate::domain::{Address, AssetAmount, AssetId, Calculations};
use crate::exchange::TradeOrder;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub investor: Address,
    pub shares: U256,
    pub contributions: Vec<AssetAmount>,
    /// Price the shares were issued at; `None` for a slice subscription
    /// made without a valid valuation.
    pub share_price: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    pub holder: Address,
    pub shares: U256,
    pub payouts: Vec<AssetAmount>,
    pub share_price: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Shares minted to the manager.
    pub fee_shares: U256,
    pub calculations: Calculations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub order: TradeOrder,
    pub filled: U256,
    /// Assets dropped from the owned list after the fill.
    pub pruned: Vec<AssetId>,
}
