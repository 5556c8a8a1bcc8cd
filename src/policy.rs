//! Policy gates consulted before a transition commits.
//!
//! A gate returns `Err(reason)` to refuse; the fund turns that into
//! `PreconditionViolation::PolicyRejected` and aborts before touching state.

use crate::domain::{Address, AssetAmount, AssetId};
use crate::exchange::TradeOrder;
use primitive_types::U256;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub type PolicyResult = Result<(), String>;

pub trait PolicyGate: Send + Sync + fmt::Debug {
    /// `contributions` is everything the investor will transfer in.
    fn check_subscribe(&self, _investor: &Address, _contributions: &[AssetAmount]) -> PolicyResult {
        Ok(())
    }

    fn check_redeem(&self, _holder: &Address, _shares: U256) -> PolicyResult {
        Ok(())
    }

    fn check_trade(&self, _manager: &Address, _order: &TradeOrder) -> PolicyResult {
        Ok(())
    }
}

/// Gate that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PolicyGate for AllowAll {}

/// Only listed investors may subscribe. Redemptions are never blocked, so a
/// delisted holder can still exit.
#[derive(Debug, Clone, Default)]
pub struct InvestorWhitelist {
    investors: HashSet<Address>,
}

impl InvestorWhitelist {
    pub fn new(investors: impl IntoIterator<Item = Address>) -> Self {
        Self {
            investors: investors.into_iter().collect(),
        }
    }

    pub fn is_listed(&self, investor: &Address) -> bool {
        self.investors.contains(investor)
    }
}

impl PolicyGate for InvestorWhitelist {
    fn check_subscribe(&self, investor: &Address, _contributions: &[AssetAmount]) -> PolicyResult {
        if self.is_listed(investor) {
            Ok(())
        } else {
            Err(format!("{investor} is not whitelisted"))
        }
    }
}

/// Assets the manager may buy.
#[derive(Debug, Clone, Default)]
pub struct TradableAssets {
    assets: HashSet<AssetId>,
}

impl TradableAssets {
    pub fn new(assets: impl IntoIterator<Item = AssetId>) -> Self {
        Self {
            assets: assets.into_iter().collect(),
        }
    }
}

impl PolicyGate for TradableAssets {
    fn check_trade(&self, _manager: &Address, order: &TradeOrder) -> PolicyResult {
        if self.assets.contains(&order.buy_asset) {
            Ok(())
        } else {
            Err(format!("{} is not tradable", order.buy_asset))
        }
    }
}

/// Every gate must pass; the first refusal wins.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    gates: Vec<Arc<dyn PolicyGate>>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gate: Arc<dyn PolicyGate>) -> Self {
        self.gates.push(gate);
        self
    }
}

impl PolicyGate for PolicySet {
    fn check_subscribe(&self, investor: &Address, contributions: &[AssetAmount]) -> PolicyResult {
        self.gates
            .iter()
            .try_for_each(|g| g.check_subscribe(investor, contributions))
    }

    fn check_redeem(&self, holder: &Address, shares: U256) -> PolicyResult {
        self.gates
            .iter()
            .try_for_each(|g| g.check_redeem(holder, shares))
    }

    fn check_trade(&self, manager: &Address, order: &TradeOrder) -> PolicyResult {
        self.gates
            .iter()
            .try_for_each(|g| g.check_trade(manager, order))
    }
}
