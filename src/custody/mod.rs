//! Asset custody: the token balances held by the fund's vault.
//!
//! Transfers may hand control to code outside the fund (a token callback).
//! That code sees the fund through a [`FundView`], which is built from the
//! state as it stands at the moment of the transfer.

use crate::domain::{Address, AssetId, FundId};
use crate::engine::{OwnedAssets, ShareLedger};
use crate::error::TransferError;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod memory;

pub use memory::{InMemoryCustody, TransferHook};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// From an investor or venue into the vault.
    Inbound,
    /// Out of the vault.
    Outbound,
}

/// One asset movement requested by the fund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub asset: AssetId,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub direction: TransferDirection,
}

impl Transfer {
    pub fn inbound(asset: AssetId, from: Address, vault: Address, amount: U256) -> Self {
        Self {
            asset,
            from,
            to: vault,
            amount,
            direction: TransferDirection::Inbound,
        }
    }

    pub fn outbound(asset: AssetId, vault: Address, to: Address, amount: U256) -> Self {
        Self {
            asset,
            from: vault,
            to,
            amount,
            direction: TransferDirection::Outbound,
        }
    }
}

/// Read-only view of a fund handed to transfer callbacks.
#[derive(Debug, Clone, Copy)]
pub struct FundView<'a> {
    pub fund_id: &'a FundId,
    ledger: &'a ShareLedger,
    owned: &'a OwnedAssets,
    locked: bool,
}

impl<'a> FundView<'a> {
    pub fn new(
        fund_id: &'a FundId,
        ledger: &'a ShareLedger,
        owned: &'a OwnedAssets,
        locked: bool,
    ) -> Self {
        Self {
            fund_id,
            ledger,
            owned,
            locked,
        }
    }

    pub fn share_balance(&self, holder: &Address) -> U256 {
        self.ledger.balance_of(holder)
    }

    pub fn total_supply(&self) -> U256 {
        self.ledger.total_supply()
    }

    pub fn owned_assets(&self) -> &[AssetId] {
        self.owned.as_slice()
    }

    /// True while a fund operation is executing; re-entry will be refused.
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

/// Marker for a restorable custody state. Checkpoints nest; committing or
/// reverting one also discards every checkpoint taken after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(pub(crate) usize);

/// Token balances and transfers, as seen by the fund.
pub trait AssetCustody: Send + fmt::Debug {
    fn balance_of(&self, asset: &AssetId, account: &Address) -> U256;

    /// Move `transfer.amount` of `transfer.asset`. Any error aborts the
    /// calling fund operation.
    fn transfer(&mut self, transfer: &Transfer, fund: &FundView<'_>) -> Result<(), TransferError>;

    fn checkpoint(&mut self) -> Checkpoint;

    fn commit(&mut self, checkpoint: Checkpoint);

    /// Restore balances to what they were when `checkpoint` was taken.
    fn revert(&mut self, checkpoint: Checkpoint);
}
