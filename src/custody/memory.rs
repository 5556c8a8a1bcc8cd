//! In-memory custody for tests and simulations.

use super::{AssetCustody, Checkpoint, FundView, Transfer};
use crate::domain::{Address, AssetId};
use crate::error::TransferError;
use primitive_types::U256;
use std::collections::HashMap;
use std::fmt;

/// Callback run after a transfer has moved balances, before it returns.
///
/// Returning `Err(reason)` rejects the transfer, as a token contract would.
pub type TransferHook =
    Box<dyn FnMut(&Transfer, &FundView<'_>) -> Result<(), String> + Send + 'static>;

type Balances = HashMap<(AssetId, Address), U256>;

struct Snapshot {
    balances: Balances,
    log_len: usize,
}

/// Balances held in a map, with a stack of snapshots for rollback.
#[derive(Default)]
pub struct InMemoryCustody {
    balances: Balances,
    snapshots: Vec<Snapshot>,
    log: Vec<Transfer>,
    hook: Option<TransferHook>,
}

impl fmt::Debug for InMemoryCustody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCustody")
            .field("balances", &self.balances.len())
            .field("snapshots", &self.snapshots.len())
            .field("transfers", &self.log.len())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` to `account` out of thin air.
    pub fn mint(&mut self, asset: &AssetId, account: &Address, amount: U256) {
        let entry = self
            .balances
            .entry((asset.clone(), account.clone()))
            .or_default();
        *entry = entry.saturating_add(amount);
    }

    pub fn with_balance(mut self, asset: &AssetId, account: &Address, amount: U256) -> Self {
        self.mint(asset, account, amount);
        self
    }

    /// Move balances directly between accounts, bypassing any fund and hook.
    pub fn transfer_direct(
        &mut self,
        asset: &AssetId,
        from: &Address,
        to: &Address,
        amount: U256,
    ) -> Result<(), TransferError> {
        self.move_balance(asset, from, to, amount)
    }

    pub fn set_hook(&mut self, hook: TransferHook) {
        self.hook = Some(hook);
    }

    pub fn clear_hook(&mut self) {
        self.hook = None;
    }

    /// Transfers made through [`AssetCustody::transfer`] that were not reverted.
    pub fn transfers(&self) -> &[Transfer] {
        &self.log
    }

    fn move_balance(
        &mut self,
        asset: &AssetId,
        from: &Address,
        to: &Address,
        amount: U256,
    ) -> Result<(), TransferError> {
        let balance = self.balance_of(asset, from);
        if balance < amount {
            return Err(TransferError::InsufficientBalance {
                asset: asset.clone(),
                account: from.clone(),
                balance,
                requested: amount,
            });
        }
        if amount.is_zero() || from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(asset, to)
            .checked_add(amount)
            .ok_or_else(|| TransferError::Rejected {
                asset: asset.clone(),
                reason: "recipient balance overflow".to_string(),
            })?;
        self.balances
            .insert((asset.clone(), from.clone()), balance - amount);
        self.balances.insert((asset.clone(), to.clone()), credited);
        Ok(())
    }
}

impl AssetCustody for InMemoryCustody {
    fn balance_of(&self, asset: &AssetId, account: &Address) -> U256 {
        self.balances
            .get(&(asset.clone(), account.clone()))
            .copied()
            .unwrap_or_default()
    }

    fn transfer(&mut self, transfer: &Transfer, fund: &FundView<'_>) -> Result<(), TransferError> {
        let before = self.balances.clone();
        self.move_balance(&transfer.asset, &transfer.from, &transfer.to, transfer.amount)?;

        if let Some(hook) = self.hook.as_mut() {
            if let Err(reason) = hook(transfer, fund) {
                self.balances = before;
                return Err(TransferError::Rejected {
                    asset: transfer.asset.clone(),
                    reason,
                });
            }
        }
        self.log.push(transfer.clone());
        Ok(())
    }

    fn checkpoint(&mut self) -> Checkpoint {
        self.snapshots.push(Snapshot {
            balances: self.balances.clone(),
            log_len: self.log.len(),
        });
        Checkpoint(self.snapshots.len() - 1)
    }

    fn commit(&mut self, checkpoint: Checkpoint) {
        self.snapshots.truncate(checkpoint.0);
    }

    fn revert(&mut self, checkpoint: Checkpoint) {
        if checkpoint.0 >= self.snapshots.len() {
            return;
        }
        let mut discarded = self.snapshots.split_off(checkpoint.0);
        let snapshot = discarded.swap_remove(0);
        self.balances = snapshot.balances;
        self.log.truncate(snapshot.log_len);
    }
}
