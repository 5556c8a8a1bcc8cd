use crate::domain::fixed::{checked_add, checked_sub};
use crate::domain::Address;
use crate::error::LedgerError;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Share balances per holder plus total supply.
///
/// `mint` and `burn` are the only mutators, and each moves a holder balance
/// and the total by the same amount, so the sum of balances always equals
/// the total supply. Holders whose balance reaches zero are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShareLedger {
    balances: BTreeMap<Address, U256>,
    total_supply: U256,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted balances.
    ///
    /// # Errors
    /// Returns an error if the balances overflow when summed.
    pub fn from_balances(
        balances: impl IntoIterator<Item = (Address, U256)>,
    ) -> Result<Self, LedgerError> {
        let mut ledger = Self::new();
        for (holder, amount) in balances {
            ledger.mint(&holder, amount)?;
        }
        Ok(ledger)
    }

    pub fn balance_of(&self, holder: &Address) -> U256 {
        self.balances.get(holder).copied().unwrap_or_default()
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    /// Holders with a non-zero balance, in address order.
    pub fn holders(&self) -> impl Iterator<Item = (&Address, &U256)> {
        self.balances.iter()
    }

    pub fn mint(&mut self, holder: &Address, amount: U256) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Ok(());
        }
        let new_total = checked_add(self.total_supply, amount)?;
        let new_balance = checked_add(self.balance_of(holder), amount)?;
        self.balances.insert(holder.clone(), new_balance);
        self.total_supply = new_total;
        Ok(())
    }

    pub fn burn(&mut self, holder: &Address, amount: U256) -> Result<(), LedgerError> {
        let balance = self.balance_of(holder);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                holder: holder.clone(),
                balance,
                requested: amount,
            });
        }
        if amount.is_zero() {
            return Ok(());
        }
        let new_total = checked_sub(self.total_supply, amount)?;
        let new_balance = balance - amount;
        if new_balance.is_zero() {
            self.balances.remove(holder);
        } else {
            self.balances.insert(holder.clone(), new_balance);
        }
        self.total_supply = new_total;
        Ok(())
    }

    /// Whether the sum of balances equals the total supply.
    pub fn is_conserved(&self) -> bool {
        let mut sum = U256::zero();
        for balance in self.balances.values() {
            match sum.checked_add(*balance) {
                Some(next) => sum = next,
                None => return false,
            }
        }
        sum == self.total_supply
    }
}
