//! The fund aggregate: share ledger, owned assets and the settlement
//! snapshot, driven through atomic transitions.
//!
//! Every entry point runs inside [`Fund::atomically`]: fund state is cloned
//! and custody checkpointed before the operation starts, and both are
//! restored if it fails, so a failed call leaves no trace.
//!
//! Accrued fees are always crystallized into manager shares before value
//! moves, so the share divisor is simply the ledger's total supply and no
//! operation has to subtract unclaimed fee shares on its own.
//!
//! Transfer ordering per operation:
//! - subscribe, subscribe slice: inbound transfers, then mint
//! - redeem, redeem slice: burn, then outbound transfers
//! - trade: the venue moves assets, no shares change

use crate::custody::{AssetCustody, FundView};
use crate::domain::fixed::pow10;
use crate::domain::{Address, AssetAmount, AssetId, Calculations, EventKind, FundEvent, FundId, RateMode, TimeMs};
use crate::engine::{
    FeeEngine, FeeSchedule, GavReport, OwnedAssets, ShareLedger, ValuationEngine,
    DEFAULT_MAX_OWNED_ASSETS,
};
use crate::error::{ArithmeticViolation, FundError, PreconditionViolation};
use crate::oracle::{DerivativeOracle, PriceOracle};
use crate::policy::{AllowAll, PolicyGate};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

mod receipt;
mod transitions;

pub use receipt::{Redemption, Settlement, Subscription, TradeReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundStatus {
    Uninitialized,
    Active,
}

impl FundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundStatus::Uninitialized => "uninitialized",
            FundStatus::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uninitialized" => Some(FundStatus::Uninitialized),
            "active" => Some(FundStatus::Active),
            _ => None,
        }
    }
}

/// Immutable parameters of a fund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundSetup {
    pub name: String,
    pub quote_asset: AssetId,
    pub quote_decimals: u8,
    pub manager: Address,
    /// Custody account holding the fund's assets.
    pub vault: Address,
    pub fees: FeeSchedule,
    pub max_owned_assets: usize,
    /// Assets accepted by `subscribe` besides the quote asset.
    pub investment_assets: Vec<AssetId>,
    pub max_rate_age_ms: Option<i64>,
}

impl FundSetup {
    pub fn new(
        name: impl Into<String>,
        quote_asset: AssetId,
        quote_decimals: u8,
        manager: Address,
        vault: Address,
    ) -> Self {
        Self {
            name: name.into(),
            quote_asset,
            quote_decimals,
            manager,
            vault,
            fees: FeeSchedule::none(),
            max_owned_assets: DEFAULT_MAX_OWNED_ASSETS,
            investment_assets: Vec::new(),
            max_rate_age_ms: None,
        }
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_max_owned_assets(mut self, max: usize) -> Self {
        self.max_owned_assets = max;
        self
    }

    pub fn with_investment_assets(mut self, assets: Vec<AssetId>) -> Self {
        self.investment_assets = assets;
        self
    }

    pub fn with_max_rate_age(mut self, max_age_ms: Option<i64>) -> Self {
        self.max_rate_age_ms = max_age_ms;
        self
    }

    /// One whole quote unit per share.
    ///
    /// # Errors
    /// Overflow when `10^quote_decimals` does not fit in a U256.
    pub fn initial_share_price(&self) -> Result<U256, ArithmeticViolation> {
        pow10(self.quote_decimals)
    }

    pub fn accepts_investment(&self, asset: &AssetId) -> bool {
        asset == &self.quote_asset || self.investment_assets.contains(asset)
    }
}

/// Everything a transition may change. Cloned wholesale for rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundState {
    pub status: FundStatus,
    pub ledger: ShareLedger,
    pub owned_assets: OwnedAssets,
    pub calculations: Calculations,
    /// Number of events committed so far.
    pub nonce: u64,
}

impl FundState {
    pub fn new(setup: &FundSetup) -> Self {
        Self {
            status: FundStatus::Uninitialized,
            ledger: ShareLedger::new(),
            owned_assets: OwnedAssets::new(setup.quote_asset.clone(), setup.max_owned_assets),
            // Placeholder until activation, which fails for unusable decimals.
            calculations: Calculations::initial(
                setup.initial_share_price().unwrap_or_default(),
                TimeMs::new(0),
            ),
            nonce: 0,
        }
    }
}

/// Caller identity and block time of one entry point call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub sender: Address,
    pub now: TimeMs,
}

impl CallContext {
    pub fn new(sender: Address, now: TimeMs) -> Self {
        Self { sender, now }
    }
}

#[derive(Debug)]
struct StagedEvent {
    kind: EventKind,
    actor: Address,
    shares: U256,
    amounts: Vec<AssetAmount>,
    time_ms: TimeMs,
}

#[derive(Debug)]
pub struct Fund {
    id: FundId,
    setup: FundSetup,
    state: FundState,
    prices: Arc<dyn PriceOracle>,
    derivatives: Option<Arc<dyn DerivativeOracle>>,
    policy: Arc<dyn PolicyGate>,
    fee_engine: FeeEngine,
    locked: bool,
    staged: Vec<StagedEvent>,
    events: Vec<FundEvent>,
}

impl Fund {
    pub fn new(id: FundId, setup: FundSetup, prices: Arc<dyn PriceOracle>) -> Self {
        let state = FundState::new(&setup);
        let fee_engine = FeeEngine::new(setup.fees);
        Self {
            id,
            setup,
            state,
            prices,
            derivatives: None,
            policy: Arc::new(AllowAll),
            fee_engine,
            locked: false,
            staged: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn with_derivatives(mut self, derivatives: Arc<dyn DerivativeOracle>) -> Self {
        self.derivatives = Some(derivatives);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PolicyGate>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the state with one loaded from storage.
    pub fn with_state(mut self, state: FundState) -> Self {
        self.state = state;
        self
    }

    /// Put back a state taken with [`Fund::state`], discarding anything
    /// committed since.
    pub(crate) fn restore_state(&mut self, state: FundState) {
        self.state = state;
        self.events.clear();
    }

    pub fn id(&self) -> FundId {
        self.id
    }

    pub fn setup(&self) -> &FundSetup {
        &self.setup
    }

    pub fn state(&self) -> &FundState {
        &self.state
    }

    pub fn status(&self) -> FundStatus {
        self.state.status
    }

    pub fn ledger(&self) -> &ShareLedger {
        &self.state.ledger
    }

    pub fn owned_assets(&self) -> &OwnedAssets {
        &self.state.owned_assets
    }

    /// Snapshot written by the last settlement.
    pub fn last_calculations(&self) -> &Calculations {
        &self.state.calculations
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Drain events committed since the last call.
    pub fn take_events(&mut self) -> Vec<FundEvent> {
        std::mem::take(&mut self.events)
    }

    /// Value every owned asset at its current vault balance.
    ///
    /// The report may be invalid; callers must check before using it.
    pub fn gav(
        &self,
        custody: &dyn AssetCustody,
        now: TimeMs,
        mode: RateMode,
    ) -> Result<GavReport, FundError> {
        let vault = &self.setup.vault;
        let holdings: Vec<(&AssetId, U256)> = self
            .state
            .owned_assets
            .as_slice()
            .iter()
            .map(|asset| (asset, custody.balance_of(asset, vault)))
            .collect();
        self.valuation(mode, now).fund_gav(holdings)
    }

    /// The snapshot a settlement at `now` would write, without writing it.
    pub fn calculations(
        &self,
        custody: &dyn AssetCustody,
        now: TimeMs,
        mode: RateMode,
    ) -> Result<Calculations, FundError> {
        self.require_active()?;
        let gav = self.gav(custody, now, mode)?.require_valid()?;
        Ok(self.fee_engine.snapshot(
            gav,
            self.state.ledger.total_supply(),
            &self.state.calculations,
            self.setup.initial_share_price()?,
            now,
        )?)
    }

    /// Quote base units per whole share after crystallizing accrued fees.
    pub fn share_price(
        &self,
        custody: &dyn AssetCustody,
        now: TimeMs,
        mode: RateMode,
    ) -> Result<U256, FundError> {
        Ok(self.calculations(custody, now, mode)?.share_price)
    }

    pub(crate) fn valuation(&self, mode: RateMode, now: TimeMs) -> ValuationEngine<'_> {
        ValuationEngine::new(
            &*self.prices,
            &self.setup.quote_asset,
            self.setup.quote_decimals,
            mode,
            now,
        )
        .with_derivatives(self.derivatives.as_deref())
        .with_max_rate_age(self.setup.max_rate_age_ms)
    }

    pub(crate) fn view(&self) -> FundView<'_> {
        FundView::new(
            &self.id,
            &self.state.ledger,
            &self.state.owned_assets,
            self.locked,
        )
    }

    pub(crate) fn require_active(&self) -> Result<(), PreconditionViolation> {
        match self.state.status {
            FundStatus::Active => Ok(()),
            FundStatus::Uninitialized => Err(PreconditionViolation::NotActive),
        }
    }

    pub(crate) fn require_manager(
        &self,
        ctx: &CallContext,
        action: &'static str,
    ) -> Result<(), PreconditionViolation> {
        if ctx.sender == self.setup.manager {
            Ok(())
        } else {
            Err(PreconditionViolation::Unauthorized {
                caller: ctx.sender.clone(),
                action,
            })
        }
    }

    pub(crate) fn record(
        &mut self,
        kind: EventKind,
        ctx: &CallContext,
        shares: U256,
        amounts: Vec<AssetAmount>,
    ) {
        self.staged.push(StagedEvent {
            kind,
            actor: ctx.sender.clone(),
            shares,
            amounts,
            time_ms: ctx.now,
        });
    }

    /// Run `op` as one all-or-nothing unit.
    ///
    /// On success the custody checkpoint is committed and staged events are
    /// numbered and published. On failure fund state and custody are put back
    /// exactly as they were.
    pub(crate) fn atomically<T>(
        &mut self,
        custody: &mut dyn AssetCustody,
        op: &'static str,
        f: impl FnOnce(&mut Self, &mut dyn AssetCustody) -> Result<T, FundError>,
    ) -> Result<T, FundError> {
        if self.locked {
            return Err(PreconditionViolation::OperationInProgress.into());
        }

        let saved = self.state.clone();
        let checkpoint = custody.checkpoint();
        self.locked = true;
        let result = f(self, &mut *custody);
        self.locked = false;

        match result {
            Ok(value) => {
                custody.commit(checkpoint);
                for staged in std::mem::take(&mut self.staged) {
                    self.state.nonce += 1;
                    self.events.push(FundEvent::new(
                        self.id,
                        self.state.nonce,
                        staged.kind,
                        staged.actor,
                        staged.shares,
                        staged.amounts,
                        staged.time_ms,
                    ));
                }
                Ok(value)
            }
            Err(err) => {
                custody.revert(checkpoint);
                self.state = saved;
                self.staged.clear();
                warn!(fund = %self.id, op, error = %err, "Operation rolled back");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::InMemoryCustody;
    use crate::oracle::MockPriceOracle;

    fn setup() -> FundSetup {
        FundSetup::new(
            "test",
            AssetId::new("USDC"),
            6,
            Address::new("manager"),
            Address::new("vault"),
        )
    }

    fn fund() -> Fund {
        let oracle = MockPriceOracle::new(AssetId::new("USDC"), 6);
        Fund::new(FundId::generate(), setup(), Arc::new(oracle))
    }

    #[test]
    fn test_new_fund_is_uninitialized() {
        let fund = fund();
        assert_eq!(fund.status(), FundStatus::Uninitialized);
        assert_eq!(fund.owned_assets().as_slice(), &[AssetId::new("USDC")]);
        assert_eq!(fund.last_calculations().share_price, U256::exp10(6));
    }

    #[test]
    fn test_setup_accepts_quote_and_listed_assets() {
        let setup = setup().with_investment_assets(vec![AssetId::new("WETH")]);
        assert!(setup.accepts_investment(&AssetId::new("USDC")));
        assert!(setup.accepts_investment(&AssetId::new("WETH")));
        assert!(!setup.accepts_investment(&AssetId::new("DOGE")));
    }

    #[test]
    fn test_atomically_restores_state_on_error() {
        let mut fund = fund();
        let mut custody = InMemoryCustody::new();
        let before = fund.state().clone();

        let result: Result<(), FundError> = fund.atomically(&mut custody, "test", |fund, _| {
            fund.state.ledger.mint(&Address::new("x"), U256::one())?;
            fund.state.nonce = 99;
            let ctx = CallContext::new(Address::new("x"), TimeMs::new(0));
            fund.record(EventKind::Subscribe, &ctx, U256::one(), vec![]);
            Err(PreconditionViolation::ZeroAmount.into())
        });

        assert!(result.is_err());
        assert_eq!(fund.state(), &before);
        assert!(!fund.is_locked());
        assert!(fund.take_events().is_empty());
    }

    #[test]
    fn test_atomically_publishes_numbered_events() {
        let mut fund = fund();
        let mut custody = InMemoryCustody::new();
        let ctx = CallContext::new(Address::new("x"), TimeMs::new(5));

        fund.atomically(&mut custody, "test", |fund, _| {
            fund.record(EventKind::SettleFees, &ctx, U256::zero(), vec![]);
            fund.record(EventKind::Subscribe, &ctx, U256::one(), vec![]);
            Ok(())
        })
        .unwrap();

        let events = fund.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].nonce, 1);
        assert_eq!(events[1].nonce, 2);
        assert_eq!(events[1].kind, EventKind::Subscribe);
        assert_eq!(fund.state().nonce, 2);
    }

    #[test]
    fn test_atomically_locks_during_operation() {
        let mut fund = fund();
        let mut custody = InMemoryCustody::new();
        let seen = fund
            .atomically(&mut custody, "test", |fund, _| Ok(fund.view().is_locked()))
            .unwrap();
        assert!(seen);
        assert!(!fund.is_locked());
    }

    #[test]
    fn test_fund_status_parse() {
        assert_eq!(FundStatus::parse("active"), Some(FundStatus::Active));
        assert_eq!(
            FundStatus::parse(FundStatus::Uninitialized.as_str()),
            Some(FundStatus::Uninitialized)
        );
        assert_eq!(FundStatus::parse("closed"), None);
    }
}
