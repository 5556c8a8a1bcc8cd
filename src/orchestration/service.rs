use crate::config::Config;
use crate::custody::AssetCustody;
use crate::db::{init_db, Repository};
use crate::domain::{Address, AssetId, Calculations, FundId, RateMode, TimeMs};
use crate::engine::GavReport;
use crate::error::FundError;
use crate::exchange::{TradeOrder, TradeVenue};
use crate::fund::{
    CallContext, Fund, FundState, Redemption, Settlement, Subscription, TradeReceipt,
};
use crate::oracle::PriceOracle;
use primitive_types::U256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Fund(#[from] FundError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl ServiceError {
    pub fn as_fund_error(&self) -> Option<&FundError> {
        match self {
            ServiceError::Fund(e) => Some(e),
            ServiceError::Db(_) => None,
        }
    }
}

struct Inner<C> {
    fund: Fund,
    custody: C,
}

/// Runs one fund behind a mutex so its transitions never interleave. A
/// transition counts as done only once its state and events are stored.
pub struct FundService<C: AssetCustody> {
    inner: Mutex<Inner<C>>,
    repo: Arc<Repository>,
    fund_id: FundId,
}

impl<C: AssetCustody + 'static> FundService<C> {
    /// Wrap `fund`, restoring its persisted state if there is any.
    ///
    /// # Errors
    /// Returns an error if stored state cannot be read or the initial state
    /// cannot be written.
    pub async fn open(repo: Arc<Repository>, fund: Fund, custody: C) -> Result<Self, ServiceError> {
        let fund_id = fund.id();
        let fund = match repo.load_fund_state(fund_id, fund.setup()).await? {
            Some(state) => {
                info!(
                    fund = %fund_id,
                    nonce = state.nonce,
                    status = state.status.as_str(),
                    "Restored fund state"
                );
                fund.with_state(state)
            }
            None => {
                repo.save_fund_state(fund_id, fund.setup(), fund.state()).await?;
                info!(fund = %fund_id, "Registered new fund");
                fund
            }
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                fund,
                custody,
            }),
            repo,
            fund_id,
        })
    }

    /// Open the database named in `config` and the fund it describes.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized or read.
    pub async fn from_config(
        config: &Config,
        prices: Arc<dyn PriceOracle>,
        custody: C,
    ) -> Result<Self, ServiceError> {
        let pool = init_db(&config.database_path).await?;
        let repo = Arc::new(Repository::new(pool));
        let fund_id = config.fund_id.unwrap_or_else(FundId::generate);
        let fund = Fund::new(fund_id, config.fund_setup(), prices);
        Self::open(repo, fund, custody).await
    }

    pub fn fund_id(&self) -> FundId {
        self.fund_id
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub async fn activate(&self, ctx: &CallContext) -> Result<(), ServiceError> {
        self.apply(|fund, custody| fund.activate(ctx, custody)).await
    }

    pub async fn subscribe(
        &self,
        ctx: &CallContext,
        asset: &AssetId,
        amount: U256,
    ) -> Result<Subscription, ServiceError> {
        self.apply(|fund, custody| fund.subscribe(ctx, custody, asset, amount))
            .await
    }

    pub async fn subscribe_slice(
        &self,
        ctx: &CallContext,
        shares: U256,
    ) -> Result<Subscription, ServiceError> {
        self.apply(|fund, custody| fund.subscribe_slice(ctx, custody, shares))
            .await
    }

    pub async fn redeem(&self, ctx: &CallContext, shares: U256) -> Result<Redemption, ServiceError> {
        self.apply(|fund, custody| fund.redeem(ctx, custody, shares))
            .await
    }

    pub async fn redeem_slice(
        &self,
        ctx: &CallContext,
        shares: U256,
    ) -> Result<Redemption, ServiceError> {
        self.apply(|fund, custody| fund.redeem_slice(ctx, custody, shares))
            .await
    }

    pub async fn settle_fees(&self, ctx: &CallContext) -> Result<Settlement, ServiceError> {
        self.apply(|fund, custody| fund.settle_fees(ctx, custody))
            .await
    }

    pub async fn refresh_owned_assets(&self, ctx: &CallContext) -> Result<Vec<AssetId>, ServiceError> {
        self.apply(|fund, custody| fund.refresh_owned_assets(ctx, custody))
            .await
    }

    pub async fn trade(
        &self,
        ctx: &CallContext,
        venue: &mut dyn TradeVenue,
        order: &TradeOrder,
    ) -> Result<TradeReceipt, ServiceError> {
        self.apply(|fund, custody| fund.trade(ctx, custody, venue, order))
            .await
    }

    pub async fn calculations(&self, now: TimeMs, mode: RateMode) -> Result<Calculations, ServiceError> {
        let inner = self.inner.lock().await;
        Ok(inner.fund.calculations(&inner.custody, now, mode)?)
    }

    pub async fn share_price(&self, now: TimeMs, mode: RateMode) -> Result<U256, ServiceError> {
        let inner = self.inner.lock().await;
        Ok(inner.fund.share_price(&inner.custody, now, mode)?)
    }

    pub async fn gav(&self, now: TimeMs, mode: RateMode) -> Result<GavReport, ServiceError> {
        let inner = self.inner.lock().await;
        Ok(inner.fund.gav(&inner.custody, now, mode)?)
    }

    pub async fn state(&self) -> FundState {
        self.inner.lock().await.fund.state().clone()
    }

    /// Run `f` with exclusive access to the custody, outside any fund
    /// operation. Used to model transfers the fund does not initiate.
    pub async fn with_custody<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        let mut inner = self.inner.lock().await;
        f(&mut inner.custody)
    }

    /// Settle fees every `period` until `shutdown` becomes true.
    ///
    /// A failed settlement is logged and retried at the next tick.
    ///
    /// # Returns
    /// The number of successful settlements.
    pub async fn run_scheduled_settlement(
        self: Arc<Self>,
        manager: Address,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> u64 {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        let mut settled = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    let ctx = CallContext::new(manager.clone(), TimeMs::now());
                    match self.settle_fees(&ctx).await {
                        Ok(settlement) => {
                            settled += 1;
                            info!(
                                fund = %self.fund_id,
                                fee_shares = %settlement.fee_shares,
                                share_price = %settlement.calculations.share_price,
                                "Scheduled settlement complete"
                            );
                        }
                        Err(err) => {
                            warn!(fund = %self.fund_id, error = %err, "Scheduled settlement failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(fund = %self.fund_id, settled, "Scheduled settlement stopped");
        settled
    }

    /// Run a transition and persist its result before anyone can observe it.
    ///
    /// If the write fails the transition is undone in memory and in custody,
    /// so a caller that sees an error can retry without paying twice.
    async fn apply<T>(
        &self,
        f: impl FnOnce(&mut Fund, &mut C) -> Result<T, FundError>,
    ) -> Result<T, ServiceError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let saved = inner.fund.state().clone();
        let checkpoint = inner.custody.checkpoint();

        let output = match f(&mut inner.fund, &mut inner.custody) {
            Ok(output) => output,
            Err(err) => {
                inner.custody.commit(checkpoint);
                return Err(err.into());
            }
        };

        let events = inner.fund.take_events();
        let fund = &inner.fund;
        match self
            .repo
            .save_transition(fund.id(), fund.setup(), fund.state(), &events)
            .await
        {
            Ok(()) => {
                inner.custody.commit(checkpoint);
                Ok(output)
            }
            Err(err) => {
                inner.custody.revert(checkpoint);
                inner.fund.restore_state(saved);
                warn!(
                    fund = %self.fund_id,
                    events = events.len(),
                    error = %err,
                    "Persist failed, transition undone"
                );
                Err(err.into())
            }
        }
    }
}
