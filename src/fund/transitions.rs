use super::{CallContext, Fund, FundStatus, Redemption, Settlement, Subscription, TradeReceipt};
use crate::custody::{AssetCustody, Transfer};
use crate::domain::decimal::display_units;
use crate::domain::fixed::{mul_div, mul_div_ceil, units_per_share};
use crate::domain::{AssetAmount, AssetId, Calculations, EventKind, RateMode};
use crate::error::{FundError, PreconditionViolation};
use crate::exchange::{TradeOrder, TradeVenue};
use primitive_types::U256;
use tracing::{debug, info, warn};

impl Fund {
    /// Move the fund from `Uninitialized` to `Active`. Manager only.
    pub fn activate(
        &mut self,
        ctx: &CallContext,
        custody: &mut dyn AssetCustody,
    ) -> Result<(), FundError> {
        self.atomically(custody, "activate", |fund, _| {
            if fund.state.status == FundStatus::Active {
                return Err(PreconditionViolation::AlreadyActive.into());
            }
            fund.require_manager(ctx, "activate")?;
            fund.valuation(RateMode::Canonical, ctx.now)
                .ensure_quote(&fund.setup.quote_asset)?;

            fund.state.status = FundStatus::Active;
            fund.state.calculations =
                Calculations::initial(fund.setup.initial_share_price()?, ctx.now);
            fund.record(EventKind::Activate, ctx, U256::zero(), Vec::new());
            info!(fund = %fund.id, manager = %ctx.sender, quote = %fund.setup.quote_asset, "Fund activated");
            Ok(())
        })
    }

    /// Contribute `amount` of `asset` for newly minted shares.
    ///
    /// Fees are crystallized first and the contribution is priced at the
    /// resulting share price. The asset is transferred in before shares are
    /// minted.
    pub fn subscribe(
        &mut self,
        ctx: &CallContext,
        custody: &mut dyn AssetCustody,
        asset: &AssetId,
        amount: U256,
    ) -> Result<Subscription, FundError> {
        self.atomically(custody, "subscribe", |fund, custody| {
            fund.require_active()?;
            if amount.is_zero() {
                return Err(PreconditionViolation::ZeroAmount.into());
            }
            if !fund.setup.accepts_investment(asset) {
                return Err(PreconditionViolation::AssetNotInvestable(asset.clone()).into());
            }
            let contributions = vec![AssetAmount::new(asset.clone(), amount)];
            fund.check_subscribe_policy(ctx, &contributions)?;

            let settlement = fund.crystallize(ctx, &*custody, false)?;
            let share_price = settlement.calculations.share_price;

            let value = fund
                .valuation(RateMode::Canonical, ctx.now)
                .value_of_asset(asset, amount, &fund.setup.quote_asset)?;
            if !value.is_valid {
                return Err(FundError::InvalidValuation {
                    assets: vec![asset.clone()],
                });
            }
            let shares = mul_div(value.value, units_per_share(), share_price)?;
            if shares.is_zero() {
                return Err(PreconditionViolation::ZeroShares.into());
            }

            fund.state.owned_assets.track(asset)?;
            let transfer = Transfer::inbound(
                asset.clone(),
                ctx.sender.clone(),
                fund.setup.vault.clone(),
                amount,
            );
            custody.transfer(&transfer, &fund.view())?;
            fund.state.ledger.mint(&ctx.sender, shares)?;

            fund.record(EventKind::Subscribe, ctx, shares, contributions.clone());
            info!(
                fund = %fund.id,
                investor = %ctx.sender,
                asset = %asset,
                amount = %amount,
                shares = %shares,
                share_price = %share_price,
                "Subscribed"
            );
            Ok(Subscription {
                investor: ctx.sender.clone(),
                shares,
                contributions,
                share_price: Some(share_price),
            })
        })
    }

    /// Mint `shares` against a pro-rata basket of every held asset.
    ///
    /// Each contribution is `balance * shares / supply`, rounded up. No
    /// price is needed, so this works while valuation is unavailable.
    pub fn subscribe_slice(
        &mut self,
        ctx: &CallContext,
        custody: &mut dyn AssetCustody,
        shares: U256,
    ) -> Result<Subscription, FundError> {
        self.atomically(custody, "subscribe_slice", |fund, custody| {
            fund.require_active()?;
            if shares.is_zero() {
                return Err(PreconditionViolation::ZeroAmount.into());
            }
            let share_price = fund.try_crystallize(ctx, &*custody)?;

            let supply = fund.state.ledger.total_supply();
            if supply.is_zero() {
                return Err(PreconditionViolation::EmptyFund.into());
            }
            let contributions = fund
                .vault_holdings(&*custody)
                .into_iter()
                .map(|(asset, balance)| {
                    mul_div_ceil(balance, shares, supply).map(|amount| AssetAmount::new(asset, amount))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if contributions.is_empty() {
                return Err(PreconditionViolation::EmptyFund.into());
            }
            fund.check_subscribe_policy(ctx, &contributions)?;

            for contribution in &contributions {
                let transfer = Transfer::inbound(
                    contribution.asset.clone(),
                    ctx.sender.clone(),
                    fund.setup.vault.clone(),
                    contribution.amount,
                );
                custody.transfer(&transfer, &fund.view())?;
            }
            fund.state.ledger.mint(&ctx.sender, shares)?;

            fund.record(EventKind::SubscribeSlice, ctx, shares, contributions.clone());
            info!(
                fund = %fund.id,
                investor = %ctx.sender,
                shares = %shares,
                assets = contributions.len(),
                "Subscribed with slice"
            );
            Ok(Subscription {
                investor: ctx.sender.clone(),
                shares,
                contributions,
                share_price,
            })
        })
    }

    /// Burn `shares` and pay their value out in the quote asset.
    ///
    /// # Errors
    /// `InsufficientLiquidity` if the vault does not hold enough of the quote
    /// asset; the holder can use `redeem_slice` instead.
    pub fn redeem(
        &mut self,
        ctx: &CallContext,
        custody: &mut dyn AssetCustody,
        shares: U256,
    ) -> Result<Redemption, FundError> {
        self.atomically(custody, "redeem", |fund, custody| {
            fund.check_redeem_preconditions(ctx, shares)?;

            let settlement = fund.crystallize(ctx, &*custody, false)?;
            let gav = settlement.calculations.gross_asset_value;
            let supply = fund.state.ledger.total_supply();
            let payout = mul_div(gav, shares, supply)?;
            if payout.is_zero() {
                return Err(PreconditionViolation::ZeroPayout.into());
            }

            let quote = fund.setup.quote_asset.clone();
            let available = custody.balance_of(&quote, &fund.setup.vault);
            if available < payout {
                return Err(PreconditionViolation::InsufficientLiquidity {
                    asset: quote,
                    available,
                    required: payout,
                }
                .into());
            }

            fund.state.ledger.burn(&ctx.sender, shares)?;
            let transfer = Transfer::outbound(
                quote.clone(),
                fund.setup.vault.clone(),
                ctx.sender.clone(),
                payout,
            );
            custody.transfer(&transfer, &fund.view())?;

            let payouts = vec![AssetAmount::new(quote, payout)];
            fund.record(EventKind::Redeem, ctx, shares, payouts.clone());
            info!(
                fund = %fund.id,
                holder = %ctx.sender,
                shares = %shares,
                payout = %display_units(payout, fund.setup.quote_decimals),
                "Redeemed"
            );
            Ok(Redemption {
                holder: ctx.sender.clone(),
                shares,
                payouts,
                share_price: Some(settlement.calculations.share_price),
            })
        })
    }

    /// Burn `shares` and pay out the same fraction of every held asset.
    ///
    /// Shares are burned before any asset leaves the vault. Assets whose
    /// pro-rata amount is zero are skipped.
    pub fn redeem_slice(
        &mut self,
        ctx: &CallContext,
        custody: &mut dyn AssetCustody,
        shares: U256,
    ) -> Result<Redemption, FundError> {
        self.atomically(custody, "redeem_slice", |fund, custody| {
            fund.check_redeem_preconditions(ctx, shares)?;
            let share_price = fund.try_crystallize(ctx, &*custody)?;

            let supply = fund.state.ledger.total_supply();
            let mut payouts = Vec::new();
            for (asset, balance) in fund.vault_holdings(&*custody) {
                let amount = mul_div(balance, shares, supply)?;
                if amount.is_zero() {
                    continue;
                }
                payouts.push(AssetAmount::new(asset, amount));
            }
            if payouts.is_empty() {
                return Err(PreconditionViolation::ZeroPayout.into());
            }

            fund.state.ledger.burn(&ctx.sender, shares)?;
            for payout in &payouts {
                let transfer = Transfer::outbound(
                    payout.asset.clone(),
                    fund.setup.vault.clone(),
                    ctx.sender.clone(),
                    payout.amount,
                );
                custody.transfer(&transfer, &fund.view())?;
            }

            fund.record(EventKind::RedeemSlice, ctx, shares, payouts.clone());
            info!(
                fund = %fund.id,
                holder = %ctx.sender,
                shares = %shares,
                assets = payouts.len(),
                "Redeemed slice"
            );
            Ok(Redemption {
                holder: ctx.sender.clone(),
                shares,
                payouts,
                share_price,
            })
        })
    }

    /// Crystallize accrued fees into manager shares and write a new
    /// snapshot. Manager only.
    pub fn settle_fees(
        &mut self,
        ctx: &CallContext,
        custody: &mut dyn AssetCustody,
    ) -> Result<Settlement, FundError> {
        self.atomically(custody, "settle_fees", |fund, custody| {
            fund.require_active()?;
            fund.require_manager(ctx, "settle fees")?;
            fund.crystallize(ctx, &*custody, true)
        })
    }

    /// Drop owned assets whose vault balance is zero.
    ///
    /// # Returns
    /// The pruned assets.
    pub fn refresh_owned_assets(
        &mut self,
        ctx: &CallContext,
        custody: &mut dyn AssetCustody,
    ) -> Result<Vec<AssetId>, FundError> {
        self.atomically(custody, "refresh_owned_assets", |fund, custody| {
            fund.require_active()?;
            let pruned = fund.prune_empty_assets(&*custody);
            fund.record(EventKind::RefreshOwnedAssets, ctx, U256::zero(), Vec::new());
            Ok(pruned)
        })
    }

    /// Swap vault assets through `venue`. Manager only.
    ///
    /// The bought asset must have a valid canonical price so the fund stays
    /// valuable after the trade. Owned assets are refreshed afterwards.
    pub fn trade(
        &mut self,
        ctx: &CallContext,
        custody: &mut dyn AssetCustody,
        venue: &mut dyn TradeVenue,
        order: &TradeOrder,
    ) -> Result<TradeReceipt, FundError> {
        self.atomically(custody, "trade", |fund, custody| {
            fund.require_active()?;
            fund.require_manager(ctx, "trade")?;
            order.validate()?;
            fund.policy
                .check_trade(&ctx.sender, order)
                .map_err(|reason| PreconditionViolation::PolicyRejected {
                    action: "trade",
                    reason,
                })?;

            fund.crystallize(ctx, &*custody, false)?;

            let priced = fund
                .valuation(RateMode::Canonical, ctx.now)
                .value_of_asset(&order.buy_asset, order.min_buy_amount, &fund.setup.quote_asset)?;
            if !priced.is_valid {
                return Err(PreconditionViolation::AssetNotPriced(order.buy_asset.clone()).into());
            }

            let available = custody.balance_of(&order.sell_asset, &fund.setup.vault);
            if available < order.sell_amount {
                return Err(PreconditionViolation::InsufficientLiquidity {
                    asset: order.sell_asset.clone(),
                    available,
                    required: order.sell_amount,
                }
                .into());
            }

            fund.state.owned_assets.track(&order.buy_asset)?;
            let vault = fund.setup.vault.clone();
            let filled = venue.execute(order, &vault, custody, &fund.view())?;
            if filled < order.min_buy_amount {
                return Err(PreconditionViolation::SlippageExceeded {
                    received: filled,
                    minimum: order.min_buy_amount,
                }
                .into());
            }

            let pruned = fund.prune_empty_assets(&*custody);
            fund.record(
                EventKind::Trade,
                ctx,
                U256::zero(),
                vec![
                    AssetAmount::new(order.sell_asset.clone(), order.sell_amount),
                    AssetAmount::new(order.buy_asset.clone(), filled),
                ],
            );
            info!(
                fund = %fund.id,
                venue = venue.name(),
                sell = %order.sell_asset,
                sell_amount = %order.sell_amount,
                buy = %order.buy_asset,
                filled = %filled,
                "Trade executed"
            );
            Ok(TradeReceipt {
                order: order.clone(),
                filled,
                pruned,
            })
        })
    }

    /// Settle fees at the canonical valuation. Must run inside `atomically`.
    ///
    /// A settlement is always recorded when `explicit`; an implicit one only
    /// when it minted fee shares.
    fn crystallize(
        &mut self,
        ctx: &CallContext,
        custody: &dyn AssetCustody,
        explicit: bool,
    ) -> Result<Settlement, FundError> {
        let calculations = self.calculations(custody, ctx.now, RateMode::Canonical)?;
        let fee_shares = calculations.fee_share_quantity;
        let manager = self.setup.manager.clone();
        self.state.ledger.mint(&manager, fee_shares)?;
        self.state.calculations = calculations.clone();

        if explicit || !fee_shares.is_zero() {
            self.record(EventKind::SettleFees, ctx, fee_shares, Vec::new());
            info!(
                fund = %self.id,
                gav = %display_units(calculations.gross_asset_value, self.setup.quote_decimals),
                nav = %display_units(calculations.net_asset_value, self.setup.quote_decimals),
                management_fee = %calculations.unclaimed_management_fee,
                performance_fee = %calculations.unclaimed_performance_fee,
                fee_shares = %fee_shares,
                share_price = %calculations.share_price,
                "Fees settled"
            );
        }
        Ok(Settlement {
            fee_shares,
            calculations,
        })
    }

    /// Crystallize if the fund can be valued; otherwise carry on without.
    ///
    /// Only an invalid valuation is skipped. Any other failure aborts.
    fn try_crystallize(
        &mut self,
        ctx: &CallContext,
        custody: &dyn AssetCustody,
    ) -> Result<Option<U256>, FundError> {
        match self.crystallize(ctx, custody, false) {
            Ok(settlement) => Ok(Some(settlement.calculations.share_price)),
            Err(err @ FundError::InvalidValuation { .. }) => {
                warn!(fund = %self.id, error = %err, "Skipping fee settlement");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn check_subscribe_policy(
        &self,
        ctx: &CallContext,
        contributions: &[AssetAmount],
    ) -> Result<(), PreconditionViolation> {
        self.policy
            .check_subscribe(&ctx.sender, contributions)
            .map_err(|reason| PreconditionViolation::PolicyRejected {
                action: "subscribe",
                reason,
            })
    }

    fn check_redeem_preconditions(
        &self,
        ctx: &CallContext,
        shares: U256,
    ) -> Result<(), PreconditionViolation> {
        self.require_active()?;
        if shares.is_zero() {
            return Err(PreconditionViolation::ZeroAmount);
        }
        let balance = self.state.ledger.balance_of(&ctx.sender);
        if balance < shares {
            return Err(PreconditionViolation::InsufficientShares {
                holder: ctx.sender.clone(),
                balance,
                requested: shares,
            });
        }
        self.policy
            .check_redeem(&ctx.sender, shares)
            .map_err(|reason| PreconditionViolation::PolicyRejected {
                action: "redeem",
                reason,
            })
    }

    /// Owned assets with a non-zero vault balance, in list order.
    fn vault_holdings(&self, custody: &dyn AssetCustody) -> Vec<(AssetId, U256)> {
        self.state
            .owned_assets
            .as_slice()
            .iter()
            .map(|asset| (asset.clone(), custody.balance_of(asset, &self.setup.vault)))
            .filter(|(_, balance)| !balance.is_zero())
            .collect()
    }

    fn prune_empty_assets(&mut self, custody: &dyn AssetCustody) -> Vec<AssetId> {
        let vault = &self.setup.vault;
        let pruned = self
            .state
            .owned_assets
            .refresh(|asset| custody.balance_of(asset, vault));
        if !pruned.is_empty() {
            debug!(fund = %self.id, pruned = ?pruned, "Pruned empty assets");
        }
        pruned
    }
}
