use fundledger::custody::InMemoryCustody;
use fundledger::error::PreconditionViolation;
use fundledger::exchange::{FixedRateVenue, TradeOrder, VenueError};
use fundledger::policy::{InvestorWhitelist, PolicySet, TradableAssets};
use fundledger::{
    Address, AssetCustody, AssetId, CallContext, EventKind, Fund, FundError, FundId, FundSetup,
    MockPriceOracle, RateMode, TimeMs,
};
use primitive_types::U256;
use std::sync::Arc;

fn usdc() -> AssetId {
    AssetId::new("USDC")
}

fn weth() -> AssetId {
    AssetId::new("WETH")
}

fn doge() -> AssetId {
    AssetId::new("DOGE")
}

fn manager() -> Address {
    Address::new("manager")
}

fn vault() -> Address {
    Address::new("vault")
}

fn dex() -> Address {
    Address::new("dex")
}

fn alice() -> Address {
    Address::new("alice")
}

fn e18(v: u64) -> U256 {
    U256::from(v) * U256::exp10(18)
}

fn at(sender: Address, ms: i64) -> CallContext {
    CallContext::new(sender, TimeMs::new(ms))
}

fn venue() -> FixedRateVenue {
    FixedRateVenue::new(dex())
        .with_asset(usdc(), 18)
        .with_asset(weth(), 18)
        .with_asset(doge(), 18)
        // 1 USDC buys 0.0005 WETH.
        .with_pair(usdc(), weth(), U256::from(5u8) * U256::exp10(14))
        .with_pair(weth(), usdc(), e18(2000))
        .with_pair(usdc(), doge(), e18(10))
}

/// Active fund with 10,000 USDC from alice and a dex holding inventory.
fn funded(fund_setup: impl FnOnce(Fund) -> Fund) -> (Fund, InMemoryCustody) {
    let oracle = Arc::new(
        MockPriceOracle::new(usdc(), 18)
            .with_asset(weth(), 18)
            .with_rate(weth(), e18(2000), TimeMs::new(0)),
    );
    let setup = FundSetup::new("trading", usdc(), 18, manager(), vault());
    let mut fund = fund_setup(Fund::new(FundId::generate(), setup, oracle));
    let mut custody = InMemoryCustody::new()
        .with_balance(&usdc(), &alice(), e18(10_000))
        .with_balance(&weth(), &dex(), e18(100))
        .with_balance(&doge(), &dex(), e18(1_000_000));

    fund.activate(&at(manager(), 0), &mut custody).unwrap();
    fund.subscribe(&at(alice(), 0), &mut custody, &usdc(), e18(10_000))
        .unwrap();
    fund.take_events();
    (fund, custody)
}

fn buy_weth(sell_usdc: u64, min_weth: U256) -> TradeOrder {
    TradeOrder {
        sell_asset: usdc(),
        sell_amount: e18(sell_usdc),
        buy_asset: weth(),
        min_buy_amount: min_weth,
    }
}

#[test]
fn test_trade_swaps_and_keeps_gav() {
    let (mut fund, mut custody) = funded(|f| f);
    let mut venue = venue();

    let receipt = fund
        .trade(&at(manager(), 1), &mut custody, &mut venue, &buy_weth(2000, e18(1)))
        .unwrap();
    assert_eq!(receipt.filled, e18(1));
    assert!(receipt.pruned.is_empty());
    assert_eq!(fund.owned_assets().as_slice(), &[usdc(), weth()]);
    assert_eq!(custody.balance_of(&usdc(), &vault()), e18(8000));
    assert_eq!(custody.balance_of(&weth(), &vault()), e18(1));

    let report = fund
        .gav(&custody, TimeMs::new(1), RateMode::Canonical)
        .unwrap();
    assert_eq!(report.gav, e18(10_000));

    let events = fund.take_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Trade);
    assert_eq!(events[0].amounts.len(), 2);
}

#[test]
fn test_selling_out_prunes_the_asset() {
    let (mut fund, mut custody) = funded(|f| f);
    let mut venue = venue();
    fund.trade(&at(manager(), 1), &mut custody, &mut venue, &buy_weth(2000, e18(1)))
        .unwrap();

    let sell_all = TradeOrder {
        sell_asset: weth(),
        sell_amount: e18(1),
        buy_asset: usdc(),
        min_buy_amount: e18(2000),
    };
    let receipt = fund
        .trade(&at(manager(), 2), &mut custody, &mut venue, &sell_all)
        .unwrap();
    assert_eq!(receipt.filled, e18(2000));
    assert_eq!(receipt.pruned, vec![weth()]);
    assert_eq!(fund.owned_assets().as_slice(), &[usdc()]);
}

#[test]
fn test_slippage_rolls_back_trade() {
    let (mut fund, mut custody) = funded(|f| f);
    let mut venue = venue();
    let before = fund.state().clone();

    let err = fund
        .trade(&at(manager(), 1), &mut custody, &mut venue, &buy_weth(2000, e18(2)))
        .unwrap_err();
    match err {
        FundError::Precondition(PreconditionViolation::SlippageExceeded { received, minimum }) => {
            assert_eq!(received, e18(1));
            assert_eq!(minimum, e18(2));
        }
        other => panic!("Expected SlippageExceeded, got {other:?}"),
    }
    assert_eq!(fund.state(), &before);
    assert_eq!(custody.balance_of(&usdc(), &vault()), e18(10_000));
    assert_eq!(custody.balance_of(&weth(), &dex()), e18(100));
}

#[test]
fn test_trade_rejects_bad_orders() {
    let (mut fund, mut custody) = funded(|f| f);
    let mut venue = venue();

    let err = fund
        .trade(&at(alice(), 1), &mut custody, &mut venue, &buy_weth(10, U256::zero()))
        .unwrap_err();
    assert!(matches!(
        err,
        FundError::Precondition(PreconditionViolation::Unauthorized { .. })
    ));

    let unpriced = TradeOrder {
        sell_asset: usdc(),
        sell_amount: e18(10),
        buy_asset: doge(),
        min_buy_amount: e18(1),
    };
    let err = fund
        .trade(&at(manager(), 1), &mut custody, &mut venue, &unpriced)
        .unwrap_err();
    assert!(matches!(
        err,
        FundError::Precondition(PreconditionViolation::AssetNotPriced(_))
    ));

    let err = fund
        .trade(&at(manager(), 1), &mut custody, &mut venue, &buy_weth(20_000, U256::zero()))
        .unwrap_err();
    assert!(matches!(
        err,
        FundError::Precondition(PreconditionViolation::InsufficientLiquidity { .. })
    ));

    let self_trade = TradeOrder {
        sell_asset: usdc(),
        sell_amount: e18(1),
        buy_asset: usdc(),
        min_buy_amount: U256::zero(),
    };
    let err = fund
        .trade(&at(manager(), 1), &mut custody, &mut venue, &self_trade)
        .unwrap_err();
    assert!(matches!(
        err,
        FundError::Precondition(PreconditionViolation::InvalidOrder(_))
    ));

    let err = fund
        .trade(
            &at(manager(), 1),
            &mut custody,
            &mut FixedRateVenue::new(dex()),
            &buy_weth(10, U256::zero()),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        FundError::Venue(VenueError::UnsupportedPair { .. })
    ));
    assert!(fund.take_events().is_empty());
}

#[test]
fn test_trade_policy() {
    let policy = PolicySet::new().with(Arc::new(TradableAssets::new([usdc()])));
    let (mut fund, mut custody) = funded(|f| f.with_policy(Arc::new(policy)));
    let mut venue = venue();

    let err = fund
        .trade(&at(manager(), 1), &mut custody, &mut venue, &buy_weth(2000, e18(1)))
        .unwrap_err();
    match err {
        FundError::Precondition(PreconditionViolation::PolicyRejected { action, reason }) => {
            assert_eq!(action, "trade");
            assert!(reason.contains("WETH"));
        }
        other => panic!("Expected PolicyRejected, got {other:?}"),
    }
}

#[test]
fn test_subscription_whitelist() {
    let whitelist = InvestorWhitelist::new([alice()]);
    let (mut fund, mut custody) = funded(|f| f.with_policy(Arc::new(whitelist)));
    let bob = Address::new("bob");
    custody.mint(&usdc(), &bob, e18(100));

    let err = fund
        .subscribe(&at(bob.clone(), 1), &mut custody, &usdc(), e18(100))
        .unwrap_err();
    assert!(matches!(
        err,
        FundError::Precondition(PreconditionViolation::PolicyRejected {
            action: "subscribe",
            ..
        })
    ));
    assert_eq!(custody.balance_of(&usdc(), &bob), e18(100));

    // Redemption is not gated by the whitelist.
    fund.redeem(&at(alice(), 1), &mut custody, e18(100))
        .unwrap();
}
