use fundledger::custody::InMemoryCustody;
use fundledger::engine::FeeSchedule;
use fundledger::error::PreconditionViolation;
use fundledger::{
    init_db, Address, AssetCustody, AssetId, CallContext, Config, EventKind, Fund, FundError,
    FundId, FundService, FundSetup, FundStatus, MockPriceOracle, RateMode, Repository,
    ServiceError, TimeMs,
};
use primitive_types::U256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn usdc() -> AssetId {
    AssetId::new("USDC")
}

fn manager() -> Address {
    Address::new("manager")
}

fn alice() -> Address {
    Address::new("alice")
}

fn e18(v: u64) -> U256 {
    U256::from(v) * U256::exp10(18)
}

fn pct(v: u64) -> U256 {
    U256::from(v) * U256::exp10(16)
}

fn setup() -> FundSetup {
    FundSetup::new("service", usdc(), 18, manager(), Address::new("vault"))
        .with_fees(FeeSchedule::new(pct(2), pct(20)).unwrap())
}

fn oracle() -> Arc<MockPriceOracle> {
    Arc::new(MockPriceOracle::new(usdc(), 18))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn setup_repo() -> (Arc<Repository>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("fund.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    (Arc::new(Repository::new(pool)), temp_dir)
}

async fn open(repo: &Arc<Repository>, id: FundId, custody: InMemoryCustody) -> FundService<InMemoryCustody> {
    let fund = Fund::new(id, setup(), oracle());
    FundService::open(repo.clone(), fund, custody)
        .await
        .expect("open failed")
}

#[tokio::test]
async fn test_state_and_events_survive_reopen() {
    let (repo, _temp) = setup_repo().await;
    let id = FundId::generate();
    let custody = InMemoryCustody::new().with_balance(&usdc(), &alice(), e18(1000));

    let service = open(&repo, id, custody).await;
    service
        .activate(&CallContext::new(manager(), TimeMs::new(0)))
        .await
        .unwrap();
    service
        .subscribe(&CallContext::new(alice(), TimeMs::new(0)), &usdc(), e18(500))
        .await
        .unwrap();
    service
        .redeem(&CallContext::new(alice(), TimeMs::new(0)), e18(100))
        .await
        .unwrap();

    let before = service.state().await;
    assert_eq!(before.nonce, 3);
    drop(service);

    let reopened = open(&repo, id, InMemoryCustody::new()).await;
    let after = reopened.state().await;
    assert_eq!(after.status, FundStatus::Active);
    assert_eq!(after.nonce, 3);
    assert_eq!(after.ledger, before.ledger);
    assert_eq!(after.owned_assets, before.owned_assets);
    assert_eq!(after.calculations, before.calculations);

    let events = repo.query_events(id, 0).await.unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::Activate, EventKind::Subscribe, EventKind::Redeem]);

    let later = repo.query_events(id, 2).await.unwrap();
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].nonce, 3);
}

#[tokio::test]
async fn test_failed_operation_persists_nothing() {
    let (repo, _temp) = setup_repo().await;
    let id = FundId::generate();
    let service = open(&repo, id, InMemoryCustody::new()).await;
    service
        .activate(&CallContext::new(manager(), TimeMs::new(0)))
        .await
        .unwrap();

    let err = service
        .redeem(&CallContext::new(alice(), TimeMs::new(1)), e18(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_fund_error(),
        Some(FundError::Precondition(
            PreconditionViolation::InsufficientShares { .. }
        ))
    ));

    assert_eq!(repo.query_events(id, 0).await.unwrap().len(), 1);
    let stored = repo.load_fund_state(id, &setup()).await.unwrap().unwrap();
    assert_eq!(stored.nonce, 1);
}

#[tokio::test]
async fn test_storage_failure_undoes_the_transition() {
    let (repo, _temp) = setup_repo().await;
    let id = FundId::generate();
    let custody = InMemoryCustody::new().with_balance(&usdc(), &alice(), e18(10));
    let service = open(&repo, id, custody).await;
    service
        .activate(&CallContext::new(manager(), TimeMs::new(0)))
        .await
        .unwrap();
    let before = service.state().await;

    repo.pool().close().await;
    let err = service
        .subscribe(&CallContext::new(alice(), TimeMs::new(0)), &usdc(), e18(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Db(_)));
    assert!(err.as_fund_error().is_none());

    // Nothing was charged, so retrying later is safe.
    assert_eq!(service.state().await, before);
    let (alice_usdc, vault_usdc) = service
        .with_custody(|c| {
            (
                c.balance_of(&usdc(), &alice()),
                c.balance_of(&usdc(), &Address::new("vault")),
            )
        })
        .await;
    assert_eq!(alice_usdc, e18(10));
    assert_eq!(vault_usdc, U256::zero());
}

#[tokio::test]
async fn test_settlement_history_is_recorded() {
    let (repo, _temp) = setup_repo().await;
    let id = FundId::generate();
    let custody = InMemoryCustody::new().with_balance(&usdc(), &alice(), e18(1000));
    let service = open(&repo, id, custody).await;
    let day = 86_400_000i64;

    service
        .activate(&CallContext::new(manager(), TimeMs::new(0)))
        .await
        .unwrap();
    service
        .subscribe(&CallContext::new(alice(), TimeMs::new(0)), &usdc(), e18(1000))
        .await
        .unwrap();
    for n in 1..=3 {
        service
            .settle_fees(&CallContext::new(manager(), TimeMs::new(n * day)))
            .await
            .unwrap();
    }

    let history = repo.calculations_history(id, 10).await.unwrap();
    let timestamps: Vec<i64> = history.iter().map(|c| c.timestamp.as_ms()).collect();
    assert_eq!(timestamps, vec![0, day, 2 * day, 3 * day]);
    assert!(history
        .windows(2)
        .all(|w| w[1].total_supply > w[0].total_supply));

    let recent = repo.calculations_history(id, 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[1].timestamp, TimeMs::new(3 * day));

    let price = service
        .share_price(TimeMs::new(3 * day), RateMode::Canonical)
        .await
        .unwrap();
    assert!(price < e18(1));
}

#[tokio::test]
async fn test_custody_changes_outside_the_fund() {
    let (repo, _temp) = setup_repo().await;
    let service = open(&repo, FundId::generate(), InMemoryCustody::new()).await;
    service
        .activate(&CallContext::new(manager(), TimeMs::new(0)))
        .await
        .unwrap();

    service
        .with_custody(|c| c.mint(&usdc(), &Address::new("vault"), e18(5)))
        .await;
    let report = service
        .gav(TimeMs::new(1), RateMode::Canonical)
        .await
        .unwrap();
    assert_eq!(report.gav, e18(5));
    let vault_balance = service
        .with_custody(|c| c.balance_of(&usdc(), &Address::new("vault")))
        .await;
    assert_eq!(vault_balance, e18(5));
}

#[tokio::test]
async fn test_from_config_opens_configured_fund() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("data").join("ledger.db");
    let id = FundId::generate();

    let mut env = HashMap::new();
    env.insert("DATABASE_PATH".to_string(), db_path.to_string_lossy().to_string());
    env.insert("FUND_ID".to_string(), id.to_string());
    env.insert("FUND_QUOTE_ASSET".to_string(), "USDC".to_string());
    env.insert("FUND_MANAGER".to_string(), "manager".to_string());
    let config = Config::from_env_map(env).unwrap();

    let service = FundService::from_config(&config, oracle(), InMemoryCustody::new())
        .await
        .unwrap();
    assert_eq!(service.fund_id(), id);
    assert_eq!(service.state().await.status, FundStatus::Uninitialized);
    service
        .activate(&CallContext::new(manager(), TimeMs::new(0)))
        .await
        .unwrap();

    let stored = service
        .repository()
        .load_fund_state(id, &config.fund_setup())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, FundStatus::Active);
    assert!(db_path.exists());
}

#[tokio::test]
async fn test_scheduled_settlement_runs_until_shutdown() {
    init_tracing();
    let (repo, _temp) = setup_repo().await;
    let id = FundId::generate();
    let custody = InMemoryCustody::new().with_balance(&usdc(), &alice(), e18(100));
    let service = Arc::new(open(&repo, id, custody).await);

    let now = TimeMs::now();
    service
        .activate(&CallContext::new(manager(), now))
        .await
        .unwrap();
    service
        .subscribe(&CallContext::new(alice(), now), &usdc(), e18(100))
        .await
        .unwrap();

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(service.clone().run_scheduled_settlement(
        manager(),
        Duration::from_millis(20),
        rx,
    ));

    tokio::time::sleep(Duration::from_millis(150)).await;
    tx.send(true).unwrap();
    let settled = handle.await.unwrap();
    assert!(settled >= 1);

    let events = repo.query_events(id, 2).await.unwrap();
    assert_eq!(events.len() as u64, settled);
    assert!(events.iter().all(|e| e.kind == EventKind::SettleFees));
}

#[tokio::test]
async fn test_scheduled_settlement_survives_failures() {
    init_tracing();
    let (repo, _temp) = setup_repo().await;
    let service = Arc::new(open(&repo, FundId::generate(), InMemoryCustody::new()).await);

    // The fund is never activated, so every tick fails.
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(service.clone().run_scheduled_settlement(
        manager(),
        Duration::from_millis(10),
        rx,
    ));
    tokio::time::sleep(Duration::from_millis(60)).await;
    tx.send(true).unwrap();
    assert_eq!(handle.await.unwrap(), 0);
}
