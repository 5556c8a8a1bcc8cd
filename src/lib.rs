pub mod config;
pub mod custody;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod fund;
pub mod oracle;
pub mod orchestration;
pub mod policy;

pub use config::Config;
pub use custody::{AssetCustody, InMemoryCustody, Transfer};
pub use db::{init_db, Repository};
pub use domain::{
    Address, AssetAmount, AssetId, Calculations, EventKind, FundEvent, FundId, Rate, RateMode,
    TimeMs, Valuation,
};
pub use error::FundError;
pub use fund::{CallContext, Fund, FundSetup, FundState, FundStatus};
pub use oracle::{DerivativeOracle, MockPriceOracle, PriceOracle};
pub use orchestration::{FundService, ServiceError};
