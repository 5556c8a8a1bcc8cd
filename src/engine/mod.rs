//! Pure computation engines for fund accounting.

pub mod fees;
pub mod registry;
pub mod shares;
pub mod valuation;

pub use fees::{AccruedFees, FeeEngine, FeeSchedule, InvalidFeeRate};
pub use registry::{OwnedAssets, DEFAULT_MAX_OWNED_ASSETS};
pub use shares::ShareLedger;
pub use valuation::{GavReport, HoldingValuation, PriceFeedKind, ValuationEngine};
