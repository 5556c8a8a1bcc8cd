//! Domain types for fund accounting.
//!
//! This module provides:
//! - 256-bit fixed-point arithmetic helpers
//! - Domain primitives: TimeMs, Address, AssetId, FundId
//! - Rates, valuations and the Calculations snapshot
//! - Fund events with deterministic keys
//! - Decimal conversion for human-facing amounts

pub mod calculations;
pub mod decimal;
pub mod event;
pub mod fixed;
pub mod primitives;
pub mod rate;

pub use calculations::Calculations;
pub use decimal::Decimal;
pub use event::{EventKind, FundEvent};
pub use primitives::{Address, AssetId, FundId, TimeMs};
pub use rate::{AssetAmount, Rate, RateMode, Valuation};
