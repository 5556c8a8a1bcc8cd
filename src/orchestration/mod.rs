//! Async service layer: one fund, its custody and its repository.

pub mod service;

pub use service::{FundService, ServiceError};
