//! SQLite persistence for fund state and the event log.
//!
//! - `migrations`: database creation, connection pragmas, schema
//! - `repo`: the `Repository` used by the fund service

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{InvalidColumn, Repository};
