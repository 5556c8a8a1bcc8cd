//! Repository layer for database operations.
//!
//! Methods are split across submodules by table group:
//! - `funds.rs` - fund state, share balances, owned assets, calculations
//! - `events.rs` - the fund event log
//!
//! 256-bit integers are stored as decimal TEXT. A column that does not parse
//! back is reported as a decode error rather than read as zero.

mod events;
mod funds;

use primitive_types::U256;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("column {column} holds {value:?}, expected {expected}")]
pub struct InvalidColumn {
    pub column: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn encode_u256(value: U256) -> String {
    value.to_string()
}

pub(crate) fn decode_u256(row: &SqliteRow, column: &'static str) -> Result<U256, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    U256::from_dec_str(&raw).map_err(|_| invalid(column, raw, "a decimal integer"))
}

pub(crate) fn invalid(column: &'static str, value: String, expected: &'static str) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(InvalidColumn {
        column,
        value,
        expected,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_u256_is_decimal() {
        assert_eq!(encode_u256(U256::exp10(18)), "1000000000000000000");
        assert_eq!(encode_u256(U256::zero()), "0");
    }

    #[test]
    fn test_invalid_column_message() {
        let err = invalid("balance", "0xzz".to_string(), "a decimal integer");
        assert!(err.to_string().contains("balance"));
    }
}
