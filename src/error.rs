use crate::domain::{Address, AssetId};
use crate::exchange::VenueError;
use primitive_types::U256;
use thiserror::Error;

/// A transition was refused before it could change anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionViolation {
    #[error("Amount must be greater than zero")]
    ZeroAmount,
    #[error("Fund is not active")]
    NotActive,
    #[error("Fund is already active")]
    AlreadyActive,
    #[error("{caller} is not authorized to {action}")]
    Unauthorized { caller: Address, action: &'static str },
    #[error("{holder} holds {balance} shares, {requested} requested")]
    InsufficientShares {
        holder: Address,
        balance: U256,
        requested: U256,
    },
    #[error("Policy rejected {action}: {reason}")]
    PolicyRejected { action: &'static str, reason: String },
    #[error("Asset {0} is not accepted for investment")]
    AssetNotInvestable(AssetId),
    #[error("Asset {0} has no valid price")]
    AssetNotPriced(AssetId),
    #[error("Owned asset limit of {limit} reached, cannot track {asset}")]
    TooManyAssets { asset: AssetId, limit: usize },
    #[error("Vault holds {available} of {asset}, {required} required")]
    InsufficientLiquidity {
        asset: AssetId,
        available: U256,
        required: U256,
    },
    #[error("Received {received}, minimum was {minimum}")]
    SlippageExceeded { received: U256, minimum: U256 },
    #[error("Contribution too small to mint any shares")]
    ZeroShares,
    #[error("Redemption too small to pay out anything")]
    ZeroPayout,
    #[error("Fund holds no assets")]
    EmptyFund,
    #[error("Invalid order: {0}")]
    InvalidOrder(String),
    #[error("Another operation is already in progress on this fund")]
    OperationInProgress,
}

/// Fixed-point arithmetic could not produce an exact in-range result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArithmeticViolation {
    #[error("Arithmetic overflow")]
    Overflow,
    #[error("Arithmetic underflow")]
    Underflow,
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Unclaimed fees {fees} exceed gross asset value {gav}")]
    FeeExceedsGav { fees: U256, gav: U256 },
}

/// An asset movement through custody failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("{account} holds {balance} of {asset}, {requested} requested")]
    InsufficientBalance {
        asset: AssetId,
        account: Address,
        balance: U256,
        requested: U256,
    },
    #[error("Transfer of {asset} rejected: {reason}")]
    Rejected { asset: AssetId, reason: String },
}

/// Errors raised by the share ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{holder} holds {balance} shares, cannot burn {requested}")]
    InsufficientBalance {
        holder: Address,
        balance: U256,
        requested: U256,
    },
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticViolation),
}

/// Errors surfaced by fund transitions and valuation.
#[derive(Debug, Error)]
pub enum FundError {
    #[error(transparent)]
    Precondition(#[from] PreconditionViolation),
    #[error("Invalid valuation for {}", format_assets(.assets))]
    InvalidValuation { assets: Vec<AssetId> },
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticViolation),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("Oracle quotes in {actual}, fund is denominated in {expected}")]
    QuoteAssetMismatch { expected: AssetId, actual: AssetId },
    #[error("Derivative {asset} resolves to itself via {}", format_assets(.path))]
    DerivativeCycle { asset: AssetId, path: Vec<AssetId> },
    #[error(transparent)]
    Venue(#[from] VenueError),
}

impl From<LedgerError> for FundError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance {
                holder,
                balance,
                requested,
            } => FundError::Precondition(PreconditionViolation::InsufficientShares {
                holder,
                balance,
                requested,
            }),
            LedgerError::Arithmetic(a) => FundError::Arithmetic(a),
        }
    }
}

impl FundError {
    /// True for failures the caller can fix by retrying with different input.
    pub fn is_precondition(&self) -> bool {
        matches!(self, FundError::Precondition(_))
    }
}

fn format_assets(assets: &[AssetId]) -> String {
    assets
        .iter()
        .map(AssetId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_error_maps_to_precondition() {
        let err: FundError = LedgerError::InsufficientBalance {
            holder: Address::new("0xabc"),
            balance: U256::from(1u8),
            requested: U256::from(2u8),
        }
        .into();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("0xabc"));
    }

    #[test]
    fn test_invalid_valuation_lists_assets() {
        let err = FundError::InvalidValuation {
            assets: vec![AssetId::new("WBTC"), AssetId::new("MKR")],
        };
        assert_eq!(err.to_string(), "Invalid valuation for WBTC, MKR");
    }

    #[test]
    fn test_arithmetic_error_display() {
        let err = FundError::from(ArithmeticViolation::DivisionByZero);
        assert_eq!(err.to_string(), "Division by zero");
        assert!(!err.is_precondition());
    }
}
