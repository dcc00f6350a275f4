//! Ledger errors.

use std::fmt;

use crate::types::{AccountId, InstrumentCode, Money, Quantity};

/// Errors returned by ledger, valuation, analytics and construction calls.
///
/// Every ledger mutation either commits fully or fails with one of these and
/// leaves the store untouched.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Price missing, zero or negative.
    #[error("invalid price for {code}: {reason}")]
    InvalidPrice {
        code: InstrumentCode,
        reason: String,
    },

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },

    #[error("insufficient shares of {code}: requested {requested}, held {held}")]
    InsufficientShares {
        code: InstrumentCode,
        requested: Quantity,
        held: Quantity,
    },

    #[error("no position in {0}")]
    NoPosition(InstrumentCode),

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("store error: {0}")]
    Store(String),
}

impl LedgerError {
    /// Coarse classification, stable across message changes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidPrice { .. } => ErrorKind::InvalidPrice,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::InsufficientShares { .. } => ErrorKind::InsufficientShares,
            LedgerError::NoPosition(_) => ErrorKind::NoPosition,
            LedgerError::DataUnavailable(_) => ErrorKind::DataUnavailable,
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            LedgerError::Store(_) => ErrorKind::Store,
        }
    }

    /// True for errors caused by the order itself rather than the system.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidPrice
                | ErrorKind::InsufficientFunds
                | ErrorKind::InsufficientShares
                | ErrorKind::NoPosition
                | ErrorKind::Validation
        )
    }

    pub(crate) fn overflow(what: &str) -> Self {
        LedgerError::Validation(format!("{what} overflows the money range"))
    }
}

/// Error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    InvalidPrice,
    InsufficientFunds,
    InsufficientShares,
    NoPosition,
    DataUnavailable,
    Validation,
    AccountNotFound,
    Store,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidPrice => "invalid_price",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::InsufficientShares => "insufficient_shares",
            ErrorKind::NoPosition => "no_position",
            ErrorKind::DataUnavailable => "data_unavailable",
            ErrorKind::Validation => "validation",
            ErrorKind::AccountNotFound => "account_not_found",
            ErrorKind::Store => "store",
        };
        f.write_str(s)
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
