//! Error types for the CLI.

use std::path::PathBuf;

use paperbook::LedgerError;
use paperbook::backtest::BacktestError;

/// Errors from loading inputs and running commands.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    Config(String),

    #[error("cannot read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid market data: {0}")]
    MarketData(String),

    #[error("cannot read market data {}: {source}", .path.display())]
    MarketRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid market data JSON: {0}")]
    MarketParse(#[from] serde_json::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("cannot write audit log: {0}")]
    Audit(#[from] std::io::Error),
}

impl Error {
    /// True when the ledger refused the order itself (bad price, funds, shares).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Ledger(e) if e.is_rejection())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
