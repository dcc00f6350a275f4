// Allow our units_micros digit grouping convention (e.g., 1_500000 = 1.5)
#![allow(clippy::inconsistent_digit_grouping)]

//! # paperbook
//!
//! A virtual brokerage ledger with portfolio analytics for paper trading.
//!
//! ## Features
//!
//! - **Ledger**: cash accounts, long-only positions at weighted-average cost,
//!   commission-aware buys and sells, an append-only trade log
//! - **Atomic writes**: every execution commits as one unit of work or not at all
//! - **Fixed-point money**: amounts stored as integer micro-units
//! - **Valuation**: mark-to-market refresh, daily snapshots, exit signals
//! - **Analytics**: volatility, drawdown, VaR, Sharpe/Sortino, beta, risk grade
//! - **Construction**: equal weight, market cap and risk parity targets
//! - **Rebalancing**: threshold-driven trade plans executed through the ledger
//! - **Backtesting**: buy-and-hold replay of a strategy against a benchmark
//!
//! ## Quick Start
//!
//! ```
//! use paperbook::feed::MemoryFeed;
//! use paperbook::ledger::{Ledger, OrderRequest};
//! use paperbook::store::MemoryStore;
//! use paperbook::{InstrumentCode, Money};
//!
//! let samsung = InstrumentCode::new("005930");
//! let feed = MemoryFeed::builder()
//!     .with_quote(samsung, Money::from_units(70_000))
//!     .build();
//!
//! let mut ledger = Ledger::new(MemoryStore::new());
//! let account = ledger.open_account("paper", Money::from_units(10_000_000)).unwrap();
//!
//! // Market order at the latest quote
//! let buy = ledger.execute_buy(OrderRequest::new(account, samsung, 10), &feed).unwrap();
//! assert_eq!(buy.price, Money::from_units(70_000));
//!
//! let view = ledger.portfolio(account).unwrap();
//! assert_eq!(view.position_count(), 1);
//! assert!(view.account.cash_balance < Money::from_units(10_000_000 - 700_000));
//! ```
//!
//! ## Money Representation
//!
//! [`Money`] is an [`i64`] count of millionths of a currency unit. Commissions
//! are computed exactly and rounded half away from zero:
//!
//! ```
//! use paperbook::Money;
//!
//! let m: Money = "1234.5".parse().unwrap();
//! assert_eq!(m, Money(1_234_500000));
//! ```

pub mod analytics;
pub mod backtest;
pub mod construct;
mod error;
pub mod feed;
pub mod ledger;
pub mod rebalance;
pub mod store;
mod types;
pub mod valuation;

// Re-export public API
pub use error::{ErrorKind, LedgerError, Result};
pub use types::{
    AccountId, InstrumentCode, Money, ParseCodeError, ParseMoneyError, Quantity, Side, TradeId,
};
