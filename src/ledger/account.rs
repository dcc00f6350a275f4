//! Account and trade records.

use chrono::NaiveDateTime;

use crate::types::{AccountId, InstrumentCode, Money, Quantity, Side, TradeId};

/// A virtual brokerage account.
///
/// Only the ledger mutates `cash_balance`, and never below zero.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub initial_balance: Money,
    pub cash_balance: Money,
    pub created_at: NaiveDateTime,
}

impl Account {
    /// Return on the initial balance for a given total value, in percent.
    pub fn return_pct(&self, total_value: Money) -> f64 {
        if self.initial_balance.0 == 0 {
            return 0.0;
        }
        (total_value - self.initial_balance).to_f64() / self.initial_balance.to_f64() * 100.0
    }
}

/// An executed trade. Append-only.
///
/// `total_amount` is the magnitude of the cash movement: stock amount plus
/// commission on buys, stock amount minus commission on sells.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Trade {
    pub id: TradeId,
    pub account_id: AccountId,
    pub code: InstrumentCode,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Money,
    pub commission: Money,
    pub total_amount: Money,
    pub reason: String,
    pub trade_time: NaiveDateTime,
}

impl Trade {
    /// `price * quantity`, before commission.
    pub fn stock_amount(&self) -> Money {
        match self.side {
            Side::Buy => self.total_amount - self.commission,
            Side::Sell => self.total_amount + self.commission,
        }
    }

    /// Signed cash impact on the account.
    pub fn cash_delta(&self) -> Money {
        match self.side {
            Side::Buy => -self.total_amount,
            Side::Sell => self.total_amount,
        }
    }
}
