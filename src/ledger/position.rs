//! Position tracking for a single instrument.

use chrono::NaiveDateTime;

use crate::error::{LedgerError, Result};
use crate::types::{AccountId, InstrumentCode, Money, Quantity, div_round};

/// Latest mark-to-market of a position, written by the valuation engine.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mark {
    pub price: Money,
    /// `quantity * price` at mark time
    pub value: Money,
    pub unrealized_pl: Money,
    /// Unrealized P&L as a percentage of cost basis
    pub unrealized_pl_pct: f64,
    pub marked_at: NaiveDateTime,
}

/// A long position in a single instrument.
///
/// The row exists only while `quantity > 0`. Average price is the weighted
/// average of all buys since the position was opened; sells never move it.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub account_id: AccountId,
    pub code: InstrumentCode,
    pub quantity: Quantity,
    /// Weighted-average acquisition price (commission excluded)
    pub avg_price: Money,
    pub first_acquired_at: NaiveDateTime,
    pub mark: Option<Mark>,
}

impl Position {
    /// Open a position with its first fill.
    pub fn open(
        account_id: AccountId,
        code: InstrumentCode,
        quantity: Quantity,
        price: Money,
        at: NaiveDateTime,
    ) -> Self {
        Self {
            account_id,
            code,
            quantity,
            avg_price: price,
            first_acquired_at: at,
            mark: None,
        }
    }

    /// Add a buy fill, updating the weighted-average price.
    ///
    /// `new_avg = (avg * held + price * qty) / (held + qty)`, rounded to the
    /// nearest micro.
    pub fn apply_buy(&mut self, qty: Quantity, price: Money) -> Result<()> {
        if qty == 0 {
            return Ok(());
        }
        let new_qty = self
            .quantity
            .checked_add(qty)
            .ok_or_else(|| LedgerError::Validation("position quantity overflow".into()))?;
        let total = self.avg_price.0 as i128 * self.quantity as i128 + price.0 as i128 * qty as i128;
        let avg = div_round(total, new_qty as i128);
        self.avg_price = Money(i64::try_from(avg).map_err(|_| LedgerError::overflow("average price"))?);
        self.quantity = new_qty;
        Ok(())
    }

    /// Remove a sell fill and return its realized P&L `(price - avg) * qty`.
    ///
    /// The caller checks `qty <= quantity`; the average price is unchanged.
    pub fn apply_sell(&mut self, qty: Quantity, price: Money) -> Result<Money> {
        if qty > self.quantity {
            return Err(LedgerError::InsufficientShares {
                code: self.code,
                requested: qty,
                held: self.quantity,
            });
        }
        let realized = (price - self.avg_price)
            .checked_mul_qty(qty)
            .ok_or_else(|| LedgerError::overflow("realized P&L"))?;
        self.quantity -= qty;
        Ok(realized)
    }

    /// Cost basis at average price.
    pub fn cost_basis(&self) -> Money {
        self.avg_price.checked_mul_qty(self.quantity).unwrap_or(Money::MAX)
    }

    /// Value at the latest mark, or at cost when never marked.
    pub fn carrying_value(&self) -> Money {
        match &self.mark {
            Some(mark) => mark.value,
            None => self.cost_basis(),
        }
    }

    /// Record a mark-to-market at `price`.
    pub fn apply_mark(&mut self, price: Money, at: NaiveDateTime) -> Result<&Mark> {
        let value = price
            .checked_mul_qty(self.quantity)
            .ok_or_else(|| LedgerError::overflow("position value"))?;
        let cost = self.cost_basis();
        let unrealized_pl = value - cost;
        let unrealized_pl_pct = if cost.0 != 0 {
            unrealized_pl.to_f64() / cost.to_f64() * 100.0
        } else {
            0.0
        };
        Ok(self.mark.insert(Mark {
            price,
            value,
            unrealized_pl,
            unrealized_pl_pct,
            marked_at: at,
        }))
    }

    /// Returns true once every share has been sold.
    #[inline]
    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }
}
