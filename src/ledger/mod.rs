//! Ledger core: accounts, positions, trades, and order execution.
//!
//! [`Ledger`] owns a [`LedgerStore`] and is the only writer of cash balances
//! and position quantities. Each buy or sell is one unit of work: the trade
//! row, the cash movement and the position update commit together or not at
//! all.
//!
//! # Example
//!
//! ```
//! use paperbook::ledger::{Ledger, OrderRequest};
//! use paperbook::feed::MemoryFeed;
//! use paperbook::store::MemoryStore;
//! use paperbook::{InstrumentCode, Money};
//!
//! let feed = MemoryFeed::default();
//! let mut ledger = Ledger::new(MemoryStore::new());
//! let account = ledger.open_account("paper", Money::from_units(10_000_000)).unwrap();
//!
//! let code = InstrumentCode::new("005930");
//! let receipt = ledger
//!     .execute_buy(OrderRequest::new(account, code, 10).at_price(Money::from_units(1000)), &feed)
//!     .unwrap();
//! assert_eq!(receipt.commission, Money(1_500000));
//! assert_eq!(receipt.cash_after, "9989998.5".parse().unwrap());
//! ```

mod account;
mod cost_model;
mod position;

pub use account::{Account, Trade};
pub use cost_model::CostModel;
pub use position::{Mark, Position};

use chrono::{Local, NaiveDateTime};
use log::info;

use crate::error::{LedgerError, Result};
use crate::feed::PriceFeed;
use crate::store::LedgerStore;
use crate::types::{AccountId, InstrumentCode, Money, Quantity, Side, TradeId};

/// Source of trade timestamps.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock frozen at one instant, for deterministic tests and replays.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// A buy or sell request.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderRequest {
    pub account: AccountId,
    pub code: InstrumentCode,
    pub quantity: Quantity,
    /// Execution price; `None` uses the feed's latest quote
    pub price: Option<Money>,
    pub reason: String,
}

impl OrderRequest {
    pub fn new(account: AccountId, code: InstrumentCode, quantity: Quantity) -> Self {
        Self {
            account,
            code,
            quantity,
            price: None,
            reason: String::new(),
        }
    }

    pub fn at_price(mut self, price: Money) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Result of a successful buy.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BuyReceipt {
    pub trade_id: TradeId,
    pub code: InstrumentCode,
    pub quantity: Quantity,
    pub price: Money,
    pub commission: Money,
    /// Stock amount plus commission
    pub total_amount: Money,
    pub avg_price_after: Money,
    pub cash_after: Money,
    pub trade_time: NaiveDateTime,
}

/// Result of a successful sell.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SellReceipt {
    pub trade_id: TradeId,
    pub code: InstrumentCode,
    pub quantity: Quantity,
    pub price: Money,
    pub commission: Money,
    /// Stock amount minus commission
    pub total_amount: Money,
    pub avg_price: Money,
    /// `(price - avg_price) * quantity`, commission excluded
    pub realized_pl: Money,
    pub realized_pl_pct: f64,
    pub remaining_quantity: Quantity,
    pub cash_after: Money,
    pub trade_time: NaiveDateTime,
}

/// Point-in-time view of an account and its holdings.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioView {
    pub account: Account,
    /// Sorted by carrying value, largest first
    pub positions: Vec<Position>,
    pub stock_value: Money,
    pub total_value: Money,
    pub return_pct: f64,
}

impl PortfolioView {
    /// Weight of each position in total value.
    pub fn weights(&self) -> Vec<(InstrumentCode, f64)> {
        if !self.total_value.is_positive() {
            return Vec::new();
        }
        let total = self.total_value.to_f64();
        self.positions
            .iter()
            .map(|p| (p.code, p.carrying_value().to_f64() / total))
            .collect()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }
}

/// The ledger: order execution and account state over a store.
pub struct Ledger<S: LedgerStore> {
    store: S,
    cost_model: CostModel,
    clock: Box<dyn Clock + Send + Sync>,
}

impl<S: LedgerStore> Ledger<S> {
    /// Ledger with the default commission and the system clock.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cost_model: CostModel::default(),
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    // === Queries ===

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn account(&self, id: AccountId) -> Result<&Account> {
        self.store
            .state()
            .account(id)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    pub fn position(&self, account: AccountId, code: InstrumentCode) -> Option<&Position> {
        self.store.state().position(account, code)
    }

    /// Open positions, ordered by instrument code.
    pub fn positions(&self, account: AccountId) -> Vec<&Position> {
        self.store.state().positions(account).collect()
    }

    /// Trades in execution order (oldest first).
    pub fn trade_log(&self, account: AccountId) -> Vec<&Trade> {
        let mut trades: Vec<&Trade> = self.store.state().trades(account).collect();
        trades.sort_by_key(|t| (t.trade_time, t.id));
        trades
    }

    /// Most recent trades first, up to `limit`.
    pub fn recent_trades(&self, account: AccountId, limit: usize) -> Vec<&Trade> {
        let mut trades = self.trade_log(account);
        trades.reverse();
        trades.truncate(limit);
        trades
    }

    /// Cash, holdings and totals at the latest marks.
    pub fn portfolio(&self, account: AccountId) -> Result<PortfolioView> {
        let acct = self.account(account)?.clone();
        let mut positions: Vec<Position> =
            self.store.state().positions(account).cloned().collect();
        positions.sort_by(|a, b| b.carrying_value().cmp(&a.carrying_value()).then(a.code.cmp(&b.code)));
        let stock_value: Money = positions.iter().map(Position::carrying_value).sum();
        let total_value = acct.cash_balance + stock_value;
        let return_pct = acct.return_pct(total_value);
        Ok(PortfolioView {
            account: acct,
            positions,
            stock_value,
            total_value,
            return_pct,
        })
    }

    // === Mutations ===

    /// Create an account funded with `initial_balance` in cash.
    pub fn open_account(&mut self, name: &str, initial_balance: Money) -> Result<AccountId> {
        if initial_balance.is_negative() {
            return Err(LedgerError::Validation(format!(
                "initial balance must be non-negative, got {initial_balance}"
            )));
        }
        if name.trim().is_empty() {
            return Err(LedgerError::Validation("account name must not be empty".into()));
        }
        let now = self.clock.now();
        let id = self
            .store
            .transaction(|uow| Ok(uow.insert_account(name, initial_balance, now)))?;
        info!("opened account {id} ({name}) with {initial_balance}");
        Ok(id)
    }

    /// Buy `quantity` shares, creating or averaging into the position.
    ///
    /// Fails with `InsufficientFunds` when cash does not cover the stock
    /// amount plus commission; the ledger is unchanged on any error.
    pub fn execute_buy(&mut self, req: OrderRequest, feed: &dyn PriceFeed) -> Result<BuyReceipt> {
        validate_quantity(&req)?;
        let price = resolve_price(&req, feed)?;
        let stock_amount = price
            .checked_mul_qty(req.quantity)
            .ok_or_else(|| LedgerError::overflow("stock amount"))?;
        let commission = self.cost_model.commission(stock_amount);
        let total_amount = stock_amount
            .checked_add(commission)
            .ok_or_else(|| LedgerError::overflow("total amount"))?;
        let now = self.clock.now();

        let receipt = self.store.transaction(|uow| {
            let account = uow.account_mut(req.account)?;
            if account.cash_balance < total_amount {
                return Err(LedgerError::InsufficientFunds {
                    required: total_amount,
                    available: account.cash_balance,
                });
            }
            account.cash_balance -= total_amount;
            let cash_after = account.cash_balance;

            let position = match uow.position(req.account, req.code) {
                Some(existing) => {
                    let mut p = existing.clone();
                    p.apply_buy(req.quantity, price)?;
                    p
                }
                None => Position::open(req.account, req.code, req.quantity, price, now),
            };
            let avg_price_after = position.avg_price;
            uow.put_position(position);

            let trade_id = uow.append_trade(Trade {
                id: TradeId(0),
                account_id: req.account,
                code: req.code,
                side: Side::Buy,
                quantity: req.quantity,
                price,
                commission,
                total_amount,
                reason: req.reason.clone(),
                trade_time: now,
            });

            Ok(BuyReceipt {
                trade_id,
                code: req.code,
                quantity: req.quantity,
                price,
                commission,
                total_amount,
                avg_price_after,
                cash_after,
                trade_time: now,
            })
        })?;

        info!(
            "{} BUY {} x{} @ {} (commission {}, cash {})",
            req.account, req.code, req.quantity, price, commission, receipt.cash_after
        );
        Ok(receipt)
    }

    /// Sell `quantity` shares of an existing position.
    ///
    /// Realized P&L is measured against the average price; the remaining
    /// shares keep that average, and the position is removed at zero.
    pub fn execute_sell(&mut self, req: OrderRequest, feed: &dyn PriceFeed) -> Result<SellReceipt> {
        validate_quantity(&req)?;
        let held = self
            .store
            .state()
            .position(req.account, req.code)
            .map(|p| p.quantity);
        self.account(req.account)?;
        match held {
            None => return Err(LedgerError::NoPosition(req.code)),
            Some(held) if held < req.quantity => {
                return Err(LedgerError::InsufficientShares {
                    code: req.code,
                    requested: req.quantity,
                    held,
                });
            }
            Some(_) => {}
        }

        let price = resolve_price(&req, feed)?;
        let stock_amount = price
            .checked_mul_qty(req.quantity)
            .ok_or_else(|| LedgerError::overflow("stock amount"))?;
        let commission = self.cost_model.commission(stock_amount);
        let total_amount = stock_amount - commission;
        if total_amount.is_negative() {
            return Err(LedgerError::Validation(format!(
                "commission {commission} exceeds sale proceeds {stock_amount}"
            )));
        }
        let now = self.clock.now();

        let receipt = self.store.transaction(|uow| {
            let mut position = uow
                .position(req.account, req.code)
                .cloned()
                .ok_or(LedgerError::NoPosition(req.code))?;
            let avg_price = position.avg_price;
            let realized_pl = position.apply_sell(req.quantity, price)?;
            let cost = avg_price
                .checked_mul_qty(req.quantity)
                .ok_or_else(|| LedgerError::overflow("cost basis"))?;
            let realized_pl_pct = if cost.0 != 0 {
                realized_pl.to_f64() / cost.to_f64() * 100.0
            } else {
                0.0
            };
            let remaining_quantity = position.quantity;
            uow.put_position(position);

            let account = uow.account_mut(req.account)?;
            account.cash_balance = account
                .cash_balance
                .checked_add(total_amount)
                .ok_or_else(|| LedgerError::overflow("cash balance"))?;
            let cash_after = account.cash_balance;

            let trade_id = uow.append_trade(Trade {
                id: TradeId(0),
                account_id: req.account,
                code: req.code,
                side: Side::Sell,
                quantity: req.quantity,
                price,
                commission,
                total_amount,
                reason: req.reason.clone(),
                trade_time: now,
            });

            Ok(SellReceipt {
                trade_id,
                code: req.code,
                quantity: req.quantity,
                price,
                commission,
                total_amount,
                avg_price,
                realized_pl,
                realized_pl_pct,
                remaining_quantity,
                cash_after,
                trade_time: now,
            })
        })?;

        info!(
            "{} SELL {} x{} @ {} (realized {}, {:.2}%)",
            req.account, req.code, req.quantity, price, receipt.realized_pl, receipt.realized_pl_pct
        );
        Ok(receipt)
    }
}

fn validate_quantity(req: &OrderRequest) -> Result<()> {
    if req.quantity == 0 {
        return Err(LedgerError::Validation("quantity must be greater than zero".into()));
    }
    Ok(())
}

/// Explicit price if given, otherwise the latest quote; must be positive.
fn resolve_price(req: &OrderRequest, feed: &dyn PriceFeed) -> Result<Money> {
    let price = match req.price {
        Some(p) => p,
        None => feed.latest_quote(req.code).map_err(|e| LedgerError::InvalidPrice {
            code: req.code,
            reason: e.to_string(),
        })?,
    };
    if !price.is_positive() {
        return Err(LedgerError::InvalidPrice {
            code: req.code,
            reason: format!("price must be positive, got {price}"),
        });
    }
    Ok(price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::feed::MemoryFeed;
    use crate::store::{ChangeSet, LedgerState, MemoryStore};
    use chrono::NaiveDate;

    fn samsung() -> InstrumentCode {
        InstrumentCode::new("005930")
    }

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn ledger() -> (Ledger<MemoryStore>, AccountId) {
        let mut ledger = Ledger::new(MemoryStore::new()).with_clock(FixedClock(ts()));
        let account = ledger.open_account("paper", Money::from_units(10_000_000)).unwrap();
        (ledger, account)
    }

    fn buy(account: AccountId, qty: Quantity, price: i64) -> OrderRequest {
        OrderRequest::new(account, samsung(), qty).at_price(Money::from_units(price))
    }

    // === Buy ===

    #[test]
    fn buy_charges_commission() {
        let (mut ledger, account) = ledger();
        let feed = MemoryFeed::default();
        let receipt = ledger.execute_buy(buy(account, 10, 1000), &feed).unwrap();

        assert_eq!(receipt.commission, Money(1_500000));
        assert_eq!(receipt.total_amount, Money(10_001_500000));
        assert_eq!(receipt.cash_after, Money(9_989_998_500000));
        assert_eq!(receipt.trade_id, TradeId(1));

        let pos = ledger.position(account, samsung()).unwrap();
        assert_eq!(pos.quantity, 10);
        assert_eq!(pos.avg_price, Money::from_units(1000));
    }

    #[test]
    fn second_buy_averages() {
        let (mut ledger, account) = ledger();
        let feed = MemoryFeed::default();
        ledger.execute_buy(buy(account, 10, 1000), &feed).unwrap();
        let receipt = ledger.execute_buy(buy(account, 10, 1200), &feed).unwrap();
        assert_eq!(receipt.avg_price_after, Money::from_units(1100));
        assert_eq!(ledger.position(account, samsung()).unwrap().quantity, 20);
    }

    #[test]
    fn buy_uses_latest_quote_when_price_omitted() {
        let (mut ledger, account) = ledger();
        let feed = MemoryFeed::builder()
            .with_quote(samsung(), Money::from_units(1500))
            .build();
        let receipt = ledger
            .execute_buy(OrderRequest::new(account, samsung(), 2), &feed)
            .unwrap();
        assert_eq!(receipt.price, Money::from_units(1500));
    }

    #[test]
    fn buy_without_quote_is_invalid_price() {
        let (mut ledger, account) = ledger();
        let err = ledger
            .execute_buy(OrderRequest::new(account, samsung(), 2), &MemoryFeed::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPrice);
    }

    #[test]
    fn buy_rejects_non_positive_price_and_zero_quantity() {
        let (mut ledger, account) = ledger();
        let feed = MemoryFeed::default();
        let err = ledger.execute_buy(buy(account, 1, 0), &feed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPrice);
        let err = ledger.execute_buy(buy(account, 1, -5), &feed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPrice);
        let err = ledger.execute_buy(buy(account, 0, 100), &feed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(ledger.trade_log(account).is_empty());
    }

    #[test]
    fn buy_insufficient_funds_leaves_state_unchanged() {
        let (mut ledger, account) = ledger();
        let before = ledger.store().state().clone();
        let err = ledger
            .execute_buy(buy(account, 10_000, 1000), &MemoryFeed::default())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(ledger.store().state(), &before);
    }

    #[test]
    fn buy_spending_exact_cash_is_allowed() {
        let mut ledger = Ledger::new(MemoryStore::new())
            .with_clock(FixedClock(ts()))
            .with_cost_model(CostModel::zero());
        let account = ledger.open_account("exact", Money::from_units(1000)).unwrap();
        let receipt = ledger
            .execute_buy(buy(account, 1, 1000), &MemoryFeed::default())
            .unwrap();
        assert_eq!(receipt.cash_after, Money::ZERO);
    }

    #[test]
    fn unknown_account() {
        let (mut ledger, _) = ledger();
        let err = ledger
            .execute_buy(buy(AccountId(99), 1, 100), &MemoryFeed::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccountNotFound);
    }

    // === Sell ===

    #[test]
    fn sell_realizes_against_average() {
        let (mut ledger, account) = ledger();
        let feed = MemoryFeed::default();
        ledger.execute_buy(buy(account, 10, 1000), &feed).unwrap();
        ledger.execute_buy(buy(account, 10, 1200), &feed).unwrap();
        let receipt = ledger
            .execute_sell(buy(account, 20, 1300).with_reason("take profit"), &feed)
            .unwrap();

        assert_eq!(receipt.realized_pl, Money::from_units(4000));
        assert!((receipt.realized_pl_pct - 4000.0 / 22000.0 * 100.0).abs() < 1e-9);
        assert_eq!(receipt.remaining_quantity, 0);
        assert!(ledger.position(account, samsung()).is_none());
        assert_eq!(ledger.trade_log(account).last().unwrap().reason, "take profit");
    }

    #[test]
    fn partial_sell_keeps_average() {
        let (mut ledger, account) = ledger();
        let feed = MemoryFeed::default();
        ledger.execute_buy(buy(account, 10, 1000), &feed).unwrap();
        let receipt = ledger.execute_sell(buy(account, 4, 900), &feed).unwrap();
        assert_eq!(receipt.realized_pl, Money::from_units(-400));
        let pos = ledger.position(account, samsung()).unwrap();
        assert_eq!(pos.quantity, 6);
        assert_eq!(pos.avg_price, Money::from_units(1000));
    }

    #[test]
    fn sell_without_position() {
        let (mut ledger, account) = ledger();
        let err = ledger
            .execute_sell(buy(account, 1, 100), &MemoryFeed::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoPosition);
    }

    #[test]
    fn oversell_leaves_state_unchanged() {
        let (mut ledger, account) = ledger();
        let feed = MemoryFeed::default();
        ledger.execute_buy(buy(account, 5, 1000), &feed).unwrap();
        let before = ledger.store().state().clone();
        let err = ledger.execute_sell(buy(account, 6, 1000), &feed).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientShares { requested: 6, held: 5, .. }));
        assert_eq!(ledger.store().state(), &before);
    }

    #[test]
    fn round_trip_costs_two_commissions() {
        let (mut ledger, account) = ledger();
        let feed = MemoryFeed::default();
        ledger.execute_buy(buy(account, 10, 1000), &feed).unwrap();
        ledger.execute_sell(buy(account, 10, 1000), &feed).unwrap();
        let cash = ledger.account(account).unwrap().cash_balance;
        assert_eq!(cash, Money::from_units(10_000_000) - Money(2 * 1_500000));
    }

    // === Atomicity ===

    /// Store whose commits always fail.
    struct FailingStore {
        state: LedgerState,
    }

    impl LedgerStore for FailingStore {
        fn state(&self) -> &LedgerState {
            &self.state
        }

        fn commit(&mut self, _changes: ChangeSet) -> Result<()> {
            Err(LedgerError::Store("disk full".into()))
        }
    }

    #[test]
    fn failed_commit_applies_nothing() {
        let (mut ledger, account) = ledger();
        ledger
            .execute_buy(buy(account, 10, 1000), &MemoryFeed::default())
            .unwrap();
        let state = ledger.into_store().into_state();

        let mut failing = Ledger::new(FailingStore { state: state.clone() });
        let err = failing
            .execute_buy(buy(account, 1, 1000), &MemoryFeed::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
        let err = failing
            .execute_sell(buy(account, 10, 1000), &MemoryFeed::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
        assert_eq!(failing.store().state(), &state);
    }

    // === Views ===

    #[test]
    fn portfolio_view_totals() {
        let (mut ledger, account) = ledger();
        let feed = MemoryFeed::default();
        ledger.execute_buy(buy(account, 10, 1000), &feed).unwrap();
        ledger
            .execute_buy(
                OrderRequest::new(account, InstrumentCode::new("000660"), 1)
                    .at_price(Money::from_units(50_000)),
                &feed,
            )
            .unwrap();
        let view = ledger.portfolio(account).unwrap();
        assert_eq!(view.position_count(), 2);
        assert_eq!(view.positions[0].code, InstrumentCode::new("000660"));
        assert_eq!(view.stock_value, Money::from_units(60_000));
        assert_eq!(view.total_value, view.account.cash_balance + view.stock_value);
        assert!(view.return_pct < 0.0);
    }

    #[test]
    fn recent_trades_newest_first() {
        let (mut ledger, account) = ledger();
        let feed = MemoryFeed::default();
        for price in [1000, 1100, 1200] {
            ledger.execute_buy(buy(account, 1, price), &feed).unwrap();
        }
        let recent = ledger.recent_trades(account, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, TradeId(3));
        assert_eq!(recent[1].id, TradeId(2));
    }

    #[test]
    fn open_account_validation() {
        let mut ledger = Ledger::new(MemoryStore::new());
        assert!(ledger.open_account("x", Money::from_units(-1)).is_err());
        assert!(ledger.open_account("  ", Money::from_units(1)).is_err());
        let a = ledger.open_account("a", Money::ZERO).unwrap();
        let b = ledger.open_account("b", Money::ZERO).unwrap();
        assert_ne!(a, b);
    }
}
