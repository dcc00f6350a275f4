//! Mark-to-market valuation, daily snapshots, and exit signals.
//!
//! The valuation engine writes only marks and snapshots. It never changes a
//! quantity, an average price or a cash balance.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};

use crate::error::Result;
use crate::feed::PriceFeed;
use crate::ledger::{Ledger, Position};
use crate::store::{LedgerStore, UnitOfWork};
use crate::types::{AccountId, InstrumentCode, Money};

/// Daily portfolio snapshot, one per `(account, date)`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortfolioSnapshot {
    pub account_id: AccountId,
    pub date: NaiveDate,
    pub total_value: Money,
    pub cash_balance: Money,
    pub stock_value: Money,
    /// Return on the initial balance, in percent
    pub return_pct: f64,
}

/// Outcome of a refresh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValuationReport {
    /// Positions marked in this refresh
    pub updated: usize,
    /// Positions whose quote was unavailable; their marks are unchanged
    pub skipped: Vec<InstrumentCode>,
    /// Sum of the new marks' values
    pub stock_value: Money,
    /// Sum of the new marks' unrealized P&L
    pub total_unrealized_pl: Money,
}

impl fmt::Display for ValuationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} positions marked, stock value {}, unrealized P&L {}",
            self.updated, self.stock_value, self.total_unrealized_pl
        )?;
        if !self.skipped.is_empty() {
            let codes: Vec<&str> = self.skipped.iter().map(|c| c.as_str()).collect();
            write!(f, " (no quote: {})", codes.join(", "))?;
        }
        Ok(())
    }
}

/// Mark every open position of `account` at its latest quote.
///
/// Missing quotes are reported in [`ValuationReport::skipped`]; all marks are
/// written in a single transaction.
pub fn refresh<S: LedgerStore>(
    ledger: &mut Ledger<S>,
    feed: &dyn PriceFeed,
    account: AccountId,
) -> Result<ValuationReport> {
    ledger.account(account)?;
    let now = ledger.now();
    let report = ledger
        .store_mut()
        .transaction(|uow| mark_positions(uow, feed, account, now))?;
    info!("{account}: {report}");
    Ok(report)
}

fn mark_positions(
    uow: &mut UnitOfWork<'_>,
    feed: &dyn PriceFeed,
    account: AccountId,
    now: NaiveDateTime,
) -> Result<ValuationReport> {
    let mut report = ValuationReport::default();
    for mut position in uow.positions(account) {
        let code = position.code;
        let price = match feed.latest_quote(code) {
            Ok(p) if p.is_positive() => p,
            Ok(p) => {
                warn!("{code}: ignoring non-positive quote {p}");
                report.skipped.push(code);
                continue;
            }
            Err(e) => {
                warn!("{code}: {e}");
                report.skipped.push(code);
                continue;
            }
        };
        let mark = position.apply_mark(price, now)?;
        debug!(
            "{code} marked @ {price}: value {}, P&L {} ({:.2}%)",
            mark.value, mark.unrealized_pl, mark.unrealized_pl_pct
        );
        report.stock_value += mark.value;
        report.total_unrealized_pl += mark.unrealized_pl;
        report.updated += 1;
        uow.put_position(position);
    }
    Ok(report)
}

/// Refresh marks and upsert the snapshot for `date`, in one transaction.
///
/// Stock value uses each position's latest mark, or cost when it has never
/// been marked. Recording twice on the same date keeps only the latest.
pub fn record_snapshot<S: LedgerStore>(
    ledger: &mut Ledger<S>,
    feed: &dyn PriceFeed,
    account: AccountId,
    date: NaiveDate,
) -> Result<PortfolioSnapshot> {
    ledger.account(account)?;
    let now = ledger.now();
    let snapshot = ledger.store_mut().transaction(|uow| {
        let report = mark_positions(uow, feed, account, now)?;
        debug!("{account}: {report}");
        let stock_value: Money = uow.positions(account).iter().map(Position::carrying_value).sum();
        let acct = uow.account(account)?;
        let total_value = acct.cash_balance + stock_value;
        let snapshot = PortfolioSnapshot {
            account_id: account,
            date,
            total_value,
            cash_balance: acct.cash_balance,
            stock_value,
            return_pct: acct.return_pct(total_value),
        };
        uow.upsert_snapshot(snapshot.clone());
        Ok(snapshot)
    })?;
    info!(
        "{account}: snapshot {date} total {} ({:+.2}%)",
        snapshot.total_value, snapshot.return_pct
    );
    Ok(snapshot)
}

/// The most recent `days` snapshots, oldest first.
pub fn history<S: LedgerStore>(
    ledger: &Ledger<S>,
    account: AccountId,
    days: usize,
) -> Vec<PortfolioSnapshot> {
    let all: Vec<&PortfolioSnapshot> = ledger.store().state().snapshots(account).collect();
    let skip = all.len().saturating_sub(days);
    all.into_iter().skip(skip).cloned().collect()
}

/// Why a position crossed an exit threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ExitKind {
    StopLoss,
    TakeProfit,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::StopLoss => write!(f, "STOP LOSS"),
            ExitKind::TakeProfit => write!(f, "TAKE PROFIT"),
        }
    }
}

/// A marked position beyond its stop-loss or take-profit threshold.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ExitSignal {
    pub code: InstrumentCode,
    pub kind: ExitKind,
    pub quantity: u64,
    pub avg_price: Money,
    pub current_price: Money,
    pub unrealized_pl_pct: f64,
}

/// Exit thresholds in percent of cost.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExitRule {
    /// Trigger when unrealized P&L % is at or below this (negative)
    pub stop_loss_pct: f64,
    /// Trigger when unrealized P&L % is at or above this
    pub take_profit_pct: f64,
}

impl Default for ExitRule {
    fn default() -> Self {
        Self {
            stop_loss_pct: -10.0,
            take_profit_pct: 20.0,
        }
    }
}

/// Positions whose latest mark crosses `rule`. Unmarked positions are ignored.
pub fn exit_signals<S: LedgerStore>(
    ledger: &Ledger<S>,
    account: AccountId,
    rule: ExitRule,
) -> Result<Vec<ExitSignal>> {
    ledger.account(account)?;
    let signals = ledger
        .positions(account)
        .into_iter()
        .filter_map(|p| {
            let mark = p.mark.as_ref()?;
            let kind = if mark.unrealized_pl_pct <= rule.stop_loss_pct {
                ExitKind::StopLoss
            } else if mark.unrealized_pl_pct >= rule.take_profit_pct {
                ExitKind::TakeProfit
            } else {
                return None;
            };
            Some(ExitSignal {
                code: p.code,
                kind,
                quantity: p.quantity,
                avg_price: p.avg_price,
                current_price: mark.price,
                unrealized_pl_pct: mark.unrealized_pl_pct,
            })
        })
        .collect();
    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MemoryFeed;
    use crate::ledger::{FixedClock, OrderRequest};
    use crate::error::LedgerError;
    use crate::store::{ChangeSet, LedgerState, MemoryStore};

    fn aaa() -> InstrumentCode {
        InstrumentCode::new("AAA")
    }
    fn bbb() -> InstrumentCode {
        InstrumentCode::new("BBB")
    }

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap()
    }

    /// Memory store that counts commits and can be told to refuse them.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        commits: usize,
        refuse: bool,
    }

    impl LedgerStore for CountingStore {
        fn state(&self) -> &LedgerState {
            self.inner.state()
        }

        fn commit(&mut self, changes: ChangeSet) -> Result<()> {
            self.commits += 1;
            if self.refuse {
                return Err(LedgerError::Store("disk full".into()));
            }
            self.inner.commit(changes)
        }
    }

    fn setup() -> (Ledger<MemoryStore>, AccountId) {
        setup_in(MemoryStore::new())
    }

    fn setup_in<S: LedgerStore>(store: S) -> (Ledger<S>, AccountId) {
        let mut ledger = Ledger::new(store).with_clock(FixedClock(ts()));
        let account = ledger.open_account("paper", Money::from_units(1_000_000)).unwrap();
        let feed = MemoryFeed::default();
        ledger
            .execute_buy(
                OrderRequest::new(account, aaa(), 10).at_price(Money::from_units(1000)),
                &feed,
            )
            .unwrap();
        ledger
            .execute_buy(
                OrderRequest::new(account, bbb(), 5).at_price(Money::from_units(200)),
                &feed,
            )
            .unwrap();
        (ledger, account)
    }

    #[test]
    fn refresh_marks_and_skips_missing_quotes() {
        let (mut ledger, account) = setup();
        let feed = MemoryFeed::builder()
            .with_quote(aaa(), Money::from_units(1100))
            .build();
        let cash_before = ledger.account(account).unwrap().cash_balance;

        let report = refresh(&mut ledger, &feed, account).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped, vec![bbb()]);
        assert_eq!(report.stock_value, Money::from_units(11_000));
        assert_eq!(report.total_unrealized_pl, Money::from_units(1000));

        let a = ledger.position(account, aaa()).unwrap();
        let mark = a.mark.as_ref().unwrap();
        assert!((mark.unrealized_pl_pct - 10.0).abs() < 1e-9);
        assert!(ledger.position(account, bbb()).unwrap().mark.is_none());
        // quantities, averages and cash untouched
        assert_eq!(a.quantity, 10);
        assert_eq!(a.avg_price, Money::from_units(1000));
        assert_eq!(ledger.account(account).unwrap().cash_balance, cash_before);
    }

    #[test]
    fn stale_mark_survives_missing_quote() {
        let (mut ledger, account) = setup();
        let first = MemoryFeed::builder()
            .with_quote(aaa(), Money::from_units(900))
            .build();
        refresh(&mut ledger, &first, account).unwrap();
        refresh(&mut ledger, &MemoryFeed::default(), account).unwrap();
        let mark = ledger.position(account, aaa()).unwrap().mark.clone().unwrap();
        assert_eq!(mark.price, Money::from_units(900));
    }

    #[test]
    fn snapshot_is_idempotent_per_day() {
        let (mut ledger, account) = setup();
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut feed = MemoryFeed::builder()
            .with_quote(aaa(), Money::from_units(1000))
            .with_quote(bbb(), Money::from_units(200))
            .build();
        record_snapshot(&mut ledger, &feed, account, date).unwrap();
        feed.set_quote(aaa(), Money::from_units(1200));
        let second = record_snapshot(&mut ledger, &feed, account, date).unwrap();

        let all = history(&ledger, account, 30);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], second);
        assert_eq!(second.stock_value, Money::from_units(12_000 + 1_000));
        assert_eq!(second.total_value, second.cash_balance + second.stock_value);
    }

    #[test]
    fn snapshot_commits_marks_and_row_together() {
        let (mut ledger, account) = setup_in(CountingStore::default());
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let feed = MemoryFeed::builder()
            .with_quote(aaa(), Money::from_units(1100))
            .build();

        ledger.store_mut().commits = 0;
        let snap = record_snapshot(&mut ledger, &feed, account, date).unwrap();
        assert_eq!(ledger.store().commits, 1);
        // AAA at its new mark, BBB still at cost
        assert_eq!(snap.stock_value, Money::from_units(11_000 + 1_000));
        assert_eq!(history(&ledger, account, 30), vec![snap]);
    }

    #[test]
    fn failed_snapshot_leaves_no_marks_behind() {
        let (mut ledger, account) = setup_in(CountingStore::default());
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let feed = MemoryFeed::builder()
            .with_quote(aaa(), Money::from_units(1100))
            .build();

        ledger.store_mut().refuse = true;
        let err = record_snapshot(&mut ledger, &feed, account, date).unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
        assert!(ledger.position(account, aaa()).unwrap().mark.is_none());
        assert!(history(&ledger, account, 30).is_empty());
    }

    #[test]
    fn history_returns_latest_days_ascending() {
        let (mut ledger, account) = setup();
        let feed = MemoryFeed::default();
        for day in 2..=6 {
            let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
            record_snapshot(&mut ledger, &feed, account, date).unwrap();
        }
        let recent = history(&ledger, account, 2);
        let days: Vec<u32> = recent.iter().map(|s| chrono::Datelike::day(&s.date)).collect();
        assert_eq!(days, vec![5, 6]);
    }

    #[test]
    fn exit_signals_use_thresholds() {
        let (mut ledger, account) = setup();
        let feed = MemoryFeed::builder()
            .with_quote(aaa(), Money::from_units(880))
            .with_quote(bbb(), Money::from_units(240))
            .build();
        refresh(&mut ledger, &feed, account).unwrap();

        let signals = exit_signals(&ledger, account, ExitRule::default()).unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].code, aaa());
        assert_eq!(signals[0].kind, ExitKind::StopLoss);
        assert_eq!(signals[1].kind, ExitKind::TakeProfit);

        let loose = ExitRule {
            stop_loss_pct: -50.0,
            take_profit_pct: 50.0,
        };
        assert!(exit_signals(&ledger, account, loose).unwrap().is_empty());
    }
}
