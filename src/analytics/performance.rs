//! Account-level performance: trade replay and the snapshot-history report.

use std::fmt;

use rustc_hash::FxHashMap;

use super::risk::{max_drawdown, TRADING_DAYS};
use super::series::{mean, population_std, simple_returns};
use crate::error::{LedgerError, Result};
use crate::ledger::{Ledger, PortfolioView, Trade};
use crate::store::LedgerStore;
use crate::types::{AccountId, InstrumentCode, Money, Quantity, Side};
use crate::valuation::{self, PortfolioSnapshot};

/// Annual risk-free rate used by the account report's Sharpe ratio.
pub const REPORT_RISK_FREE: f64 = 0.03;

/// Aggregates from replaying a trade log.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TradeReplay {
    pub buy_count: usize,
    pub sell_count: usize,
    /// Sells whose proceeds exceeded their cost basis
    pub winning_sells: usize,
    /// Sum of `proceeds - cost basis` over all sells, commissions included
    pub realized_pl: Money,
}

impl TradeReplay {
    pub fn num_trades(&self) -> usize {
        self.buy_count + self.sell_count
    }

    /// Winning sells over all sells, in percent.
    pub fn win_rate(&self) -> f64 {
        if self.sell_count == 0 {
            return 0.0;
        }
        self.winning_sells as f64 / self.sell_count as f64 * 100.0
    }
}

#[derive(Default)]
struct Lot {
    quantity: Quantity,
    total_cost: Money,
}

/// Replay trades in order, tracking `(quantity, total_cost)` per instrument.
///
/// Buys add their commission-inclusive `total_amount` to the cost. A sell
/// releases `total_cost * sold / held` of it and books `total_amount` minus
/// that basis as realized P&L. Callers pass trades sorted by
/// `(trade_time, id)`; [`Ledger::trade_log`] already is.
pub fn replay_trades<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Result<TradeReplay> {
    let mut lots: FxHashMap<InstrumentCode, Lot> = FxHashMap::default();
    let mut replay = TradeReplay::default();

    for trade in trades {
        let lot = lots.entry(trade.code).or_default();
        match trade.side {
            Side::Buy => {
                replay.buy_count += 1;
                lot.quantity += trade.quantity;
                lot.total_cost += trade.total_amount;
            }
            Side::Sell => {
                replay.sell_count += 1;
                let cost_basis = if lot.quantity == 0 {
                    Money::ZERO
                } else {
                    let sold = trade.quantity.min(lot.quantity);
                    lot.total_cost
                        .checked_mul_ratio(sold as i64, lot.quantity as i64)
                        .ok_or_else(|| LedgerError::overflow("cost basis"))?
                };
                let profit = trade.total_amount - cost_basis;
                if profit.is_positive() {
                    replay.winning_sells += 1;
                }
                replay.realized_pl += profit;

                lot.quantity = lot.quantity.saturating_sub(trade.quantity);
                lot.total_cost -= cost_basis;
                if lot.quantity == 0 {
                    lot.total_cost = Money::ZERO;
                }
            }
        }
    }
    Ok(replay)
}

/// Realized and unrealized P&L of an account with trade statistics.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TradeSummary {
    pub replay: TradeReplay,
    /// Sum of the open positions' marked unrealized P&L
    pub unrealized_pl: Money,
    /// `total_value - initial_balance`
    pub total_return: Money,
    pub total_return_pct: f64,
    /// `total_return / num_trades`; zero without trades
    pub avg_profit_per_trade: Money,
}

/// Aggregate an account's trade log against its current holdings.
pub fn trade_summary<S: LedgerStore>(ledger: &Ledger<S>, account: AccountId) -> Result<TradeSummary> {
    let view = ledger.portfolio(account)?;
    let replay = replay_trades(ledger.trade_log(account))?;
    Ok(summarize(&view, replay))
}

fn summarize(view: &PortfolioView, replay: TradeReplay) -> TradeSummary {
    let unrealized_pl = view
        .positions
        .iter()
        .filter_map(|p| p.mark.as_ref())
        .map(|m| m.unrealized_pl)
        .sum();
    let total_return = view.total_value - view.account.initial_balance;
    let n = replay.num_trades() as i64;
    let avg_profit_per_trade = if n == 0 {
        Money::ZERO
    } else {
        total_return.checked_mul_ratio(1, n).unwrap_or(Money::ZERO)
    };
    TradeSummary {
        replay,
        unrealized_pl,
        total_return,
        total_return_pct: view.return_pct,
        avg_profit_per_trade,
    }
}

/// Return statistics over a snapshot history.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HistoryStats {
    /// Excess-return Sharpe, population std
    pub sharpe: f64,
    /// Deepest decline of total value, in percent (≤ 0)
    pub max_drawdown: f64,
    /// Longest run of consecutive snapshots below the running peak
    pub max_drawdown_days: usize,
    /// Annualized population std of daily returns, in percent
    pub volatility: f64,
}

/// Statistics of the day-over-day change in total value.
///
/// Sharpe is `mean(r - rf/252) / std(r - rf/252) × √252` with population std,
/// 0 when flat or when fewer than two snapshots exist.
pub fn history_stats(snapshots: &[PortfolioSnapshot], risk_free: f64) -> HistoryStats {
    if snapshots.len() < 2 {
        return HistoryStats::default();
    }
    let values: Vec<f64> = snapshots.iter().map(|s| s.total_value.to_f64()).collect();
    let returns = simple_returns(&values);

    let daily_rf = risk_free / TRADING_DAYS;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let excess_std = population_std(&excess);
    let sharpe = if excess_std > 0.0 {
        mean(&excess) / excess_std * TRADING_DAYS.sqrt()
    } else {
        0.0
    };

    let dd = max_drawdown(&values);
    HistoryStats {
        sharpe,
        max_drawdown: dd.max_drawdown_pct,
        max_drawdown_days: dd.longest_underwater,
        volatility: population_std(&returns) * TRADING_DAYS.sqrt() * 100.0,
    }
}

/// Full performance report of one account.
#[derive(Clone, Debug, PartialEq)]
pub struct PerformanceReport {
    pub portfolio: PortfolioView,
    pub trades: TradeSummary,
    pub stats: HistoryStats,
    /// Most recent trades, newest first
    pub recent_trades: Vec<Trade>,
    /// Snapshots analysed, oldest first
    pub history: Vec<PortfolioSnapshot>,
}

/// Trades listed in a report.
pub const RECENT_TRADES: usize = 10;

/// Build the performance report over the last `period_days` snapshots.
///
/// Reads only; call [`valuation::refresh`] first for current marks.
pub fn performance_report<S: LedgerStore>(
    ledger: &Ledger<S>,
    account: AccountId,
    period_days: usize,
) -> Result<PerformanceReport> {
    let portfolio = ledger.portfolio(account)?;
    let replay = replay_trades(ledger.trade_log(account))?;
    let trades = summarize(&portfolio, replay);
    let history = valuation::history(ledger, account, period_days);
    let stats = history_stats(&history, REPORT_RISK_FREE);
    let recent_trades = ledger
        .recent_trades(account, RECENT_TRADES)
        .into_iter()
        .cloned()
        .collect();
    Ok(PerformanceReport {
        portfolio,
        trades,
        stats,
        recent_trades,
        history,
    })
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.portfolio;
        let t = &self.trades;
        writeln!(f, "Account {} ({})", p.account.id, p.account.name)?;
        writeln!(f, "  Initial balance: {:>16}", p.account.initial_balance)?;
        writeln!(f, "  Current value:   {:>16}", p.total_value)?;
        writeln!(f, "  Cash:            {:>16}", p.account.cash_balance)?;
        writeln!(f, "  Stock value:     {:>16}", p.stock_value)?;
        writeln!(
            f,
            "  Total return:    {:>16} ({:+.2}%)",
            t.total_return, t.total_return_pct
        )?;
        writeln!(f, "  Realized P&L:    {:>16}", t.replay.realized_pl)?;
        writeln!(f, "  Unrealized P&L:  {:>16}", t.unrealized_pl)?;
        writeln!(
            f,
            "  Trades:          {:>8} ({} buys, {} sells)",
            t.replay.num_trades(),
            t.replay.buy_count,
            t.replay.sell_count
        )?;
        writeln!(f, "  Win rate:        {:>8.2}%", t.replay.win_rate())?;
        writeln!(f, "  Avg per trade:   {:>16}", t.avg_profit_per_trade)?;
        writeln!(f, "  Positions:       {:>8}", p.position_count())?;
        writeln!(f, "  Sharpe:          {:>8.2}", self.stats.sharpe)?;
        writeln!(
            f,
            "  Max drawdown:    {:>8.2}% ({} days)",
            self.stats.max_drawdown, self.stats.max_drawdown_days
        )?;
        write!(f, "  Volatility:      {:>8.2}%", self.stats.volatility)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MemoryFeed;
    use crate::ledger::{FixedClock, OrderRequest};
    use crate::store::MemoryStore;
    use crate::types::TradeId;
    use chrono::{NaiveDate, NaiveDateTime};

    fn aaa() -> InstrumentCode {
        InstrumentCode::new("AAA")
    }

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn trade(id: u64, side: Side, qty: Quantity, total: i64) -> Trade {
        Trade {
            id: TradeId(id),
            account_id: AccountId(1),
            code: aaa(),
            side,
            quantity: qty,
            price: Money::ZERO,
            commission: Money::ZERO,
            total_amount: Money::from_units(total),
            reason: String::new(),
            trade_time: ts(id as u32),
        }
    }

    #[test]
    fn replay_uses_average_cost_at_sale() {
        let trades = vec![
            trade(1, Side::Buy, 10, 10_000),
            trade(2, Side::Buy, 10, 12_000),
            trade(3, Side::Sell, 5, 6_500),  // basis 5_500, +1_000
            trade(4, Side::Sell, 15, 15_000), // basis 16_500, -1_500
        ];
        let replay = replay_trades(&trades).unwrap();
        assert_eq!(replay.buy_count, 2);
        assert_eq!(replay.sell_count, 2);
        assert_eq!(replay.winning_sells, 1);
        assert_eq!(replay.realized_pl, Money::from_units(-500));
        assert_eq!(replay.win_rate(), 50.0);
    }

    #[test]
    fn replay_resets_after_flat() {
        let trades = vec![
            trade(1, Side::Buy, 10, 10_000),
            trade(2, Side::Sell, 10, 9_000),
            trade(3, Side::Buy, 1, 500),
            trade(4, Side::Sell, 1, 600),
        ];
        let replay = replay_trades(&trades).unwrap();
        assert_eq!(replay.realized_pl, Money::from_units(-1_000 + 100));
        assert_eq!(replay.winning_sells, 1);
    }

    #[test]
    fn sell_without_lot_has_zero_basis() {
        let replay = replay_trades(&[trade(1, Side::Sell, 1, 100)]).unwrap();
        assert_eq!(replay.realized_pl, Money::from_units(100));
    }

    #[test]
    fn empty_replay() {
        let replay = replay_trades(Vec::<&Trade>::new()).unwrap();
        assert_eq!(replay, TradeReplay::default());
        assert_eq!(replay.win_rate(), 0.0);
    }

    fn snapshot(day: u32, total: i64) -> PortfolioSnapshot {
        PortfolioSnapshot {
            account_id: AccountId(1),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            total_value: Money::from_units(total),
            cash_balance: Money::from_units(total),
            stock_value: Money::ZERO,
            return_pct: 0.0,
        }
    }

    #[test]
    fn history_stats_drawdown_duration() {
        let snaps = vec![
            snapshot(1, 100),
            snapshot(2, 110),
            snapshot(3, 99),
            snapshot(4, 104),
            snapshot(5, 120),
        ];
        let stats = history_stats(&snaps, REPORT_RISK_FREE);
        assert!((stats.max_drawdown + 10.0).abs() < 1e-9);
        assert_eq!(stats.max_drawdown_days, 2);
        assert!(stats.volatility > 0.0);
    }

    #[test]
    fn history_stats_degenerate() {
        assert_eq!(history_stats(&[], 0.03), HistoryStats::default());
        assert_eq!(history_stats(&[snapshot(1, 100)], 0.03), HistoryStats::default());
        let flat = vec![snapshot(1, 100), snapshot(2, 100), snapshot(3, 100)];
        let stats = history_stats(&flat, 0.03);
        assert_eq!(stats.sharpe, 0.0);
        assert_eq!(stats.volatility, 0.0);
    }

    #[test]
    fn report_combines_ledger_and_history() {
        let mut ledger = Ledger::new(MemoryStore::new()).with_clock(FixedClock(ts(2)));
        let account = ledger.open_account("paper", Money::from_units(1_000_000)).unwrap();
        let mut feed = MemoryFeed::builder()
            .with_quote(aaa(), Money::from_units(1000))
            .build();
        ledger
            .execute_buy(OrderRequest::new(account, aaa(), 100), &feed)
            .unwrap();
        feed.set_quote(aaa(), Money::from_units(1100));
        ledger
            .execute_sell(OrderRequest::new(account, aaa(), 50), &feed)
            .unwrap();
        for day in 2..=4 {
            let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
            valuation::record_snapshot(&mut ledger, &feed, account, date).unwrap();
        }

        let report = performance_report(&ledger, account, 30).unwrap();
        assert_eq!(report.trades.replay.num_trades(), 2);
        assert_eq!(report.trades.replay.winning_sells, 1);
        assert_eq!(report.recent_trades.len(), 2);
        assert_eq!(report.recent_trades[0].side, Side::Sell);
        assert_eq!(report.history.len(), 3);
        // 50 shares marked at 1100 against avg 1000
        assert_eq!(report.trades.unrealized_pl, Money::from_units(5_000));
        assert_eq!(
            report.trades.total_return,
            report.portfolio.total_value - Money::from_units(1_000_000)
        );
        assert!(format!("{report}").contains("Win rate:"));
    }

    #[test]
    fn unknown_account() {
        let ledger = Ledger::new(MemoryStore::new());
        let err = performance_report(&ledger, AccountId(9), 30).unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }
}
