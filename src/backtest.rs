//! Historical replay of a weighting strategy against a benchmark.
//!
//! A run moves through fixed stages:
//!
//! ```text
//! Screen → Construct → LoadHistory → ComputeReturns → CompareBenchmark → Summarize
//! ```
//!
//! Weights are formed from data on or before the start date and held for the
//! whole period (buy-and-hold). `rebalance_months` is recorded in the result
//! but no interim rebalancing is simulated. A missing benchmark degrades the
//! comparison to alpha 0 / beta 1 with a warning; every other data gap that
//! leaves nothing to work with ends the run at the stage where it occurred.

use std::fmt;

use chrono::{Duration, NaiveDate};
use log::{info, warn};

use crate::analytics::metrics::{annualize, compute_metrics};
use crate::analytics::risk::{self, DEFAULT_RISK_FREE, TRADING_DAYS};
use crate::analytics::series::{align, dated_returns, simple_returns};
use crate::construct::{self, Allocation, WeightingStrategy, Window};
use crate::error::LedgerError;
use crate::feed::{InstrumentMetadata, PriceFeed, UniverseScreener};
use crate::types::InstrumentCode;

/// Default benchmark index.
pub const DEFAULT_BENCHMARK: &str = "KS11";

/// Calendar days of history before the start used to form weights.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 90;
/// Longest accepted lookback, a century of calendar days.
pub const MAX_LOOKBACK_DAYS: i64 = 36_525;

/// Stage of a backtest run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Stage {
    Screen,
    Construct,
    LoadHistory,
    ComputeReturns,
    CompareBenchmark,
    Summarize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Screen => write!(f, "screen"),
            Stage::Construct => write!(f, "construct"),
            Stage::LoadHistory => write!(f, "load history"),
            Stage::ComputeReturns => write!(f, "compute returns"),
            Stage::CompareBenchmark => write!(f, "compare benchmark"),
            Stage::Summarize => write!(f, "summarize"),
        }
    }
}

/// A run that stopped before producing a result.
#[derive(Debug, thiserror::Error)]
#[error("backtest failed at {stage}: {source}")]
pub struct BacktestError {
    pub stage: Stage,
    #[source]
    pub source: LedgerError,
}

impl BacktestError {
    fn at(stage: Stage, source: LedgerError) -> Self {
        Self { stage, source }
    }

    fn no_data(stage: Stage, msg: impl Into<String>) -> Self {
        Self::at(stage, LedgerError::DataUnavailable(msg.into()))
    }
}

/// Backtest parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub strategy: WeightingStrategy,
    /// Instruments requested from the screener
    pub top_n: usize,
    /// Recorded only; weights are held for the whole run
    pub rebalance_months: u32,
    pub benchmark: InstrumentCode,
    /// Annual risk-free rate
    pub risk_free: f64,
    /// Calendar days before `start` visible to the constructor
    pub lookback_days: i64,
}

impl BacktestConfig {
    /// Equal weight over the top 10, monthly, against KS11.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            strategy: WeightingStrategy::EqualWeight,
            top_n: 10,
            rebalance_months: 1,
            benchmark: InstrumentCode::new(DEFAULT_BENCHMARK),
            risk_free: DEFAULT_RISK_FREE,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }

    pub fn with_strategy(mut self, strategy: WeightingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_benchmark(mut self, benchmark: InstrumentCode) -> Self {
        self.benchmark = benchmark;
        self
    }

    pub fn with_rebalance_months(mut self, months: u32) -> Self {
        self.rebalance_months = months;
        self
    }

    pub fn with_risk_free(mut self, risk_free: f64) -> Self {
        self.risk_free = risk_free;
        self
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days;
        self
    }

    /// Calendar days between start and end.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// `days / 365.25`
    pub fn years(&self) -> f64 {
        self.days() as f64 / 365.25
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.end <= self.start {
            return Err(LedgerError::Validation(format!(
                "end {} must be after start {}",
                self.end, self.start
            )));
        }
        if self.top_n == 0 {
            return Err(LedgerError::Validation("top_n must be positive".into()));
        }
        if !(0..=MAX_LOOKBACK_DAYS).contains(&self.lookback_days) {
            return Err(LedgerError::Validation(format!(
                "lookback_days must be in 0..={MAX_LOOKBACK_DAYS}, got {}",
                self.lookback_days
            )));
        }
        self.lookback_start()?;
        Ok(())
    }

    /// First day of the weight-forming window.
    fn lookback_start(&self) -> Result<NaiveDate, LedgerError> {
        Duration::try_days(self.lookback_days)
            .and_then(|back| self.start.checked_sub_signed(back))
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "lookback of {} days before {} is out of the calendar",
                    self.lookback_days, self.start
                ))
            })
    }
}

/// Summary statistics of a run, in percent except the ratios.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BacktestSummary {
    pub total_return: f64,
    /// `final^(1/years) - 1` with calendar years
    pub cagr: f64,
    pub volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    /// Share of positive days
    pub win_rate: f64,
    /// Mean positive daily return
    pub avg_gain: f64,
    /// Mean negative daily return
    pub avg_loss: f64,
    pub trading_days: usize,
}

/// Portfolio against the benchmark.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BenchmarkComparison {
    pub code: InstrumentCode,
    /// False when no benchmark history was found
    pub available: bool,
    /// Percent
    pub total_return: f64,
    /// Portfolio total return minus benchmark total return, in points
    pub alpha: f64,
    pub beta: f64,
}

/// Outcome of a completed run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BacktestResult {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: i64,
    pub years: f64,
    pub strategy: WeightingStrategy,
    pub top_n: usize,
    pub rebalance_months: u32,
    /// Screened universe, in rank order
    pub selected: Vec<InstrumentCode>,
    /// Weights as constructed at the start
    pub allocation: Allocation,
    /// Weights actually held, after dropping instruments without history
    pub weights: Vec<(InstrumentCode, f64)>,
    /// Instruments dropped at the load stage
    pub skipped: Vec<InstrumentCode>,
    pub summary: BacktestSummary,
    pub benchmark: BenchmarkComparison,
    /// Portfolio value, 1.0 on the first common date
    pub curve: Vec<(NaiveDate, f64)>,
    /// Benchmark close over its first close
    pub benchmark_curve: Vec<(NaiveDate, f64)>,
    pub warnings: Vec<String>,
}

impl fmt::Display for BacktestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        let b = &self.benchmark;
        writeln!(
            f,
            "Backtest {} .. {} ({} days, {:.2} years)",
            self.start, self.end, self.days, self.years
        )?;
        writeln!(
            f,
            "  Strategy:        {} (top {}, rebalance {}m, held)",
            self.strategy, self.top_n, self.rebalance_months
        )?;
        for (code, w) in &self.weights {
            writeln!(f, "    {:<8} {:>7.2}%", code, w * 100.0)?;
        }
        writeln!(f, "  Total return:    {:>8.2}%", s.total_return)?;
        writeln!(f, "  CAGR:            {:>8.2}%", s.cagr)?;
        writeln!(f, "  Volatility:      {:>8.2}%", s.volatility)?;
        writeln!(f, "  Sharpe:          {:>8.2}", s.sharpe)?;
        writeln!(f, "  Sortino:         {:>8.2}", s.sortino)?;
        writeln!(f, "  Max drawdown:    {:>8.2}%", s.max_drawdown)?;
        writeln!(f, "  Win rate:        {:>8.2}%", s.win_rate)?;
        writeln!(
            f,
            "  Avg gain/loss:   {:>7.4}% / {:.4}%",
            s.avg_gain, s.avg_loss
        )?;
        if b.available {
            writeln!(f, "  {:<16} {:>8.2}%", format!("{}:", b.code), b.total_return)?;
            writeln!(f, "  Alpha:           {:>+8.2}pp", b.alpha)?;
            write!(f, "  Beta:            {:>8.2}", b.beta)?;
        } else {
            write!(f, "  Benchmark {} unavailable", b.code)?;
        }
        for w in &self.warnings {
            write!(f, "\n  warning: {w}")?;
        }
        Ok(())
    }
}

/// Run one backtest.
///
/// The configuration is checked before screening; an invalid one fails at
/// [`Stage::Screen`].
pub fn run_backtest(
    config: &BacktestConfig,
    feed: &dyn PriceFeed,
    metadata: &dyn InstrumentMetadata,
    screener: &dyn UniverseScreener,
) -> Result<BacktestResult, BacktestError> {
    config.validate().map_err(|e| BacktestError::at(Stage::Screen, e))?;
    let mut warnings = Vec::new();

    // Screen
    let selected = screener
        .screen(config.top_n)
        .map_err(|e| BacktestError::no_data(Stage::Screen, e.to_string()))?;
    if selected.is_empty() {
        return Err(BacktestError::no_data(Stage::Screen, "screener returned no instruments"));
    }
    info!(
        "backtest {} .. {}: {} instruments screened, strategy {}",
        config.start,
        config.end,
        selected.len(),
        config.strategy
    );

    // Construct
    let from = config
        .lookback_start()
        .map_err(|e| BacktestError::at(Stage::Construct, e))?;
    let window = Window::between(from, config.start);
    let allocation = construct::construct(config.strategy, &selected, feed, metadata, window)
        .map_err(|e| BacktestError::at(Stage::Construct, e))?;

    // LoadHistory
    let mut held = Vec::with_capacity(allocation.len());
    let mut skipped = Vec::new();
    for &(code, w) in &allocation.weights {
        match feed.history(code, config.start, config.end) {
            Ok(points) if !points.is_empty() => {
                held.push((code, w, points));
            }
            Ok(_) => {
                warn!("{code}: no closes in backtest period, skipped");
                skipped.push(code);
            }
            Err(e) => {
                warn!("{code}: {e}, skipped");
                skipped.push(code);
            }
        }
    }
    if held.is_empty() {
        return Err(BacktestError::no_data(
            Stage::LoadHistory,
            format!("no prices between {} and {}", config.start, config.end),
        ));
    }
    if !skipped.is_empty() {
        let codes: Vec<&str> = skipped.iter().map(|c| c.as_str()).collect();
        warnings.push(format!("no history for {}", codes.join(", ")));
    }
    let held_sum: f64 = held.iter().map(|(_, w, _)| w).sum();
    let weights: Vec<(InstrumentCode, f64)> =
        held.iter().map(|(c, w, _)| (*c, w / held_sum)).collect();

    // ComputeReturns
    let closes: Vec<Vec<(NaiveDate, f64)>> = held
        .iter()
        .map(|(_, _, points)| points.iter().map(|p| (p.date, p.close)).collect())
        .collect();
    let aligned = align(&closes);
    if aligned.len() < 2 {
        return Err(BacktestError::no_data(
            Stage::ComputeReturns,
            "fewer than two trading days common to all instruments",
        ));
    }
    let w: Vec<f64> = weights.iter().map(|(_, w)| *w).collect();
    let columns: Vec<Vec<f64>> = (0..w.len()).map(|j| simple_returns(&aligned.column(j))).collect();
    let returns: Vec<f64> = (0..aligned.len() - 1)
        .map(|i| columns.iter().zip(&w).map(|(col, wj)| col.get(i).copied().unwrap_or(0.0) * wj).sum())
        .collect();
    let mut curve = Vec::with_capacity(aligned.len());
    let mut value = 1.0_f64;
    curve.push((aligned.dates[0], value));
    for (date, r) in aligned.dates[1..].iter().zip(&returns) {
        value *= 1.0 + r;
        curve.push((*date, value));
    }
    let final_value = value;
    let dated: Vec<(NaiveDate, f64)> = aligned.dates[1..].iter().copied().zip(returns.iter().copied()).collect();

    // CompareBenchmark
    let total_return = (final_value - 1.0) * 100.0;
    let (benchmark, benchmark_curve) = compare_benchmark(config, feed, total_return, &dated, &mut warnings);

    // Summarize
    let metrics = compute_metrics(&returns, TRADING_DAYS, config.risk_free)
        .ok_or_else(|| BacktestError::no_data(Stage::Summarize, "no daily returns"))?;
    let values: Vec<f64> = curve.iter().map(|(_, v)| *v).collect();
    let summary = BacktestSummary {
        total_return,
        cagr: annualize(final_value - 1.0, config.years()) * 100.0,
        volatility: risk::volatility(&returns),
        sharpe: risk::sharpe_ratio(&returns, config.risk_free),
        sortino: risk::sortino_ratio(&returns, 0.0, config.risk_free),
        max_drawdown: risk::max_drawdown(&values).max_drawdown_pct,
        win_rate: metrics.win_rate(),
        avg_gain: metrics.avg_gain * 100.0,
        avg_loss: metrics.avg_loss * 100.0,
        trading_days: returns.len(),
    };
    info!(
        "backtest {}: total {:+.2}%, sharpe {:.2}, mdd {:.2}%",
        config.strategy, summary.total_return, summary.sharpe, summary.max_drawdown
    );

    Ok(BacktestResult {
        start: config.start,
        end: config.end,
        days: config.days(),
        years: config.years(),
        strategy: config.strategy,
        top_n: config.top_n,
        rebalance_months: config.rebalance_months,
        selected,
        allocation,
        weights,
        skipped,
        summary,
        benchmark,
        curve,
        benchmark_curve,
        warnings,
    })
}

fn compare_benchmark(
    config: &BacktestConfig,
    feed: &dyn PriceFeed,
    total_return: f64,
    portfolio_returns: &[(NaiveDate, f64)],
    warnings: &mut Vec<String>,
) -> (BenchmarkComparison, Vec<(NaiveDate, f64)>) {
    let points = feed
        .history(config.benchmark, config.start, config.end)
        .unwrap_or_default();
    let base = points.first().map(|p| p.close).filter(|c| *c > 0.0);
    let Some(base) = base else {
        warn!("benchmark {} unavailable, alpha 0 and beta 1", config.benchmark);
        warnings.push(format!("benchmark {} unavailable", config.benchmark));
        let comparison = BenchmarkComparison {
            code: config.benchmark,
            available: false,
            total_return: 0.0,
            alpha: 0.0,
            beta: 1.0,
        };
        return (comparison, Vec::new());
    };

    let curve: Vec<(NaiveDate, f64)> = points.iter().map(|p| (p.date, p.close / base)).collect();
    let bench_total = curve.last().map_or(0.0, |(_, v)| (v - 1.0) * 100.0);
    let bench_returns = dated_returns(&points);
    let comparison = BenchmarkComparison {
        code: config.benchmark,
        available: true,
        total_return: bench_total,
        alpha: total_return - bench_total,
        beta: risk::beta(portfolio_returns, &bench_returns),
    };
    (comparison, curve)
}

/// Results of running several strategies over the same period.
#[derive(Debug)]
pub struct StrategyComparison {
    pub runs: Vec<BacktestResult>,
    pub failures: Vec<(WeightingStrategy, BacktestError)>,
}

impl StrategyComparison {
    /// The run with the highest Sharpe ratio; the earliest wins ties.
    pub fn best(&self) -> Option<&BacktestResult> {
        self.runs.iter().fold(None, |best: Option<&BacktestResult>, r| match best {
            Some(b) if b.summary.sharpe >= r.summary.sharpe => Some(b),
            _ => Some(r),
        })
    }
}

impl fmt::Display for StrategyComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  {:<14} {:>9} {:>9} {:>9} {:>7} {:>9} {:>9}",
            "strategy", "return%", "cagr%", "vol%", "sharpe", "mdd%", "alpha"
        )?;
        for r in &self.runs {
            let s = &r.summary;
            writeln!(
                f,
                "  {:<14} {:>9.2} {:>9.2} {:>9.2} {:>7.2} {:>9.2} {:>+9.2}",
                r.strategy.to_string(),
                s.total_return,
                s.cagr,
                s.volatility,
                s.sharpe,
                s.max_drawdown,
                r.benchmark.alpha
            )?;
        }
        for (strategy, e) in &self.failures {
            writeln!(f, "  {strategy:<14} {e}")?;
        }
        match self.best() {
            Some(best) => write!(f, "  best by Sharpe: {}", best.strategy),
            None => write!(f, "  no strategy completed"),
        }
    }
}

/// Run `config` once per strategy. Failed runs are kept apart.
///
/// With the `parallel` feature the runs execute on the rayon pool.
pub fn compare_strategies<D>(
    config: &BacktestConfig,
    strategies: &[WeightingStrategy],
    data: &D,
) -> StrategyComparison
where
    D: PriceFeed + InstrumentMetadata + UniverseScreener + Sync,
{
    let run = |&strategy: &WeightingStrategy| {
        let cfg = config.clone().with_strategy(strategy);
        (strategy, run_backtest(&cfg, data, data, data))
    };

    #[cfg(feature = "parallel")]
    let outcomes: Vec<_> = {
        use rayon::prelude::*;
        strategies.par_iter().map(run).collect()
    };
    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<_> = strategies.iter().map(run).collect();

    let mut comparison = StrategyComparison {
        runs: Vec::new(),
        failures: Vec::new(),
    };
    for (strategy, outcome) in outcomes {
        match outcome {
            Ok(result) => comparison.runs.push(result),
            Err(e) => {
                warn!("{strategy}: {e}");
                comparison.failures.push((strategy, e));
            }
        }
    }
    comparison
}
