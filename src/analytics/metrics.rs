//! Performance metric bundle for a return series.

use std::fmt;

use super::risk;
use super::series::{cumulative, flush_noise, mean, sample_std};

/// Gains and losses of a return series, split by sign.
///
/// Zero returns count toward neither side.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Tally {
    pub wins: usize,
    pub losses: usize,
    pub sum_gain: f64,
    pub sum_loss: f64,
    pub best: f64,
    pub worst: f64,
}

impl Tally {
    pub fn of(returns: &[f64]) -> Self {
        let mut t = Tally {
            best: f64::MIN,
            worst: f64::MAX,
            ..Default::default()
        };
        for &r in returns {
            if r > 0.0 {
                t.wins += 1;
                t.sum_gain += r;
            } else if r < 0.0 {
                t.losses += 1;
                t.sum_loss += r;
            }
            t.best = t.best.max(r);
            t.worst = t.worst.min(r);
        }
        if returns.is_empty() {
            t.best = 0.0;
            t.worst = 0.0;
        }
        t
    }

    pub fn avg_gain(&self) -> f64 {
        if self.wins == 0 { 0.0 } else { self.sum_gain / self.wins as f64 }
    }

    /// Mean of the negative returns (≤ 0).
    pub fn avg_loss(&self) -> f64 {
        if self.losses == 0 { 0.0 } else { self.sum_loss / self.losses as f64 }
    }
}

/// Metrics of a periodic return series, as fractions (0.15 = 15%).
///
/// Simple returns; `periods_per_year` scales the annualized figures.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Metrics {
    pub total_return: f64,
    /// Growth rate over `num_periods / periods_per_year` years
    pub cagr: f64,
    pub volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    /// Deepest peak-to-trough decline, positive (0.20 = 20%)
    pub max_drawdown: f64,
    /// `cagr / max_drawdown`, 0 without a drawdown
    pub calmar: f64,
    pub num_periods: usize,
    pub winning_periods: usize,
    pub losing_periods: usize,
    pub avg_gain: f64,
    pub avg_loss: f64,
    pub best_period: f64,
    pub worst_period: f64,
}

impl Metrics {
    /// Winning periods over all periods, in percent.
    pub fn win_rate(&self) -> f64 {
        match self.num_periods {
            0 => 0.0,
            n => self.winning_periods as f64 * 100.0 / n as f64,
        }
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = |x: f64| x * 100.0;
        writeln!(f, "Return metrics over {} periods", self.num_periods)?;
        writeln!(f, "  Total return:    {:>8.2}%", pct(self.total_return))?;
        writeln!(f, "  CAGR:            {:>8.2}%", pct(self.cagr))?;
        writeln!(f, "  Volatility:      {:>8.2}%", pct(self.volatility))?;
        writeln!(f, "  Sharpe:          {:>8.2}", self.sharpe)?;
        writeln!(f, "  Sortino:         {:>8.2}", self.sortino)?;
        writeln!(f, "  Max drawdown:    {:>8.2}%", -pct(self.max_drawdown))?;
        writeln!(f, "  Calmar:          {:>8.2}", self.calmar)?;
        writeln!(
            f,
            "  Win rate:        {:>8.2}% ({} up, {} down)",
            self.win_rate(),
            self.winning_periods,
            self.losing_periods
        )?;
        write!(
            f,
            "  Avg up/down:     {:>7.3}% / {:.3}%",
            pct(self.avg_gain),
            pct(self.avg_loss)
        )
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

/// Metrics of `returns` with `periods_per_year` (252 daily, 12 monthly) and an
/// annual `risk_free` rate. `None` for an empty series.
pub fn compute_metrics(returns: &[f64], periods_per_year: f64, risk_free: f64) -> Option<Metrics> {
    if returns.is_empty() {
        return None;
    }
    let n = returns.len();
    let curve = cumulative(returns);
    let total_return = curve.last().copied().unwrap_or(1.0) - 1.0;
    let cagr = annualize(total_return, n as f64 / periods_per_year);

    let scale = periods_per_year.sqrt();
    let volatility = if n > 1 { sample_std(returns) * scale } else { 0.0 };
    let excess = mean(returns) * periods_per_year - risk_free;

    let tally = Tally::of(returns);
    // RMS of the losing periods, against a zero target
    let downside = if n > 1 && tally.losses > 0 {
        let squares: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).sum();
        flush_noise((squares / tally.losses as f64).sqrt()) * scale
    } else {
        0.0
    };

    let max_drawdown = -risk::max_drawdown(&curve).max_drawdown_pct / 100.0;

    Some(Metrics {
        total_return,
        cagr,
        volatility,
        sharpe: ratio(excess, volatility),
        sortino: ratio(excess, downside),
        max_drawdown,
        calmar: ratio(cagr, max_drawdown),
        num_periods: n,
        winning_periods: tally.wins,
        losing_periods: tally.losses,
        avg_gain: tally.avg_gain(),
        avg_loss: tally.avg_loss(),
        best_period: tally.best,
        worst_period: tally.worst,
    })
}

/// Compound growth rate of `total_return` over `years`.
///
/// A total loss clamps to -100%; a non-positive horizon yields 0.
pub fn annualize(total_return: f64, years: f64) -> f64 {
    if total_return <= -1.0 {
        -1.0
    } else if years > 0.0 {
        (1.0 + total_return).powf(1.0 / years) - 1.0
    } else {
        0.0
    }
}
