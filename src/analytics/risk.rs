//! Risk measures for single instruments and weighted portfolios.
//!
//! Conventions: daily simple returns, 252 trading days per year, results in
//! percent where the name says so. Ratios (Sharpe, Sortino, beta) are plain
//! numbers. The risk-free rate is annual.

use std::fmt;

use chrono::NaiveDate;
use log::{debug, warn};

use super::series::{self, align, dated_returns, mean, percentile, sample_std, simple_returns};
use crate::error::{LedgerError, Result};
use crate::feed::{PricePoint, PriceFeed};
use crate::types::InstrumentCode;

/// Trading days per year used for annualization.
pub const TRADING_DAYS: f64 = 252.0;
/// Default annual risk-free rate.
pub const DEFAULT_RISK_FREE: f64 = 0.02;
/// Fewest closes (or returns, for VaR) a risk estimate is computed from.
pub const MIN_OBSERVATIONS: usize = 10;

/// Parameters shared by the risk calculators.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RiskParams {
    /// Annual risk-free rate (0.02 = 2%)
    pub risk_free: f64,
    /// VaR confidence level (0.95)
    pub var_confidence: f64,
    /// Number of most recent closes analysed
    pub lookback: usize,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            risk_free: DEFAULT_RISK_FREE,
            var_confidence: 0.95,
            lookback: 252,
        }
    }
}

/// Annualized volatility in percent: sample std × √252 × 100.
pub fn volatility(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    sample_std(returns) * TRADING_DAYS.sqrt() * 100.0
}

/// Maximum drawdown of a price (or equity) series.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Drawdown {
    /// Deepest peak-to-trough decline in percent (≤ 0)
    pub max_drawdown_pct: f64,
    /// Index of the running maximum preceding the trough
    pub peak: Option<usize>,
    /// Index of the deepest point
    pub trough: Option<usize>,
    /// Longest run of consecutive observations below the running maximum
    pub longest_underwater: usize,
}

/// Maximum drawdown from a price series.
///
/// `dd_t = (p_t - M_t) / M_t` with `M_t` the running maximum. Peak and trough
/// are `None` when there is no decline.
pub fn max_drawdown(prices: &[f64]) -> Drawdown {
    if prices.len() < 2 {
        return Drawdown::default();
    }

    let mut running_max = f64::MIN;
    let mut peak_idx = 0;
    let mut worst = 0.0_f64;
    let mut result = Drawdown::default();
    let mut underwater = 0;

    for (i, &p) in prices.iter().enumerate() {
        if p > running_max {
            running_max = p;
            peak_idx = i;
        }
        if running_max <= 0.0 {
            continue;
        }
        let dd = (p - running_max) / running_max;
        if dd < 0.0 {
            underwater += 1;
            result.longest_underwater = result.longest_underwater.max(underwater);
        } else {
            underwater = 0;
        }
        if dd < worst {
            worst = dd;
            result.peak = Some(peak_idx);
            result.trough = Some(i);
        }
    }

    result.max_drawdown_pct = worst * 100.0;
    result
}

/// Historical VaR in percent: the `(1 - confidence)` percentile of returns.
///
/// Needs at least [`MIN_OBSERVATIONS`] returns, otherwise `0.0`.
pub fn historical_var(returns: &[f64], confidence: f64) -> f64 {
    if returns.len() < MIN_OBSERVATIONS {
        return 0.0;
    }
    percentile(returns, (1.0 - confidence) * 100.0).unwrap_or(0.0) * 100.0
}

/// Annualized Sharpe ratio: `(mean × 252 - rf) / (std × √252)`, 0 when flat.
pub fn sharpe_ratio(returns: &[f64], risk_free: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let vol = sample_std(returns) * TRADING_DAYS.sqrt();
    if vol == 0.0 {
        return 0.0;
    }
    (mean(returns) * TRADING_DAYS - risk_free) / vol
}

/// Annualized downside deviation in percent.
///
/// Root mean square of `(r - target)` over the returns below `target`, × √252.
pub fn downside_deviation(returns: &[f64], target: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let below: Vec<f64> = returns
        .iter()
        .filter(|&&r| r < target)
        .map(|&r| (r - target).powi(2))
        .collect();
    if below.is_empty() {
        return 0.0;
    }
    series::flush_noise(mean(&below).sqrt()) * TRADING_DAYS.sqrt() * 100.0
}

/// Annualized Sortino ratio: `(mean × 252 - rf) / downside deviation`, 0
/// without downside.
pub fn sortino_ratio(returns: &[f64], target: f64, risk_free: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let dd = downside_deviation(returns, target) / 100.0;
    if dd == 0.0 {
        return 0.0;
    }
    (mean(returns) * TRADING_DAYS - risk_free) / dd
}

/// Share of strictly positive returns, in percent.
pub fn win_rate(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    returns.iter().filter(|&&r| r > 0.0).count() as f64 / returns.len() as f64 * 100.0
}

/// Beta of an asset against a market on date-aligned returns.
///
/// Defaults to 1.0 with fewer than two aligned pairs or a flat market.
pub fn beta(asset: &[(NaiveDate, f64)], market: &[(NaiveDate, f64)]) -> f64 {
    if asset.len() < 2 || market.len() < 2 {
        return 1.0;
    }
    let aligned = align(&[asset, market]);
    if aligned.len() < 2 {
        return 1.0;
    }
    let a = aligned.column(0);
    let m = aligned.column(1);
    let var_m = series::covariance(&m, &m);
    if var_m < series::FLAT_EPSILON * series::FLAT_EPSILON {
        return 1.0;
    }
    series::covariance(&a, &m) / var_m
}

/// Coarse risk classification of a composite score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RiskGrade {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskGrade {
    /// Bands: `< 3` Low, `< 6` Medium, `< 8` High, otherwise Very High.
    pub fn from_score(score: f64) -> Self {
        if score < 3.0 {
            RiskGrade::Low
        } else if score < 6.0 {
            RiskGrade::Medium
        } else if score < 8.0 {
            RiskGrade::High
        } else {
            RiskGrade::VeryHigh
        }
    }
}

impl fmt::Display for RiskGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskGrade::Low => write!(f, "Low"),
            RiskGrade::Medium => write!(f, "Medium"),
            RiskGrade::High => write!(f, "High"),
            RiskGrade::VeryHigh => write!(f, "Very High"),
        }
    }
}

/// Composite 0-10 risk score (higher is riskier).
///
/// `0.3·min(vol/5, 10) + 0.4·min(|mdd|/5, 10) + 0.3·min(|var95|/3, 10)`, all
/// inputs in percent.
pub fn risk_score(volatility_pct: f64, max_drawdown_pct: f64, var_95_pct: f64) -> f64 {
    let vol_score = (volatility_pct / 5.0).min(10.0);
    let mdd_score = (max_drawdown_pct.abs() / 5.0).min(10.0);
    let var_score = (var_95_pct.abs() / 3.0).min(10.0);
    vol_score * 0.3 + mdd_score * 0.4 + var_score * 0.3
}

/// Risk profile of one instrument.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RiskProfile {
    pub code: InstrumentCode,
    /// Closes analysed
    pub period_days: usize,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub var_95: f64,
    pub sharpe: f64,
    pub downside_deviation: f64,
    pub sortino: f64,
    pub win_rate: f64,
    pub risk_score: f64,
    pub grade: RiskGrade,
    pub peak_date: Option<NaiveDate>,
    pub trough_date: Option<NaiveDate>,
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Risk Profile: {} ({} days)", self.code, self.period_days)?;
        writeln!(f, "  Volatility:      {:>8.2}%", self.volatility)?;
        writeln!(f, "  Max drawdown:    {:>8.2}%", self.max_drawdown)?;
        writeln!(f, "  VaR (95%):       {:>8.2}%", self.var_95)?;
        writeln!(f, "  Sharpe:          {:>8.3}", self.sharpe)?;
        writeln!(f, "  Downside dev:    {:>8.2}%", self.downside_deviation)?;
        writeln!(f, "  Sortino:         {:>8.3}", self.sortino)?;
        writeln!(f, "  Win rate:        {:>8.2}%", self.win_rate)?;
        write!(f, "  Risk score:      {:>8.2} ({})", self.risk_score, self.grade)?;
        if let (Some(peak), Some(trough)) = (self.peak_date, self.trough_date) {
            write!(f, "\n  Drawdown:        {peak} -> {trough}")?;
        }
        Ok(())
    }
}

/// Risk profile from a close series (ascending). Needs at least 10 closes.
pub fn risk_profile(
    code: InstrumentCode,
    points: &[PricePoint],
    params: &RiskParams,
) -> Result<RiskProfile> {
    if points.len() < MIN_OBSERVATIONS {
        return Err(LedgerError::DataUnavailable(format!(
            "{code}: {} closes, need at least {MIN_OBSERVATIONS}",
            points.len()
        )));
    }
    let closes: Vec<f64> = points.iter().map(|p| p.close).collect();
    let returns = simple_returns(&closes);

    let vol = volatility(&returns);
    let dd = max_drawdown(&closes);
    let var_95 = historical_var(&returns, params.var_confidence);
    let score = risk_score(vol, dd.max_drawdown_pct, var_95);

    Ok(RiskProfile {
        code,
        period_days: points.len(),
        volatility: vol,
        max_drawdown: dd.max_drawdown_pct,
        var_95,
        sharpe: sharpe_ratio(&returns, params.risk_free),
        downside_deviation: downside_deviation(&returns, 0.0),
        sortino: sortino_ratio(&returns, 0.0, params.risk_free),
        win_rate: win_rate(&returns),
        risk_score: score,
        grade: RiskGrade::from_score(score),
        peak_date: dd.peak.map(|i| points[i].date),
        trough_date: dd.trough.map(|i| points[i].date),
    })
}

/// The most recent `lookback` closes on or before `as_of`.
pub fn recent_closes(
    feed: &dyn PriceFeed,
    code: InstrumentCode,
    as_of: NaiveDate,
    lookback: usize,
) -> Result<Vec<PricePoint>> {
    let mut points = feed
        .history(code, NaiveDate::MIN, as_of)
        .map_err(|e| LedgerError::DataUnavailable(e.to_string()))?;
    let skip = points.len().saturating_sub(lookback);
    points.drain(..skip);
    Ok(points)
}

/// Risk profile of one instrument over its last `params.lookback` closes.
pub fn instrument_risk(
    feed: &dyn PriceFeed,
    code: InstrumentCode,
    as_of: NaiveDate,
    params: &RiskParams,
) -> Result<RiskProfile> {
    let points = recent_closes(feed, code, as_of, params.lookback)?;
    risk_profile(code, &points, params)
}

/// Risk of a weighted portfolio.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortfolioRisk {
    /// Instruments used, with their renormalized weights
    pub weights: Vec<(InstrumentCode, f64)>,
    /// Instruments dropped for lack of history
    pub skipped: Vec<InstrumentCode>,
    /// Aligned return observations
    pub period_days: usize,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub var_95: f64,
    /// Mean pairwise correlation (upper triangle)
    pub avg_correlation: f64,
    /// Portfolio volatility over mean individual volatility
    pub diversification_ratio: f64,
}

impl fmt::Display for PortfolioRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Portfolio Risk ({} days)", self.period_days)?;
        for (code, w) in &self.weights {
            writeln!(f, "  {:<8} {:>7.2}%", code, w * 100.0)?;
        }
        writeln!(f, "  Volatility:      {:>8.2}%", self.volatility)?;
        writeln!(f, "  Max drawdown:    {:>8.2}%", self.max_drawdown)?;
        writeln!(f, "  Sharpe:          {:>8.3}", self.sharpe)?;
        writeln!(f, "  VaR (95%):       {:>8.2}%", self.var_95)?;
        writeln!(f, "  Avg correlation: {:>8.3}", self.avg_correlation)?;
        write!(f, "  Diversification: {:>8.3}", self.diversification_ratio)
    }
}

/// Check that weights line up with codes and sum to 1 within `tolerance`.
pub fn check_weights(codes: &[InstrumentCode], weights: &[f64], tolerance: f64) -> Result<()> {
    if codes.len() != weights.len() {
        return Err(LedgerError::Validation(format!(
            "{} instruments but {} weights",
            codes.len(),
            weights.len()
        )));
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(LedgerError::Validation("weights must be finite and non-negative".into()));
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > tolerance {
        return Err(LedgerError::Validation(format!(
            "weights sum to {sum:.4}, expected 1.0"
        )));
    }
    Ok(())
}

/// Risk of holding `codes` at `weights` (equal weights when `None`).
///
/// Weights must sum to 1 within 0.01. Instruments with fewer than 10 closes
/// are skipped and the remaining weights renormalized; returns are aligned on
/// the dates every remaining instrument traded.
pub fn portfolio_risk(
    feed: &dyn PriceFeed,
    codes: &[InstrumentCode],
    weights: Option<&[f64]>,
    as_of: NaiveDate,
    params: &RiskParams,
) -> Result<PortfolioRisk> {
    if codes.is_empty() {
        return Err(LedgerError::Validation("no instruments given".into()));
    }
    let equal = vec![1.0 / codes.len() as f64; codes.len()];
    let weights = weights.unwrap_or(&equal);
    check_weights(codes, weights, 0.01)?;

    let mut kept: Vec<(InstrumentCode, f64, Vec<(NaiveDate, f64)>)> = Vec::new();
    let mut skipped = Vec::new();
    for (&code, &w) in codes.iter().zip(weights) {
        let points = match recent_closes(feed, code, as_of, params.lookback) {
            Ok(p) if p.len() >= MIN_OBSERVATIONS => p,
            Ok(p) => {
                warn!("{code}: only {} closes, skipped", p.len());
                skipped.push(code);
                continue;
            }
            Err(e) => {
                warn!("{code}: {e}, skipped");
                skipped.push(code);
                continue;
            }
        };
        kept.push((code, w, dated_returns(&points)));
    }
    if kept.is_empty() {
        return Err(LedgerError::DataUnavailable(
            "no instrument has enough price history".into(),
        ));
    }

    let kept_sum: f64 = kept.iter().map(|(_, w, _)| w).sum();
    if kept_sum <= 0.0 {
        return Err(LedgerError::Validation("remaining weights sum to zero".into()));
    }
    let weights: Vec<(InstrumentCode, f64)> =
        kept.iter().map(|(c, w, _)| (*c, w / kept_sum)).collect();
    let series: Vec<&[(NaiveDate, f64)]> = kept.iter().map(|(_, _, r)| r.as_slice()).collect();
    let aligned = align(&series);
    if aligned.len() < 2 {
        return Err(LedgerError::DataUnavailable(
            "instruments share fewer than two trading days".into(),
        ));
    }

    let w: Vec<f64> = weights.iter().map(|(_, w)| *w).collect();
    let port = aligned.blend(&w);
    let vol = volatility(&port);
    let curve = series::cumulative(&port);

    let n = w.len();
    let columns: Vec<Vec<f64>> = (0..n).map(|j| aligned.column(j)).collect();
    let mut corr_sum = 0.0;
    let mut pairs = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            corr_sum += series::correlation(&columns[i], &columns[j]);
            pairs += 1;
        }
    }
    let avg_correlation = if pairs > 0 { corr_sum / pairs as f64 } else { 0.0 };

    let individual = mean(&columns.iter().map(|c| sample_std(c)).collect::<Vec<_>>())
        * TRADING_DAYS.sqrt()
        * 100.0;
    let diversification_ratio = if individual > 0.0 { vol / individual } else { 1.0 };

    debug!(
        "portfolio risk over {} days: vol {vol:.2}%, avg corr {avg_correlation:.3}",
        aligned.len()
    );

    Ok(PortfolioRisk {
        weights,
        skipped,
        period_days: port.len(),
        volatility: vol,
        max_drawdown: max_drawdown(&curve).max_drawdown_pct,
        sharpe: sharpe_ratio(&port, params.risk_free),
        var_95: historical_var(&port, params.var_confidence),
        avg_correlation,
        diversification_ratio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MemoryFeed;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn volatility_of_constant_returns_is_zero() {
        assert_eq!(volatility(&[0.01; 20]), 0.0);
        assert_eq!(volatility(&[0.01]), 0.0);
    }

    #[test]
    fn steady_compounding_is_riskless_not_infinite() {
        assert_eq!(sharpe_ratio(&[0.01; 20], 0.0), 0.0);

        let closes: Vec<f64> = (0..40).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let returns = simple_returns(&closes);
        assert_eq!(volatility(&returns), 0.0);
        assert_eq!(sharpe_ratio(&returns, 0.02), 0.0);
        // every return sits on the 1% target up to rounding
        assert_eq!(downside_deviation(&returns, 0.01), 0.0);
        assert_eq!(sortino_ratio(&returns, 0.01, 0.02), 0.0);
    }

    #[test]
    fn volatility_annualizes() {
        let r = [0.01, -0.01, 0.01, -0.01];
        let expected = sample_std(&r) * 252.0_f64.sqrt() * 100.0;
        assert!((volatility(&r) - expected).abs() < 1e-12);
    }

    #[test]
    fn drawdown_finds_peak_and_trough() {
        // peak 120 at index 1, trough 90 at index 3
        let prices = [100.0, 120.0, 110.0, 90.0, 130.0];
        let dd = max_drawdown(&prices);
        assert!((dd.max_drawdown_pct + 25.0).abs() < 1e-12);
        assert_eq!(dd.peak, Some(1));
        assert_eq!(dd.trough, Some(3));
        assert_eq!(dd.longest_underwater, 2);
    }

    #[test]
    fn drawdown_none_when_rising() {
        let dd = max_drawdown(&[1.0, 2.0, 3.0]);
        assert_eq!(dd.max_drawdown_pct, 0.0);
        assert_eq!(dd.peak, None);
        assert_eq!(dd.trough, None);
        assert_eq!(max_drawdown(&[5.0]), Drawdown::default());
    }

    #[test]
    fn var_needs_ten_observations() {
        let r: Vec<f64> = (0..9).map(|i| i as f64 / 100.0 - 0.04).collect();
        assert_eq!(historical_var(&r, 0.95), 0.0);

        let r: Vec<f64> = (0..11).map(|i| i as f64 / 100.0 - 0.05).collect();
        // 5th percentile of -0.05..=0.05 step 0.01: rank 0.5 -> -0.045
        assert!((historical_var(&r, 0.95) + 4.5).abs() < 1e-9);
    }

    #[test]
    fn sharpe_matches_formula() {
        let r = [0.01, 0.02, -0.005, 0.015];
        let expected =
            (mean(&r) * 252.0 - 0.02) / (sample_std(&r) * 252.0_f64.sqrt());
        assert!((sharpe_ratio(&r, 0.02) - expected).abs() < 1e-12);
        assert_eq!(sharpe_ratio(&[0.01; 5], 0.02), 0.0);
    }

    #[test]
    fn downside_and_sortino() {
        let r = [0.02, -0.01, 0.03, -0.03];
        let dd = ((0.01_f64.powi(2) + 0.03_f64.powi(2)) / 2.0).sqrt() * 252.0_f64.sqrt();
        assert!((downside_deviation(&r, 0.0) - dd * 100.0).abs() < 1e-9);
        let sortino = (mean(&r) * 252.0 - 0.02) / dd;
        assert!((sortino_ratio(&r, 0.0, 0.02) - sortino).abs() < 1e-9);
        assert_eq!(downside_deviation(&[0.01, 0.02], 0.0), 0.0);
        assert_eq!(sortino_ratio(&[0.01, 0.02], 0.0, 0.02), 0.0);
    }

    #[test]
    fn win_rate_counts_strict_gains() {
        assert_eq!(win_rate(&[0.01, -0.02, 0.015, -0.01]), 50.0);
        assert_eq!(win_rate(&[0.0, 0.0]), 0.0);
        assert_eq!(win_rate(&[]), 0.0);
    }

    #[test]
    fn beta_of_scaled_series() {
        let market: Vec<(NaiveDate, f64)> = (1..=5)
            .map(|i| (d(2024, 1, i), [0.01, -0.02, 0.015, 0.0, 0.005][i as usize - 1]))
            .collect();
        let asset: Vec<(NaiveDate, f64)> = market.iter().map(|(dt, r)| (*dt, r * 2.0)).collect();
        assert!((beta(&asset, &market) - 2.0).abs() < 1e-12);
        assert_eq!(beta(&asset[..1], &market), 1.0);
        let flat: Vec<(NaiveDate, f64)> = market.iter().map(|(dt, _)| (*dt, 0.0)).collect();
        assert_eq!(beta(&asset, &flat), 1.0);
    }

    #[test]
    fn score_and_grade() {
        assert_eq!(RiskGrade::from_score(2.99), RiskGrade::Low);
        assert_eq!(RiskGrade::from_score(3.0), RiskGrade::Medium);
        assert_eq!(RiskGrade::from_score(7.5), RiskGrade::High);
        assert_eq!(RiskGrade::from_score(8.0), RiskGrade::VeryHigh);
        // vol 25% -> 5, mdd -20% -> 4, var -3% -> 1
        assert!((risk_score(25.0, -20.0, -3.0) - (1.5 + 1.6 + 0.3)).abs() < 1e-12);
        // caps at 10 per component
        assert!((risk_score(500.0, -500.0, -300.0) - 10.0).abs() < 1e-12);
        assert_eq!(RiskGrade::VeryHigh.to_string(), "Very High");
    }

    #[test]
    fn instrument_risk_requires_ten_closes() {
        let aaa = InstrumentCode::new("AAA");
        let feed = MemoryFeed::builder()
            .with_closes(aaa, d(2024, 1, 1), &[100.0; 9])
            .build();
        let err = instrument_risk(&feed, aaa, d(2024, 12, 31), &RiskParams::default()).unwrap_err();
        assert!(matches!(err, LedgerError::DataUnavailable(_)));
    }

    #[test]
    fn instrument_risk_uses_latest_lookback() {
        let aaa = InstrumentCode::new("AAA");
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i % 5) as f64).collect();
        let feed = MemoryFeed::builder()
            .with_closes(aaa, d(2024, 1, 1), &closes)
            .build();
        let params = RiskParams {
            lookback: 20,
            ..RiskParams::default()
        };
        let profile = instrument_risk(&feed, aaa, d(2024, 12, 31), &params).unwrap();
        assert_eq!(profile.period_days, 20);
        assert!(profile.max_drawdown < 0.0);
        assert!(profile.peak_date.unwrap() < profile.trough_date.unwrap());
        assert!(profile.volatility > 0.0);
    }

    #[test]
    fn portfolio_weight_validation() {
        let feed = MemoryFeed::default();
        let codes = [InstrumentCode::new("AAA"), InstrumentCode::new("BBB")];
        let as_of = d(2024, 12, 31);
        let params = RiskParams::default();
        let err = portfolio_risk(&feed, &codes, Some(&[1.0]), as_of, &params).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        let err = portfolio_risk(&feed, &codes, Some(&[0.5, 0.6]), as_of, &params).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        let err = portfolio_risk(&feed, &codes, None, as_of, &params).unwrap_err();
        assert!(matches!(err, LedgerError::DataUnavailable(_)));
    }

    #[test]
    fn portfolio_risk_diversifies() {
        let aaa = InstrumentCode::new("AAA");
        let bbb = InstrumentCode::new("BBB");
        let ccc = InstrumentCode::new("CCC");
        let a: Vec<f64> = (0..30).map(|i| 100.0 * if i % 2 == 0 { 1.0 } else { 1.02 }).collect();
        let b: Vec<f64> = (0..30).map(|i| 100.0 * if i % 2 == 0 { 1.02 } else { 1.0 }).collect();
        let feed = MemoryFeed::builder()
            .with_closes(aaa, d(2024, 1, 1), &a)
            .with_closes(bbb, d(2024, 1, 1), &b)
            .with_closes(ccc, d(2024, 1, 1), &[100.0; 5])
            .build();
        let risk = portfolio_risk(
            &feed,
            &[aaa, bbb, ccc],
            Some(&[0.4, 0.4, 0.2]),
            d(2024, 12, 31),
            &RiskParams::default(),
        )
        .unwrap();
        assert_eq!(risk.skipped, vec![ccc]);
        assert_eq!(risk.weights.len(), 2);
        assert!((risk.weights[0].1 - 0.5).abs() < 1e-12);
        assert!(risk.avg_correlation < -0.99);
        assert!(risk.diversification_ratio < 0.1);
        assert_eq!(risk.period_days, 29);
    }
}
