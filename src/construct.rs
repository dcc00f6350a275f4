//! Portfolio construction: target weights and sector concentration.
//!
//! Every constructor returns long-only weights that are finite, non-negative
//! and sum to 1. Instruments without usable data are excluded and the
//! remaining weights renormalized; the exclusions are reported in the
//! [`Allocation`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use log::{debug, warn};

use crate::analytics::risk::{self, MIN_OBSERVATIONS, TRADING_DAYS};
use crate::analytics::series::{align, cumulative, dated_returns};
use crate::error::{LedgerError, Result};
use crate::feed::{InstrumentMetadata, PriceFeed, PricePoint};
use crate::types::InstrumentCode;

/// Sector label for instruments without metadata.
pub const UNKNOWN_SECTOR: &str = "Unknown";

/// Tolerance of [`validate_weights`].
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// How target weights are derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WeightingStrategy {
    /// `1/N`
    EqualWeight,
    /// Proportional to market cap, latest close as the fallback proxy
    MarketCap,
    /// Proportional to inverse annualized volatility
    RiskParity,
}

impl WeightingStrategy {
    pub const ALL: [WeightingStrategy; 3] = [
        WeightingStrategy::EqualWeight,
        WeightingStrategy::MarketCap,
        WeightingStrategy::RiskParity,
    ];
}

impl fmt::Display for WeightingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightingStrategy::EqualWeight => write!(f, "equal_weight"),
            WeightingStrategy::MarketCap => write!(f, "market_cap"),
            WeightingStrategy::RiskParity => write!(f, "risk_parity"),
        }
    }
}

impl FromStr for WeightingStrategy {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "equal" | "equal_weight" => Ok(WeightingStrategy::EqualWeight),
            "market_cap" | "cap" => Ok(WeightingStrategy::MarketCap),
            "risk_parity" | "inverse_vol" => Ok(WeightingStrategy::RiskParity),
            other => Err(LedgerError::Validation(format!(
                "unknown weighting strategy '{other}'"
            ))),
        }
    }
}

/// The slice of history a constructor may look at.
///
/// Closes with `start <= date <= end`, of which at most the last
/// `max_observations` are used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub max_observations: usize,
}

impl Window {
    /// The last `observations` closes on or before `as_of`.
    pub fn trailing(as_of: NaiveDate, observations: usize) -> Self {
        Self {
            start: NaiveDate::MIN,
            end: as_of,
            max_observations: observations,
        }
    }

    /// Up to 252 closes between `start` and `end`.
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            max_observations: TRADING_DAYS as usize,
        }
    }

    fn closes(&self, feed: &dyn PriceFeed, code: InstrumentCode) -> Option<Vec<PricePoint>> {
        match feed.history(code, self.start, self.end) {
            Ok(mut points) => {
                let skip = points.len().saturating_sub(self.max_observations);
                points.drain(..skip);
                Some(points)
            }
            Err(e) => {
                warn!("{code}: {e}");
                None
            }
        }
    }
}

/// Target weights with the data they were derived from.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Allocation {
    pub strategy: WeightingStrategy,
    /// Selected instruments in input order; weights sum to 1
    pub weights: Vec<(InstrumentCode, f64)>,
    /// Instruments dropped for lack of usable data
    pub excluded: Vec<InstrumentCode>,
    /// Per-instrument input: market cap (or price proxy) or volatility %
    pub inputs: Vec<(InstrumentCode, f64)>,
    /// Instrument count per sector, over the requested instruments
    pub sector_distribution: BTreeMap<String, usize>,
}

impl Allocation {
    pub fn weight(&self, code: InstrumentCode) -> Option<f64> {
        self.weights.iter().find(|(c, _)| *c == code).map(|(_, w)| *w)
    }

    pub fn codes(&self) -> Vec<InstrumentCode> {
        self.weights.iter().map(|(c, _)| *c).collect()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Allocation ({}, {} instruments)", self.strategy, self.len())?;
        for (code, w) in &self.weights {
            let input = self.inputs.iter().find(|(c, _)| c == code).map(|(_, v)| *v);
            match input {
                Some(v) => writeln!(f, "  {:<8} {:>7.2}%  ({v:.2})", code, w * 100.0)?,
                None => writeln!(f, "  {:<8} {:>7.2}%", code, w * 100.0)?,
            }
        }
        if !self.excluded.is_empty() {
            let codes: Vec<&str> = self.excluded.iter().map(|c| c.as_str()).collect();
            writeln!(f, "  excluded: {}", codes.join(", "))?;
        }
        let sectors: Vec<String> = self
            .sector_distribution
            .iter()
            .map(|(s, n)| format!("{s} {n}"))
            .collect();
        write!(f, "  sectors: {}", sectors.join(", "))
    }
}

/// Build weights for `codes` with `strategy`.
pub fn construct(
    strategy: WeightingStrategy,
    codes: &[InstrumentCode],
    feed: &dyn PriceFeed,
    metadata: &dyn InstrumentMetadata,
    window: Window,
) -> Result<Allocation> {
    match strategy {
        WeightingStrategy::EqualWeight => equal_weight(codes, metadata),
        WeightingStrategy::MarketCap => market_cap_weight(codes, feed, metadata, window),
        WeightingStrategy::RiskParity => risk_parity(codes, feed, metadata, window),
    }
}

/// `1/N` over the distinct codes.
pub fn equal_weight(codes: &[InstrumentCode], metadata: &dyn InstrumentMetadata) -> Result<Allocation> {
    let codes = distinct(codes)?;
    let share = 1.0 / codes.len() as f64;
    Ok(Allocation {
        strategy: WeightingStrategy::EqualWeight,
        weights: codes.iter().map(|&c| (c, share)).collect(),
        excluded: Vec::new(),
        inputs: Vec::new(),
        sector_distribution: sector_counts(&codes, metadata),
    })
}

/// `cap_i / Σcap`. Without a market cap, the last close in `window` stands in.
pub fn market_cap_weight(
    codes: &[InstrumentCode],
    feed: &dyn PriceFeed,
    metadata: &dyn InstrumentMetadata,
    window: Window,
) -> Result<Allocation> {
    let codes = distinct(codes)?;
    let mut inputs = Vec::with_capacity(codes.len());
    let mut excluded = Vec::new();

    for &code in &codes {
        let cap = match metadata.market_cap(code).filter(|c| c.is_finite() && *c > 0.0) {
            Some(cap) => Some(cap),
            None => window
                .closes(feed, code)
                .and_then(|points| points.last().map(|p| p.close))
                .filter(|p| p.is_finite() && *p > 0.0)
                .inspect(|p| debug!("{code}: no market cap, using close {p} as proxy")),
        };
        match cap {
            Some(cap) => inputs.push((code, cap)),
            None => {
                warn!("{code}: neither market cap nor price, excluded");
                excluded.push(code);
            }
        }
    }
    if inputs.is_empty() {
        return Err(LedgerError::DataUnavailable(
            "no market cap or price for any instrument".into(),
        ));
    }

    Ok(Allocation {
        strategy: WeightingStrategy::MarketCap,
        weights: proportional(inputs.iter().copied()),
        excluded,
        inputs,
        sector_distribution: sector_counts(&codes, metadata),
    })
}

/// Inverse-volatility weights: `(1/vol_i) / Σ(1/vol_j)`.
///
/// Volatility is annualized over the closes in `window`; instruments with
/// fewer than 10 closes or zero volatility are excluded.
pub fn risk_parity(
    codes: &[InstrumentCode],
    feed: &dyn PriceFeed,
    metadata: &dyn InstrumentMetadata,
    window: Window,
) -> Result<Allocation> {
    let codes = distinct(codes)?;
    let mut inputs = Vec::with_capacity(codes.len());
    let mut excluded = Vec::new();

    for &code in &codes {
        let Some(points) = window.closes(feed, code) else {
            excluded.push(code);
            continue;
        };
        if points.len() < MIN_OBSERVATIONS {
            warn!("{code}: {} closes in window, excluded", points.len());
            excluded.push(code);
            continue;
        }
        let closes: Vec<f64> = points.iter().map(|p| p.close).collect();
        let vol = risk::volatility(&crate::analytics::series::simple_returns(&closes));
        if vol > 0.0 && vol.is_finite() {
            inputs.push((code, vol));
        } else {
            warn!("{code}: flat or unusable volatility {vol}, excluded");
            excluded.push(code);
        }
    }
    if inputs.is_empty() {
        return Err(LedgerError::DataUnavailable(
            "no instrument has usable volatility".into(),
        ));
    }

    Ok(Allocation {
        strategy: WeightingStrategy::RiskParity,
        weights: proportional(inputs.iter().map(|&(c, vol)| (c, vol.recip()))),
        excluded,
        inputs,
        sector_distribution: sector_counts(&codes, metadata),
    })
}

/// Concentration band of a sector HHI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Concentration {
    Low,
    Medium,
    High,
}

impl Concentration {
    /// `< 1500` Low, `< 2500` Medium, otherwise High.
    pub fn from_hhi(hhi: f64) -> Self {
        if hhi < 1500.0 {
            Concentration::Low
        } else if hhi < 2500.0 {
            Concentration::Medium
        } else {
            Concentration::High
        }
    }
}

impl fmt::Display for Concentration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concentration::Low => write!(f, "low"),
            Concentration::Medium => write!(f, "medium"),
            Concentration::High => write!(f, "high"),
        }
    }
}

/// Sector concentration of a selection.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SectorReport {
    pub counts: BTreeMap<String, usize>,
    /// Share of the instrument count per sector, in percent
    pub shares: BTreeMap<String, f64>,
    /// `10000 × Σ share²`
    pub hhi: f64,
    pub level: Concentration,
}

/// Fewest sectors considered diversified.
pub const MIN_SECTORS: usize = 3;

impl SectorReport {
    pub fn num_sectors(&self) -> usize {
        self.counts.len()
    }

    /// Fewer than three distinct sectors.
    pub fn too_few_sectors(&self) -> bool {
        self.num_sectors() < MIN_SECTORS
    }
}

impl fmt::Display for SectorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sector diversification ({} sectors)", self.num_sectors())?;
        for (sector, share) in &self.shares {
            writeln!(f, "  {sector:<24} {share:>7.2}%")?;
        }
        write!(f, "  HHI: {:.2} ({} concentration)", self.hhi, self.level)?;
        if self.too_few_sectors() {
            write!(f, "\n  spread holdings over at least {MIN_SECTORS} sectors")?;
        }
        Ok(())
    }
}

/// HHI of the sector mix of `codes`, by instrument count.
pub fn sector_diversification(
    codes: &[InstrumentCode],
    metadata: &dyn InstrumentMetadata,
) -> Result<SectorReport> {
    let codes = distinct(codes)?;
    let counts = sector_counts(&codes, metadata);
    let total = codes.len() as f64;
    let shares: BTreeMap<String, f64> = counts
        .iter()
        .map(|(s, &n)| (s.clone(), n as f64 / total))
        .collect();
    let hhi = shares.values().map(|s| s * s).sum::<f64>() * 10_000.0;
    Ok(SectorReport {
        counts,
        shares: shares.into_iter().map(|(s, v)| (s, v * 100.0)).collect(),
        hhi,
        level: Concentration::from_hhi(hhi),
    })
}

/// Check weights are finite, non-negative and sum to 1 within 1e-6.
pub fn validate_weights(weights: &[(InstrumentCode, f64)]) -> Result<()> {
    if weights.is_empty() {
        return Err(LedgerError::Validation("no weights".into()));
    }
    if let Some((code, w)) = weights.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
        return Err(LedgerError::Validation(format!("invalid weight {w} for {code}")));
    }
    let sum: f64 = weights.iter().map(|(_, w)| w).sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(LedgerError::Validation(format!(
            "weights sum to {sum:.6}, expected 1"
        )));
    }
    Ok(())
}

/// Hypothetical performance of holding fixed weights over a trailing window.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SimulatedPerformance {
    /// Aligned return observations
    pub period_days: usize,
    /// Percent
    pub total_return: f64,
    /// Percent, over `period_days / 252` years
    pub annualized_return: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
    /// Best single-day blended return, percent
    pub best_day: f64,
    /// Worst single-day blended return, percent
    pub worst_day: f64,
    /// Instruments dropped for lack of history
    pub skipped: Vec<InstrumentCode>,
}

impl fmt::Display for SimulatedPerformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulated performance ({} days)", self.period_days)?;
        writeln!(f, "  Total return:    {:>8.2}%", self.total_return)?;
        writeln!(f, "  Annualized:      {:>8.2}%", self.annualized_return)?;
        writeln!(f, "  Volatility:      {:>8.2}%", self.volatility)?;
        writeln!(f, "  Max drawdown:    {:>8.2}%", self.max_drawdown)?;
        writeln!(f, "  Sharpe:          {:>8.3}", self.sharpe)?;
        write!(
            f,
            "  Best/worst day:  {:>7.2}% / {:.2}%",
            self.best_day, self.worst_day
        )
    }
}

/// Replay `weights` over the closes in `window`.
///
/// Instruments with fewer than 10 closes are skipped; their weight is not
/// redistributed. Returns are aligned on the dates every remaining instrument
/// traded.
pub fn simulate_performance(
    feed: &dyn PriceFeed,
    weights: &[(InstrumentCode, f64)],
    window: Window,
    risk_free: f64,
) -> Result<SimulatedPerformance> {
    let mut kept = Vec::new();
    let mut series = Vec::new();
    let mut skipped = Vec::new();
    for &(code, w) in weights {
        match window.closes(feed, code) {
            Some(points) if points.len() >= MIN_OBSERVATIONS => {
                kept.push(w);
                series.push(dated_returns(&points));
            }
            _ => skipped.push(code),
        }
    }
    if series.is_empty() {
        return Err(LedgerError::DataUnavailable("no return history".into()));
    }

    let aligned = align(&series);
    if aligned.is_empty() {
        return Err(LedgerError::DataUnavailable(
            "instruments share no trading days".into(),
        ));
    }
    let returns = aligned.blend(&kept);
    let curve = cumulative(&returns);
    let total = curve.last().copied().unwrap_or(1.0) - 1.0;
    let years = returns.len() as f64 / TRADING_DAYS;

    Ok(SimulatedPerformance {
        period_days: returns.len(),
        total_return: total * 100.0,
        annualized_return: crate::analytics::annualize(total, years) * 100.0,
        volatility: risk::volatility(&returns),
        max_drawdown: risk::max_drawdown(&curve).max_drawdown_pct,
        sharpe: risk::sharpe_ratio(&returns, risk_free),
        best_day: returns.iter().copied().fold(f64::MIN, f64::max) * 100.0,
        worst_day: returns.iter().copied().fold(f64::MAX, f64::min) * 100.0,
        skipped,
    })
}

fn distinct(codes: &[InstrumentCode]) -> Result<Vec<InstrumentCode>> {
    if codes.is_empty() {
        return Err(LedgerError::Validation("no instruments selected".into()));
    }
    let mut out: Vec<InstrumentCode> = Vec::with_capacity(codes.len());
    for &code in codes {
        if !out.contains(&code) {
            out.push(code);
        }
    }
    Ok(out)
}

fn sector_counts(codes: &[InstrumentCode], metadata: &dyn InstrumentMetadata) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for &code in codes {
        let sector = metadata
            .sector(code)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_SECTOR.to_string());
        *counts.entry(sector).or_insert(0) += 1;
    }
    counts
}

/// Each score over the sum of scores. Scores are positive and finite.
fn proportional<I>(scores: I) -> Vec<(InstrumentCode, f64)>
where
    I: Iterator<Item = (InstrumentCode, f64)> + Clone,
{
    let total: f64 = scores.clone().map(|(_, x)| x).sum();
    scores.map(|(c, x)| (c, x / total)).collect()
}
