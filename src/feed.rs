//! Market data interfaces: quotes, price history, instrument metadata, screening.
//!
//! The ledger and analytics depend only on these traits. [`MemoryFeed`] is an
//! in-memory implementation of all of them, used by tests and by the CLI
//! (loaded from a market-data file).

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rustc_hash::FxHashMap;

use crate::types::{InstrumentCode, Money};

/// One daily close.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self { date, close }
    }
}

/// Market data failures. Both are recoverable per instrument.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("no data for {0}")]
    NotFound(InstrumentCode),

    #[error("market data unavailable: {0}")]
    Unavailable(String),
}

/// Source of latest quotes and daily history.
pub trait PriceFeed {
    /// Latest traded price (typically the last close).
    fn latest_quote(&self, code: InstrumentCode) -> Result<Money, FeedError>;

    /// Daily closes with `start <= date <= end`, ascending by date.
    fn history(
        &self,
        code: InstrumentCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, FeedError>;
}

/// Static instrument attributes.
pub trait InstrumentMetadata {
    fn sector(&self, code: InstrumentCode) -> Option<String>;
    fn market_cap(&self, code: InstrumentCode) -> Option<f64>;
}

/// Picks the candidate universe for a backtest.
pub trait UniverseScreener {
    fn screen(&self, top_n: usize) -> Result<Vec<InstrumentCode>, FeedError>;
}

/// Static attributes of one instrument.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstrumentInfo {
    #[cfg_attr(feature = "serde", serde(default))]
    pub sector: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub market_cap: Option<f64>,
}

/// In-memory market data.
#[derive(Clone, Debug, Default)]
pub struct MemoryFeed {
    history: FxHashMap<InstrumentCode, Vec<PricePoint>>,
    quotes: FxHashMap<InstrumentCode, Money>,
    info: FxHashMap<InstrumentCode, InstrumentInfo>,
    universe: Vec<InstrumentCode>,
}

impl MemoryFeed {
    pub fn builder() -> MemoryFeedBuilder {
        MemoryFeedBuilder::default()
    }

    /// Instruments with any data, sorted by code.
    pub fn codes(&self) -> Vec<InstrumentCode> {
        let mut codes: Vec<InstrumentCode> = self
            .history
            .keys()
            .chain(self.quotes.keys())
            .chain(self.info.keys())
            .copied()
            .collect();
        codes.sort();
        codes.dedup();
        codes
    }

    /// Override the latest quote for an instrument.
    pub fn set_quote(&mut self, code: InstrumentCode, price: Money) {
        self.quotes.insert(code, price);
    }
}

impl PriceFeed for MemoryFeed {
    fn latest_quote(&self, code: InstrumentCode) -> Result<Money, FeedError> {
        if let Some(&price) = self.quotes.get(&code) {
            return Ok(price);
        }
        self.history
            .get(&code)
            .and_then(|points| points.last())
            .and_then(|p| Money::from_f64(p.close))
            .ok_or(FeedError::NotFound(code))
    }

    fn history(
        &self,
        code: InstrumentCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, FeedError> {
        let points = self.history.get(&code).ok_or(FeedError::NotFound(code))?;
        Ok(points
            .iter()
            .filter(|p| p.date >= start && p.date <= end)
            .copied()
            .collect())
    }
}

impl InstrumentMetadata for MemoryFeed {
    fn sector(&self, code: InstrumentCode) -> Option<String> {
        self.info.get(&code).and_then(|i| i.sector.clone())
    }

    fn market_cap(&self, code: InstrumentCode) -> Option<f64> {
        self.info.get(&code).and_then(|i| i.market_cap)
    }
}

impl UniverseScreener for MemoryFeed {
    /// The configured universe, or every known instrument ranked by market
    /// cap (largest first, then by code) when none was configured.
    fn screen(&self, top_n: usize) -> Result<Vec<InstrumentCode>, FeedError> {
        if !self.universe.is_empty() {
            return Ok(self.universe.iter().take(top_n).copied().collect());
        }
        let mut ranked: Vec<(InstrumentCode, f64)> = self
            .history
            .keys()
            .map(|&c| (c, self.market_cap(c).unwrap_or(0.0)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked.into_iter().take(top_n).map(|(c, _)| c).collect())
    }
}

/// Builder for [`MemoryFeed`].
#[derive(Default)]
pub struct MemoryFeedBuilder {
    feed: MemoryFeed,
}

impl MemoryFeedBuilder {
    /// Daily history for an instrument. Points are sorted by date.
    pub fn with_history(mut self, code: InstrumentCode, mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.date);
        self.feed.history.insert(code, points);
        self
    }

    /// Closes on consecutive weekdays starting at `start`.
    pub fn with_closes(self, code: InstrumentCode, start: NaiveDate, closes: &[f64]) -> Self {
        let points = weekdays_from(start)
            .zip(closes)
            .map(|(date, &close)| PricePoint::new(date, close))
            .collect();
        self.with_history(code, points)
    }

    pub fn with_quote(mut self, code: InstrumentCode, price: Money) -> Self {
        self.feed.quotes.insert(code, price);
        self
    }

    pub fn with_sector(mut self, code: InstrumentCode, sector: &str) -> Self {
        self.feed.info.entry(code).or_default().sector = Some(sector.to_string());
        self
    }

    pub fn with_market_cap(mut self, code: InstrumentCode, cap: f64) -> Self {
        self.feed.info.entry(code).or_default().market_cap = Some(cap);
        self
    }

    pub fn with_info(mut self, code: InstrumentCode, info: InstrumentInfo) -> Self {
        self.feed.info.insert(code, info);
        self
    }

    pub fn with_universe(mut self, codes: Vec<InstrumentCode>) -> Self {
        self.feed.universe = codes;
        self
    }

    pub fn build(self) -> MemoryFeed {
        self.feed
    }
}

/// Infinite iterator over weekdays (Mon-Fri) starting at `start` (rolled forward).
pub fn weekdays_from(start: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let mut next = start;
    std::iter::from_fn(move || {
        while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
            next += Duration::days(1);
        }
        let current = next;
        next += Duration::days(1);
        Some(current)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aaa() -> InstrumentCode {
        InstrumentCode::new("AAA")
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn latest_quote_defaults_to_last_close() {
        let feed = MemoryFeed::builder()
            .with_closes(aaa(), d(2024, 1, 1), &[100.0, 101.0, 102.5])
            .build();
        assert_eq!(feed.latest_quote(aaa()).unwrap(), Money(102_500000));
    }

    #[test]
    fn quote_override_wins() {
        let feed = MemoryFeed::builder()
            .with_closes(aaa(), d(2024, 1, 1), &[100.0])
            .with_quote(aaa(), Money::from_units(90))
            .build();
        assert_eq!(feed.latest_quote(aaa()).unwrap(), Money::from_units(90));
    }

    #[test]
    fn unknown_code_not_found() {
        let feed = MemoryFeed::default();
        assert_eq!(feed.latest_quote(aaa()), Err(FeedError::NotFound(aaa())));
        assert!(feed.history(aaa(), d(2024, 1, 1), d(2024, 2, 1)).is_err());
    }

    #[test]
    fn history_window_is_inclusive() {
        // 2024-01-05 is a Friday; closes land on 5, 8, 9, 10
        let feed = MemoryFeed::builder()
            .with_closes(aaa(), d(2024, 1, 5), &[1.0, 2.0, 3.0, 4.0])
            .build();
        let window = feed.history(aaa(), d(2024, 1, 8), d(2024, 1, 9)).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].date, d(2024, 1, 8));
        assert_eq!(window[1].close, 3.0);
    }

    #[test]
    fn weekdays_skip_weekend() {
        // 2024-01-06 is a Saturday
        let days: Vec<_> = weekdays_from(d(2024, 1, 6)).take(2).collect();
        assert_eq!(days, vec![d(2024, 1, 8), d(2024, 1, 9)]);
    }

    #[test]
    fn screen_ranks_by_market_cap() {
        let bbb = InstrumentCode::new("BBB");
        let feed = MemoryFeed::builder()
            .with_closes(aaa(), d(2024, 1, 1), &[1.0])
            .with_closes(bbb, d(2024, 1, 1), &[1.0])
            .with_market_cap(aaa(), 10.0)
            .with_market_cap(bbb, 20.0)
            .build();
        assert_eq!(feed.screen(1).unwrap(), vec![bbb]);
        assert_eq!(feed.screen(5).unwrap(), vec![bbb, aaa()]);
    }

    #[test]
    fn configured_universe_wins() {
        let feed = MemoryFeed::builder()
            .with_universe(vec![aaa()])
            .build();
        assert_eq!(feed.screen(10).unwrap(), vec![aaa()]);
    }
}
