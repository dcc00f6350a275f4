//! Market data file (market.json) loading.
//!
//! ```json
//! {
//!   "instruments": {
//!     "005930": {
//!       "sector": "Technology",
//!       "market_cap": 4.2e14,
//!       "quote": 71200,
//!       "closes": [{ "date": "2024-01-02", "close": 70500 }]
//!     }
//!   },
//!   "universe": ["005930"]
//! }
//! ```
//!
//! `quote` is optional; without it the latest close is the quote.

use std::path::Path;

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use paperbook::feed::{InstrumentInfo, MemoryFeed, PricePoint};
use paperbook::{InstrumentCode, Money};

use crate::error::{Error, Result};

/// Raw contents of a market data file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketData {
    #[serde(default)]
    pub instruments: FxHashMap<String, InstrumentRecord>,
    /// Screening order for backtests; by market cap when empty
    #[serde(default)]
    pub universe: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstrumentRecord {
    #[serde(flatten)]
    pub info: InstrumentInfo,
    #[serde(default)]
    pub quote: Option<f64>,
    #[serde(default)]
    pub closes: Vec<PricePoint>,
}

impl MarketData {
    /// Load and validate a market data file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::MarketRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&contents)
    }

    /// Parse from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self> {
        let data: MarketData = serde_json::from_str(json)?;
        data.validate()?;
        Ok(data)
    }

    fn validate(&self) -> Result<()> {
        for (code, record) in &self.instruments {
            parse_code(code)?;
            if let Some(q) = record.quote {
                if !q.is_finite() || q <= 0.0 {
                    return Err(Error::MarketData(format!("{code}: quote must be positive")));
                }
            }
            if let Some(p) = record.closes.iter().find(|p| !p.close.is_finite() || p.close <= 0.0) {
                return Err(Error::MarketData(format!(
                    "{code}: close on {} must be positive",
                    p.date
                )));
            }
        }
        for code in &self.universe {
            parse_code(code)?;
        }
        Ok(())
    }

    /// Date of the most recent close across all instruments.
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.instruments
            .values()
            .filter_map(|r| r.closes.iter().map(|p| p.date).max())
            .max()
    }

    /// Build the in-memory feed the library works against.
    pub fn into_feed(self) -> Result<MemoryFeed> {
        let mut builder = MemoryFeed::builder();
        for (code, record) in self.instruments {
            let code = parse_code(&code)?;
            if let Some(q) = record.quote {
                let price = Money::from_f64(q)
                    .ok_or_else(|| Error::MarketData(format!("{code}: quote out of range")))?;
                builder = builder.with_quote(code, price);
            }
            builder = builder
                .with_info(code, record.info)
                .with_history(code, record.closes);
        }
        let universe = self
            .universe
            .iter()
            .map(|c| parse_code(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(builder.with_universe(universe).build())
    }
}

/// Load a market data file straight into a feed, with its latest date.
pub fn load_feed(path: &Path) -> Result<(MemoryFeed, Option<NaiveDate>)> {
    let data = MarketData::load(path)?;
    let latest = data.latest_date();
    Ok((data.into_feed()?, latest))
}

fn parse_code(code: &str) -> Result<InstrumentCode> {
    code.parse()
        .map_err(|e| Error::MarketData(format!("{e}")))
}
