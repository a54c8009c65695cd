//! Core data types shared by every pipeline stage.

use crate::error::{AllocError, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One adjusted close observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self { date, close }
    }
}

/// Date-ordered adjusted close history for one instrument.
///
/// Dates are strictly increasing; construction rejects duplicates and
/// out-of-order observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    symbol: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Create a series, validating date ordering.
    pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>) -> Result<Self> {
        let symbol = symbol.into();
        if let Some(pair) = points.windows(2).find(|w| w[1].date <= w[0].date) {
            return Err(AllocError::InvalidInput(format!(
                "{}: dates must be strictly increasing ({} followed by {})",
                symbol, pair[0].date, pair[1].date
            )));
        }
        Ok(Self { symbol, points })
    }

    /// An empty series, used by providers to signal a failed fetch.
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            points: Vec::new(),
        }
    }

    /// Build a series of consecutive calendar days starting at `start`.
    pub fn from_closes(symbol: impl Into<String>, start: NaiveDate, closes: &[f64]) -> Self {
        let points = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PricePoint::new(start + Duration::days(i as i64), close))
            .collect();
        Self {
            symbol: symbol.into(),
            points,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Closing prices in date order.
    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.points.last().map(|p| p.close)
    }

    /// Whether any observation is NaN or infinite.
    pub fn has_non_finite(&self) -> bool {
        self.points.iter().any(|p| !p.close.is_finite())
    }

    /// The most recent `n` observations (the whole series if shorter).
    pub fn tail(&self, n: usize) -> PriceSeries {
        let start = self.points.len().saturating_sub(n);
        PriceSeries {
            symbol: self.symbol.clone(),
            points: self.points[start..].to_vec(),
        }
    }

    /// Drop non-finite observations, returning how many were removed.
    pub fn drop_non_finite(&mut self) -> usize {
        let before = self.points.len();
        self.points.retain(|p| p.close.is_finite());
        before - self.points.len()
    }
}

/// Reference data for one tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub symbol: String,
    pub sector: String,
    /// Exchange/location tag, e.g. "CA" for domestic and "US" for foreign listings.
    pub location: String,
}

impl InstrumentRecord {
    pub fn new(
        symbol: impl Into<String>,
        sector: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            sector: sector.into(),
            location: location.into(),
        }
    }
}

/// Order side derived from the sign of a holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// One line of the final holding table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingEntry {
    pub symbol: String,
    /// Signed share count; the sign encodes long (+) or short (-) intent.
    pub quantity: i64,
    pub location: String,
    pub sector: String,
}

impl HoldingEntry {
    pub fn side(&self) -> Side {
        if self.quantity >= 0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

/// Final output of a run. Zero-quantity lines never appear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    entries: Vec<HoldingEntry>,
}

impl Holding {
    /// Build a holding table, discarding zero-quantity entries.
    pub fn from_entries(entries: impl IntoIterator<Item = HoldingEntry>) -> Self {
        Self {
            entries: entries.into_iter().filter(|e| e.quantity != 0).collect(),
        }
    }

    pub fn entries(&self) -> &[HoldingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&HoldingEntry> {
        self.entries.iter().find(|e| e.symbol == symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.symbol.clone()).collect()
    }

    /// Signed quantities as floating weights, aligned with `symbols()`.
    pub fn quantities(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.quantity as f64).collect()
    }
}
