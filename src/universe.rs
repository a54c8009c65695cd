//! Immutable reference data: which instruments exist, their sector and listing location.
//!
//! Reference data is loaded once per run and passed explicitly to the
//! pipeline. Each universe (an index or exchange listing) carries its own
//! location tag and static exclusion list.

use crate::error::{AllocError, Result};
use crate::types::InstrumentRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// One source listing of instruments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseSpec {
    /// Listing name as it appears in the reference file, e.g. "SPTSX".
    pub name: String,
    /// Location tag attached to every member, e.g. "CA".
    pub location: String,
    /// Symbols dropped at load time (delisted, bad data, corporate actions).
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl UniverseSpec {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            exclude: Vec::new(),
        }
    }

    pub fn with_exclusions<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(symbols.into_iter().map(Into::into));
        self
    }
}

/// Strip a vendor suffix such as `-CT` or `-US` from a raw ticker.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().split('-').next().unwrap_or_default().to_string()
}

#[derive(Debug, serde::Deserialize)]
struct ReferenceRow {
    #[serde(alias = "Symbol", alias = "ticker", alias = "Ticker")]
    symbol: String,
    #[serde(alias = "Sector", alias = "GICS Sector", alias = "industry")]
    sector: String,
    #[serde(alias = "Universe", alias = "index", alias = "exchange")]
    universe: String,
}

/// Instrument lookup keyed by symbol.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    instruments: BTreeMap<String, InstrumentRecord>,
}

impl ReferenceData {
    /// Build reference data from records. A symbol listed twice keeps its first record.
    pub fn new(records: impl IntoIterator<Item = InstrumentRecord>) -> Self {
        let mut instruments = BTreeMap::new();
        for record in records {
            if instruments.contains_key(&record.symbol) {
                warn!("Duplicate reference entry for {}, keeping the first", record.symbol);
                continue;
            }
            instruments.insert(record.symbol.clone(), record);
        }
        Self { instruments }
    }

    /// Load a `symbol,sector,universe` CSV, applying each universe's exclusions.
    ///
    /// Universes are consulted in the given order, so a symbol listed under two
    /// universes keeps the location of the first one in `universes`.
    pub fn load_csv(path: impl AsRef<Path>, universes: &[UniverseSpec]) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading reference data from: {}", path.display());

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut rows: Vec<ReferenceRow> = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }

        let mut records = Vec::new();
        for universe in universes {
            let excluded: HashSet<String> = universe.exclude.iter().map(|s| normalize_symbol(s)).collect();
            let mut dropped = 0;
            for row in rows.iter().filter(|r| r.universe == universe.name) {
                let symbol = normalize_symbol(&row.symbol);
                if symbol.is_empty() {
                    continue;
                }
                if excluded.contains(&symbol) {
                    dropped += 1;
                    continue;
                }
                records.push(InstrumentRecord::new(symbol, row.sector.clone(), universe.location.clone()));
            }
            debug!("{}: excluded {} symbols", universe.name, dropped);
        }

        let known: HashSet<&str> = universes.iter().map(|u| u.name.as_str()).collect();
        if let Some(row) = rows.iter().find(|r| !known.contains(r.universe.as_str())) {
            return Err(AllocError::ConfigError(format!(
                "reference row {} names unknown universe '{}'",
                row.symbol, row.universe
            )));
        }

        let data = Self::new(records);
        info!(
            "Loaded {} instruments across {} sectors",
            data.len(),
            data.sectors().len()
        );
        Ok(data)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&InstrumentRecord> {
        self.instruments.get(symbol)
    }

    pub fn location(&self, symbol: &str) -> Option<&str> {
        self.instruments.get(symbol).map(|r| r.location.as_str())
    }

    pub fn instruments(&self) -> impl Iterator<Item = &InstrumentRecord> {
        self.instruments.values()
    }

    /// Distinct sector labels in sorted order.
    pub fn sectors(&self) -> Vec<String> {
        self.by_sector().into_keys().collect()
    }

    /// Member symbols per sector, sorted by symbol.
    pub fn by_sector(&self) -> BTreeMap<String, Vec<String>> {
        let mut sectors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for record in self.instruments.values() {
            sectors
                .entry(record.sector.clone())
                .or_default()
                .push(record.symbol.clone());
        }
        sectors
    }

    /// Number of reference instruments per sector.
    pub fn sector_counts(&self) -> BTreeMap<String, usize> {
        self.by_sector()
            .into_iter()
            .map(|(sector, members)| (sector, members.len()))
            .collect()
    }
}
