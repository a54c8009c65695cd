//! Export utilities for run results.
//!
//! | Artifact | Format | Consumer |
//! |----------|--------|----------|
//! | Holding table | CSV | storage, KPI summary |
//! | Market-order basket | CSV | order entry |
//! | Run report | JSON | telemetry, reproducibility |

use crate::error::Result;
use crate::metadata::RunMetadata;
use crate::metrics::RiskReport;
use crate::pipeline::{SectorDiagnostic, StrategyReport};
use crate::ranker::Exclusion;
use crate::types::{Holding, HoldingEntry, Side};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::info;

/// One market order derived from a holding line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketOrder {
    /// `SYMBOL-LOCATION`, e.g. `RY-CA`.
    #[serde(rename = "Ticker")]
    pub ticker: String,
    #[serde(rename = "Buy/Sell")]
    pub side: Side,
    #[serde(rename = "Quantity")]
    pub quantity: u64,
    #[serde(rename = "Type")]
    pub order_type: String,
}

impl BasketOrder {
    pub fn from_entry(entry: &HoldingEntry) -> Self {
        Self {
            ticker: format!("{}-{}", entry.symbol, entry.location),
            side: entry.side(),
            quantity: entry.quantity.unsigned_abs(),
            order_type: "MKT".to_string(),
        }
    }
}

/// Market orders that build `holding` from scratch.
pub fn basket_orders(holding: &Holding) -> Vec<BasketOrder> {
    holding.entries().iter().map(BasketOrder::from_entry).collect()
}

/// Write the holding table as `symbol,quantity,location,sector`.
pub fn export_holding_csv(holding: &Holding, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for entry in holding.entries() {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    info!("Wrote {} holding lines to {}", holding.len(), path.as_ref().display());
    Ok(())
}

/// Read a holding table written by [`export_holding_csv`].
pub fn load_holding_csv(path: impl AsRef<Path>) -> Result<Holding> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path.as_ref())?;
    let mut entries = Vec::new();
    for row in reader.deserialize() {
        let entry: HoldingEntry = row?;
        entries.push(entry);
    }
    Ok(Holding::from_entries(entries))
}

/// Write the market-order basket as `Ticker,Buy/Sell,Quantity,Type`.
pub fn export_basket_csv(holding: &Holding, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for order in basket_orders(holding) {
        writer.serialize(order)?;
    }
    writer.flush()?;
    Ok(())
}

/// Serialized form of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDocument {
    pub metadata: RunMetadata,
    pub holding: Vec<HoldingEntry>,
    pub sectors: Vec<SectorDiagnostic>,
    pub exclusions: Vec<Exclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kpi: Option<RiskReport>,
}

impl RunDocument {
    pub fn new(report: &StrategyReport, metadata: RunMetadata, kpi: Option<RiskReport>) -> Self {
        Self {
            metadata,
            holding: report.holding.entries().to_vec(),
            sectors: report.diagnostics.clone(),
            exclusions: report.exclusions.clone(),
            kpi,
        }
    }
}

/// Write the run report as pretty JSON.
pub fn export_report_json(document: &RunDocument, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, document)?;
    Ok(())
}
