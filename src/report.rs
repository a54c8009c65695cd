//! Terminal output for holdings, sector diagnostics and KPI summaries.

use crate::data::{PriceMatrix, PriceProvider};
use crate::error::{AllocError, Result};
use crate::metrics::RiskReport;
use crate::pipeline::{SectorDiagnostic, StrategyReport};
use crate::ranker::Exclusion;
use crate::types::Holding;
use colored::Colorize;
use tabled::{builder::Builder, settings::Style};
use tracing::warn;

impl RiskReport {
    /// Metrics of the valuation series `prices · quantities` of a holding over
    /// the trailing `window` observations.
    ///
    /// Positions whose history cannot be fetched are left out of the basket.
    pub fn for_holding(
        holding: &Holding,
        provider: &dyn PriceProvider,
        window: usize,
        risk_free: f64,
    ) -> Result<Self> {
        if holding.is_empty() {
            return Err(AllocError::InvalidInput("holding is empty".to_string()));
        }
        let collection = PriceMatrix::collect(provider, &holding.symbols(), window);
        for symbol in &collection.failed {
            warn!("{}: left out of KPI summary, no usable history", symbol);
        }
        let matrix = collection.matrix;
        if matrix.is_empty() {
            return Err(AllocError::InsufficientData {
                needed: 2,
                got: matrix.n_rows(),
            });
        }

        let quantities: Vec<f64> = matrix
            .symbols()
            .iter()
            .map(|s| holding.get(s).map(|e| e.quantity as f64).unwrap_or(0.0))
            .collect();
        Self::for_weighted(matrix.rows(), &quantities, risk_free)
    }
}

fn ratio(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.3}", v),
        None => "n/a".to_string(),
    }
}

/// Renders run results for the terminal.
pub struct ReportFormatter;

impl ReportFormatter {
    /// Holding lines as a rounded table.
    pub fn holding_table(holding: &Holding) -> String {
        let mut builder = Builder::new();
        builder.push_record(["Symbol", "Sector", "Location", "Side", "Qty"]);
        for entry in holding.entries() {
            builder.push_record([
                entry.symbol.clone(),
                entry.sector.clone(),
                entry.location.clone(),
                entry.side().to_string(),
                entry.quantity.abs().to_string(),
            ]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    /// One row per sector with its quota, budget and Sharpe ratios.
    pub fn diagnostics_table(diagnostics: &[SectorDiagnostic]) -> String {
        let mut builder = Builder::new();
        builder.push_record([
            "Sector", "Mean Sharpe", "Count", "Budget", "Weights Sharpe", "Realized Sharpe", "Note",
        ]);
        for d in diagnostics {
            let note = match (&d.error, d.fallback) {
                (Some(err), _) => err.clone(),
                (None, Some(reason)) => format!("equal weights ({})", reason),
                (None, None) if !d.dropped.is_empty() => format!("dropped {}", d.dropped.join(" ")),
                _ => String::new(),
            };
            builder.push_record([
                d.sector.clone(),
                ratio(d.mean_sharpe),
                d.count.to_string(),
                format!("{:.2}", d.budget),
                ratio(d.continuous_sharpe),
                ratio(d.realized_sharpe),
                note,
            ]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    pub fn exclusions_table(exclusions: &[Exclusion], limit: usize) -> String {
        let mut builder = Builder::new();
        builder.push_record(["Symbol", "Sector", "Reason"]);
        for e in exclusions.iter().take(limit) {
            builder.push_record([e.symbol.clone(), e.sector.clone(), e.reason.to_string()]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    /// Print the outcome of a strategy run to stdout.
    pub fn print_report(report: &StrategyReport, show_exclusions: bool) {
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " SECTOR SHARPE ALLOCATION ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!("  Positions:       {:>12}", report.holding.len());
        println!("  Instruments:     {:>12}", report.allocation.total_count());
        println!("  Capital Used:    ${:>11.2}", report.allocation.total_budget());
        println!("  Exclusions:      {:>12}", report.exclusions.len());
        println!("  Seed:            {:>12}", report.seed);
        println!();

        println!("{}", "Sectors".bold().underline());
        println!("{}", Self::diagnostics_table(&report.diagnostics));
        println!();

        println!("{}", "Holding".bold().underline());
        println!("{}", Self::holding_table(&report.holding));

        if show_exclusions && !report.exclusions.is_empty() {
            println!();
            println!("{}", "Exclusions".bold().underline());
            println!("{}", Self::exclusions_table(&report.exclusions, usize::MAX));
        }
        println!("{}", "═".repeat(60).blue());
    }

    /// Print a KPI summary.
    pub fn print_kpi(title: &str, kpi: &RiskReport) {
        println!();
        println!("{}", title.bold().underline());
        println!(
            "  CAGR:            {:>12}",
            Self::format_pct(kpi.annualized_return * 100.0)
        );
        println!("  Volatility:      {:>11.2}%", kpi.annualized_volatility * 100.0);
        println!("  Sharpe Ratio:    {:>12}", ratio(kpi.sharpe));
        println!("  Sortino Ratio:   {:>12}", ratio(kpi.sortino));
        println!("  Max Drawdown:    {:>11.2}%", kpi.max_drawdown * 100.0);
        println!("  Calmar Ratio:    {:>12}", ratio(kpi.calmar));
    }

    fn format_pct(pct: f64) -> String {
        if pct >= 0.0 {
            format!("+{:.2}%", pct).green().to_string()
        } else {
            format!("{:.2}%", pct).red().to_string()
        }
    }
}
