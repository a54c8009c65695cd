//! Configuration file support for strategy runs.
//!
//! A run is fully described by one TOML file: capital and seed, the ranking
//! and optimization windows, the capped sector, where the data lives and
//! which universes make up the reference data.

use crate::allocator::SectorCap;
use crate::data::PriceCsvConfig;
use crate::error::{AllocError, Result};
use crate::optimizer::OptimizerConfig;
use crate::pipeline::StrategyConfig;
use crate::universe::UniverseSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Complete run configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyFileConfig {
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub ranking: RankingSettings,
    #[serde(default)]
    pub allocation: AllocationSettings,
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    #[serde(default)]
    pub data: DataSettings,
    /// Instrument listings, in priority order.
    #[serde(default, rename = "universe")]
    pub universes: Vec<UniverseSpec>,
}

/// General run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Money to invest across all sectors.
    #[serde(default = "default_capital")]
    pub capital: f64,
    /// Target number of instruments in the final holding.
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    /// Annual risk-free rate used in every Sharpe ratio.
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Seed for surplus redistribution; random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Fan ranking and optimization out over threads.
    #[serde(default = "default_true")]
    pub parallel: bool,
}

fn default_capital() -> f64 { 700_000.0 }
fn default_target_count() -> usize { 100 }
fn default_risk_free_rate() -> f64 { 0.04 }
fn default_true() -> bool { true }

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            capital: 700_000.0,
            target_count: 100,
            risk_free_rate: 0.04,
            seed: None,
            parallel: true,
        }
    }
}

/// Ranking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingSettings {
    /// Trailing observations used to score each instrument.
    #[serde(default = "default_lookback")]
    pub lookback_days: usize,
}

fn default_lookback() -> usize { 100 }

impl Default for RankingSettings {
    fn default() -> Self {
        Self { lookback_days: 100 }
    }
}

/// Sector cap settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationSettings {
    /// Sector whose instrument count is capped. An empty name disables the cap.
    #[serde(default = "default_capped_sector")]
    pub capped_sector: Option<String>,
    #[serde(default = "default_sector_cap")]
    pub sector_cap: usize,
}

fn default_capped_sector() -> Option<String> { Some("Telecommunication Services".to_string()) }
fn default_sector_cap() -> usize { 4 }

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            capped_sector: default_capped_sector(),
            sector_cap: default_sector_cap(),
        }
    }
}

/// Weight optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Observations in the optimization window.
    #[serde(default = "default_window")]
    pub window_days: usize,
    #[serde(default = "default_passes")]
    pub passes: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    /// Per-sector time limit in milliseconds. Unlimited when unset.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: Option<u64>,
}

fn default_window() -> usize { 21 }
fn default_passes() -> usize { 2 }
fn default_max_iterations() -> usize { 500 }
fn default_tolerance() -> f64 { 1e-9 }
fn default_step() -> f64 { 0.05 }
fn default_timeout_ms() -> Option<u64> { Some(5_000) }

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            window_days: 21,
            passes: 2,
            max_iterations: 500,
            tolerance: 1e-9,
            step: 0.05,
            timeout_ms: Some(5_000),
        }
    }
}

/// Data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Directory holding one `<SYMBOL>.csv` file per instrument.
    #[serde(default = "default_prices_dir")]
    pub prices_dir: String,
    /// Reference CSV with `symbol,sector,universe` columns.
    #[serde(default = "default_reference")]
    pub reference: String,
    /// Date format in price files.
    pub date_format: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_prices_dir() -> String { "data/prices".to_string() }
fn default_reference() -> String { "data/reference.csv".to_string() }
fn default_delimiter() -> char { ',' }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            prices_dir: "data/prices".to_string(),
            reference: "data/reference.csv".to_string(),
            date_format: None,
            delimiter: ',',
        }
    }
}

impl DataSettings {
    /// CSV options for the price provider.
    pub fn price_csv_config(&self) -> Result<PriceCsvConfig> {
        if !self.delimiter.is_ascii() {
            return Err(AllocError::ConfigError(format!(
                "delimiter '{}' is not a single-byte character",
                self.delimiter
            )));
        }
        Ok(PriceCsvConfig {
            date_format: self.date_format.clone(),
            delimiter: self.delimiter as u8,
        })
    }
}

impl StrategyFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: StrategyFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AllocError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(AllocError::ConfigError(msg));
        if !self.run.capital.is_finite() || self.run.capital <= 0.0 {
            return fail(format!("run.capital must be positive, got {}", self.run.capital));
        }
        if self.run.target_count == 0 {
            return fail("run.target_count must be at least 1".to_string());
        }
        if self.ranking.lookback_days < 3 {
            return fail("ranking.lookback_days must be at least 3".to_string());
        }
        if self.optimizer.window_days < 3 {
            return fail("optimizer.window_days must be at least 3".to_string());
        }
        if self.optimizer.passes == 0 {
            return fail("optimizer.passes must be at least 1".to_string());
        }
        if !(self.optimizer.step > 0.0) || !(self.optimizer.tolerance >= 0.0) {
            return fail("optimizer.step must be positive and tolerance non-negative".to_string());
        }
        if self.universes.is_empty() {
            return fail("at least one [[universe]] is required".to_string());
        }
        Ok(())
    }

    /// Convert to the pipeline configuration.
    pub fn to_strategy_config(&self) -> Result<StrategyConfig> {
        self.validate()?;

        let cap = self
            .allocation
            .capped_sector
            .as_deref()
            .map(str::trim)
            .filter(|sector| !sector.is_empty())
            .map(|sector| SectorCap::new(sector, self.allocation.sector_cap));

        let optimizer = OptimizerConfig {
            passes: self.optimizer.passes,
            max_iterations: self.optimizer.max_iterations,
            tolerance: self.optimizer.tolerance,
            step: self.optimizer.step,
            timeout: self.optimizer.timeout_ms.map(Duration::from_millis),
            risk_free_rate: self.run.risk_free_rate,
        };

        Ok(StrategyConfig {
            capital: self.run.capital,
            target_count: self.run.target_count,
            risk_free_rate: self.run.risk_free_rate,
            seed: self.run.seed,
            parallel: self.run.parallel,
            show_progress: false,
            lookback: self.ranking.lookback_days,
            cap,
            window: self.optimizer.window_days,
            optimizer,
        })
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Sharpefolio run configuration

[run]
capital = 700000.0
target_count = 100
risk_free_rate = 0.04
seed = 42
parallel = true

[ranking]
lookback_days = 100     # trailing observations used to score instruments

[allocation]
capped_sector = "Telecommunication Services"
sector_cap = 4

[optimizer]
window_days = 21
passes = 2
max_iterations = 500
tolerance = 1e-9
step = 0.05
timeout_ms = 5000

[data]
prices_dir = "data/prices"
reference = "data/reference.csv"
# date_format = "%Y-%m-%d"
delimiter = ","

[[universe]]
name = "SPTSX"
location = "CA"
exclude = ["MTL", "IAG"]   # constant price, stale listing

[[universe]]
name = "SPX"
location = "US"
exclude = ["T", "NLSN", "TWTR", "CTXS"]
"#
        .to_string()
    }
}
