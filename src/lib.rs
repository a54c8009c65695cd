//! Sharpefolio - sector-diversified, Sharpe-maximizing portfolio construction.
//!
//! # Overview
//!
//! Given a universe of instruments partitioned into sectors, a price history
//! source and an amount of capital, Sharpefolio produces an integer-share
//! holding in four strictly ordered stages:
//!
//! 1. **Rank**: score every instrument by trailing Sharpe ratio and keep the
//!    positive ones, best first, within each sector.
//! 2. **Allocate**: split a target instrument count across sectors in
//!    proportion to their mean Sharpe, cap one designated sector and hand its
//!    surplus to the others with a seeded random draw.
//! 3. **Reconcile**: clip each ranked list to its quota, lowering quotas that
//!    exceed the eligible names, and spread capital by the final counts.
//! 4. **Optimize**: per sector, find long-only weights maximizing the basket
//!    Sharpe ratio and round them to share counts.
//!
//! # Quick Start
//!
//! ```no_run
//! use sharpefolio::{
//!     data::CsvDirectoryProvider,
//!     pipeline::{SharpeMaxStrategy, StrategyConfig},
//!     universe::{ReferenceData, UniverseSpec},
//! };
//!
//! let universes = vec![UniverseSpec::new("SPX", "US").with_exclusions(["T"])];
//! let reference = ReferenceData::load_csv("data/reference.csv", &universes).unwrap();
//! let provider = CsvDirectoryProvider::new("data/prices");
//!
//! let config = StrategyConfig {
//!     capital: 100_000.0,
//!     target_count: 20,
//!     seed: Some(42),
//!     ..Default::default()
//! };
//! let report = SharpeMaxStrategy::new(config).run(&reference, &provider).unwrap();
//!
//! for entry in report.holding.entries() {
//!     println!("{} {} {}", entry.symbol, entry.quantity, entry.location);
//! }
//! ```
//!
//! # Modules
//!
//! - [`metrics`]: annualized return, volatility, Sharpe, Sortino, drawdown, Calmar
//! - [`data`]: price provider contract, CSV loading, date-aligned price matrices
//! - [`universe`]: reference data (sector and location per instrument)
//! - [`ranker`]: sector-relative Sharpe ranking
//! - [`allocator`]: sector quotas, sector cap and budgets
//! - [`reconciler`]: quota clipping against available instruments
//! - [`optimizer`]: per-sector Sharpe-maximizing weights and share counts
//! - [`pipeline`]: the four stages wired together
//! - [`config`]: TOML configuration file support
//! - [`export`], [`report`], [`metadata`]: run outputs

pub mod allocator;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod metadata;
pub mod metrics;
pub mod optimizer;
pub mod pipeline;
pub mod ranker;
pub mod reconciler;
pub mod report;
pub mod types;
pub mod universe;

pub use allocator::{Allocation, CapitalAllocator, SectorCap};
pub use data::{CsvDirectoryProvider, InMemoryProvider, PriceFetch, PriceMatrix, PriceProvider};
pub use error::{AllocError, Result};
pub use metrics::RiskReport;
pub use optimizer::{FallbackReason, OptimizerConfig, SectorOptimization, WeightOptimizer};
pub use pipeline::{SectorDiagnostic, SharpeMaxStrategy, StrategyConfig, StrategyReport};
pub use ranker::{RankingOutcome, SectorRanker, SectorRanking};
pub use reconciler::{reconcile, Reconciliation, SectorTarget};
pub use types::{Holding, HoldingEntry, InstrumentRecord, PriceSeries, Side};
pub use universe::{ReferenceData, UniverseSpec};
