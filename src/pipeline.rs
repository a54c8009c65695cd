//! The four-stage strategy: Rank, Allocate, Reconcile, Optimize.
//!
//! Each stage consumes the full output of the previous one. Only input and
//! configuration errors abort a run; instrument and sector failures become
//! exclusions or diagnostics.

use crate::allocator::{Allocation, CapitalAllocator, SectorCap};
use crate::data::{PriceMatrix, PriceProvider};
use crate::error::Result;
use crate::optimizer::{FallbackReason, OptimizerConfig, SectorOptimization, WeightOptimizer};
use crate::ranker::{Exclusion, ExclusionReason, RankingOutcome, SectorRanker, DEFAULT_LOOKBACK};
use crate::reconciler::{reconcile, Reconciliation, SectorTarget};
use crate::types::{Holding, HoldingEntry};
use crate::universe::ReferenceData;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

/// Default optimization window, in trading days.
pub const DEFAULT_WINDOW: usize = 21;

/// Everything the pipeline needs besides reference data and prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub capital: f64,
    pub target_count: usize,
    pub risk_free_rate: f64,
    /// Seed for the surplus redistribution. A random seed is drawn and
    /// recorded when unset.
    pub seed: Option<u64>,
    pub parallel: bool,
    pub show_progress: bool,
    pub lookback: usize,
    pub cap: Option<SectorCap>,
    pub window: usize,
    pub optimizer: OptimizerConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let optimizer = OptimizerConfig::default();
        Self {
            capital: 700_000.0,
            target_count: 100,
            risk_free_rate: optimizer.risk_free_rate,
            seed: None,
            parallel: true,
            show_progress: false,
            lookback: DEFAULT_LOOKBACK,
            cap: Some(SectorCap::new("Telecommunication Services", 4)),
            window: DEFAULT_WINDOW,
            optimizer,
        }
    }
}

/// Per-sector telemetry for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorDiagnostic {
    pub sector: String,
    pub mean_sharpe: Option<f64>,
    pub count: usize,
    pub budget: f64,
    pub continuous_sharpe: Option<f64>,
    pub realized_sharpe: Option<f64>,
    pub fallback: Option<FallbackReason>,
    /// Instruments whose rounded quantity was zero.
    pub dropped: Vec<String>,
    /// Set when the sector could not be optimized at all.
    pub error: Option<String>,
}

/// Complete output of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyReport {
    pub holding: Holding,
    pub diagnostics: Vec<SectorDiagnostic>,
    pub exclusions: Vec<Exclusion>,
    pub allocation: Allocation,
    pub seed: u64,
}

impl StrategyReport {
    pub fn diagnostic(&self, sector: &str) -> Option<&SectorDiagnostic> {
        self.diagnostics.iter().find(|d| d.sector == sector)
    }
}

/// Sector Sharpe strategy over a fixed universe.
#[derive(Debug, Clone, Default)]
pub struct SharpeMaxStrategy {
    config: StrategyConfig,
}

impl SharpeMaxStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn optimizer(&self) -> WeightOptimizer {
        let mut config = self.config.optimizer.clone();
        config.risk_free_rate = self.config.risk_free_rate;
        WeightOptimizer::new(config)
    }

    /// Stage 1: rank every sector of the reference data.
    pub fn rank(&self, reference: &ReferenceData, provider: &dyn PriceProvider) -> RankingOutcome {
        SectorRanker::new(self.config.lookback)
            .with_risk_free_rate(self.config.risk_free_rate)
            .with_parallel(self.config.parallel)
            .with_progress(self.config.show_progress)
            .rank(provider, &reference.by_sector())
    }

    /// Stage 2: quotas and budgets from the sector means.
    pub fn allocate(&self, ranking: &RankingOutcome, seed: u64) -> Result<Allocation> {
        let mut allocator = CapitalAllocator::new(self.config.target_count, self.config.capital);
        if let Some(cap) = &self.config.cap {
            allocator = allocator.with_cap(cap.clone());
        }
        let mut rng = StdRng::seed_from_u64(seed);
        allocator.allocate(&ranking.mean_sharpes(), &mut rng)
    }

    /// Stage 3: clip ranked lists to their quotas.
    pub fn reconcile(&self, ranking: &RankingOutcome, allocation: &Allocation) -> Reconciliation {
        reconcile(&ranking.sectors, allocation, self.config.capital)
    }

    /// Stage 4 for one sector.
    pub fn optimize_sector(
        &self,
        target: &SectorTarget,
        provider: &dyn PriceProvider,
    ) -> (Result<SectorOptimization>, Vec<String>) {
        let collection = PriceMatrix::collect(provider, &target.symbols, self.config.window);
        let result = self.optimizer().optimize(&target.sector, &collection.matrix, target.budget);
        (result, collection.failed)
    }

    /// Run all four stages.
    pub fn run(&self, reference: &ReferenceData, provider: &dyn PriceProvider) -> Result<StrategyReport> {
        let seed = self.config.seed.unwrap_or_else(rand::random);
        info!(
            "Running strategy over {} instruments (capital {:.2}, target {}, seed {})",
            reference.len(),
            self.config.capital,
            self.config.target_count,
            seed
        );

        let started = Instant::now();
        let ranking = self.rank(reference, provider);
        info!("Rank stage finished in {:?}", started.elapsed());

        let started = Instant::now();
        let allocation = self.allocate(&ranking, seed)?;
        info!("Allocate stage finished in {:?}", started.elapsed());

        let started = Instant::now();
        let reconciliation = self.reconcile(&ranking, &allocation);
        info!("Reconcile stage finished in {:?}", started.elapsed());

        let started = Instant::now();
        let targets: Vec<&SectorTarget> = reconciliation
            .targets
            .values()
            .filter(|t| t.count > 0)
            .collect();
        let outcomes: Vec<(&SectorTarget, (Result<SectorOptimization>, Vec<String>))> = if self.config.parallel {
            targets
                .par_iter()
                .map(|t| (*t, self.optimize_sector(t, provider)))
                .collect()
        } else {
            targets
                .iter()
                .map(|t| (*t, self.optimize_sector(t, provider)))
                .collect()
        };
        info!("Optimize stage finished in {:?}", started.elapsed());

        let mut exclusions = ranking.exclusions.clone();
        let mut optimized: BTreeMap<String, Result<SectorOptimization>> = BTreeMap::new();
        for (target, (result, failed)) in outcomes {
            exclusions.extend(failed.into_iter().map(|symbol| Exclusion {
                symbol,
                sector: target.sector.clone(),
                reason: ExclusionReason::FetchFailed,
            }));
            optimized.insert(target.sector.clone(), result);
        }

        let mut entries = Vec::new();
        let mut diagnostics = Vec::new();
        for target in reconciliation.targets.values() {
            let mean_sharpe = ranking.sectors.get(&target.sector).and_then(|r| r.mean_sharpe);
            let mut diagnostic = SectorDiagnostic {
                sector: target.sector.clone(),
                mean_sharpe,
                count: target.count,
                budget: target.budget,
                continuous_sharpe: None,
                realized_sharpe: None,
                fallback: None,
                dropped: Vec::new(),
                error: None,
            };

            match optimized.remove(&target.sector) {
                Some(Ok(result)) => {
                    for (symbol, quantity) in result.positions() {
                        entries.push(HoldingEntry {
                            symbol: symbol.to_string(),
                            quantity,
                            location: reference.location(symbol).unwrap_or_default().to_string(),
                            sector: target.sector.clone(),
                        });
                    }
                    diagnostic.dropped = result.dropped().into_iter().map(String::from).collect();
                    diagnostic.continuous_sharpe = result.continuous_sharpe;
                    diagnostic.realized_sharpe = result.realized_sharpe;
                    diagnostic.fallback = result.fallback;
                }
                Some(Err(e)) => {
                    warn!("{}: optimization failed: {}", target.sector, e);
                    diagnostic.error = Some(e.to_string());
                }
                None => {}
            }
            diagnostics.push(diagnostic);
        }

        let holding = Holding::from_entries(entries);
        info!(
            "Strategy produced {} positions across {} sectors",
            holding.len(),
            diagnostics.iter().filter(|d| d.count > 0).count()
        );

        Ok(StrategyReport {
            holding,
            diagnostics,
            exclusions,
            allocation: reconciliation.allocation,
            seed,
        })
    }
}
