//! Sector-relative ranking by trailing Sharpe ratio.
//!
//! Every member of a sector is scored on its trailing window. Only strictly
//! positive scores survive; they are ordered best first with ties broken by
//! symbol so repeated runs give identical lists. Instruments that cannot be
//! scored (failed fetch, NaN data, flat prices) are excluded and reported,
//! never retried.

use crate::data::PriceProvider;
use crate::error::AllocError;
use crate::metrics::{self, DEFAULT_RISK_FREE_RATE};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Default trailing window for ranking, in trading days.
pub const DEFAULT_LOOKBACK: usize = 100;

/// A retained instrument and its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedInstrument {
    pub symbol: String,
    pub sharpe: f64,
}

/// Why an instrument did not make it into its sector ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExclusionReason {
    /// The provider reported a failed or incomplete history.
    FetchFailed,
    /// Prices never moved, so the Sharpe ratio is undefined.
    ZeroVolatility,
    /// Too few observations to compute a volatility.
    InsufficientData,
    /// Any other metric failure.
    DataQuality(String),
    /// Scored fine but not above zero.
    NonPositiveSharpe(f64),
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::FetchFailed => write!(f, "fetch failed"),
            ExclusionReason::ZeroVolatility => write!(f, "zero volatility"),
            ExclusionReason::InsufficientData => write!(f, "insufficient data"),
            ExclusionReason::DataQuality(reason) => write!(f, "data quality: {}", reason),
            ExclusionReason::NonPositiveSharpe(s) => write!(f, "non-positive sharpe {:.3}", s),
        }
    }
}

/// An instrument dropped during ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub symbol: String,
    pub sector: String,
    pub reason: ExclusionReason,
}

/// Ranked members of one sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorRanking {
    pub sector: String,
    /// Retained instruments, best Sharpe first.
    pub ranked: Vec<RankedInstrument>,
    /// Mean Sharpe of the retained members; `None` when nothing was retained.
    pub mean_sharpe: Option<f64>,
}

impl SectorRanking {
    /// Order instruments best first and compute the sector mean.
    pub fn from_scores(sector: impl Into<String>, mut ranked: Vec<RankedInstrument>) -> Self {
        ranked.sort_by(|a, b| {
            b.sharpe
                .total_cmp(&a.sharpe)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        let mean_sharpe = if ranked.is_empty() {
            None
        } else {
            Some(ranked.iter().map(|r| r.sharpe).sum::<f64>() / ranked.len() as f64)
        };
        Self {
            sector: sector.into(),
            ranked,
            mean_sharpe,
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.ranked.iter().map(|r| r.symbol.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

/// Rankings for every sector plus the exclusions found along the way.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingOutcome {
    pub sectors: BTreeMap<String, SectorRanking>,
    pub exclusions: Vec<Exclusion>,
}

impl RankingOutcome {
    /// Mean Sharpe per sector, `None` for sectors without retained members.
    pub fn mean_sharpes(&self) -> BTreeMap<String, Option<f64>> {
        self.sectors
            .iter()
            .map(|(sector, ranking)| (sector.clone(), ranking.mean_sharpe))
            .collect()
    }

    /// Sectors flagged for special handling because nothing survived ranking.
    pub fn empty_sectors(&self) -> Vec<String> {
        self.sectors
            .values()
            .filter(|r| r.is_empty())
            .map(|r| r.sector.clone())
            .collect()
    }
}

/// Scores instruments on a trailing window and ranks them within sectors.
#[derive(Debug, Clone)]
pub struct SectorRanker {
    lookback: usize,
    risk_free_rate: f64,
    parallel: bool,
    show_progress: bool,
}

impl Default for SectorRanker {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKBACK)
    }
}

impl SectorRanker {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            parallel: true,
            show_progress: false,
        }
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Trailing Sharpe of one instrument, or the reason it cannot be scored.
    pub fn score(&self, provider: &dyn PriceProvider, symbol: &str) -> Result<f64, ExclusionReason> {
        let series = provider
            .history(symbol, self.lookback)
            .into_series()
            .map_err(|_| ExclusionReason::FetchFailed)?;
        let prices = series.closes();

        match metrics::annualized_volatility(&prices) {
            Ok(vol) if vol == 0.0 => return Err(ExclusionReason::ZeroVolatility),
            Ok(_) => {}
            Err(AllocError::InsufficientData { .. }) => return Err(ExclusionReason::InsufficientData),
            Err(e) => return Err(ExclusionReason::DataQuality(e.to_string())),
        }

        metrics::sharpe(&prices, self.risk_free_rate)
            .map_err(|e| ExclusionReason::DataQuality(metrics::label_error(e, symbol).to_string()))
    }

    /// Rank the members of a single sector.
    pub fn rank_sector(
        &self,
        provider: &dyn PriceProvider,
        sector: &str,
        members: &[String],
    ) -> (SectorRanking, Vec<Exclusion>) {
        let scores: Vec<(String, Result<f64, ExclusionReason>)> = if self.parallel {
            members
                .par_iter()
                .map(|symbol| (symbol.clone(), self.score(provider, symbol)))
                .collect()
        } else {
            members
                .iter()
                .map(|symbol| (symbol.clone(), self.score(provider, symbol)))
                .collect()
        };

        let mut retained = Vec::new();
        let mut exclusions = Vec::new();
        for (symbol, score) in scores {
            let reason = match score {
                Ok(sharpe) if sharpe > 0.0 => {
                    debug!("{}/{}: sharpe {:.3}", sector, symbol, sharpe);
                    retained.push(RankedInstrument { symbol, sharpe });
                    continue;
                }
                Ok(sharpe) => ExclusionReason::NonPositiveSharpe(sharpe),
                Err(reason) => {
                    if reason != ExclusionReason::FetchFailed {
                        warn!("{}/{}: excluded ({})", sector, symbol, reason);
                    }
                    reason
                }
            };
            exclusions.push(Exclusion {
                symbol,
                sector: sector.to_string(),
                reason,
            });
        }

        let ranking = SectorRanking::from_scores(sector, retained);
        match ranking.mean_sharpe {
            Some(mean) => info!(
                "{}: retained {}/{} instruments, mean sharpe {:.3}",
                sector,
                ranking.len(),
                members.len(),
                mean
            ),
            None => warn!("{}: no instrument with positive sharpe", sector),
        }
        (ranking, exclusions)
    }

    /// Rank every sector. Sectors are visited in key order.
    pub fn rank(
        &self,
        provider: &dyn PriceProvider,
        sectors: &BTreeMap<String, Vec<String>>,
    ) -> RankingOutcome {
        let progress = if self.show_progress {
            let pb = ProgressBar::new(sectors.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut outcome = RankingOutcome::default();
        for (sector, members) in sectors {
            if let Some(pb) = &progress {
                pb.set_message(sector.clone());
            }
            let (ranking, exclusions) = self.rank_sector(provider, sector, members);
            outcome.sectors.insert(sector.clone(), ranking);
            outcome.exclusions.extend(exclusions);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryProvider;
    use crate::types::PriceSeries;
    use chrono::NaiveDate;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn trending(symbol: &str, drift: f64, days: usize) -> PriceSeries {
        let closes: Vec<f64> = (0..days)
            .map(|i| {
                let t = i as f64;
                100.0 * (1.0 + drift).powf(t) + (t * 0.9).sin()
            })
            .collect();
        PriceSeries::from_closes(symbol, start(), &closes)
    }

    #[test]
    fn test_from_scores_orders_and_breaks_ties_by_symbol() {
        let ranking = SectorRanking::from_scores(
            "Energy",
            vec![
                RankedInstrument { symbol: "B".into(), sharpe: 1.0 },
                RankedInstrument { symbol: "C".into(), sharpe: 2.0 },
                RankedInstrument { symbol: "A".into(), sharpe: 1.0 },
            ],
        );
        assert_eq!(ranking.symbols(), vec!["C", "A", "B"]);
        assert!((ranking.mean_sharpe.unwrap() - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_sector_has_no_mean() {
        let ranking = SectorRanking::from_scores("Utilities", vec![]);
        assert!(ranking.mean_sharpe.is_none());
    }

    #[test]
    fn test_rank_sector_filters_and_records_exclusions() {
        let provider = InMemoryProvider::new()
            .with_series(trending("UP", 0.004, 120))
            .with_series(trending("DOWN", -0.004, 120))
            .with_series(PriceSeries::from_closes("FLAT", start(), &[25.0; 120]));
        let members = vec![
            "UP".to_string(),
            "DOWN".to_string(),
            "FLAT".to_string(),
            "MISSING".to_string(),
        ];

        let ranker = SectorRanker::new(100).with_parallel(false);
        let (ranking, exclusions) = ranker.rank_sector(&provider, "Energy", &members);

        assert_eq!(ranking.symbols(), vec!["UP"]);
        assert_eq!(exclusions.len(), 3);
        let reason_for = |s: &str| {
            exclusions
                .iter()
                .find(|e| e.symbol == s)
                .map(|e| e.reason.clone())
                .unwrap()
        };
        assert_eq!(reason_for("FLAT"), ExclusionReason::ZeroVolatility);
        assert_eq!(reason_for("MISSING"), ExclusionReason::FetchFailed);
        assert!(matches!(reason_for("DOWN"), ExclusionReason::NonPositiveSharpe(_)));
    }

    #[test]
    fn test_rank_keeps_empty_sectors() {
        let provider = InMemoryProvider::new().with_series(trending("UP", 0.004, 120));
        let mut sectors = BTreeMap::new();
        sectors.insert("Energy".to_string(), vec!["UP".to_string()]);
        sectors.insert("Utilities".to_string(), vec!["GONE".to_string()]);

        let outcome = SectorRanker::new(100).rank(&provider, &sectors);
        assert_eq!(outcome.sectors.len(), 2);
        assert_eq!(outcome.empty_sectors(), vec!["Utilities".to_string()]);
        assert!(outcome.mean_sharpes()["Utilities"].is_none());
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let provider = InMemoryProvider::new()
            .with_series(trending("A", 0.003, 150))
            .with_series(trending("B", 0.005, 150))
            .with_series(trending("C", 0.002, 150));
        let members: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();

        let (seq, _) = SectorRanker::new(100)
            .with_parallel(false)
            .rank_sector(&provider, "X", &members);
        let (par, _) = SectorRanker::new(100)
            .with_parallel(true)
            .rank_sector(&provider, "X", &members);
        assert_eq!(seq, par);
    }
}
