//! Sector quotas and budgets from mean Sharpe scores.
//!
//! Counts are proportional to each sector's mean Sharpe and rounded half to
//! even. One sector may be capped; the slots it gives up are handed out one at
//! a time to uniformly drawn other sectors, so the total count is unchanged.
//! Budgets are always proportional to the final counts.

use crate::error::{AllocError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Upper bound on the instrument count of one designated sector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorCap {
    pub sector: String,
    pub max_count: usize,
}

impl SectorCap {
    pub fn new(sector: impl Into<String>, max_count: usize) -> Self {
        Self {
            sector: sector.into(),
            max_count,
        }
    }
}

/// Quota and money assigned to one sector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorAllocation {
    pub count: usize,
    pub budget: f64,
}

/// Per-sector quotas and budgets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    sectors: BTreeMap<String, SectorAllocation>,
}

impl Allocation {
    /// Spread `capital` over sectors in proportion to their counts.
    ///
    /// When every count is zero all budgets are zero.
    pub fn from_counts(counts: &BTreeMap<String, usize>, capital: f64) -> Self {
        let total: usize = counts.values().sum();
        let sectors = counts
            .iter()
            .map(|(sector, &count)| {
                let budget = if total == 0 {
                    0.0
                } else {
                    capital * count as f64 / total as f64
                };
                (sector.clone(), SectorAllocation { count, budget })
            })
            .collect();
        Self { sectors }
    }

    pub fn get(&self, sector: &str) -> Option<&SectorAllocation> {
        self.sectors.get(sector)
    }

    pub fn count(&self, sector: &str) -> usize {
        self.sectors.get(sector).map(|a| a.count).unwrap_or(0)
    }

    pub fn budget(&self, sector: &str) -> f64 {
        self.sectors.get(sector).map(|a| a.budget).unwrap_or(0.0)
    }

    pub fn total_count(&self) -> usize {
        self.sectors.values().map(|a| a.count).sum()
    }

    pub fn total_budget(&self) -> f64 {
        self.sectors.values().map(|a| a.budget).sum()
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.sectors
            .iter()
            .map(|(sector, a)| (sector.clone(), a.count))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SectorAllocation)> {
        self.sectors.iter()
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}

/// Turns mean Sharpe scores into per-sector quotas and budgets.
#[derive(Debug, Clone)]
pub struct CapitalAllocator {
    target_count: usize,
    capital: f64,
    cap: Option<SectorCap>,
}

impl CapitalAllocator {
    pub fn new(target_count: usize, capital: f64) -> Self {
        Self {
            target_count,
            capital,
            cap: None,
        }
    }

    pub fn with_cap(mut self, cap: SectorCap) -> Self {
        self.cap = Some(cap);
        self
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    /// `round(N * mean / sum(mean))` per sector; undefined means get zero and
    /// do not enter the sum.
    pub fn raw_counts(&self, mean_sharpes: &BTreeMap<String, Option<f64>>) -> BTreeMap<String, usize> {
        let defined = |m: &Option<f64>| m.filter(|v| v.is_finite());
        let total: f64 = mean_sharpes.values().filter_map(defined).sum();

        mean_sharpes
            .iter()
            .map(|(sector, mean)| {
                let count = match defined(mean) {
                    Some(m) if total > 0.0 => {
                        let share = self.target_count as f64 * m / total;
                        share.round_ties_even().max(0.0) as usize
                    }
                    _ => 0,
                };
                (sector.clone(), count)
            })
            .collect()
    }

    /// Enforce the sector cap in place, returning how many slots were moved.
    ///
    /// Recipients are the other sectors with a defined mean, drawn uniformly
    /// with replacement. Without any recipient the surplus is dropped.
    pub fn apply_cap<R: Rng + ?Sized>(
        &self,
        counts: &mut BTreeMap<String, usize>,
        mean_sharpes: &BTreeMap<String, Option<f64>>,
        rng: &mut R,
    ) -> usize {
        let Some(cap) = &self.cap else {
            return 0;
        };
        let current = counts.get(&cap.sector).copied().unwrap_or(0);
        if current <= cap.max_count {
            return 0;
        }
        let surplus = current - cap.max_count;
        counts.insert(cap.sector.clone(), cap.max_count);

        let recipients: Vec<String> = mean_sharpes
            .iter()
            .filter(|(sector, mean)| {
                **sector != cap.sector && mean.map(|m| m.is_finite()).unwrap_or(false)
            })
            .map(|(sector, _)| sector.clone())
            .collect();
        if recipients.is_empty() {
            warn!(
                "{} capped at {} but no other sector can take {} slots",
                cap.sector, cap.max_count, surplus
            );
            return 0;
        }

        for _ in 0..surplus {
            let pick = &recipients[rng.gen_range(0..recipients.len())];
            *counts.entry(pick.clone()).or_insert(0) += 1;
            debug!("Surplus slot from {} moved to {}", cap.sector, pick);
        }
        info!(
            "{} capped at {}, redistributed {} slots",
            cap.sector, cap.max_count, surplus
        );
        surplus
    }

    /// Counts, cap redistribution and budgets in one pass.
    pub fn allocate<R: Rng + ?Sized>(
        &self,
        mean_sharpes: &BTreeMap<String, Option<f64>>,
        rng: &mut R,
    ) -> Result<Allocation> {
        if !self.capital.is_finite() || self.capital <= 0.0 {
            return Err(AllocError::InvalidInput(format!(
                "capital must be positive, got {}",
                self.capital
            )));
        }
        if self.target_count == 0 {
            return Err(AllocError::InvalidInput(
                "target instrument count must be at least 1".to_string(),
            ));
        }

        let mut counts = self.raw_counts(mean_sharpes);
        self.apply_cap(&mut counts, mean_sharpes, rng);
        let allocation = Allocation::from_counts(&counts, self.capital);
        info!(
            "Allocated {} instruments over {} sectors",
            allocation.total_count(),
            allocation.len()
        );
        Ok(allocation)
    }
}
