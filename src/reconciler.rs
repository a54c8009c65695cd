//! Reconcile sector quotas with the instruments actually available.

use crate::allocator::Allocation;
use crate::ranker::SectorRanking;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Final instrument list and money for one sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorTarget {
    pub sector: String,
    /// Best-ranked instruments, at most `count` of them.
    pub symbols: Vec<String>,
    pub count: usize,
    pub budget: f64,
    /// Original quota when it had to be lowered to the available count.
    pub lowered_from: Option<usize>,
}

/// Output of the reconcile stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciliation {
    pub targets: BTreeMap<String, SectorTarget>,
    /// Allocation recomputed over the adjusted counts.
    pub allocation: Allocation,
}

impl Reconciliation {
    pub fn target(&self, sector: &str) -> Option<&SectorTarget> {
        self.targets.get(sector)
    }

    pub fn total_count(&self) -> usize {
        self.allocation.total_count()
    }

    /// Sectors whose quota exceeded their eligible instruments.
    pub fn lowered_sectors(&self) -> Vec<&SectorTarget> {
        self.targets.values().filter(|t| t.lowered_from.is_some()).collect()
    }
}

/// Clip each ranked list to its quota, or lower the quota to the list length
/// when the sector is short of eligible names, then renormalize budgets once.
pub fn reconcile(
    rankings: &BTreeMap<String, SectorRanking>,
    allocation: &Allocation,
    capital: f64,
) -> Reconciliation {
    let mut counts = BTreeMap::new();
    let mut picks: BTreeMap<String, (Vec<String>, Option<usize>)> = BTreeMap::new();

    let sectors = rankings
        .keys()
        .chain(allocation.iter().map(|(s, _)| s))
        .cloned()
        .collect::<BTreeSet<String>>();

    for sector in sectors {
        let quota = allocation.count(&sector);
        let ranked = rankings.get(&sector).map(|r| r.symbols()).unwrap_or_default();

        let (symbols, count, lowered_from) = if quota <= ranked.len() {
            (ranked[..quota].to_vec(), quota, None)
        } else {
            warn!(
                "{}: quota {} exceeds {} eligible instruments, lowering",
                sector,
                quota,
                ranked.len()
            );
            let available = ranked.len();
            (ranked, available, Some(quota))
        };

        counts.insert(sector.clone(), count);
        picks.insert(sector, (symbols, lowered_from));
    }

    let allocation = Allocation::from_counts(&counts, capital);
    let targets = picks
        .into_iter()
        .map(|(sector, (symbols, lowered_from))| {
            let target = SectorTarget {
                count: allocation.count(&sector),
                budget: allocation.budget(&sector),
                sector: sector.clone(),
                symbols,
                lowered_from,
            };
            (sector, target)
        })
        .collect();

    info!(
        "Reconciled {} instruments across {} sectors",
        allocation.total_count(),
        allocation.len()
    );
    Reconciliation {
        targets,
        allocation,
    }
}
