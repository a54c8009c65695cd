//! Per-sector Sharpe-maximizing weights and their integer share counts.
//!
//! The objective is the Sharpe ratio of the basket valuation `prices · w`,
//! searched over the long-only simplex (`w_i` in [0, 1], `sum(w) == 1`) with
//! projected gradient ascent. Gradients are central finite differences, so
//! the objective stays a black box built from [`metrics::sharpe`].
//!
//! Sectors are optimized independently. A solve that times out, produces
//! non-finite values or has no defined objective falls back to equal weights;
//! the reason is kept in [`SectorOptimization::fallback`].

use crate::data::PriceMatrix;
use crate::error::{AllocError, Result};
use crate::metrics::{self, DEFAULT_RISK_FREE_RATE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const FD_STEP: f64 = 1e-6;
const MIN_STEP: f64 = 1e-12;

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Sequential solves, each seeded with the previous result.
    pub passes: usize,
    /// Ascent iterations per pass.
    pub max_iterations: usize,
    /// Stop when the gradient norm or the objective gain falls below this.
    pub tolerance: f64,
    /// Initial step length of each line search.
    pub step: f64,
    /// Wall-clock bound for one sector's solve.
    pub timeout: Option<Duration>,
    pub risk_free_rate: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            passes: 2,
            max_iterations: 500,
            tolerance: 1e-9,
            step: 0.05,
            timeout: Some(Duration::from_secs(5)),
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
        }
    }
}

/// Why a sector ended up on equal weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackReason {
    Timeout,
    NonFinite,
    /// The Sharpe ratio of the starting basket is undefined.
    UndefinedObjective,
    Degenerate,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FallbackReason::Timeout => "timeout",
            FallbackReason::NonFinite => "non-finite objective",
            FallbackReason::UndefinedObjective => "undefined objective",
            FallbackReason::Degenerate => "degenerate weights",
        };
        f.write_str(text)
    }
}

/// Result of optimizing one sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorOptimization {
    pub sector: String,
    pub symbols: Vec<String>,
    pub weights: Vec<f64>,
    /// Rounded share counts, aligned with `symbols`. May contain zeros.
    pub quantities: Vec<i64>,
    /// `last_row · weights`.
    pub basket_price: f64,
    pub continuous_sharpe: Option<f64>,
    /// Sharpe of the basket actually bought, after rounding.
    pub realized_sharpe: Option<f64>,
    pub fallback: Option<FallbackReason>,
    pub iterations: usize,
}

impl SectorOptimization {
    /// Non-zero positions only.
    pub fn positions(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.symbols
            .iter()
            .zip(&self.quantities)
            .filter(|(_, q)| **q != 0)
            .map(|(s, &q)| (s.as_str(), q))
    }

    /// Symbols whose rounded quantity came out as zero.
    pub fn dropped(&self) -> Vec<&str> {
        self.symbols
            .iter()
            .zip(&self.quantities)
            .filter(|(_, q)| **q == 0)
            .map(|(s, _)| s.as_str())
            .collect()
    }
}

/// `1/k` for each of `k` instruments.
pub fn equal_weights(k: usize) -> Vec<f64> {
    if k == 0 {
        return vec![];
    }
    vec![1.0 / k as f64; k]
}

/// Euclidean projection onto `{w : w_i >= 0, sum(w) = 1}`.
pub fn project_simplex(v: &[f64]) -> Vec<f64> {
    if v.is_empty() {
        return vec![];
    }
    let mut sorted = v.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (i, &u) in sorted.iter().enumerate() {
        cumulative += u;
        let candidate = (cumulative - 1.0) / (i + 1) as f64;
        if u - candidate > 0.0 {
            theta = candidate;
        }
    }
    v.iter().map(|x| (x - theta).max(0.0)).collect()
}

/// Turn weights into share counts: `round(budget / basket_price * w)`.
///
/// Returns the basket price together with the quantities.
pub fn to_quantities(last_row: &[f64], weights: &[f64], budget: f64) -> Result<(f64, Vec<i64>)> {
    if last_row.len() != weights.len() {
        return Err(AllocError::InvalidInput(format!(
            "{} prices but {} weights",
            last_row.len(),
            weights.len()
        )));
    }
    let basket: f64 = last_row.iter().zip(weights).map(|(p, w)| p * w).sum();
    if !basket.is_finite() || basket <= 0.0 {
        return Err(AllocError::data_quality(
            "<basket>",
            format!("basket price {} is not positive", basket),
        ));
    }
    let quantities = weights
        .iter()
        .map(|w| (budget / basket * w).round_ties_even() as i64)
        .collect();
    Ok((basket, quantities))
}

struct PassOutcome {
    weights: Vec<f64>,
    value: f64,
    iterations: usize,
    failure: Option<FallbackReason>,
}

/// Projected-gradient Sharpe maximizer.
#[derive(Debug, Clone, Default)]
pub struct WeightOptimizer {
    config: OptimizerConfig,
}

impl WeightOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    fn objective(&self, rows: &[Vec<f64>], weights: &[f64]) -> Option<f64> {
        let series = metrics::weighted_series(rows, weights).ok()?;
        metrics::sharpe(&series, self.config.risk_free_rate).ok()
    }

    fn gradient(&self, rows: &[Vec<f64>], w: &[f64]) -> Option<Vec<f64>> {
        let mut grad = Vec::with_capacity(w.len());
        let mut shifted = w.to_vec();
        for i in 0..w.len() {
            shifted[i] = w[i] + FD_STEP;
            let up = self.objective(rows, &shifted)?;
            shifted[i] = w[i] - FD_STEP;
            let down = self.objective(rows, &shifted)?;
            shifted[i] = w[i];
            grad.push((up - down) / (2.0 * FD_STEP));
        }
        Some(grad)
    }

    fn ascend(
        &self,
        rows: &[Vec<f64>],
        start: Vec<f64>,
        start_value: f64,
        deadline: Option<Instant>,
    ) -> PassOutcome {
        let mut w = start;
        let mut value = start_value;
        let mut iterations = 0;

        for _ in 0..self.config.max_iterations {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return PassOutcome {
                    weights: w,
                    value,
                    iterations,
                    failure: Some(FallbackReason::Timeout),
                };
            }

            let grad = match self.gradient(rows, &w) {
                Some(g) if g.iter().all(|x| x.is_finite()) => g,
                _ => {
                    return PassOutcome {
                        weights: w,
                        value,
                        iterations,
                        failure: Some(FallbackReason::NonFinite),
                    }
                }
            };
            iterations += 1;
            let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
            if norm < self.config.tolerance {
                break;
            }

            // backtracking line search along the projected direction
            let mut step = self.config.step;
            let mut accepted = None;
            while step > MIN_STEP {
                let moved: Vec<f64> = w.iter().zip(&grad).map(|(x, g)| x + step * g).collect();
                let candidate = project_simplex(&moved);
                if let Some(v) = self.objective(rows, &candidate) {
                    if v.is_finite() && v > value {
                        accepted = Some((candidate, v));
                        break;
                    }
                }
                step *= 0.5;
            }

            let Some((candidate, v)) = accepted else {
                break;
            };
            let gain = v - value;
            w = candidate;
            value = v;
            if gain < self.config.tolerance {
                break;
            }
        }

        PassOutcome {
            weights: w,
            value,
            iterations,
            failure: None,
        }
    }

    /// Maximize the basket Sharpe starting from `w0`.
    ///
    /// Returns the weights, the continuous Sharpe, the total iteration count and
    /// the fallback reason if the result was replaced by equal weights.
    pub fn solve(
        &self,
        rows: &[Vec<f64>],
        w0: &[f64],
    ) -> (Vec<f64>, Option<f64>, usize, Option<FallbackReason>) {
        let k = w0.len();
        if k <= 1 {
            let weights = vec![1.0; k];
            let value = self.objective(rows, &weights);
            return (weights, value, 0, None);
        }

        let Some(start_value) = self.objective(rows, w0) else {
            return (equal_weights(k), None, 0, Some(FallbackReason::UndefinedObjective));
        };

        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let mut weights = w0.to_vec();
        let mut value = start_value;
        let mut iterations = 0;
        let mut failure = None;

        for pass in 0..self.config.passes.max(1) {
            let outcome = self.ascend(rows, weights.clone(), value, deadline);
            iterations += outcome.iterations;
            debug!(
                "pass {}: sharpe {:.4} after {} iterations",
                pass + 1,
                outcome.value,
                outcome.iterations
            );
            // the next pass restarts from the best iterate reached so far
            weights = outcome.weights;
            value = outcome.value;
            failure = outcome.failure;
            if failure == Some(FallbackReason::Timeout) {
                break;
            }
        }

        let total: f64 = weights.iter().sum();
        let valid = weights.iter().all(|w| w.is_finite() && (0.0..=1.0 + 1e-9).contains(w))
            && (total - 1.0).abs() < 1e-6;
        if failure.is_none() && !valid {
            failure = Some(FallbackReason::Degenerate);
        }

        match failure {
            Some(reason) => {
                let eq = equal_weights(k);
                let eq_value = self.objective(rows, &eq);
                (eq, eq_value, iterations, Some(reason))
            }
            None => (weights, Some(value), iterations, None),
        }
    }

    /// Optimize one sector and convert the weights into share counts.
    pub fn optimize(&self, sector: &str, matrix: &PriceMatrix, budget: f64) -> Result<SectorOptimization> {
        let k = matrix.n_cols();
        let last_row = matrix.last_row().filter(|_| k > 0).ok_or_else(|| {
            AllocError::OptimizationError(format!("{}: no instrument with a usable history", sector))
        })?;

        let (weights, continuous_sharpe, iterations, fallback) = self.solve(matrix.rows(), &equal_weights(k));
        if let Some(reason) = fallback {
            warn!("{}: optimizer fell back to equal weights ({})", sector, reason);
        }

        let (basket_price, quantities) = to_quantities(last_row, &weights, budget)
            .map_err(|e| metrics::label_error(e, sector))?;

        let held: Vec<f64> = quantities.iter().map(|&q| q as f64).collect();
        let realized_sharpe = if held.iter().all(|q| *q == 0.0) {
            None
        } else {
            metrics::weighted_series(matrix.rows(), &held)
                .ok()
                .and_then(|series| metrics::sharpe(&series, self.config.risk_free_rate).ok())
        };

        match realized_sharpe {
            Some(s) => info!(
                "{}: realized sharpe {:.3} (continuous {}) over {} instruments",
                sector,
                s,
                continuous_sharpe.map(|c| format!("{:.3}", c)).unwrap_or_else(|| "n/a".to_string()),
                k
            ),
            None => info!("{}: realized sharpe undefined", sector),
        }

        Ok(SectorOptimization {
            sector: sector.to_string(),
            symbols: matrix.symbols().to_vec(),
            weights,
            quantities,
            basket_price,
            continuous_sharpe,
            realized_sharpe,
            fallback,
            iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceSeries;
    use chrono::NaiveDate;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn wave(symbol: &str, drift: f64, phase: f64, days: usize) -> PriceSeries {
        let closes: Vec<f64> = (0..days)
            .map(|i| {
                let t = i as f64;
                50.0 + drift * t + 2.0 * (t * 0.7 + phase).sin()
            })
            .collect();
        PriceSeries::from_closes(symbol, start(), &closes)
    }

    fn assert_on_simplex(w: &[f64]) {
        assert!(w.iter().all(|x| *x >= 0.0 && *x <= 1.0 + 1e-12));
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_project_simplex() {
        let w = project_simplex(&[0.5, 0.5]);
        assert_eq!(w, vec![0.5, 0.5]);

        let w = project_simplex(&[2.0, 0.0, -1.0]);
        assert_on_simplex(&w);
        assert!((w[0] - 1.0).abs() < 1e-12);

        let w = project_simplex(&[0.2, 0.2, 0.2]);
        assert_on_simplex(&w);
        assert!((w[1] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_instrument_takes_everything() {
        let matrix = PriceMatrix::from_series(&[wave("A", 0.1, 0.0, 21)]);
        let result = WeightOptimizer::default().optimize("S", &matrix, 10_000.0).unwrap();
        assert_eq!(result.weights, vec![1.0]);
        let last = *matrix.last_row().unwrap().first().unwrap();
        assert_eq!(result.quantities, vec![(10_000.0 / last).round_ties_even() as i64]);
        assert!(result.fallback.is_none());
    }

    #[test]
    fn test_identical_series_terminates_on_simplex() {
        let matrix = PriceMatrix::from_series(&[
            wave("A", 0.2, 0.0, 21),
            wave("B", 0.2, 0.0, 21),
            wave("C", 0.2, 0.0, 21),
        ]);
        let result = WeightOptimizer::default().optimize("S", &matrix, 9_000.0).unwrap();
        assert_on_simplex(&result.weights);
        assert!(result.fallback.is_none());
    }

    #[test]
    fn test_zero_iterations_keeps_equal_weights() {
        let matrix = PriceMatrix::from_series(&[wave("A", 0.2, 0.0, 21), wave("B", 0.1, 1.3, 21)]);
        let config = OptimizerConfig {
            max_iterations: 0,
            ..OptimizerConfig::default()
        };
        let budget = 25_000.0;
        let result = WeightOptimizer::new(config).optimize("S", &matrix, budget).unwrap();
        assert_eq!(result.weights, vec![0.5, 0.5]);

        let last = matrix.last_row().unwrap();
        let basket = (last[0] + last[1]) * 0.5;
        let expected = (budget / basket / 2.0).round_ties_even() as i64;
        assert_eq!(result.quantities, vec![expected, expected]);
    }

    #[test]
    fn test_optimizer_improves_on_equal_weights() {
        let matrix = PriceMatrix::from_series(&[
            wave("GOOD", 0.4, 0.0, 30),
            wave("BAD", -0.1, 2.0, 30),
        ]);
        let optimizer = WeightOptimizer::default();
        let eq = equal_weights(2);
        let eq_value = optimizer.objective(matrix.rows(), &eq).unwrap();
        let (w, value, _, fallback) = optimizer.solve(matrix.rows(), &eq);
        assert!(fallback.is_none());
        assert_on_simplex(&w);
        assert!(value.unwrap() >= eq_value);
        assert!(w[0] > w[1]);
    }

    #[test]
    fn test_second_pass_continues_from_first() {
        let matrix = PriceMatrix::from_series(&[
            wave("GOOD", 0.4, 0.0, 30),
            wave("BAD", -0.1, 2.0, 30),
        ]);
        let config = |passes| OptimizerConfig {
            passes,
            max_iterations: 1,
            timeout: None,
            ..OptimizerConfig::default()
        };
        let single = WeightOptimizer::new(config(1));
        let double = WeightOptimizer::new(config(2));
        let eq = equal_weights(2);

        let (w1, s1, it1, fallback) = single.solve(matrix.rows(), &eq);
        assert!(fallback.is_none());
        assert_eq!(it1, 1);

        // a second single pass seeded with the first result
        let (w_next, s_next, it_next, _) = single.solve(matrix.rows(), &w1);
        let (w2, s2, it2, fallback) = double.solve(matrix.rows(), &eq);
        assert!(fallback.is_none());
        assert_eq!(w2, w_next);
        assert_eq!(s2, s_next);
        assert_eq!(it2, it1 + it_next);
        assert!(s2.unwrap() >= s1.unwrap());
    }

    #[test]
    fn test_timeout_falls_back_to_equal_weights() {
        let matrix = PriceMatrix::from_series(&[wave("A", 0.4, 0.0, 30), wave("B", -0.1, 2.0, 30)]);
        let config = OptimizerConfig {
            timeout: Some(Duration::ZERO),
            ..OptimizerConfig::default()
        };
        let result = WeightOptimizer::new(config).optimize("S", &matrix, 1_000.0).unwrap();
        assert_eq!(result.fallback, Some(FallbackReason::Timeout));
        assert_eq!(result.weights, vec![0.5, 0.5]);
    }

    #[test]
    fn test_flat_prices_fall_back() {
        let matrix = PriceMatrix::from_series(&[
            PriceSeries::from_closes("F", start(), &[10.0; 21]),
            PriceSeries::from_closes("G", start(), &[20.0; 21]),
        ]);
        let result = WeightOptimizer::default().optimize("S", &matrix, 1_000.0).unwrap();
        assert_eq!(result.fallback, Some(FallbackReason::UndefinedObjective));
        assert!(result.realized_sharpe.is_none());
    }

    #[test]
    fn test_small_budget_drops_zero_quantities() {
        let matrix = PriceMatrix::from_series(&[wave("A", 0.2, 0.0, 21), wave("B", 0.1, 1.3, 21)]);
        let config = OptimizerConfig {
            max_iterations: 0,
            ..OptimizerConfig::default()
        };
        let result = WeightOptimizer::new(config).optimize("S", &matrix, 10.0).unwrap();
        assert_eq!(result.positions().count(), 0);
        assert_eq!(result.dropped().len(), 2);
    }

    #[test]
    fn test_empty_matrix_is_an_error() {
        let matrix = PriceMatrix::from_series(&[]);
        assert!(WeightOptimizer::default().optimize("S", &matrix, 1.0).is_err());
    }
}
