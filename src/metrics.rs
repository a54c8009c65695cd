//! Risk and return metrics over adjusted close series.
//!
//! Every function works on a plain slice of prices so the same code scores a
//! single instrument and a synthetic portfolio valuation built with
//! [`weighted_series`]. Returns are simple period returns and all standard
//! deviations are sample deviations (n - 1).
//!
//! Ratios never leak infinities: a zero or undefined denominator surfaces as
//! [`AllocError::DataQuality`], which callers turn into an exclusion.

use crate::error::{AllocError, Result};
use serde::{Deserialize, Serialize};

/// Trading periods per year used for annualization.
pub const TRADING_DAYS: f64 = 252.0;

/// Annual risk-free rate applied when none is configured.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.04;

const UNNAMED: &str = "<series>";

fn quality(reason: impl Into<String>) -> AllocError {
    AllocError::data_quality(UNNAMED, reason)
}

/// Attach an instrument symbol to a metric error raised on an unnamed series.
pub fn label_error(err: AllocError, symbol: &str) -> AllocError {
    match err {
        AllocError::DataQuality { reason, .. } => AllocError::data_quality(symbol, reason),
        other => other,
    }
}

/// Simple period returns `p[t] / p[t-1] - 1`.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    if prices.len() < 2 {
        return vec![];
    }
    prices.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect()
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

/// Compounded annual growth rate: `(last / first)^(252 / n) - 1`.
///
/// `n` is the number of observations, not the number of returns.
pub fn annualized_return(prices: &[f64]) -> Result<f64> {
    let n = prices.len();
    if n <= 1 {
        return Err(AllocError::InsufficientData { needed: 2, got: n });
    }
    let first = prices[0];
    let last = prices[n - 1];
    if first == 0.0 || !first.is_finite() || !last.is_finite() {
        return Err(quality(format!("cannot compound from first value {}", first)));
    }
    Ok((last / first).powf(TRADING_DAYS / n as f64) - 1.0)
}

/// Sample standard deviation of simple returns, scaled by sqrt(252).
pub fn annualized_volatility(prices: &[f64]) -> Result<f64> {
    let returns = simple_returns(prices);
    let std = sample_std(&returns).ok_or(AllocError::InsufficientData {
        needed: 3,
        got: prices.len(),
    })?;
    if !std.is_finite() {
        return Err(quality("volatility is not finite"));
    }
    Ok(std * TRADING_DAYS.sqrt())
}

/// Sample standard deviation over the negative-return periods only.
///
/// Periods with a non-negative return are removed before the deviation is
/// taken, they are not clamped to zero. The value is not annualized.
pub fn downside_volatility(prices: &[f64]) -> Result<f64> {
    let negative: Vec<f64> = simple_returns(prices)
        .into_iter()
        .filter(|r| *r < 0.0)
        .collect();
    let std = sample_std(&negative)
        .ok_or_else(|| quality("fewer than two negative-return periods"))?;
    if !std.is_finite() {
        return Err(quality("downside volatility is not finite"));
    }
    Ok(std)
}

fn ratio_over(numerator: f64, denominator: f64, what: &str) -> Result<f64> {
    if denominator == 0.0 || !denominator.is_finite() {
        return Err(quality(format!("{} is zero or undefined", what)));
    }
    let ratio = numerator / denominator;
    if !ratio.is_finite() {
        return Err(quality(format!("ratio over {} is not finite", what)));
    }
    Ok(ratio)
}

/// `(annualized_return - risk_free) / annualized_volatility`.
pub fn sharpe(prices: &[f64], risk_free: f64) -> Result<f64> {
    let vol = annualized_volatility(prices)?;
    let ret = annualized_return(prices)?;
    ratio_over(ret - risk_free, vol, "volatility")
}

/// `(annualized_return - risk_free) / downside_volatility`.
pub fn sortino(prices: &[f64], risk_free: f64) -> Result<f64> {
    let downside = downside_volatility(prices)?;
    let ret = annualized_return(prices)?;
    ratio_over(ret - risk_free, downside, "downside volatility")
}

/// Largest `1 - price / running_max` over the series.
///
/// The running maximum only looks backward, so the peak always precedes the
/// trough. Periods before the first positive price contribute nothing.
pub fn max_drawdown(prices: &[f64]) -> Result<f64> {
    if prices.is_empty() {
        return Err(AllocError::InsufficientData { needed: 1, got: 0 });
    }
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &price in prices {
        if !price.is_finite() {
            return Err(quality("non-finite price in drawdown"));
        }
        peak = peak.max(price);
        if peak > 0.0 {
            worst = worst.max(1.0 - price / peak);
        }
    }
    Ok(worst)
}

/// `annualized_return / max_drawdown`.
pub fn calmar(prices: &[f64]) -> Result<f64> {
    let dd = max_drawdown(prices)?;
    let ret = annualized_return(prices)?;
    ratio_over(ret, dd, "max drawdown")
}

/// Combine per-date price rows into one valuation series, `rows · weights`.
pub fn weighted_series(rows: &[Vec<f64>], weights: &[f64]) -> Result<Vec<f64>> {
    rows.iter()
        .map(|row| {
            if row.len() != weights.len() {
                return Err(AllocError::InvalidInput(format!(
                    "price row has {} columns but {} weights were given",
                    row.len(),
                    weights.len()
                )));
            }
            Ok(row.iter().zip(weights).map(|(p, w)| p * w).sum())
        })
        .collect()
}

/// All five metrics for one series. Ratios with an undefined denominator are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
    pub max_drawdown: f64,
    pub calmar: Option<f64>,
}

impl RiskReport {
    /// Compute every metric for a price series.
    pub fn compute(prices: &[f64], risk_free: f64) -> Result<Self> {
        Ok(Self {
            annualized_return: annualized_return(prices)?,
            annualized_volatility: annualized_volatility(prices)?,
            sharpe: sharpe(prices, risk_free).ok(),
            sortino: sortino(prices, risk_free).ok(),
            max_drawdown: max_drawdown(prices)?,
            calmar: calmar(prices).ok(),
        })
    }

    /// Compute every metric for the valuation of a weighted basket.
    pub fn for_weighted(rows: &[Vec<f64>], weights: &[f64], risk_free: f64) -> Result<Self> {
        let series = weighted_series(rows, weights)?;
        Self::compute(&series, risk_free)
    }
}
