//! Error types for the allocation pipeline.

use thiserror::Error;

/// Main error type for ranking, allocation and optimization.
#[derive(Error, Debug)]
pub enum AllocError {
    #[error("Data quality error for {symbol}: {reason}")]
    DataQuality { symbol: String, reason: String },

    #[error("Price history fetch failed: {0}")]
    FetchFailure(String),

    #[error("Insufficient data: need {needed} observations, have {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),
}

impl AllocError {
    /// Shorthand for a data quality failure tied to a series label.
    pub fn data_quality(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        AllocError::DataQuality {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for allocation operations.
pub type Result<T> = std::result::Result<T, AllocError>;
