//! Price history loading and the provider contract consumed by the pipeline.
//!
//! A [`PriceProvider`] answers "give me the last `n` adjusted closes for this
//! symbol" together with a success flag. A failed or NaN-containing fetch is
//! never an error here: the series comes back cleaned with `success = false`
//! and the calling stage excludes the instrument.

use crate::error::{AllocError, Result};
use crate::types::{PricePoint, PriceSeries};
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Header names accepted for the price column, most preferred first.
const PRICE_COLUMNS: [&str; 6] = [
    "adj close",
    "adj_close",
    "adjclose",
    "adjusted_close",
    "close",
    "price",
];

const DATE_COLUMNS: [&str; 4] = ["date", "timestamp", "time", "datetime"];

/// Configuration for loading price CSV files.
#[derive(Debug, Clone)]
pub struct PriceCsvConfig {
    /// Date format string (e.g., "%Y-%m-%d"). Common formats are tried when unset.
    pub date_format: Option<String>,
    /// CSV delimiter.
    pub delimiter: u8,
}

impl Default for PriceCsvConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            delimiter: b',',
        }
    }
}

/// Result of reading one price file.
#[derive(Debug, Clone)]
pub struct LoadedSeries {
    pub series: PriceSeries,
    /// Rows whose price was missing or not a number. Dated rows are kept
    /// as NaN points so providers can tell where the gaps fall.
    pub missing_rows: usize,
    /// Rows dropped because their date was already present.
    pub duplicate_dates: usize,
    /// Whether the file listed dates out of ascending order.
    pub out_of_order: bool,
}

/// Parse a date string with multiple format attempts.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();
    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    let date_formats = [
        "%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%Y", "%d-%b-%Y", "%b %d, %Y",
    ];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%d %H:%M:%S%.f",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?)
}

fn find_column(headers: &StringRecord, candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|name| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    })
}

/// Load an adjusted close series from a CSV file.
///
/// The adjusted close column is preferred over the plain close. Rows whose
/// price is empty, unparsable or NaN are counted in
/// [`LoadedSeries::missing_rows`] and kept with a NaN close. Rows are sorted
/// by date and duplicate dates keep their first occurrence.
pub fn load_price_csv(
    path: impl AsRef<Path>,
    symbol: &str,
    config: &PriceCsvConfig,
) -> Result<LoadedSeries> {
    let path = path.as_ref();
    debug!("Loading prices for {} from {}", symbol, path.display());

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(config.delimiter)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let date_idx = find_column(&headers, &DATE_COLUMNS).ok_or_else(|| {
        AllocError::InvalidInput(format!("{}: no date column in {}", symbol, path.display()))
    })?;
    let price_idx = find_column(&headers, &PRICE_COLUMNS).ok_or_else(|| {
        AllocError::InvalidInput(format!("{}: no price column in {}", symbol, path.display()))
    })?;

    let mut points = Vec::new();
    let mut missing_rows = 0;
    for record in reader.records() {
        let record = record?;
        let Some(raw_date) = record.get(date_idx) else {
            missing_rows += 1;
            continue;
        };
        let date = parse_date(raw_date, config.date_format.as_deref())?;
        let close = match record.get(price_idx).and_then(|p| p.trim().parse::<f64>().ok()) {
            Some(close) if close.is_finite() => close,
            _ => {
                missing_rows += 1;
                f64::NAN
            }
        };
        points.push(PricePoint::new(date, close));
    }

    let out_of_order = points.windows(2).any(|w| w[1].date < w[0].date);
    points.sort_by_key(|p| p.date);
    let before = points.len();
    points.dedup_by_key(|p| p.date);
    let duplicate_dates = before - points.len();
    if duplicate_dates > 0 {
        warn!("{}: removed {} duplicate dates", symbol, duplicate_dates);
    }

    Ok(LoadedSeries {
        series: PriceSeries::new(symbol, points)?,
        missing_rows,
        duplicate_dates,
        out_of_order,
    })
}

/// Outcome of a price history request.
#[derive(Debug, Clone)]
pub struct PriceFetch {
    pub series: PriceSeries,
    /// False when the history was unavailable or contained missing values.
    pub success: bool,
}

impl PriceFetch {
    pub fn ok(series: PriceSeries) -> Self {
        Self {
            series,
            success: true,
        }
    }

    pub fn failed(series: PriceSeries) -> Self {
        Self {
            series,
            success: false,
        }
    }

    /// Whether the stage may use this history.
    pub fn is_usable(&self) -> bool {
        self.success && !self.series.is_empty()
    }

    /// The series, or [`AllocError::FetchFailure`] when it is not usable.
    pub fn into_series(self) -> Result<PriceSeries> {
        if self.is_usable() {
            Ok(self.series)
        } else {
            Err(AllocError::FetchFailure(self.series.symbol().to_string()))
        }
    }
}

/// Source of trailing price histories.
///
/// Implementations must be shareable across worker threads; the pipeline
/// fans requests out with rayon.
pub trait PriceProvider: Send + Sync {
    /// The most recent `lookback` observations for `symbol`.
    fn history(&self, symbol: &str, lookback: usize) -> PriceFetch;
}

/// Trim a loaded series to the lookback window, then drop the gaps inside it.
///
/// Only gaps within the window fail the fetch.
fn into_fetch(series: &PriceSeries, lookback: usize) -> PriceFetch {
    let mut series = series.tail(lookback);
    let dropped = series.drop_non_finite();
    if dropped > 0 {
        debug!("{}: {} missing observations", series.symbol(), dropped);
        PriceFetch::failed(series)
    } else if series.is_empty() {
        PriceFetch::failed(series)
    } else {
        PriceFetch::ok(series)
    }
}

/// Provider reading `<dir>/<SYMBOL>.csv` files.
#[derive(Debug, Clone)]
pub struct CsvDirectoryProvider {
    dir: PathBuf,
    config: PriceCsvConfig,
}

impl CsvDirectoryProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            config: PriceCsvConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PriceCsvConfig) -> Self {
        self.config = config;
        self
    }

    /// Path of the file backing `symbol`.
    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol))
    }
}

impl PriceProvider for CsvDirectoryProvider {
    fn history(&self, symbol: &str, lookback: usize) -> PriceFetch {
        match load_price_csv(self.path_for(symbol), symbol, &self.config) {
            Ok(loaded) => into_fetch(&loaded.series, lookback),
            Err(e) => {
                warn!("{}: price history unavailable: {}", symbol, e);
                PriceFetch::failed(PriceSeries::empty(symbol))
            }
        }
    }
}

/// Provider over series already held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    series: HashMap<String, PriceSeries>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, series: PriceSeries) {
        self.series.insert(series.symbol().to_string(), series);
    }

    pub fn with_series(mut self, series: PriceSeries) -> Self {
        self.insert(series);
        self
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl PriceProvider for InMemoryProvider {
    fn history(&self, symbol: &str, lookback: usize) -> PriceFetch {
        match self.series.get(symbol) {
            Some(series) => into_fetch(series, lookback),
            None => PriceFetch::failed(PriceSeries::empty(symbol)),
        }
    }
}

/// Date-aligned closes for several instruments, one row per shared date.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceMatrix {
    symbols: Vec<String>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
}

/// A matrix plus the symbols that could not be included.
#[derive(Debug, Clone)]
pub struct MatrixCollection {
    pub matrix: PriceMatrix,
    pub failed: Vec<String>,
}

impl PriceMatrix {
    /// Inner-join several series on date. Only dates present in every series are kept.
    pub fn from_series(series: &[PriceSeries]) -> Self {
        let symbols: Vec<String> = series.iter().map(|s| s.symbol().to_string()).collect();
        let k = series.len();
        let mut by_date: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();
        for (col, s) in series.iter().enumerate() {
            for point in s.points() {
                by_date.entry(point.date).or_insert_with(|| vec![None; k])[col] = Some(point.close);
            }
        }

        let mut dates = Vec::new();
        let mut rows = Vec::new();
        for (date, row) in by_date {
            if k > 0 && row.iter().all(|v| v.is_some()) {
                dates.push(date);
                rows.push(row.into_iter().flatten().collect());
            }
        }

        Self {
            symbols,
            dates,
            rows,
        }
    }

    /// Fetch `window` observations for each symbol and join the usable ones.
    pub fn collect(provider: &dyn PriceProvider, symbols: &[String], window: usize) -> MatrixCollection {
        let mut usable = Vec::new();
        let mut failed = Vec::new();
        for symbol in symbols {
            let fetch = provider.history(symbol, window);
            if fetch.is_usable() {
                usable.push(fetch.series);
            } else {
                failed.push(symbol.clone());
            }
        }
        if !failed.is_empty() {
            info!("Excluded {} instruments with failed fetches", failed.len());
        }
        MatrixCollection {
            matrix: Self::from_series(&usable),
            failed,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.symbols.is_empty()
    }

    pub fn last_row(&self) -> Option<&[f64]> {
        self.rows.last().map(|r| r.as_slice())
    }

    pub fn column(&self, idx: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[idx]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_prefers_adjusted_close() {
        let file = write_csv(
            "Date,Open,High,Low,Close,Adj Close,Volume\n\
             2024-03-01,10,11,9,10.5,10.0,100\n\
             2024-03-04,10,11,9,10.8,10.3,100\n",
        );
        let loaded = load_price_csv(file.path(), "AAA", &PriceCsvConfig::default()).unwrap();
        assert_eq!(loaded.series.closes(), vec![10.0, 10.3]);
        assert_eq!(loaded.missing_rows, 0);
    }

    #[test]
    fn test_load_counts_missing_rows_and_sorts() {
        let file = write_csv(
            "date,close\n\
             2024-03-05,12.0\n\
             2024-03-01,10.0\n\
             2024-03-04,\n\
             2024-03-06,NaN\n",
        );
        let loaded = load_price_csv(file.path(), "BBB", &PriceCsvConfig::default()).unwrap();
        assert_eq!(loaded.missing_rows, 2);
        assert_eq!(loaded.series.len(), 4);
        assert_eq!(loaded.series.points()[0].date, day(1));

        let mut series = loaded.series;
        assert_eq!(series.drop_non_finite(), 2);
        assert_eq!(series.closes(), vec![10.0, 12.0]);
    }

    #[test]
    fn test_load_requires_price_column() {
        let file = write_csv("date,volume\n2024-03-01,100\n");
        assert!(load_price_csv(file.path(), "CCC", &PriceCsvConfig::default()).is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-03-01", None).unwrap(), day(1));
        assert_eq!(parse_date("2024/03/02", None).unwrap(), day(2));
        assert_eq!(parse_date("2024-03-03 00:00:00", None).unwrap(), day(3));
        assert!(parse_date("not a date", None).is_err());
    }

    #[test]
    fn test_directory_provider_flags_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("GAP.csv"),
            "date,close\n2024-03-01,10\n2024-03-02,\n2024-03-03,11\n",
        )
        .unwrap();
        let provider = CsvDirectoryProvider::new(dir.path());

        let fetch = provider.history("GAP", 10);
        assert!(!fetch.success);
        assert_eq!(fetch.series.len(), 2);

        let missing = provider.history("NOPE", 10);
        assert!(!missing.success);
        assert!(missing.series.is_empty());
    }

    #[test]
    fn test_directory_provider_ignores_gaps_before_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = String::from("date,close\n");
        for i in 0..300 {
            let date = day(1) + chrono::Duration::days(i);
            if i == 5 {
                content.push_str(&format!("{},\n", date.format("%Y-%m-%d")));
            } else {
                content.push_str(&format!("{},{}\n", date.format("%Y-%m-%d"), 100.0 + i as f64));
            }
        }
        std::fs::write(dir.path().join("OLD.csv"), content).unwrap();
        let provider = CsvDirectoryProvider::new(dir.path());

        let recent = provider.history("OLD", 21);
        assert!(recent.is_usable());
        assert_eq!(recent.series.len(), 21);
        assert_eq!(recent.series.last_close(), Some(399.0));

        let full = provider.history("OLD", 300);
        assert!(!full.success);
        assert_eq!(full.series.len(), 299);
    }

    #[test]
    fn test_in_memory_provider_trims_lookback() {
        let provider = InMemoryProvider::new().with_series(PriceSeries::from_closes(
            "MEM",
            day(1),
            &[1.0, 2.0, 3.0, 4.0, 5.0],
        ));
        let fetch = provider.history("MEM", 3);
        assert!(fetch.is_usable());
        assert_eq!(fetch.series.closes(), vec![3.0, 4.0, 5.0]);
        assert!(!provider.history("OTHER", 3).success);
    }

    #[test]
    fn test_matrix_inner_joins_dates() {
        let a = PriceSeries::new(
            "A",
            vec![
                PricePoint::new(day(1), 1.0),
                PricePoint::new(day(2), 2.0),
                PricePoint::new(day(3), 3.0),
            ],
        )
        .unwrap();
        let b = PriceSeries::new(
            "B",
            vec![PricePoint::new(day(2), 20.0), PricePoint::new(day(3), 30.0)],
        )
        .unwrap();
        let matrix = PriceMatrix::from_series(&[a, b]);
        assert_eq!(matrix.dates(), &[day(2), day(3)]);
        assert_eq!(matrix.rows(), &[vec![2.0, 20.0], vec![3.0, 30.0]]);
        assert_eq!(matrix.last_row(), Some(&[3.0, 30.0][..]));
        assert_eq!(matrix.column(1), vec![20.0, 30.0]);
    }

    #[test]
    fn test_collect_reports_failed_symbols() {
        let mut provider = InMemoryProvider::new();
        provider.insert(PriceSeries::from_closes("OK", day(1), &[1.0, 2.0, 3.0]));
        provider.insert(PriceSeries::from_closes("BAD", day(1), &[1.0, f64::NAN, 3.0]));
        let symbols = vec!["OK".to_string(), "BAD".to_string(), "GONE".to_string()];

        let collection = PriceMatrix::collect(&provider, &symbols, 10);
        assert_eq!(collection.matrix.symbols(), &["OK".to_string()]);
        assert_eq!(collection.failed, vec!["BAD".to_string(), "GONE".to_string()]);
        assert_eq!(collection.matrix.n_rows(), 3);
    }
}
