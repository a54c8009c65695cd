//! Integration tests for the allocation pipeline.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sharpefolio::allocator::{CapitalAllocator, SectorCap};
use sharpefolio::config::StrategyFileConfig;
use sharpefolio::data::{CsvDirectoryProvider, InMemoryProvider, PriceMatrix, PriceProvider};
use sharpefolio::export::{export_basket_csv, export_holding_csv, load_holding_csv};
use sharpefolio::metrics::RiskReport;
use sharpefolio::optimizer::{OptimizerConfig, WeightOptimizer};
use sharpefolio::pipeline::SharpeMaxStrategy;
use sharpefolio::ranker::{RankedInstrument, RankingOutcome, SectorRanking};
use sharpefolio::reconciler::reconcile;
use sharpefolio::types::PriceSeries;
use sharpefolio::universe::ReferenceData;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
}

/// Deterministic trending price path with some wiggle.
fn synthetic_closes(days: usize, initial_price: f64, daily_return: f64, phase: f64) -> Vec<f64> {
    let mut price = initial_price;
    (0..days)
        .map(|i| {
            let noise = ((i as f64 * 0.7 + phase).sin() * 2.0 + (i as f64 * 1.3).cos()) * 0.1;
            price *= 1.0 + daily_return;
            price + noise
        })
        .collect()
}

fn ranking(sector: &str, scores: &[(&str, f64)]) -> SectorRanking {
    SectorRanking::from_scores(
        sector,
        scores
            .iter()
            .map(|(symbol, sharpe)| RankedInstrument {
                symbol: symbol.to_string(),
                sharpe: *sharpe,
            })
            .collect(),
    )
}

#[test]
fn test_two_sector_scenario_counts_and_budgets() {
    let mut outcome = RankingOutcome::default();
    outcome
        .sectors
        .insert("A".to_string(), ranking("A", &[("A2", 1.0), ("A1", 1.5), ("A3", 0.5)]));
    outcome.sectors.insert("B".to_string(), ranking("B", &[("B1", 2.0)]));

    let means = outcome.mean_sharpes();
    assert_eq!(means["A"], Some(1.0));
    assert_eq!(means["B"], Some(2.0));

    let allocator = CapitalAllocator::new(4, 100_000.0).with_cap(SectorCap::new("A", 10));
    let allocation = allocator
        .allocate(&means, &mut StdRng::seed_from_u64(0))
        .unwrap();
    // 4 * 1/3 = 1.33 -> 1 and 4 * 2/3 = 2.67 -> 3
    assert_eq!(allocation.count("A"), 1);
    assert_eq!(allocation.count("B"), 3);
    assert!((allocation.budget("A") - 25_000.0).abs() < 1e-9);
    assert!((allocation.budget("B") - 75_000.0).abs() < 1e-9);

    let reconciled = reconcile(&outcome.sectors, &allocation, 100_000.0);
    let a = reconciled.target("A").unwrap();
    let b = reconciled.target("B").unwrap();
    assert_eq!(a.symbols, vec!["A1"]);
    assert_eq!(b.symbols, vec!["B1"]);
    assert_eq!(b.count, 1);
    assert_eq!(b.lowered_from, Some(3));
    assert!((a.budget - 50_000.0).abs() < 1e-9);
    assert!((b.budget - 50_000.0).abs() < 1e-9);

    // single-instrument sectors take the whole budget
    let a1 = PriceSeries::from_closes("A1", start(), &synthetic_closes(21, 40.0, 0.002, 0.0));
    let b1 = PriceSeries::from_closes("B1", start(), &synthetic_closes(21, 125.0, 0.001, 1.0));
    let provider = InMemoryProvider::new().with_series(a1.clone()).with_series(b1.clone());
    let optimizer = WeightOptimizer::default();
    for (target, series) in [(a, &a1), (b, &b1)] {
        let matrix = PriceMatrix::collect(&provider, &target.symbols, 21).matrix;
        let result = optimizer.optimize(&target.sector, &matrix, target.budget).unwrap();
        let last = series.last_close().unwrap();
        assert_eq!(result.weights, vec![1.0]);
        assert_eq!(result.quantities, vec![(50_000.0 / last).round_ties_even() as i64]);
    }
}

#[test]
fn test_zero_iteration_optimizer_matches_equal_weight_baseline() {
    let provider = InMemoryProvider::new()
        .with_series(PriceSeries::from_closes("X", start(), &synthetic_closes(21, 30.0, 0.002, 0.0)))
        .with_series(PriceSeries::from_closes("Y", start(), &synthetic_closes(21, 80.0, 0.001, 0.4)))
        .with_series(PriceSeries::from_closes("Z", start(), &synthetic_closes(21, 55.0, 0.003, 2.1)));
    let symbols: Vec<String> = ["X", "Y", "Z"].iter().map(|s| s.to_string()).collect();
    let matrix = PriceMatrix::collect(&provider, &symbols, 21).matrix;

    let optimizer = WeightOptimizer::new(OptimizerConfig {
        max_iterations: 0,
        ..OptimizerConfig::default()
    });
    let budget = 60_000.0;
    let result = optimizer.optimize("S", &matrix, budget).unwrap();

    let last = matrix.last_row().unwrap();
    let w = 1.0 / 3.0;
    let basket: f64 = last.iter().map(|p| p * w).sum();
    for quantity in &result.quantities {
        assert_eq!(*quantity, (budget / basket * w).round_ties_even() as i64);
    }
}

fn write_prices(dir: &Path, symbol: &str, closes: &[f64]) {
    let mut content = String::from("Date,Close,Adj Close\n");
    for (i, close) in closes.iter().enumerate() {
        let date = start() + chrono::Duration::days(i as i64);
        content.push_str(&format!("{},{:.4},{:.4}\n", date.format("%Y-%m-%d"), close + 1.0, close));
    }
    fs::write(dir.join(format!("{}.csv", symbol)), content).unwrap();
}

#[test]
fn test_file_backed_run_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let prices = dir.path().join("prices");
    fs::create_dir_all(&prices).unwrap();

    fs::write(
        dir.path().join("reference.csv"),
        "symbol,sector,universe\n\
         RY-CT,Financials,SPTSX\n\
         TD-CT,Financials,SPTSX\n\
         MTL-CT,Financials,SPTSX\n\
         XOM-US,Energy,SPX\n\
         CVX-US,Energy,SPX\n\
         NEE-US,Utilities,SPX\n",
    )
    .unwrap();

    write_prices(&prices, "RY", &synthetic_closes(150, 100.0, 0.003, 0.0));
    write_prices(&prices, "TD", &synthetic_closes(150, 70.0, 0.002, 1.1));
    write_prices(&prices, "XOM", &synthetic_closes(150, 90.0, 0.004, 2.0));
    write_prices(&prices, "CVX", &synthetic_closes(150, 140.0, 0.001, 0.3));
    // NEE has a gap in the adjusted close column
    let mut nee = synthetic_closes(150, 60.0, 0.002, 0.7);
    nee[140] = f64::NAN;
    write_prices(&prices, "NEE", &nee);

    let toml = format!(
        r#"
[run]
capital = 100000.0
target_count = 4
seed = 5
parallel = false

[optimizer]
window_days = 21
timeout_ms = 2000

[allocation]
capped_sector = "Energy"
sector_cap = 1

[data]
prices_dir = "{}"
reference = "{}"

[[universe]]
name = "SPTSX"
location = "CA"
exclude = ["MTL"]

[[universe]]
name = "SPX"
location = "US"
"#,
        prices.display(),
        dir.path().join("reference.csv").display()
    );
    let config_path = dir.path().join("run.toml");
    fs::write(&config_path, toml).unwrap();

    let file_config = StrategyFileConfig::load(&config_path).unwrap();
    let config = file_config.to_strategy_config().unwrap();
    let reference = ReferenceData::load_csv(&file_config.data.reference, &file_config.universes).unwrap();
    assert!(reference.get("MTL").is_none());
    let provider = CsvDirectoryProvider::new(&file_config.data.prices_dir);
    assert!(!provider.history("NEE", 100).is_usable());

    let report = SharpeMaxStrategy::new(config.clone()).run(&reference, &provider).unwrap();

    assert!(report.allocation.count("Energy") <= 1);
    assert_eq!(report.allocation.count("Utilities"), 0);
    assert!(report.exclusions.iter().any(|e| e.symbol == "NEE"));
    assert!(!report.holding.is_empty());
    for entry in report.holding.entries() {
        assert!(entry.quantity > 0);
        let expected = if entry.sector == "Financials" { "CA" } else { "US" };
        assert_eq!(entry.location, expected);
    }
    let invested: f64 = report.diagnostics.iter().map(|d| d.budget).sum();
    assert!((invested - 100_000.0).abs() < 1e-6);

    let holding_path = dir.path().join("holding.csv");
    let basket_path = dir.path().join("basket.csv");
    export_holding_csv(&report.holding, &holding_path).unwrap();
    export_basket_csv(&report.holding, &basket_path).unwrap();
    assert_eq!(load_holding_csv(&holding_path).unwrap(), report.holding);
    let basket = fs::read_to_string(&basket_path).unwrap();
    assert!(basket.starts_with("Ticker,Buy/Sell,Quantity,Type"));
    assert!(basket.lines().skip(1).all(|l| l.ends_with(",MKT")));

    let kpi = RiskReport::for_holding(&report.holding, &provider, 100, config.risk_free_rate).unwrap();
    assert!(kpi.max_drawdown >= 0.0 && kpi.max_drawdown <= 1.0);
}

#[test]
fn test_same_seed_same_holding() {
    let mut provider = InMemoryProvider::new();
    let mut records = Vec::new();
    let sectors = ["Energy", "Materials", "Telecom"];
    for (s, sector) in sectors.iter().enumerate() {
        for i in 0..4 {
            let symbol = format!("{}{}", &sector[..2].to_uppercase(), i);
            let drift = 0.001 + 0.0007 * (i + s) as f64;
            provider.insert(PriceSeries::from_closes(
                &symbol,
                start(),
                &synthetic_closes(120, 50.0 + 10.0 * i as f64, drift, s as f64),
            ));
            records.push(sharpefolio::types::InstrumentRecord::new(symbol, *sector, "US"));
        }
    }
    let reference = ReferenceData::new(records);

    let config = sharpefolio::pipeline::StrategyConfig {
        capital: 250_000.0,
        target_count: 8,
        seed: Some(99),
        cap: Some(SectorCap::new("Telecom", 1)),
        ..Default::default()
    };
    let first = SharpeMaxStrategy::new(config.clone()).run(&reference, &provider).unwrap();
    let second = SharpeMaxStrategy::new(config).run(&reference, &provider).unwrap();
    assert_eq!(first.allocation, second.allocation);
    assert_eq!(first.holding, second.holding);
    assert!(first.allocation.count("Telecom") <= 1);

    let counts: BTreeMap<String, usize> = first.allocation.counts();
    assert!(counts.values().sum::<usize>() <= 8);
}
