//! Command-line interface for the sector Sharpe allocator.

use sharpefolio::config::StrategyFileConfig;
use sharpefolio::data::{load_price_csv, CsvDirectoryProvider, PriceProvider};
use sharpefolio::error::Result;
use sharpefolio::export::{
    export_basket_csv, export_holding_csv, export_report_json, load_holding_csv, RunDocument,
};
use sharpefolio::metadata::RunMetadata;
use sharpefolio::metrics::{self, RiskReport};
use sharpefolio::pipeline::{SharpeMaxStrategy, StrategyConfig};
use sharpefolio::report::ReportFormatter;
use sharpefolio::universe::ReferenceData;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use tabled::{builder::Builder, settings::Style};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Sharpefolio - sector-diversified Sharpe-maximizing portfolio construction.
#[derive(Parser)]
#[command(name = "sharpefolio")]
#[command(version)]
#[command(about = "Rank instruments by Sharpe within sectors and size an integer-share holding")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full Rank, Allocate, Reconcile, Optimize pipeline
    Run {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Directory for holding, basket and report files
        #[arg(short = 'd', long, default_value = "out")]
        output_dir: PathBuf,

        /// Override the configured seed
        #[arg(long)]
        seed: Option<u64>,

        /// Show a progress bar while ranking
        #[arg(long)]
        progress: bool,

        /// Also compute the KPI summary of the resulting holding
        #[arg(long)]
        kpi: bool,

        /// List every excluded instrument
        #[arg(long)]
        show_exclusions: bool,
    },

    /// Rank sectors without allocating
    Rank {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Instruments shown per sector
        #[arg(short, long, default_value = "3")]
        top: usize,
    },

    /// KPI summary of an existing holding file
    Kpi {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Holding CSV written by `run`
        #[arg(long)]
        holding: PathBuf,

        /// Trailing observations to evaluate
        #[arg(short, long, default_value = "252")]
        window: usize,
    },

    /// Generate an example configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "sharpefolio.toml")]
        output: PathBuf,
    },

    /// Check every instrument's price file
    Validate {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Failed to set tracing subscriber: {}", e);
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run {
            config,
            output_dir,
            seed,
            progress,
            kpi,
            show_exclusions,
        } => run_strategy(
            config,
            output_dir,
            *seed,
            *progress,
            *kpi,
            *show_exclusions,
            cli.output,
        ),
        Commands::Rank { config, top } => rank_sectors(config, *top, cli.output),
        Commands::Kpi {
            config,
            holding,
            window,
        } => holding_kpi(config, holding, *window, cli.output),
        Commands::Init { output } => init_config(output),
        Commands::Validate { config } => validate_prices(config),
    }
}

/// Everything a command needs from the configuration file.
struct Workspace {
    file_config: StrategyFileConfig,
    strategy: StrategyConfig,
    reference: ReferenceData,
    provider: CsvDirectoryProvider,
}

fn open_workspace(config_path: &Path) -> Result<Workspace> {
    let file_config = StrategyFileConfig::load(config_path)?;
    let strategy = file_config.to_strategy_config()?;
    let reference = ReferenceData::load_csv(&file_config.data.reference, &file_config.universes)?;
    let provider = CsvDirectoryProvider::new(&file_config.data.prices_dir)
        .with_config(file_config.data.price_csv_config()?);
    Ok(Workspace {
        file_config,
        strategy,
        reference,
        provider,
    })
}

/// Files a run reads: the config, the reference table and every price file
/// present for the reference instruments.
fn run_inputs(ws: &Workspace, config_path: &Path) -> Vec<PathBuf> {
    let mut inputs = vec![
        config_path.to_path_buf(),
        PathBuf::from(&ws.file_config.data.reference),
    ];
    inputs.extend(
        ws.reference
            .instruments()
            .map(|r| ws.provider.path_for(&r.symbol))
            .filter(|path| path.is_file()),
    );
    inputs
}

fn run_strategy(
    config_path: &Path,
    output_dir: &Path,
    seed: Option<u64>,
    progress: bool,
    with_kpi: bool,
    show_exclusions: bool,
    output: OutputFormat,
) -> Result<()> {
    let mut ws = open_workspace(config_path)?;
    if seed.is_some() {
        ws.strategy.seed = seed;
    }
    ws.strategy.show_progress = progress;

    let report = SharpeMaxStrategy::new(ws.strategy.clone()).run(&ws.reference, &ws.provider)?;

    let kpi = if with_kpi && !report.holding.is_empty() {
        match RiskReport::for_holding(
            &report.holding,
            &ws.provider,
            ws.strategy.lookback,
            ws.strategy.risk_free_rate,
        ) {
            Ok(kpi) => Some(kpi),
            Err(e) => {
                eprintln!("{} {}", "KPI summary unavailable:".yellow(), e);
                None
            }
        }
    } else {
        None
    };

    let mut metadata = RunMetadata::new(&ws.file_config, report.seed);
    for path in run_inputs(&ws, config_path) {
        metadata.track(path);
    }

    fs::create_dir_all(output_dir)?;
    export_holding_csv(&report.holding, output_dir.join("holding.csv"))?;
    export_basket_csv(&report.holding, output_dir.join("basket.csv"))?;
    let document = RunDocument::new(&report, metadata, kpi.clone());
    export_report_json(&document, output_dir.join("report.json"))?;
    info!("Results written to {}", output_dir.display());

    match output {
        OutputFormat::Text => {
            ReportFormatter::print_report(&report, show_exclusions);
            if let Some(kpi) = &kpi {
                ReportFormatter::print_kpi("Holding KPI", kpi);
            }
            println!("\nResults written to {}", output_dir.display());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&document)?),
    }
    Ok(())
}

fn rank_sectors(config_path: &Path, top: usize, output: OutputFormat) -> Result<()> {
    let ws = open_workspace(config_path)?;
    let ranking = SharpeMaxStrategy::new(ws.strategy).rank(&ws.reference, &ws.provider);

    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&ranking)?);
        return Ok(());
    }

    let members = ws.reference.sector_counts();
    let mut builder = Builder::new();
    builder.push_record(["Sector", "Members", "Retained", "Mean Sharpe", "Top"]);
    for (sector, ranking) in &ranking.sectors {
        let best: Vec<String> = ranking
            .ranked
            .iter()
            .take(top)
            .map(|r| format!("{} ({:.2})", r.symbol, r.sharpe))
            .collect();
        builder.push_record([
            sector.clone(),
            members.get(sector).copied().unwrap_or(0).to_string(),
            ranking.len().to_string(),
            ranking
                .mean_sharpe
                .map(|m| format!("{:.3}", m))
                .unwrap_or_else(|| "n/a".to_string()),
            best.join(", "),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
    println!("{} instruments excluded", ranking.exclusions.len());
    Ok(())
}

fn holding_kpi(config_path: &Path, holding_path: &Path, window: usize, output: OutputFormat) -> Result<()> {
    let ws = open_workspace(config_path)?;
    let holding = load_holding_csv(holding_path)?;
    let kpi = RiskReport::for_holding(&holding, &ws.provider, window, ws.strategy.risk_free_rate)?;

    match output {
        OutputFormat::Text => ReportFormatter::print_kpi(
            &format!("KPI of {} positions over {} observations", holding.len(), window),
            &kpi,
        ),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&kpi)?),
    }
    Ok(())
}

fn init_config(output: &Path) -> Result<()> {
    let example = StrategyFileConfig::example();
    fs::write(output, example)?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to point at your data, then run:");
    println!("  sharpefolio run -c {}", output.display());
    Ok(())
}

fn validate_prices(config_path: &Path) -> Result<()> {
    let ws = open_workspace(config_path)?;
    let csv_config = ws.file_config.data.price_csv_config()?;
    println!(
        "Validating {} instruments in {}",
        ws.reference.len(),
        ws.file_config.data.prices_dir
    );

    let mut builder = Builder::new();
    builder.push_record(["Symbol", "Rows", "Missing", "Duplicates", "Ordered", "Issue"]);
    let mut problems = 0;
    for record in ws.reference.instruments() {
        let path = ws.provider.path_for(&record.symbol);
        let row = match load_price_csv(&path, &record.symbol, &csv_config) {
            Ok(loaded) => {
                let mut series = loaded.series;
                series.drop_non_finite();
                let prices = series.closes();
                let issue = if loaded.missing_rows > 0 {
                    "missing values".to_string()
                } else if prices.len() < ws.strategy.lookback {
                    format!("shorter than lookback {}", ws.strategy.lookback)
                } else {
                    match metrics::annualized_volatility(&prices) {
                        Ok(v) if v == 0.0 => "zero volatility".to_string(),
                        Ok(_) => String::new(),
                        Err(e) => e.to_string(),
                    }
                };
                [
                    record.symbol.clone(),
                    prices.len().to_string(),
                    loaded.missing_rows.to_string(),
                    loaded.duplicate_dates.to_string(),
                    if loaded.out_of_order { "no" } else { "yes" }.to_string(),
                    issue,
                ]
            }
            Err(e) => [
                record.symbol.clone(),
                "0".to_string(),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
                e.to_string(),
            ],
        };
        if !row[5].is_empty() {
            problems += 1;
        }
        builder.push_record(row);
    }
    println!("{}", builder.build().with(Style::rounded()));

    let fetched = ws
        .reference
        .instruments()
        .filter(|r| ws.provider.history(&r.symbol, ws.strategy.lookback).is_usable())
        .count();
    println!("\nUsable histories: {}/{}", fetched, ws.reference.len());
    if problems == 0 {
        println!("\nValidation: {}", "PASSED".green());
    } else {
        println!("\nValidation: {} ({} instruments with issues)", "WARNINGS".yellow(), problems);
    }
    Ok(())
}
