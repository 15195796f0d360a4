//! Command-line interface for the AMA backtester.

use amatrend::analytics::ResultFormatter;
use amatrend::config::{BacktestFileConfig, DataSettings, StoreSettings};
use amatrend::data::parse_datetime;
use amatrend::error::{BacktestError, Result};
use amatrend::optimizer::SearchOutcome;
use amatrend::service::{Backtester, TestRequest, TrainRequest};
use amatrend::store::{JsonReportStore, ResultCache, TopQuery, DEFAULT_TOP_LIMIT};
use amatrend::strategy::StrategyRegistry;
use amatrend::types::{price_series, Interval, ParamRange, ParameterGrid, PriceField};
use amatrend::viz::render_trace;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// amatrend - adaptive moving average crossover backtester.
#[derive(Parser)]
#[command(name = "amatrend")]
#[command(version)]
#[command(about = "Backtest and optimize an adaptive moving average crossover strategy")]
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

/// Where prices are read from and which range to use.
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// CSV file with the instrument's candles
    #[arg(short, long, conflicts_with = "dir")]
    pub data: Option<PathBuf>,

    /// Directory of <INSTRUMENT>.csv files
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Instrument name
    #[arg(short, long, default_value = "SYMBOL")]
    pub instrument: String,

    /// Candle interval (1min, 5min, hour, day, ...)
    #[arg(long, default_value = "day")]
    pub interval: Interval,

    /// Candle field used as the price series
    #[arg(long, value_enum, default_value = "open")]
    pub price_field: PriceFieldArg,

    /// Date format in CSV (detected when omitted)
    #[arg(long)]
    pub date_format: Option<String>,

    /// Start of the range (e.g. 2023-01-01)
    #[arg(long)]
    pub from: String,

    /// End of the range (defaults to now)
    #[arg(long)]
    pub to: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Backtest a single parameter triple
    Test {
        #[command(flatten)]
        data: DataArgs,

        /// Strategy id
        #[arg(short = 'S', long, default_value = "ama")]
        strategy: String,

        /// Fastest smoothing period
        #[arg(long, default_value = "2")]
        fast: usize,

        /// Efficiency ratio lookback
        #[arg(short, long, default_value = "10")]
        n: usize,

        /// Slowest smoothing period
        #[arg(long, default_value = "30")]
        slow: usize,

        /// Report file (JSON Lines)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Show the trades and the AMA against prices
        #[arg(long)]
        trades: bool,
    },

    /// Search parameter ranges for the most profitable triple
    Train {
        #[command(flatten)]
        data: DataArgs,

        /// Strategy id
        #[arg(short = 'S', long, default_value = "ama")]
        strategy: String,

        /// Range of `fast` values, e.g. 2..5
        #[arg(long, default_value = "2..5", value_parser = parse_range)]
        fast: ParamRange,

        /// Range of `n` values
        #[arg(short, long, default_value = "6..15", value_parser = parse_range)]
        n: ParamRange,

        /// Range of `slow` values
        #[arg(long, default_value = "20..40", value_parser = parse_range)]
        slow: ParamRange,

        /// Evaluate triples one at a time
        #[arg(long)]
        sequential: bool,

        /// Stop evaluating new triples after this many seconds
        #[arg(long)]
        time_budget: Option<u64>,

        /// Report file (JSON Lines)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// List the best stored reports
    Top {
        /// Report file (JSON Lines)
        #[arg(long)]
        store: PathBuf,

        /// Only reports of this strategy
        #[arg(short = 'S', long)]
        strategy: Option<String>,

        /// Only reports of this instrument
        #[arg(short, long)]
        instrument: Option<String>,

        /// Only reports created at or after this time
        #[arg(long)]
        created_from: Option<String>,

        /// Only reports created before this time
        #[arg(long)]
        created_to: Option<String>,

        /// Maximum number of reports
        #[arg(short, long, default_value_t = DEFAULT_TOP_LIMIT)]
        limit: usize,
    },

    /// Show candles of an instrument
    Prices {
        #[command(flatten)]
        data: DataArgs,

        /// Maximum number of rows (0 for all)
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show information about available strategies
    Strategies,

    /// Generate an example configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "amatrend.toml")]
        output: PathBuf,
    },

    /// Run a test (or a grid search with --train) from a configuration file
    RunConfig {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Search the [optimize] ranges instead of testing [strategy.params]
        #[arg(long)]
        train: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum PriceFieldArg {
    Open,
    Close,
}

impl From<PriceFieldArg> for PriceField {
    fn from(arg: PriceFieldArg) -> Self {
        match arg {
            PriceFieldArg::Open => PriceField::Open,
            PriceFieldArg::Close => PriceField::Close,
        }
    }
}

/// Parse `a..b`, `a:b` or a single value into an inclusive range.
fn parse_range(s: &str) -> std::result::Result<ParamRange, String> {
    let parse = |v: &str| {
        v.trim()
            .parse::<usize>()
            .map_err(|e| format!("invalid value '{}': {}", v, e))
    };
    let range = match s.split_once("..").or_else(|| s.split_once(':')) {
        Some((start, end)) => ParamRange::new(parse(start)?, parse(end)?),
        None => ParamRange::single(parse(s)?),
    };
    if range.is_empty() {
        return Err(format!("range {} is empty", s));
    }
    Ok(range)
}

impl DataArgs {
    fn to_file_config(&self, store: Option<&PathBuf>) -> BacktestFileConfig {
        let path_string = |p: &PathBuf| p.to_string_lossy().into_owned();
        BacktestFileConfig {
            data: DataSettings {
                path: self.data.as_ref().map(path_string),
                dir: self.dir.as_ref().map(path_string),
                instrument: self.instrument.clone(),
                interval: self.interval,
                price_field: self.price_field.into(),
                date_format: self.date_format.clone(),
                from: Some(self.from.clone()),
                to: self.to.clone(),
            },
            store: StoreSettings {
                path: store.map(path_string),
            },
            ..Default::default()
        }
    }
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

        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Test {
            data,
            strategy,
            fast,
            n,
            slow,
            store,
            trades,
        } => {
            let mut config = data.to_file_config(store.as_ref());
            config.strategy.id = strategy.clone();
            config.strategy.params.fast = Some(*fast);
            config.strategy.params.n = Some(*n);
            config.strategy.params.slow = Some(*slow);
            run_test(&config, &config.test_request()?, *trades, cli.output)
        }

        Commands::Train {
            data,
            strategy,
            fast,
            n,
            slow,
            sequential,
            time_budget,
            store,
        } => {
            let mut config = data.to_file_config(store.as_ref());
            config.strategy.id = strategy.clone();
            let (from, to) = config.date_range()?;
            let request = TrainRequest {
                instrument: data.instrument.clone(),
                from,
                to,
                strategy: strategy.clone(),
                grid: ParameterGrid::new(*fast, *n, *slow),
                interval: data.interval,
                price_field: data.price_field.into(),
                parallel: !sequential,
                time_budget: time_budget.map(Duration::from_secs),
            };
            run_train(&config, &request, cli.output)
        }

        Commands::Top {
            store,
            strategy,
            instrument,
            created_from,
            created_to,
            limit,
        } => {
            let query = TopQuery {
                created_from: created_from.as_deref().map(|s| parse_datetime(s, None)).transpose()?,
                created_to: created_to.as_deref().map(|s| parse_datetime(s, None)).transpose()?,
                strategy: strategy.clone(),
                instrument: instrument.clone(),
                limit: Some(*limit),
            };
            let reports = JsonReportStore::open_existing(store)?.top(&query)?;
            match cli.output {
                OutputFormat::Text => ResultFormatter::print_reports(&reports),
                OutputFormat::Json => println!("{}", ResultFormatter::to_json(&reports)),
            }
            Ok(())
        }

        Commands::Prices { data, limit } => {
            let config = data.to_file_config(None);
            let (from, to) = config.date_range()?;
            let backtester = Backtester::new(config.price_provider()?, config.report_store()?);
            let candles = backtester.prices(&data.instrument, from, to, data.interval)?;
            match cli.output {
                OutputFormat::Text => ResultFormatter::print_prices(&candles, *limit),
                OutputFormat::Json => println!("{}", ResultFormatter::to_json(&candles)),
            }
            Ok(())
        }

        Commands::Strategies => {
            ResultFormatter::print_strategies(&StrategyRegistry::with_builtin());
            Ok(())
        }

        Commands::Init { output } => init_config(output),

        Commands::RunConfig { config, train } => run_from_config(config, *train, cli.output),
    }
}

fn backtester(config: &BacktestFileConfig, output: OutputFormat) -> Result<Backtester> {
    Ok(Backtester::new(config.price_provider()?, config.report_store()?)
        .with_progress(output == OutputFormat::Text))
}

fn run_test(
    config: &BacktestFileConfig,
    request: &TestRequest,
    show_trades: bool,
    output: OutputFormat,
) -> Result<()> {
    let backtester = backtester(config, output)?;
    let result = backtester.test_strategy(request)?;

    match output {
        OutputFormat::Text => {
            let title = format!("TEST {} {}", request.strategy.to_uppercase(), request.instrument);
            ResultFormatter::print_result(&title, &result);
        }
        OutputFormat::Json => {
            let value = json!({ "request": request, "result": result });
            println!("{}", ResultFormatter::to_json(&value));
        }
    }

    if show_trades && output == OutputFormat::Text {
        let candles = backtester.fetch_prices(
            &request.instrument,
            request.from,
            request.to,
            request.interval,
            Some(&request.strategy),
        )?;
        let prices = price_series(&candles, request.price_field);
        let strategy = backtester.registry().resolve(&request.strategy)?;
        let (_, trace) = strategy.trace(&prices, &request.params)?;
        ResultFormatter::print_trades(&trace.trades);
        print!("{}", render_trace(&prices, &trace, 60));
    }
    Ok(())
}

fn run_train(config: &BacktestFileConfig, request: &TrainRequest, output: OutputFormat) -> Result<()> {
    let backtester = backtester(config, output)?;
    let outcome = backtester.train_strategy(request)?;

    match output {
        OutputFormat::Text => {
            let title = format!("TRAIN {} {}", request.strategy.to_uppercase(), request.instrument);
            ResultFormatter::print_search(&title, &outcome);
        }
        OutputFormat::Json => {
            let value = json!({ "request": request, "outcome": outcome });
            println!("{}", ResultFormatter::to_json(&value));
        }
    }

    if let SearchOutcome::NoFeasibleParameters { .. } = outcome {
        info!("No report stored for {}", request.instrument);
    }
    Ok(())
}

fn init_config(output: &PathBuf) -> Result<()> {
    if output.exists() {
        return Err(BacktestError::ConfigError(format!(
            "{} already exists",
            output.display()
        )));
    }
    fs::write(output, BacktestFileConfig::example())?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to customize your run, then run:");
    println!("  amatrend run-config -c {}", output.display());
    println!("  amatrend run-config -c {} --train", output.display());
    Ok(())
}

fn run_from_config(config_path: &PathBuf, train: bool, output: OutputFormat) -> Result<()> {
    let config = BacktestFileConfig::load(config_path)?;
    if train {
        run_train(&config, &config.train_request()?, output)
    } else {
        run_test(&config, &config.test_request()?, false, output)
    }
}
