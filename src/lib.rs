//! amatrend - adaptive moving average crossover backtester.
//!
//! # Overview
//!
//! amatrend backtests a long/flat strategy that buys when price crosses above
//! a Kaufman-style adaptive moving average (AMA) and sells when it crosses
//! back below, and searches parameter grids for the most profitable setting:
//!
//! - **Indicator**: efficiency ratio, squared smoothing, mean-seeded AMA
//! - **Engine**: one pass over the prices, additive profit per round trip
//! - **Grid search**: exhaustive, optionally parallel, deterministic ties
//! - **Workflows**: test, train and top-results over a report store
//! - **Configuration files**: TOML-based configuration for reproducible runs
//!
//! # Quick Start
//!
//! ```
//! use amatrend::engine::calculate;
//! use amatrend::types::{Evaluation, ParameterSet};
//!
//! let prices: Vec<f64> = (0..100)
//!     .map(|i| 50.0 + (i as f64 * 0.2).sin() * 4.0 + i as f64 * 0.1)
//!     .collect();
//!
//! match calculate(&prices, &ParameterSet::new(2, 10, 30)).unwrap() {
//!     Evaluation::Completed(result) => {
//!         println!("strategy {:.4} vs hold {:.4}", result.strategy_profit, result.hold_profit);
//!     }
//!     Evaluation::InsufficientHistory { required, available } => {
//!         println!("need {} prices, have {}", required, available);
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Candles, parameter triples and grids, results
//! - [`indicator`]: Efficiency ratio and the adaptive moving average
//! - [`engine`]: Crossover simulation
//! - [`optimizer`]: Grid search
//! - [`strategy`]: Strategy trait and registry
//! - [`strategies`]: Built-in strategies
//! - [`data`]: CSV loading, price providers and the candle cache
//! - [`store`]: Report persistence and top-results queries
//! - [`service`]: Test, train and top-results workflows
//! - [`config`]: TOML configuration file support
//! - [`analytics`]: Terminal and JSON reporting
//! - [`viz`]: Sparkline rendering of traced runs

pub mod analytics;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod indicator;
pub mod optimizer;
pub mod service;
pub mod store;
pub mod strategies;
pub mod strategy;
pub mod types;
pub mod viz;

// Re-exports for convenience
pub use analytics::ResultFormatter;
pub use config::BacktestFileConfig;
pub use engine::{calculate, CrossoverEngine, Trace, Trade};
pub use error::{BacktestError, Result};
pub use indicator::{ama_series, efficiency_ratio, AdaptiveMovingAverage};
pub use optimizer::{optimize, GridSearch, SearchOutcome, SearchStats};
pub use service::{Backtester, TestRequest, TrainRequest};
pub use store::{InMemoryReportStore, JsonReportStore, Report, ResultCache, TopQuery};
pub use strategies::AmaCrossover;
pub use strategy::{Strategy, StrategyRegistry};
pub use types::{
    Evaluation, Interval, ParamRange, ParameterGrid, ParameterSet, PositionState, PriceCandle,
    PriceField, StrategyResult,
};

// Data handling re-exports
pub use data::{
    load_csv, CandleStore, CsvPriceProvider, DataConfig, InMemoryPriceProvider, PriceProvider,
};

// Visualization utilities
pub use viz::{render_trace, sparkline, sparkline_with_config, trace_report, SparklineConfig};
