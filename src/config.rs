//! Configuration file support.
//!
//! A run can be described in a TOML file so that tests and grid searches are
//! reproducible. `amatrend init` writes [`BacktestFileConfig::example`].

use crate::data::{
    load_csv, parse_datetime, CsvPriceProvider, DataConfig, InMemoryPriceProvider, PriceProvider,
};
use crate::error::{BacktestError, Result};
use crate::service::{TestRequest, TrainRequest};
use crate::store::{InMemoryReportStore, JsonReportStore, ResultCache};
use crate::strategies::AmaCrossover;
use crate::types::{Interval, ParamRange, ParameterGrid, ParameterSet, PriceField};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Complete run configuration loaded from a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestFileConfig {
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub strategy: StrategySettings,
    #[serde(default)]
    pub optimize: OptimizeSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

/// Where prices come from and which slice of them to use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSettings {
    /// Single CSV file holding the instrument's candles.
    #[serde(default)]
    pub path: Option<String>,
    /// Directory of `<INSTRUMENT>.csv` files, used when `path` is unset.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_instrument")]
    pub instrument: String,
    #[serde(default)]
    pub interval: Interval,
    #[serde(default)]
    pub price_field: PriceField,
    /// Date format in CSV; detected when unset.
    #[serde(default)]
    pub date_format: Option<String>,
    /// Start of the range (e.g. `2023-01-01`).
    #[serde(default)]
    pub from: Option<String>,
    /// End of the range; defaults to now.
    #[serde(default)]
    pub to: Option<String>,
}

fn default_instrument() -> String { "SYMBOL".to_string() }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            path: None,
            dir: None,
            instrument: default_instrument(),
            interval: Interval::default(),
            price_field: PriceField::default(),
            date_format: None,
            from: None,
            to: None,
        }
    }
}

/// Strategy selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySettings {
    #[serde(default = "default_strategy")]
    pub id: String,
    #[serde(default)]
    pub params: StrategyParams,
}

fn default_strategy() -> String { AmaCrossover::ID.to_string() }

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            id: default_strategy(),
            params: StrategyParams::default(),
        }
    }
}

/// Parameters for a single test; unset values take the strategy defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub fast: Option<usize>,
    pub n: Option<usize>,
    pub slow: Option<usize>,
}

/// Grid search settings. Ranges are inclusive `[start, end]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeSettings {
    #[serde(default = "default_fast_range")]
    pub fast: (usize, usize),
    #[serde(default = "default_n_range")]
    pub n: (usize, usize),
    #[serde(default = "default_slow_range")]
    pub slow: (usize, usize),
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Stop evaluating new triples after this many seconds.
    #[serde(default)]
    pub time_budget_secs: Option<u64>,
}

fn default_fast_range() -> (usize, usize) { (2, 5) }
fn default_n_range() -> (usize, usize) { (6, 15) }
fn default_slow_range() -> (usize, usize) { (20, 40) }
fn default_true() -> bool { true }

impl Default for OptimizeSettings {
    fn default() -> Self {
        Self {
            fast: default_fast_range(),
            n: default_n_range(),
            slow: default_slow_range(),
            parallel: true,
            time_budget_secs: None,
        }
    }
}

/// Report persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// JSON Lines file of reports; reports are kept in memory when unset.
    #[serde(default)]
    pub path: Option<String>,
}

impl BacktestFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: BacktestFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BacktestError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Parameters for a single test, falling back to `(2, 10, 30)`.
    pub fn to_parameter_set(&self) -> Result<ParameterSet> {
        let defaults = AmaCrossover::default_params();
        let p = &self.strategy.params;
        ParameterSet::try_new(
            p.fast.unwrap_or(defaults.fast),
            p.n.unwrap_or(defaults.n),
            p.slow.unwrap_or(defaults.slow),
        )
    }

    pub fn to_grid(&self) -> Result<ParameterGrid> {
        let o = &self.optimize;
        for (name, (start, end)) in [("fast", o.fast), ("n", o.n), ("slow", o.slow)] {
            if start > end {
                return Err(BacktestError::ConfigError(format!(
                    "optimize.{} range [{}, {}] is empty",
                    name, start, end
                )));
            }
        }
        let grid = ParameterGrid::new(
            ParamRange::from(o.fast),
            ParamRange::from(o.n),
            ParamRange::from(o.slow),
        );
        grid.validate()?;
        Ok(grid)
    }

    /// `[from, to]` of the data section.
    pub fn date_range(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let from = self
            .data
            .from
            .as_deref()
            .ok_or_else(|| BacktestError::ConfigError("data.from is required".to_string()))?;
        let from = parse_datetime(from, None)?;
        let to = match self.data.to.as_deref() {
            Some(s) => parse_datetime(s, None)?,
            None => Utc::now(),
        };
        if from > to {
            return Err(BacktestError::ConfigError(format!(
                "data.from {} is after data.to {}",
                from, to
            )));
        }
        Ok((from, to))
    }

    pub fn to_data_config(&self) -> DataConfig {
        DataConfig {
            date_format: self.data.date_format.clone(),
            interval: self.data.interval,
            ..Default::default()
        }
    }

    /// Build the price provider described by the data section.
    pub fn price_provider(&self) -> Result<Box<dyn PriceProvider>> {
        if let Some(path) = &self.data.path {
            let candles = load_csv(path, &self.to_data_config())?;
            return Ok(Box::new(
                InMemoryPriceProvider::new().with(self.data.instrument.clone(), candles),
            ));
        }
        if let Some(dir) = &self.data.dir {
            return Ok(Box::new(
                CsvPriceProvider::new(dir).with_config(self.to_data_config()),
            ));
        }
        Err(BacktestError::ConfigError(
            "either data.path or data.dir must be set".to_string(),
        ))
    }

    pub fn report_store(&self) -> Result<Box<dyn ResultCache>> {
        Ok(match &self.store.path {
            Some(path) => Box::new(JsonReportStore::open(path)?),
            None => Box::new(InMemoryReportStore::new()),
        })
    }

    pub fn test_request(&self) -> Result<TestRequest> {
        let (from, to) = self.date_range()?;
        Ok(TestRequest {
            instrument: self.data.instrument.clone(),
            from,
            to,
            strategy: self.strategy.id.clone(),
            params: self.to_parameter_set()?,
            interval: self.data.interval,
            price_field: self.data.price_field,
        })
    }

    pub fn train_request(&self) -> Result<TrainRequest> {
        let (from, to) = self.date_range()?;
        Ok(TrainRequest {
            instrument: self.data.instrument.clone(),
            from,
            to,
            strategy: self.strategy.id.clone(),
            grid: self.to_grid()?,
            interval: self.data.interval,
            price_field: self.data.price_field,
            parallel: self.optimize.parallel,
            time_budget: self.optimize.time_budget_secs.map(Duration::from_secs),
        })
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# amatrend configuration file

[data]
path = "data/SBER.csv"
# dir = "data"
instrument = "SBER"
interval = "day"
price_field = "open"
# date_format = "%Y-%m-%d"
from = "2022-01-01"
to = "2023-12-31"

[strategy]
id = "ama"

# Used by `run-config` without --train
[strategy.params]
fast = 2
n = 10
slow = 30

# Inclusive [start, end] ranges searched with --train
[optimize]
fast = [2, 5]
n = [6, 15]
slow = [20, 40]
parallel = true
# time_budget_secs = 60

[store]
path = "reports.jsonl"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceCandle;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = BacktestFileConfig::default();
        assert_eq!(config.strategy.id, "ama");
        assert_eq!(config.data.interval, Interval::Day);
        assert_eq!(config.data.price_field, PriceField::Open);
        assert_eq!(config.to_parameter_set().unwrap(), ParameterSet::new(2, 10, 30));
        assert!(config.optimize.parallel);
    }

    #[test]
    fn test_load_config() {
        let toml_content = r#"
[data]
path = "prices.csv"
instrument = "GAZP"
interval = "hour"
price_field = "close"
from = "2023-01-01"
to = "2023-06-30"

[strategy.params]
fast = 3
n = 8

[optimize]
slow = [10, 12]
parallel = false
time_budget_secs = 5
"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", toml_content).unwrap();

        let config = BacktestFileConfig::load(file.path()).unwrap();
        assert_eq!(config.data.instrument, "GAZP");
        assert_eq!(config.data.interval, Interval::Hour);
        assert_eq!(config.data.price_field, PriceField::Close);
        assert_eq!(config.to_parameter_set().unwrap(), ParameterSet::new(3, 8, 30));

        let request = config.train_request().unwrap();
        assert_eq!(request.grid, ParameterGrid::new((2, 5), (6, 15), (10, 12)));
        assert!(!request.parallel);
        assert_eq!(request.time_budget, Some(Duration::from_secs(5)));
        assert_eq!(
            request.from,
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_values() {
        let mut config = BacktestFileConfig::default();
        config.strategy.params.fast = Some(20);
        assert!(matches!(
            config.to_parameter_set(),
            Err(BacktestError::InvalidParameter(_))
        ));

        config.optimize.fast = (5, 2);
        assert!(matches!(config.to_grid(), Err(BacktestError::ConfigError(_))));

        config.optimize.fast = (0, 2);
        assert!(matches!(config.to_grid(), Err(BacktestError::InvalidParameter(_))));

        assert!(matches!(config.date_range(), Err(BacktestError::ConfigError(_))));
        config.data.from = Some("2024-01-01".to_string());
        config.data.to = Some("2023-01-01".to_string());
        assert!(matches!(config.date_range(), Err(BacktestError::ConfigError(_))));
    }

    #[test]
    fn test_unknown_interval_rejected() {
        let result: std::result::Result<BacktestFileConfig, _> =
            toml::from_str("[data]\ninterval = \"fortnight\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_config() {
        let mut config = BacktestFileConfig::default();
        config.data.from = Some("2023-01-01".to_string());
        config.optimize.time_budget_secs = Some(30);
        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();

        let loaded = BacktestFileConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_example_config() {
        let example = BacktestFileConfig::example();
        let config: BacktestFileConfig = toml::from_str(&example).unwrap();
        assert_eq!(config.data.instrument, "SBER");
        assert_eq!(config.store.path.as_deref(), Some("reports.jsonl"));
        assert!(config.test_request().is_ok());
        assert!(config.train_request().is_ok());
    }

    #[test]
    fn test_price_provider_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("SBER.csv");
        let candles: Vec<PriceCandle> = (0..5)
            .map(|i| {
                let ts = Utc.with_ymd_and_hms(2023, 1, 2 + i, 0, 0, 0).unwrap();
                let p = 100.0 + i as f64;
                PriceCandle::new(ts, p, p + 0.5, p + 1.0, p - 1.0, Interval::Day)
            })
            .collect();
        crate::data::write_csv(&path, &candles).unwrap();

        let mut config = BacktestFileConfig::default();
        config.data.instrument = "SBER".to_string();
        config.data.path = Some(path.to_string_lossy().into_owned());
        let provider = config.price_provider().unwrap();
        let fetched = provider
            .fetch(
                "SBER",
                candles[0].timestamp,
                candles[4].timestamp,
                Interval::Day,
            )
            .unwrap();
        assert_eq!(fetched.len(), 5);

        config.data.path = None;
        config.data.dir = Some(dir.path().to_string_lossy().into_owned());
        assert!(config.price_provider().is_ok());

        config.data.dir = None;
        assert!(matches!(
            config.price_provider(),
            Err(BacktestError::ConfigError(_))
        ));
    }
}
