//! Error types for the backtester.

use thiserror::Error;

/// Main error type for the backtester.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The efficiency ratio denominator is zero: prices did not move over the
    /// lookback window ending at `index`.
    #[error("Indeterminate volatility: prices are flat over the window ending at index {index}")]
    IndeterminateVolatility { index: usize },

    #[error("Insufficient history: {required} prices required, {available} available")]
    InsufficientHistory { required: usize, available: usize },

    #[error("No feasible parameters in the search grid")]
    NoFeasibleParameters,

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("No data loaded")]
    NoData,

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl BacktestError {
    /// Whether the error comes from caller input rather than from the data.
    ///
    /// Caller errors are never worth retrying with the same arguments.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            BacktestError::InvalidParameter(_)
                | BacktestError::UnknownStrategy(_)
                | BacktestError::ConfigError(_)
        )
    }
}

/// Result type alias for backtest operations.
pub type Result<T> = std::result::Result<T, BacktestError>;
