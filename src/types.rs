//! Core data types for the backtester.

use crate::error::{BacktestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sampling interval of a price candle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Interval {
    #[serde(rename = "1min")]
    Min1,
    #[serde(rename = "2min")]
    Min2,
    #[serde(rename = "3min")]
    Min3,
    #[serde(rename = "5min")]
    Min5,
    #[serde(rename = "10min")]
    Min10,
    #[serde(rename = "15min")]
    Min15,
    #[serde(rename = "30min")]
    Min30,
    #[serde(rename = "hour")]
    Hour,
    #[default]
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "month")]
    Month,
}

impl Interval {
    pub const ALL: [Interval; 11] = [
        Interval::Min1,
        Interval::Min2,
        Interval::Min3,
        Interval::Min5,
        Interval::Min10,
        Interval::Min15,
        Interval::Min30,
        Interval::Hour,
        Interval::Day,
        Interval::Week,
        Interval::Month,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Min1 => "1min",
            Interval::Min2 => "2min",
            Interval::Min3 => "3min",
            Interval::Min5 => "5min",
            Interval::Min10 => "10min",
            Interval::Min15 => "15min",
            Interval::Min30 => "30min",
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        Interval::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| BacktestError::ConfigError(format!("Unknown interval: '{}'", s)))
    }
}

/// A single price candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceCandle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    #[serde(default)]
    pub interval: Interval,
}

impl PriceCandle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        close: f64,
        high: f64,
        low: f64,
        interval: Interval,
    ) -> Self {
        Self {
            timestamp,
            open,
            close,
            high,
            low,
            interval,
        }
    }

    /// Validate that candle data is consistent.
    pub fn validate(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }

    /// Read the given price field.
    pub fn price(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::Close => self.close,
        }
    }
}

/// Which candle price feeds the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceField {
    #[default]
    Open,
    Close,
}

/// Extract one price per candle.
pub fn price_series(candles: &[PriceCandle], field: PriceField) -> Vec<f64> {
    candles.iter().map(|c| c.price(field)).collect()
}

/// AMA parameter triple.
///
/// Valid when every value is positive and `fast < n < slow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterSet {
    pub fast: usize,
    pub n: usize,
    pub slow: usize,
}

impl ParameterSet {
    pub fn new(fast: usize, n: usize, slow: usize) -> Self {
        Self { fast, n, slow }
    }

    /// Create a parameter set, rejecting invalid triples.
    pub fn try_new(fast: usize, n: usize, slow: usize) -> Result<Self> {
        let params = Self::new(fast, n, slow);
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("fast", self.fast), ("n", self.n), ("slow", self.slow)] {
            if value == 0 {
                return Err(BacktestError::InvalidParameter(format!(
                    "`{}` must be greater than 0",
                    name
                )));
            }
        }
        if !self.is_ordered() {
            return Err(BacktestError::InvalidParameter(format!(
                "`fast` must be < `n` and `n` must be < `slow` (got fast={}, n={}, slow={})",
                self.fast, self.n, self.slow
            )));
        }
        Ok(())
    }

    /// `fast < n < slow`.
    pub fn is_ordered(&self) -> bool {
        self.fast < self.n && self.n < self.slow
    }

    /// Minimum history length before the indicator is defined.
    pub fn margin(&self) -> usize {
        self.fast.max(self.n).max(self.slow)
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fast={} n={} slow={}", self.fast, self.n, self.slow)
    }
}

/// Position held by the crossover engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionState {
    #[default]
    Flat,
    Long,
}

/// Outcome of a single backtest.
///
/// Profits are multipliers: `1.0` is breakeven.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    pub strategy_profit: f64,
    pub hold_profit: f64,
    pub params: Option<ParameterSet>,
}

impl StrategyResult {
    /// Whether the strategy beat buy-and-hold.
    pub fn beats_hold(&self) -> bool {
        self.strategy_profit > self.hold_profit
    }
}

/// Result of one engine evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Evaluation {
    Completed(StrategyResult),
    /// The series is shorter than the parameters' margin (or than 2 prices).
    InsufficientHistory { required: usize, available: usize },
}

impl Evaluation {
    pub fn result(&self) -> Option<&StrategyResult> {
        match self {
            Evaluation::Completed(r) => Some(r),
            Evaluation::InsufficientHistory { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Evaluation::Completed(_))
    }

    /// Convert the no-result outcome into [`BacktestError::InsufficientHistory`].
    pub fn into_result(self) -> Result<StrategyResult> {
        match self {
            Evaluation::Completed(r) => Ok(r),
            Evaluation::InsufficientHistory {
                required,
                available,
            } => Err(BacktestError::InsufficientHistory {
                required,
                available,
            }),
        }
    }
}

/// Inclusive integer range of parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamRange {
    pub start: usize,
    pub end: usize,
}

impl ParamRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn single(value: usize) -> Self {
        Self::new(value, value)
    }

    pub fn values(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start).saturating_add(1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, value: usize) -> bool {
        self.start <= value && value <= self.end
    }
}

impl From<(usize, usize)> for ParamRange {
    fn from((start, end): (usize, usize)) -> Self {
        Self::new(start, end)
    }
}

impl fmt::Display for ParamRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Search space of the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterGrid {
    pub fast: ParamRange,
    pub n: ParamRange,
    pub slow: ParamRange,
}

impl ParameterGrid {
    pub fn new(
        fast: impl Into<ParamRange>,
        n: impl Into<ParamRange>,
        slow: impl Into<ParamRange>,
    ) -> Self {
        Self {
            fast: fast.into(),
            n: n.into(),
            slow: slow.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, range) in [("fast", self.fast), ("n", self.n), ("slow", self.slow)] {
            if range.start == 0 || range.end == 0 {
                return Err(BacktestError::InvalidParameter(format!(
                    "`{}` range {} must contain only values greater than 0",
                    name, range
                )));
            }
        }
        self.num_combinations()?;
        Ok(())
    }

    /// Size of the full Cartesian product, ordered or not.
    ///
    /// A product that does not fit in `usize` is an invalid grid.
    pub fn num_combinations(&self) -> Result<usize> {
        self.fast
            .len()
            .checked_mul(self.n.len())
            .and_then(|c| c.checked_mul(self.slow.len()))
            .ok_or_else(|| {
                BacktestError::InvalidParameter(format!(
                    "grid fast {} n {} slow {} has too many combinations",
                    self.fast, self.n, self.slow
                ))
            })
    }

    /// Ordered triples in enumeration order: `slow` outermost, `fast` innermost.
    pub fn ordered_triples(&self) -> impl Iterator<Item = ParameterSet> + '_ {
        self.slow.values().flat_map(move |slow| {
            self.n.values().flat_map(move |n| {
                self.fast
                    .values()
                    .map(move |fast| ParameterSet::new(fast, n, slow))
                    .filter(ParameterSet::is_ordered)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_candle_validation() {
        let valid = PriceCandle::new(sample_timestamp(), 100.0, 102.0, 105.0, 98.0, Interval::Day);
        assert!(valid.validate());

        // High below low
        let invalid = PriceCandle::new(sample_timestamp(), 100.0, 102.0, 95.0, 98.0, Interval::Day);
        assert!(!invalid.validate());
    }

    #[test]
    fn test_price_field() {
        let candle = PriceCandle::new(sample_timestamp(), 100.0, 102.0, 105.0, 98.0, Interval::Day);
        assert_eq!(candle.price(PriceField::Open), 100.0);
        assert_eq!(candle.price(PriceField::Close), 102.0);
        assert_eq!(PriceField::default(), PriceField::Open);
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!("day".parse::<Interval>().unwrap(), Interval::Day);
        assert_eq!("1min".parse::<Interval>().unwrap(), Interval::Min1);
        assert_eq!(Interval::Hour.to_string(), "hour");
        assert!("fortnight".parse::<Interval>().is_err());
    }

    #[test]
    fn test_parameter_validation() {
        assert!(ParameterSet::try_new(2, 5, 10).is_ok());
        assert!(matches!(
            ParameterSet::try_new(0, 5, 10),
            Err(BacktestError::InvalidParameter(_))
        ));
        assert!(matches!(
            ParameterSet::try_new(5, 5, 10),
            Err(BacktestError::InvalidParameter(_))
        ));
        assert!(matches!(
            ParameterSet::try_new(2, 12, 10),
            Err(BacktestError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_margin() {
        assert_eq!(ParameterSet::new(2, 5, 10).margin(), 10);
        // Margin is the largest value even for an unordered triple
        assert_eq!(ParameterSet::new(12, 5, 10).margin(), 12);
    }

    #[test]
    fn test_param_range() {
        let range = ParamRange::new(3, 6);
        assert_eq!(range.len(), 4);
        assert!(range.contains(6));
        assert!(!range.contains(7));

        let empty = ParamRange::new(5, 1);
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
        assert_eq!(empty.values().count(), 0);
    }

    #[test]
    fn test_grid_enumeration_order() {
        let grid = ParameterGrid::new((1, 2), (2, 3), (3, 4));
        let triples: Vec<_> = grid.ordered_triples().collect();

        assert_eq!(grid.num_combinations().unwrap(), 8);
        assert_eq!(
            triples,
            vec![
                ParameterSet::new(1, 2, 3),
                ParameterSet::new(1, 2, 4),
                ParameterSet::new(1, 3, 4),
                ParameterSet::new(2, 3, 4),
            ]
        );
        assert!(triples.iter().all(|p| p.fast < p.n && p.n < p.slow));
    }

    #[test]
    fn test_grid_rejects_zero() {
        let grid = ParameterGrid::new((0, 2), (2, 3), (3, 4));
        assert!(grid.validate().is_err());
        assert!(ParameterGrid::new((1, 2), (2, 3), (3, 4)).validate().is_ok());
    }

    #[test]
    fn test_grid_rejects_overflowing_ranges() {
        assert_eq!(ParamRange::new(1, usize::MAX).len(), usize::MAX);

        let grid = ParameterGrid::new((1, 3), (2, 8), (1, usize::MAX));
        assert!(matches!(
            grid.num_combinations(),
            Err(BacktestError::InvalidParameter(_))
        ));
        assert!(matches!(
            grid.validate(),
            Err(BacktestError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_evaluation_into_result() {
        let eval = Evaluation::InsufficientHistory {
            required: 10,
            available: 3,
        };
        assert!(eval.result().is_none());
        assert!(matches!(
            eval.into_result(),
            Err(BacktestError::InsufficientHistory {
                required: 10,
                available: 3
            })
        ));
    }
}
