//! Adaptive Moving Average Crossover Strategy.
//!
//! Goes long when the price crosses above the AMA (or, before the first
//! trade, as soon as the AMA starts rising) and back to flat when the price
//! crosses below it.

use crate::engine::{CrossoverEngine, Trace};
use crate::error::Result;
use crate::strategy::Strategy;
use crate::types::{Evaluation, ParameterSet};

/// AMA Crossover Strategy.
///
/// # Parameters
/// - `fast`: Period of the fastest smoothing constant
/// - `n`: Efficiency ratio lookback
/// - `slow`: Period of the slowest smoothing constant
///
/// `fast < n < slow` is required.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmaCrossover;

impl AmaCrossover {
    pub const ID: &'static str = "ama";

    pub fn new() -> Self {
        Self
    }

    /// Parameters used when none are given.
    pub fn default_params() -> ParameterSet {
        ParameterSet::new(2, 10, 30)
    }
}

impl Strategy for AmaCrossover {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "AMA Crossover"
    }

    fn calculate(&self, prices: &[f64], params: &ParameterSet) -> Result<Evaluation> {
        CrossoverEngine::new(*params)?.run(prices)
    }

    fn trace(&self, prices: &[f64], params: &ParameterSet) -> Result<(Evaluation, Trace)> {
        CrossoverEngine::new(*params)?.run_with_trace(prices)
    }

    fn description(&self) -> &str {
        "Long/flat crossover of price and Kaufman-style adaptive moving average"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BacktestError;
    use crate::optimizer::GridSearch;
    use crate::types::ParameterGrid;

    fn create_trending_prices(trend: f64, count: usize) -> Vec<f64> {
        (0..count)
            .map(|i| 100.0 + trend * i as f64 + (i as f64 * 0.8).sin() * 4.0)
            .collect()
    }

    #[test]
    fn test_default_params_valid() {
        assert!(AmaCrossover::default_params().validate().is_ok());
    }

    #[test]
    fn test_invalid_params() {
        let prices = create_trending_prices(0.5, 50);
        let err = AmaCrossover
            .calculate(&prices, &ParameterSet::new(10, 5, 30))
            .unwrap_err();
        assert!(matches!(err, BacktestError::InvalidParameter(_)));
    }

    #[test]
    fn test_calculate_is_idempotent() {
        let prices = create_trending_prices(0.2, 120);
        let params = ParameterSet::new(2, 6, 14);
        let first = AmaCrossover.calculate(&prices, &params).unwrap();
        let second = AmaCrossover.calculate(&prices, &params).unwrap();

        let (a, b) = (first.result().unwrap(), second.result().unwrap());
        assert_eq!(a.strategy_profit.to_bits(), b.strategy_profit.to_bits());
        assert_eq!(a.hold_profit.to_bits(), b.hold_profit.to_bits());
    }

    #[test]
    fn test_trace_agrees_with_calculate() {
        let prices = create_trending_prices(0.3, 90);
        let params = ParameterSet::new(3, 5, 11);
        let (traced, trace) = AmaCrossover.trace(&prices, &params).unwrap();
        assert_eq!(traced, AmaCrossover.calculate(&prices, &params).unwrap());
        assert_eq!(trace.ama.len(), prices.len() - params.margin() + 1);
    }

    #[test]
    fn test_optimize_through_trait() {
        let prices = create_trending_prices(0.1, 150);
        let search = GridSearch::new(ParameterGrid::new((1, 3), (4, 6), (8, 12)));
        let outcome = AmaCrossover.optimize(&prices, &search).unwrap();
        assert_eq!(outcome, search.run(&prices).unwrap());
    }
}
