//! Adaptive moving average (AMA).
//!
//! The AMA blends each new price into a running average with a weight that
//! follows the market's efficiency ratio: strong directional moves make the
//! average responsive, choppy markets make it sluggish.
//!
//! For a price series `P`, time index `t` and parameters `{fast, n, slow}`:
//!
//! ```text
//! direction  = |P[t] - P[t - n - 1]|
//! volatility = Σ_{i=0}^{n-1} |P[t-i] - P[t-i-1]|
//! er         = direction / volatility
//! sc         = er * (fastest - slowest) + slowest     (squared when er < 0.3)
//! AMA[t]     = sc * P[t] + (1 - sc) * AMA[t-1]
//! ```
//!
//! `direction` spans one more step than `volatility`, so `er` can exceed 1
//! on monotonic runs. It is not clamped.

use crate::error::{BacktestError, Result};
use crate::types::ParameterSet;

/// Below this efficiency ratio the smoothing constant is squared.
pub const WEAK_TREND_THRESHOLD: f64 = 0.3;

/// Smoothing constants derived from the fast and slow periods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingConstants {
    pub fastest: f64,
    pub slowest: f64,
}

impl SmoothingConstants {
    pub fn new(params: &ParameterSet) -> Self {
        Self {
            fastest: 2.0 / (params.fast as f64 + 1.0),
            slowest: 2.0 / (params.slow as f64 + 1.0),
        }
    }

    /// Smoothing constant for a given efficiency ratio.
    pub fn smoothing(&self, er: f64) -> f64 {
        let sc = er * (self.fastest - self.slowest) + self.slowest;
        if er < WEAK_TREND_THRESHOLD {
            sc * sc
        } else {
            sc
        }
    }
}

/// Efficiency ratio of the `n`-step window ending at `t`.
///
/// The lagged price for `direction` is clamped to the first price when
/// `t < n + 1`. The index never wraps around to the end of the series, so
/// no later price leaks into an early ratio. Implementations that index
/// negatively from the end give different values for such `t`, which happens
/// at the first step whenever `n == slow - 1`, e.g. `(1, 2, 3)`.
pub fn efficiency_ratio(prices: &[f64], t: usize, n: usize) -> Result<f64> {
    if t >= prices.len() || t < n {
        return Err(BacktestError::InvalidParameter(format!(
            "window of {} steps ending at index {} does not fit {} prices",
            n,
            t,
            prices.len()
        )));
    }

    let direction = (prices[t] - prices[t.saturating_sub(n + 1)]).abs();
    let volatility: f64 = (0..n)
        .map(|i| (prices[t - i] - prices[t - i - 1]).abs())
        .sum();

    if volatility == 0.0 {
        return Err(BacktestError::IndeterminateVolatility { index: t });
    }

    Ok(direction / volatility)
}

/// Initial AMA value: mean of the `fast + slow / 2` prices preceding `t`.
///
/// When `t < fast + slow / 2` the window starts at the first price and the
/// mean is taken over the prices actually in it. As with
/// [`efficiency_ratio`], the window never wraps to the end of the series.
pub fn seed_value(prices: &[f64], t: usize, params: &ParameterSet) -> f64 {
    let offset = params.fast + params.slow / 2;
    let window = &prices[t.saturating_sub(offset)..t];
    if window.is_empty() {
        return prices[t];
    }
    window.iter().sum::<f64>() / window.len() as f64
}

/// Stateful AMA calculator that carries the previous value between steps.
#[derive(Debug, Clone)]
pub struct AdaptiveMovingAverage {
    params: ParameterSet,
    constants: SmoothingConstants,
    prev: Option<f64>,
}

impl AdaptiveMovingAverage {
    pub fn new(params: ParameterSet) -> Self {
        Self {
            constants: SmoothingConstants::new(&params),
            params,
            prev: None,
        }
    }

    /// The last computed value.
    pub fn value(&self) -> Option<f64> {
        self.prev
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }

    /// Compute the AMA at index `t`, seeding it on the first call.
    pub fn next(&mut self, prices: &[f64], t: usize) -> Result<f64> {
        let prev = match self.prev {
            Some(v) => v,
            None => seed_value(prices, t, &self.params),
        };

        let er = efficiency_ratio(prices, t, self.params.n)?;
        let sc = self.constants.smoothing(er);
        let value = sc * prices[t] + (1.0 - sc) * prev;

        self.prev = Some(value);
        Ok(value)
    }
}

/// AMA values for every index from `margin - 1` to the end of `prices`.
///
/// Returns an empty series when `prices` is shorter than the margin.
pub fn ama_series(prices: &[f64], params: &ParameterSet) -> Result<Vec<f64>> {
    params.validate()?;
    let margin = params.margin();
    if prices.len() < margin {
        return Ok(Vec::new());
    }

    let mut ama = AdaptiveMovingAverage::new(*params);
    (margin - 1..prices.len())
        .map(|t| ama.next(prices, t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoothing_constants() {
        let sc = SmoothingConstants::new(&ParameterSet::new(2, 10, 30));
        assert!((sc.fastest - 2.0 / 3.0).abs() < 1e-12);
        assert!((sc.slowest - 2.0 / 31.0).abs() < 1e-12);
    }

    #[test]
    fn test_efficiency_ratio_exceeds_one() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0];
        // direction = |5 - 2| = 3, volatility = |5 - 4| + |4 - 3| = 2
        let er = efficiency_ratio(&prices, 4, 2).unwrap();
        assert_eq!(er, 1.5);
    }

    #[test]
    fn test_efficiency_ratio_flat_window() {
        let prices = [3.0, 5.0, 5.0, 5.0];
        let err = efficiency_ratio(&prices, 3, 2).unwrap_err();
        assert!(matches!(err, BacktestError::IndeterminateVolatility { index: 3 }));
    }

    #[test]
    fn test_efficiency_ratio_out_of_range() {
        let prices = [1.0, 2.0, 3.0];
        assert!(efficiency_ratio(&prices, 3, 1).is_err());
        assert!(efficiency_ratio(&prices, 1, 2).is_err());
    }

    #[test]
    fn test_efficiency_ratio_clamps_lag() {
        // t = 2, n = 2: lagged index t - n - 1 is before the series start
        let prices = [1.0, 3.0, 2.0];
        let er = efficiency_ratio(&prices, 2, 2).unwrap();
        // direction = |2 - 1|, volatility = |2 - 3| + |3 - 1|
        assert!((er - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_early_windows_ignore_later_prices() {
        let params = ParameterSet::new(1, 2, 6);
        let mut prices = vec![1.0, 3.0, 2.0, 5.0, 4.0];
        let er = efficiency_ratio(&prices, 2, 2).unwrap();
        let seed = seed_value(&prices, 2, &params);

        // A wrapped index would read the last price
        prices[4] = 400.0;
        assert_eq!(efficiency_ratio(&prices, 2, 2).unwrap(), er);
        assert_eq!(seed_value(&prices, 2, &params), seed);
        assert_eq!(seed, 2.0);
    }

    #[test]
    fn test_weak_trend_squares_constant() {
        let sc = SmoothingConstants::new(&ParameterSet::new(2, 5, 30));
        let weak = sc.smoothing(0.1);
        let raw = 0.1 * (sc.fastest - sc.slowest) + sc.slowest;
        assert!((weak - raw * raw).abs() < 1e-15);

        let strong = sc.smoothing(0.5);
        assert!((strong - (0.5 * (sc.fastest - sc.slowest) + sc.slowest)).abs() < 1e-15);
    }

    #[test]
    fn test_seed_value() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        // offset = 1 + 3 / 2 = 2 -> mean of prices[4..6]
        let seed = seed_value(&prices, 6, &ParameterSet::new(1, 2, 3));
        assert_eq!(seed, 5.5);

        // Window start clamped at 0
        let seed = seed_value(&prices, 2, &ParameterSet::new(2, 3, 6));
        assert_eq!(seed, 1.5);
    }

    #[test]
    fn test_ama_step() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0];
        let params = ParameterSet::new(1, 2, 3);
        let mut ama = AdaptiveMovingAverage::new(params);

        let value = ama.next(&prices, 4).unwrap();
        // seed = mean(prices[2..4]) = 3.5, er = 1.5
        let constants = SmoothingConstants::new(&params);
        let sc = 1.5 * (constants.fastest - constants.slowest) + constants.slowest;
        let expected = sc * 5.0 + (1.0 - sc) * 3.5;
        assert_eq!(value, expected);
        assert_eq!(ama.value(), Some(expected));

        ama.reset();
        assert_eq!(ama.value(), None);
    }

    #[test]
    fn test_ama_series_alignment() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + (i as f64 * 0.9).sin() * 3.0).collect();
        let params = ParameterSet::new(2, 4, 8);
        let series = ama_series(&prices, &params).unwrap();
        assert_eq!(series.len(), prices.len() - (params.margin() - 1));
        assert!(series.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_ama_series_short_input() {
        let prices = [1.0, 2.0, 3.0];
        let series = ama_series(&prices, &ParameterSet::new(2, 4, 8)).unwrap();
        assert!(series.is_empty());
    }
}
