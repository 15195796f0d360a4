//! Property-based tests using proptest for invariant testing.
//!
//! These tests verify that:
//! 1. Short histories are reported, never evaluated
//! 2. Hold profit depends only on the first and last price
//! 3. Evaluation is deterministic
//! 4. The optimizer only returns ordered triples and never loses to a triple it evaluated
//! 5. Parallel and sequential searches agree

use proptest::prelude::*;

use amatrend::engine::calculate;
use amatrend::error::BacktestError;
use amatrend::indicator::{ama_series, efficiency_ratio};
use amatrend::optimizer::{GridSearch, SearchOutcome};
use amatrend::types::{Evaluation, ParameterGrid, ParameterSet};

// ============================================================================
// Generators
// ============================================================================

/// Ordered parameter triples `fast < n < slow` with `fast >= 2`.
fn ordered_params() -> impl Strategy<Value = ParameterSet> {
    (2usize..6, 1usize..6, 1usize..10)
        .prop_map(|(fast, dn, ds)| ParameterSet::new(fast, fast + dn, fast + dn + ds))
}

/// Random walk prices that never repeat consecutively.
///
/// Step sizes stay within a factor of three of each other so that the
/// efficiency ratio, and with it the smoothing constant, stays bounded.
fn price_walk(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<f64>> {
    (10.0..500.0f64, prop::collection::vec((0.5..1.5f64, any::<bool>()), len)).prop_map(
        |(start, steps)| {
            let mut price = start;
            steps
                .into_iter()
                .map(|(size, up)| {
                    let p = price;
                    price = if up || price - size < 1.0 {
                        price + size
                    } else {
                        price - size
                    };
                    p
                })
                .collect()
        },
    )
}

// ============================================================================
// Indicator Properties
// ============================================================================

proptest! {
    #[test]
    fn efficiency_ratio_is_non_negative(prices in price_walk(20..60), n in 1usize..15) {
        for t in n..prices.len() {
            let er = efficiency_ratio(&prices, t, n).unwrap();
            prop_assert!(er >= 0.0);
            prop_assert!(er.is_finite());
        }
    }

    #[test]
    fn ama_series_covers_every_step_after_margin(
        prices in price_walk(40..120),
        params in ordered_params(),
    ) {
        let series = ama_series(&prices, &params).unwrap();
        prop_assert_eq!(series.len(), prices.len() + 1 - params.margin());
        prop_assert!(series.iter().all(|v| v.is_finite()));
    }
}

// ============================================================================
// Engine Properties
// ============================================================================

proptest! {
    #[test]
    fn short_history_is_not_evaluated(prices in price_walk(1..40), params in ordered_params()) {
        let evaluation = calculate(&prices, &params).unwrap();
        if prices.len() < params.margin() {
            prop_assert_eq!(
                evaluation,
                Evaluation::InsufficientHistory {
                    required: params.margin(),
                    available: prices.len(),
                }
            );
        } else {
            prop_assert!(evaluation.is_completed());
        }
    }

    #[test]
    fn hold_profit_ignores_parameters(
        prices in price_walk(40..150),
        a in ordered_params(),
        b in ordered_params(),
    ) {
        let expected = prices[prices.len() - 1] / prices[0];
        let ra = *calculate(&prices, &a).unwrap().result().unwrap();
        let rb = *calculate(&prices, &b).unwrap().result().unwrap();
        prop_assert_eq!(ra.hold_profit, expected);
        prop_assert_eq!(rb.hold_profit, expected);
    }

    #[test]
    fn evaluation_is_deterministic(prices in price_walk(30..150), params in ordered_params()) {
        let first = calculate(&prices, &params).unwrap();
        let second = calculate(&prices, &params).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn unordered_params_are_rejected(fast in 1usize..20, n in 1usize..20, slow in 1usize..20) {
        prop_assume!(!(fast < n && n < slow));
        let result = calculate(&[1.0, 2.0, 3.0], &ParameterSet::new(fast, n, slow));
        prop_assert!(matches!(result, Err(BacktestError::InvalidParameter(_))), "expected InvalidParameter");
    }
}

// ============================================================================
// Optimizer Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn winner_is_ordered_and_maximal(
        prices in price_walk(40..120),
        fast_end in 2usize..5,
        n_end in 3usize..8,
        slow_end in 4usize..16,
    ) {
        let grid = ParameterGrid::new((2, fast_end), (1, n_end), (1, slow_end));
        let outcome = GridSearch::new(grid).run(&prices).unwrap();

        match outcome {
            SearchOutcome::Best { params, result, stats } => {
                prop_assert!(params.is_ordered());
                prop_assert_eq!(result.params, Some(params));
                for triple in grid.ordered_triples() {
                    if let Evaluation::Completed(r) = calculate(&prices, &triple).unwrap() {
                        prop_assert!(r.strategy_profit <= result.strategy_profit);
                    }
                }
                prop_assert_eq!(
                    stats.evaluated + stats.insufficient_history + stats.indeterminate,
                    grid.ordered_triples().count()
                );
            }
            SearchOutcome::NoFeasibleParameters { stats } => {
                prop_assert_eq!(stats.evaluated, 0);
            }
        }
    }

    #[test]
    fn parallel_matches_sequential(prices in price_walk(40..150)) {
        let grid = ParameterGrid::new((2, 4), (2, 8), (5, 16));
        let sequential = GridSearch::new(grid).run(&prices).unwrap();
        let parallel = GridSearch::new(grid).parallel(true).run(&prices).unwrap();
        prop_assert_eq!(sequential, parallel);
    }
}
