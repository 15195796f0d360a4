//! Exhaustive grid search over AMA parameters.
//!
//! Every ordered triple of the [`ParameterGrid`] is backtested once and the
//! one with the highest strategy profit wins. Unordered triples are skipped
//! before reaching the engine. Cells that fail numerically (flat price
//! windows) or lack history are counted and ignored; they never abort the
//! search.
//!
//! # Example
//!
//! ```
//! use amatrend::optimizer::{GridSearch, SearchOutcome};
//! use amatrend::types::ParameterGrid;
//!
//! let prices: Vec<f64> = (0..200)
//!     .map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.05)
//!     .collect();
//!
//! let grid = ParameterGrid::new((2, 4), (5, 8), (10, 20));
//! match GridSearch::new(grid).run(&prices).unwrap() {
//!     SearchOutcome::Best { params, result, .. } => {
//!         println!("{} -> {:.4}", params, result.strategy_profit);
//!     }
//!     SearchOutcome::NoFeasibleParameters { .. } => println!("nothing to test"),
//! }
//! ```

use crate::engine::calculate;
use crate::error::{BacktestError, Result};
use crate::types::{Evaluation, ParameterGrid, ParameterSet, StrategyResult};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Counters collected during a search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    /// Size of the full Cartesian product.
    pub combinations: usize,
    /// Triples rejected by the `fast < n < slow` ordering.
    pub skipped_unordered: usize,
    /// Triples that produced a profit.
    pub evaluated: usize,
    /// Triples whose margin exceeds the price history.
    pub insufficient_history: usize,
    /// Triples that hit a zero-volatility window.
    pub indeterminate: usize,
    /// Triples left unevaluated because the time budget ran out.
    pub not_reached: usize,
    pub truncated: bool,
}

/// Result of a grid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchOutcome {
    /// The best triple, with the result of its own evaluation.
    Best {
        params: ParameterSet,
        result: StrategyResult,
        stats: SearchStats,
    },
    /// No ordered triple produced a result.
    NoFeasibleParameters { stats: SearchStats },
}

impl SearchOutcome {
    pub fn stats(&self) -> &SearchStats {
        match self {
            SearchOutcome::Best { stats, .. } => stats,
            SearchOutcome::NoFeasibleParameters { stats } => stats,
        }
    }

    pub fn best(&self) -> Option<(&ParameterSet, &StrategyResult)> {
        match self {
            SearchOutcome::Best { params, result, .. } => Some((params, result)),
            SearchOutcome::NoFeasibleParameters { .. } => None,
        }
    }

    /// Winning parameters and result, or [`BacktestError::NoFeasibleParameters`].
    pub fn into_result(self) -> Result<(ParameterSet, StrategyResult)> {
        match self {
            SearchOutcome::Best { params, result, .. } => Ok((params, result)),
            SearchOutcome::NoFeasibleParameters { .. } => Err(BacktestError::NoFeasibleParameters),
        }
    }
}

/// What happened to one grid cell.
#[derive(Debug, Clone, Copy)]
enum Cell {
    Scored(StrategyResult),
    InsufficientHistory,
    Indeterminate,
    NotReached,
}

/// Grid search configuration.
#[derive(Debug, Clone)]
pub struct GridSearch {
    grid: ParameterGrid,
    parallel: bool,
    time_budget: Option<Duration>,
    show_progress: bool,
}

impl GridSearch {
    pub fn new(grid: ParameterGrid) -> Self {
        Self {
            grid,
            parallel: false,
            time_budget: None,
            show_progress: false,
        }
    }

    /// Evaluate cells on the rayon thread pool.
    ///
    /// The winner is the same as in a sequential run.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Stop starting new evaluations once this much time has passed.
    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Search `prices` for the most profitable triple.
    pub fn run(&self, prices: &[f64]) -> Result<SearchOutcome> {
        self.run_with(prices, calculate)
    }

    /// Search with a custom evaluation function.
    ///
    /// `evaluate` is only ever called with ordered triples.
    pub fn run_with<F>(&self, prices: &[f64], evaluate: F) -> Result<SearchOutcome>
    where
        F: Fn(&[f64], &ParameterSet) -> Result<Evaluation> + Sync,
    {
        self.grid.validate()?;

        let combinations = self.grid.num_combinations()?;
        let triples: Vec<ParameterSet> = self.grid.ordered_triples().collect();
        let mut stats = SearchStats {
            combinations,
            skipped_unordered: combinations - triples.len(),
            ..Default::default()
        };

        info!(
            "Grid search over {} combinations ({} ordered) on {} prices",
            stats.combinations,
            triples.len(),
            prices.len()
        );

        let deadline = self.time_budget.map(|budget| Instant::now() + budget);
        let progress = self.progress_bar(triples.len());

        let evaluate_one = |params: &ParameterSet| -> Result<Cell> {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(Cell::NotReached);
            }
            let cell = classify(params, evaluate(prices, params));
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            cell
        };

        let cells: Vec<Cell> = if self.parallel {
            triples.par_iter().map(evaluate_one).collect::<Result<_>>()?
        } else {
            triples.iter().map(evaluate_one).collect::<Result<_>>()?
        };

        if let Some(pb) = progress {
            pb.finish_with_message("Grid search complete");
        }

        let mut best: Option<(ParameterSet, StrategyResult)> = None;
        for (params, cell) in triples.iter().zip(cells) {
            match cell {
                Cell::Scored(result) => {
                    stats.evaluated += 1;
                    // Strict comparison keeps the earliest triple on ties
                    let improves = best
                        .as_ref()
                        .map_or(true, |(_, b)| result.strategy_profit > b.strategy_profit);
                    if improves {
                        best = Some((*params, result));
                    }
                }
                Cell::InsufficientHistory => stats.insufficient_history += 1,
                Cell::Indeterminate => stats.indeterminate += 1,
                Cell::NotReached => stats.not_reached += 1,
            }
        }
        stats.truncated = stats.not_reached > 0;

        if stats.truncated {
            warn!(
                "Time budget exhausted, {} of {} triples not evaluated",
                stats.not_reached,
                triples.len()
            );
        }

        match best {
            Some((params, result)) => {
                info!(
                    "Best parameters {}: strategy profit {:.4}, hold profit {:.4}",
                    params, result.strategy_profit, result.hold_profit
                );
                Ok(SearchOutcome::Best {
                    params,
                    result,
                    stats,
                })
            }
            None => {
                warn!("No feasible parameters: {:?}", stats);
                Ok(SearchOutcome::NoFeasibleParameters { stats })
            }
        }
    }

    fn progress_bar(&self, len: usize) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        Some(pb)
    }
}

fn classify(params: &ParameterSet, evaluation: Result<Evaluation>) -> Result<Cell> {
    match evaluation {
        Ok(Evaluation::Completed(result)) => Ok(Cell::Scored(result)),
        Ok(Evaluation::InsufficientHistory { .. }) => Ok(Cell::InsufficientHistory),
        Err(BacktestError::IndeterminateVolatility { index }) => {
            debug!("Skipping {}: flat window at index {}", params, index);
            Ok(Cell::Indeterminate)
        }
        Err(e) => Err(e),
    }
}

/// Sequential grid search with default settings.
pub fn optimize(prices: &[f64], grid: &ParameterGrid) -> Result<SearchOutcome> {
    GridSearch::new(*grid).run(prices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(count: usize) -> Vec<f64> {
        (0..count)
            .map(|i| 100.0 + (i as f64 * 0.35).sin() * 8.0 + (i as f64 * 0.11).cos() * 3.0)
            .collect()
    }

    #[test]
    fn test_single_triple() {
        let prices = wave(60);
        let grid = ParameterGrid::new((1, 1), (2, 2), (3, 3));
        let outcome = optimize(&prices, &grid).unwrap();

        let (params, result) = outcome.best().unwrap();
        assert_eq!(*params, ParameterSet::new(1, 2, 3));
        assert_eq!(outcome.stats().evaluated, 1);

        let direct = calculate(&prices, params).unwrap();
        assert_eq!(direct.result(), Some(result));
    }

    #[test]
    fn test_infeasible_ordering() {
        let prices = wave(60);
        let grid = ParameterGrid::new((5, 5), (3, 3), (1, 1));
        let outcome = optimize(&prices, &grid).unwrap();

        assert!(matches!(outcome, SearchOutcome::NoFeasibleParameters { .. }));
        assert_eq!(outcome.stats().skipped_unordered, 1);
        assert!(matches!(
            outcome.into_result(),
            Err(BacktestError::NoFeasibleParameters)
        ));
    }

    #[test]
    fn test_all_insufficient_history() {
        let prices = wave(8);
        let grid = ParameterGrid::new((1, 2), (3, 4), (10, 12));
        let outcome = optimize(&prices, &grid).unwrap();

        assert!(matches!(outcome, SearchOutcome::NoFeasibleParameters { .. }));
        assert_eq!(outcome.stats().insufficient_history, 12);
    }

    #[test]
    fn test_zero_range_rejected() {
        let grid = ParameterGrid::new((0, 2), (3, 4), (5, 6));
        let err = optimize(&wave(30), &grid).unwrap_err();
        assert!(matches!(err, BacktestError::InvalidParameter(_)));
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let grid = ParameterGrid::new((1, usize::MAX), (2, usize::MAX), (3, 40));
        let err = GridSearch::new(grid).parallel(true).run(&wave(30)).unwrap_err();
        assert!(matches!(err, BacktestError::InvalidParameter(_)));
    }

    #[test]
    fn test_indeterminate_cells_are_skipped() {
        // The two-step window goes flat at index 4
        let mut prices = vec![10.0, 11.0, 12.0];
        prices.extend(std::iter::repeat(12.0).take(20));
        let grid = ParameterGrid::new((1, 1), (2, 2), (3, 3));
        let outcome = optimize(&prices, &grid).unwrap();

        assert_eq!(outcome.stats().indeterminate, 1);
        assert!(matches!(outcome, SearchOutcome::NoFeasibleParameters { .. }));
    }

    #[test]
    fn test_winner_is_maximum_and_keeps_own_hold_profit() {
        let prices = wave(150);
        let grid = ParameterGrid::new((1, 4), (3, 7), (8, 16));
        let outcome = optimize(&prices, &grid).unwrap();
        let (best_params, best) = outcome.best().unwrap();

        for params in grid.ordered_triples() {
            if let Ok(Evaluation::Completed(r)) = calculate(&prices, &params) {
                assert!(r.strategy_profit <= best.strategy_profit);
            }
        }

        let own = calculate(&prices, best_params).unwrap();
        assert_eq!(own.result().unwrap().hold_profit, best.hold_profit);
        assert_eq!(best.params, Some(*best_params));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let prices = wave(200);
        let grid = ParameterGrid::new((1, 5), (3, 9), (8, 20));
        let sequential = GridSearch::new(grid).run(&prices).unwrap();
        let parallel = GridSearch::new(grid).parallel(true).run(&prices).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_zero_time_budget_truncates() {
        let prices = wave(100);
        let grid = ParameterGrid::new((1, 3), (4, 6), (8, 12));
        let outcome = GridSearch::new(grid)
            .time_budget(Duration::ZERO)
            .run(&prices)
            .unwrap();

        let stats = outcome.stats();
        assert!(stats.truncated);
        assert_eq!(stats.evaluated, 0);
        assert!(matches!(outcome, SearchOutcome::NoFeasibleParameters { .. }));
    }
}
