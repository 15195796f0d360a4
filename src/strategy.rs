//! Strategy trait and registry.

use crate::engine::Trace;
use crate::error::{BacktestError, Result};
use crate::optimizer::{GridSearch, SearchOutcome};
use crate::types::{Evaluation, ParameterSet};
use std::collections::BTreeMap;

/// A backtestable strategy driven by a parameter triple.
pub trait Strategy: Send + Sync {
    /// Identifier used by the registry and stored in reports.
    fn id(&self) -> &str;

    /// Human readable name.
    fn name(&self) -> &str;

    /// Backtest `prices` with `params`.
    fn calculate(&self, prices: &[f64], params: &ParameterSet) -> Result<Evaluation>;

    /// Backtest and record a step-by-step trace.
    fn trace(&self, prices: &[f64], params: &ParameterSet) -> Result<(Evaluation, Trace)>;

    /// Search the grid of `search` for the most profitable parameters.
    fn optimize(&self, prices: &[f64], search: &GridSearch) -> Result<SearchOutcome> {
        search.run_with(prices, |prices, params| self.calculate(prices, params))
    }

    /// Short description for listings.
    fn description(&self) -> &str {
        ""
    }
}

/// Maps strategy identifiers to implementations.
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Box<dyn Strategy>>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// A registry holding every built-in strategy.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::strategies::AmaCrossover::new()));
        registry
    }

    /// Add a strategy, replacing any previous one with the same id.
    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.insert(strategy.id().to_string(), strategy);
    }

    pub fn get(&self, id: &str) -> Option<&dyn Strategy> {
        self.strategies.get(id).map(|s| s.as_ref())
    }

    /// Look up a strategy, failing with [`BacktestError::UnknownStrategy`].
    pub fn resolve(&self, id: &str) -> Result<&dyn Strategy> {
        self.get(id)
            .ok_or_else(|| BacktestError::UnknownStrategy(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Strategy> {
        self.strategies.values().map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
