//! Backtesting workflows over a price provider and a report store.
//!
//! [`Backtester`] ties the pieces together: prices come from a
//! [`PriceProvider`] and are kept in a local [`CandleStore`]; strategies are
//! resolved by id from a [`StrategyRegistry`]; finished runs are written to a
//! [`ResultCache`].
//!
//! When the report store already holds a run of the same strategy covering
//! the requested range and the candle cache holds an earlier fetch of the
//! whole range, the provider is not asked again.

use crate::data::{CandleStore, PriceProvider};
use crate::error::{BacktestError, Result};
use crate::optimizer::{GridSearch, SearchOutcome};
use crate::store::{Report, ResultCache, TopQuery};
use crate::strategy::StrategyRegistry;
use crate::types::{
    price_series, Interval, ParameterGrid, ParameterSet, PriceCandle, PriceField, StrategyResult,
};
use crate::viz::trace_report;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, Level};

/// Width of the diagnostic sparklines logged after training.
const TRACE_WIDTH: usize = 80;

/// A single backtest of fixed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRequest {
    pub instrument: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub strategy: String,
    pub params: ParameterSet,
    #[serde(default)]
    pub interval: Interval,
    #[serde(default)]
    pub price_field: PriceField,
}

/// A grid search over parameter ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    pub instrument: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub strategy: String,
    pub grid: ParameterGrid,
    #[serde(default)]
    pub interval: Interval,
    #[serde(default)]
    pub price_field: PriceField,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub time_budget: Option<Duration>,
}

/// Orchestrates data access, strategy evaluation and report persistence.
pub struct Backtester {
    provider: Box<dyn PriceProvider>,
    reports: Box<dyn ResultCache>,
    candles: CandleStore,
    registry: StrategyRegistry,
    show_progress: bool,
}

impl Backtester {
    pub fn new(provider: Box<dyn PriceProvider>, reports: Box<dyn ResultCache>) -> Self {
        Self {
            provider,
            reports,
            candles: CandleStore::new(),
            registry: StrategyRegistry::with_builtin(),
            show_progress: false,
        }
    }

    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Show a progress bar during grid searches.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Candles of `instrument` within `[from, to]`.
    ///
    /// With a strategy id, a stored report covering the range means the
    /// candles may already be local. They are served from the cache only if
    /// this process fetched the whole range before; otherwise they are
    /// fetched and cached.
    pub fn fetch_prices(
        &self,
        instrument: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
        strategy: Option<&str>,
    ) -> Result<Vec<PriceCandle>> {
        if from > to {
            return Err(BacktestError::InvalidParameter(format!(
                "range start {} is after range end {}",
                from, to
            )));
        }

        let covered = match strategy {
            Some(id) => self
                .reports
                .lookup(instrument, id, interval, from, to)?
                .is_some(),
            None => false,
        };

        if covered && self.candles.covers(instrument, interval, from, to) {
            debug!("Prices for {} {}..{} served from cache", instrument, from, to);
        } else {
            let fetched = self.provider.fetch(instrument, from, to, interval)?;
            info!("Fetched {} {} candles for {}", fetched.len(), interval, instrument);
            self.candles.write(instrument, interval, from, to, &fetched);
        }

        Ok(self.candles.read(instrument, interval, from, to))
    }

    /// Candles for presentation, always refreshed from the provider.
    pub fn prices(
        &self,
        instrument: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<PriceCandle>> {
        self.fetch_prices(instrument, from, to, interval, None)
    }

    /// Backtest fixed parameters and store the report.
    ///
    /// Too short a history is reported as [`BacktestError::InsufficientHistory`].
    pub fn test_strategy(&self, request: &TestRequest) -> Result<StrategyResult> {
        let strategy = self.registry.resolve(&request.strategy)?;
        request.params.validate()?;

        let candles = self.fetch_prices(
            &request.instrument,
            request.from,
            request.to,
            request.interval,
            Some(&request.strategy),
        )?;
        let prices = price_series(&candles, request.price_field);

        let result = strategy.calculate(&prices, &request.params)?.into_result()?;
        info!(
            "{} {} on {}: strategy {:.4}, hold {:.4}",
            strategy.name(),
            request.params,
            request.instrument,
            result.strategy_profit,
            result.hold_profit
        );

        self.reports.store(Report {
            created_at: Utc::now(),
            instrument: request.instrument.clone(),
            strategy: request.strategy.clone(),
            interval: request.interval,
            range_from: request.from,
            range_to: request.to,
            strategy_profit: result.strategy_profit,
            hold_profit: result.hold_profit,
            params: Some(request.params),
        })?;

        Ok(result)
    }

    /// Search the grid for the best parameters and store a report for them.
    ///
    /// Nothing is stored when no parameters were feasible.
    pub fn train_strategy(&self, request: &TrainRequest) -> Result<SearchOutcome> {
        let strategy = self.registry.resolve(&request.strategy)?;
        request.grid.validate()?;

        let candles = self.fetch_prices(
            &request.instrument,
            request.from,
            request.to,
            request.interval,
            Some(&request.strategy),
        )?;
        let prices = price_series(&candles, request.price_field);

        let mut search = GridSearch::new(request.grid)
            .parallel(request.parallel)
            .show_progress(self.show_progress);
        if let Some(budget) = request.time_budget {
            search = search.time_budget(budget);
        }

        let outcome = strategy.optimize(&prices, &search)?;

        if let SearchOutcome::Best { params, result, .. } = &outcome {
            if tracing::enabled!(Level::DEBUG) {
                debug!(
                    "\n{}",
                    trace_report(strategy, &prices, params, TRACE_WIDTH)?
                );
            }

            self.reports.store(Report {
                created_at: Utc::now(),
                instrument: request.instrument.clone(),
                strategy: request.strategy.clone(),
                interval: request.interval,
                range_from: request.from,
                range_to: request.to,
                strategy_profit: result.strategy_profit,
                hold_profit: result.hold_profit,
                params: Some(*params),
            })?;
        }

        Ok(outcome)
    }

    /// Best stored reports.
    pub fn top_results(&self, query: &TopQuery) -> Result<Vec<Report>> {
        self.reports.top(query)
    }
}
