//! Long/flat crossover engine.
//!
//! Walks the price series once, feeding each step through the AMA and a
//! two-state position machine:
//!
//! - **Entry** (`Flat -> Long`) when the price crosses the AMA from below
//!   (`P[t] > AMA[t] >= P[t-1]`), or, before any position was ever opened,
//!   as soon as the AMA is rising.
//! - **Exit** (`Long -> Flat`) when the price crosses the AMA from above
//!   (`P[t] < AMA[t] <= P[t-1]`). The realized return `AMA[t] / entry - 1`
//!   is added to the running result.
//!
//! The result starts at `1.0`; a run without any closed trade stays there.
//! The buy-and-hold baseline is `P[last] / P[0]`.

use crate::error::Result;
use crate::indicator::AdaptiveMovingAverage;
use crate::types::{Evaluation, ParameterSet, PositionState, StrategyResult};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A closed round trip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_index: usize,
    pub entry_price: f64,
    pub exit_index: usize,
    pub exit_price: f64,
}

impl Trade {
    /// Return of the trade as a fraction (`0.05` is +5%).
    pub fn return_pct(&self) -> f64 {
        self.exit_price / self.entry_price - 1.0
    }

    pub fn is_winner(&self) -> bool {
        self.exit_price > self.entry_price
    }
}

/// Step-by-step record of a run, for inspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Index of the first AMA value in the price series (`margin - 1`).
    pub start_index: usize,
    /// AMA values aligned to `prices[start_index..]`.
    pub ama: Vec<f64>,
    pub trades: Vec<Trade>,
    /// Entry index and price of a position still open at the end.
    pub open_position: Option<(usize, f64)>,
}

/// Position machine of the crossover strategy.
#[derive(Debug, Clone, Copy, Default)]
struct Position {
    state: PositionState,
    entry_index: usize,
    entry_price: f64,
    opened_any: bool,
}

impl Position {
    /// Go long. Returns false when already long.
    fn enter(&mut self, index: usize, price: f64) -> bool {
        self.opened_any = true;
        if self.state == PositionState::Long {
            return false;
        }
        self.state = PositionState::Long;
        self.entry_index = index;
        self.entry_price = price;
        true
    }

    /// Go flat, returning the open entry if there was one.
    fn exit(&mut self) -> Option<(usize, f64)> {
        match self.state {
            PositionState::Long => {
                self.state = PositionState::Flat;
                Some((self.entry_index, self.entry_price))
            }
            PositionState::Flat => None,
        }
    }
}

/// Crossover backtest for one parameter triple.
#[derive(Debug, Clone, Copy)]
pub struct CrossoverEngine {
    params: ParameterSet,
}

impl CrossoverEngine {
    /// Create an engine, rejecting invalid parameters.
    pub fn new(params: ParameterSet) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Backtest `prices`.
    pub fn run(&self, prices: &[f64]) -> Result<Evaluation> {
        self.simulate(prices, None)
    }

    /// Backtest `prices`, also recording the AMA series and trades.
    pub fn run_with_trace(&self, prices: &[f64]) -> Result<(Evaluation, Trace)> {
        let mut trace = Trace::default();
        let evaluation = self.simulate(prices, Some(&mut trace))?;
        Ok((evaluation, trace))
    }

    fn simulate(&self, prices: &[f64], mut trace: Option<&mut Trace>) -> Result<Evaluation> {
        let margin = self.params.margin();
        if prices.len() < margin || prices.len() < 2 {
            return Ok(Evaluation::InsufficientHistory {
                required: margin.max(2),
                available: prices.len(),
            });
        }

        let start = margin - 1;
        if let Some(trace) = trace.as_deref_mut() {
            trace.start_index = start;
            trace.ama.reserve(prices.len() - start);
        }

        let mut ama = AdaptiveMovingAverage::new(self.params);
        let mut position = Position::default();
        let mut result = 1.0;

        for t in start..prices.len() {
            let prev_ama = ama.value();
            let value = ama.next(prices, t)?;
            let price = prices[t];
            let prev_price = prices[t - 1];

            let crossed_up = price > value && value >= prev_price;
            let rising_start = !position.opened_any && prev_ama.is_some_and(|prev| value > prev);

            if crossed_up || rising_start {
                let entry_price = if !position.opened_any && prev_ama.is_some() {
                    (prev_price + price) / 2.0
                } else {
                    value
                };
                if position.enter(t, entry_price) {
                    trace!(index = t, price = entry_price, "enter long");
                }
            }

            if price < value && value <= prev_price {
                if let Some((entry_index, entry_price)) = position.exit() {
                    result += value / entry_price - 1.0;
                    trace!(index = t, price = value, "exit long");
                    if let Some(trace) = trace.as_deref_mut() {
                        trace.trades.push(Trade {
                            entry_index,
                            entry_price,
                            exit_index: t,
                            exit_price: value,
                        });
                    }
                }
            }

            if let Some(trace) = trace.as_deref_mut() {
                trace.ama.push(value);
            }
        }

        if let Some(trace) = trace {
            if position.state == PositionState::Long {
                trace.open_position = Some((position.entry_index, position.entry_price));
            }
        }

        Ok(Evaluation::Completed(StrategyResult {
            strategy_profit: result,
            hold_profit: prices[prices.len() - 1] / prices[0],
            params: Some(self.params),
        }))
    }
}

/// Backtest `prices` with `params`.
pub fn calculate(prices: &[f64], params: &ParameterSet) -> Result<Evaluation> {
    CrossoverEngine::new(*params)?.run(prices)
}
