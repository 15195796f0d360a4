//! Built-in strategies.
//!
//! - [`AmaCrossover`]: price / adaptive moving average crossover (`"ama"`)

mod ama_crossover;

pub use ama_crossover::AmaCrossover;
