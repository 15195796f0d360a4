//! Terminal visualization of backtest traces.
//!
//! Used to inspect a winning parameter set after a grid search: prices and
//! the AMA are drawn as sparklines on a shared scale, followed by the list of
//! trades.

use crate::engine::Trace;
use crate::error::Result;
use crate::strategy::Strategy;
use crate::types::{Evaluation, ParameterSet};
use std::fmt::Write;

/// Characters used for sparkline rendering, ordered from low to high.
const SPARKLINE_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Configuration for sparkline generation.
#[derive(Debug, Clone)]
pub struct SparklineConfig {
    /// Maximum width in characters.
    pub width: usize,
    /// Custom minimum value (defaults to the data minimum).
    pub min_value: Option<f64>,
    /// Custom maximum value (defaults to the data maximum).
    pub max_value: Option<f64>,
}

impl Default for SparklineConfig {
    fn default() -> Self {
        Self {
            width: 60,
            min_value: None,
            max_value: None,
        }
    }
}

/// Generate an ASCII sparkline from a slice of values.
pub fn sparkline(values: &[f64], width: usize) -> String {
    sparkline_with_config(
        values,
        &SparklineConfig {
            width,
            ..Default::default()
        },
    )
}

/// Generate an ASCII sparkline with custom configuration.
pub fn sparkline_with_config(values: &[f64], config: &SparklineConfig) -> String {
    if values.is_empty() || config.width == 0 {
        return String::new();
    }

    let sampled = downsample(values, config.width);

    let min_val = config
        .min_value
        .unwrap_or_else(|| sampled.iter().cloned().fold(f64::INFINITY, f64::min));
    let max_val = config
        .max_value
        .unwrap_or_else(|| sampled.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
    let range = max_val - min_val;

    sampled
        .iter()
        .map(|&val| {
            let normalized = if range > 0.0 {
                ((val - min_val) / range).clamp(0.0, 1.0)
            } else {
                0.5
            };
            SPARKLINE_CHARS[((normalized * 7.0).round() as usize).min(7)]
        })
        .collect()
}

/// Downsample a slice of values to a target length using averaging.
fn downsample(values: &[f64], target_len: usize) -> Vec<f64> {
    if values.len() <= target_len {
        return values.to_vec();
    }

    let chunk_size = values.len() as f64 / target_len as f64;
    (0..target_len)
        .filter_map(|i| {
            let start = (i as f64 * chunk_size).floor() as usize;
            let end = (((i + 1) as f64 * chunk_size).ceil() as usize).min(values.len());
            (start < end).then(|| values[start..end].iter().sum::<f64>() / (end - start) as f64)
        })
        .collect()
}

/// Render prices, AMA and trades of a traced run.
pub fn render_trace(prices: &[f64], trace: &Trace, width: usize) -> String {
    let mut out = String::new();
    let window = &prices[trace.start_index.min(prices.len())..];

    let (lo, hi) = window
        .iter()
        .chain(trace.ama.iter())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let config = SparklineConfig {
        width,
        min_value: Some(lo),
        max_value: Some(hi),
    };

    let _ = writeln!(out, "price {}", sparkline_with_config(window, &config));
    let _ = writeln!(out, "ama   {}", sparkline_with_config(&trace.ama, &config));

    if trace.trades.is_empty() {
        let _ = writeln!(out, "no closed trades");
    }
    for (i, trade) in trace.trades.iter().enumerate() {
        let _ = writeln!(
            out,
            "#{:<3} buy @{:>10.4} (t={:>5})  sell @{:>10.4} (t={:>5})  {:>+8.2}%",
            i + 1,
            trade.entry_price,
            trade.entry_index,
            trade.exit_price,
            trade.exit_index,
            trade.return_pct() * 100.0
        );
    }
    if let Some((index, price)) = trace.open_position {
        let _ = writeln!(out, "open  buy @{:>10.4} (t={:>5})", price, index);
    }

    out
}

/// Re-run `params` with tracing and render the result for inspection.
pub fn trace_report(
    strategy: &dyn Strategy,
    prices: &[f64],
    params: &ParameterSet,
    width: usize,
) -> Result<String> {
    let (evaluation, trace) = strategy.trace(prices, params)?;
    let mut out = format!("{} {}\n", strategy.name(), params);
    match evaluation {
        Evaluation::Completed(result) => {
            let _ = writeln!(
                out,
                "strategy {:.4}  hold {:.4}",
                result.strategy_profit, result.hold_profit
            );
            out.push_str(&render_trace(prices, &trace, width));
        }
        Evaluation::InsufficientHistory {
            required,
            available,
        } => {
            let _ = writeln!(
                out,
                "not enough history: {} required, {} available",
                required, available
            );
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Trade;
    use crate::strategies::AmaCrossover;

    #[test]
    fn test_sparkline() {
        let spark = sparkline(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], 8);
        assert_eq!(spark, "▁▂▃▄▅▆▇█");
    }

    #[test]
    fn test_sparkline_constant_and_empty() {
        assert_eq!(sparkline(&[3.0, 3.0, 3.0], 10), "▅▅▅");
        assert!(sparkline(&[], 10).is_empty());
        assert!(sparkline(&[1.0], 0).is_empty());
    }

    #[test]
    fn test_downsample() {
        let values: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let spark = sparkline(&values, 20);
        assert_eq!(spark.chars().count(), 20);
        assert_eq!(downsample(&[1.0, 3.0, 5.0, 7.0], 2), vec![2.0, 6.0]);
    }

    #[test]
    fn test_render_trace_lists_trades() {
        let trace = Trace {
            start_index: 1,
            ama: vec![1.0, 2.0, 3.0],
            trades: vec![Trade {
                entry_index: 1,
                entry_price: 2.0,
                exit_index: 3,
                exit_price: 2.5,
            }],
            open_position: None,
        };
        let text = render_trace(&[1.0, 2.0, 3.0, 2.0], &trace, 10);
        assert!(text.starts_with("price "));
        assert!(text.contains("+25.00%"));
        assert!(!text.contains("no closed trades"));
    }

    #[test]
    fn test_trace_report() {
        let prices: Vec<f64> = (0..60)
            .map(|i| 50.0 + (i as f64 * 0.4).sin() * 5.0)
            .collect();
        let report = trace_report(&AmaCrossover, &prices, &ParameterSet::new(2, 4, 9), 30).unwrap();
        assert!(report.starts_with("AMA Crossover fast=2 n=4 slow=9"));
        assert!(report.contains("strategy "));

        let short = trace_report(&AmaCrossover, &prices[..5], &ParameterSet::new(2, 4, 9), 30).unwrap();
        assert!(short.contains("not enough history: 9 required, 5 available"));
    }
}
