//! Terminal and JSON reporting of backtest results.

use crate::engine::Trade;
use crate::optimizer::{SearchOutcome, SearchStats};
use crate::store::Report;
use crate::strategy::StrategyRegistry;
use crate::types::{PriceCandle, StrategyResult};
use colored::Colorize;
use serde::Serialize;
use tabled::{builder::Builder, settings::Style};

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print the result of a single test.
    pub fn print_result(title: &str, result: &StrategyResult) {
        Self::print_header(title);

        println!("{}", "Parameters".bold().underline());
        match &result.params {
            Some(p) => println!("  fast={}  n={}  slow={}", p.fast, p.n, p.slow),
            None => println!("  -"),
        }
        println!();

        Self::print_profits(result);
        println!("{}", "═".repeat(60).blue());
    }

    /// Print the outcome of a grid search.
    pub fn print_search(title: &str, outcome: &SearchOutcome) {
        Self::print_header(title);

        match outcome {
            SearchOutcome::Best { params, result, .. } => {
                println!("{}", "Best Parameters".bold().underline());
                println!("  fast={}  n={}  slow={}", params.fast, params.n, params.slow);
                println!();
                Self::print_profits(result);
            }
            SearchOutcome::NoFeasibleParameters { .. } => {
                println!("{}", "No feasible parameters".yellow().bold());
                println!();
            }
        }

        Self::print_stats(outcome.stats());
        println!("{}", "═".repeat(60).blue());
    }

    fn print_header(title: &str) {
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", format!(" {} ", title).bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();
    }

    fn print_profits(result: &StrategyResult) {
        println!("{}", "Performance".bold().underline());
        println!(
            "  Strategy Profit: {:>12.4}  {}",
            result.strategy_profit,
            Self::format_pct_change(result.strategy_profit * 100.0)
        );
        println!(
            "  Hold Profit:     {:>12.4}  {}",
            result.hold_profit,
            Self::format_pct_change(result.hold_profit * 100.0)
        );
        let verdict = if result.beats_hold() {
            "beats buy-and-hold".green()
        } else {
            "trails buy-and-hold".red()
        };
        println!("  Verdict:         {:>12}", verdict);
        println!();
    }

    fn print_stats(stats: &SearchStats) {
        println!("{}", "Search".bold().underline());
        println!("  Combinations:    {:>12}", stats.combinations);
        println!("  Unordered:       {:>12}", stats.skipped_unordered);
        println!("  Evaluated:       {:>12}", stats.evaluated);
        println!("  Short History:   {:>12}", stats.insufficient_history);
        println!("  Flat Windows:    {:>12}", stats.indeterminate);
        if stats.truncated {
            println!(
                "  Not Reached:     {:>12}  {}",
                stats.not_reached,
                "(time budget exhausted)".yellow()
            );
        }
        println!();
    }

    /// Format percentage change with color.
    fn format_pct_change(pct: f64) -> String {
        if pct >= 0.0 {
            format!("(+{:.2}%)", pct).green().to_string()
        } else {
            format!("({:.2}%)", pct).red().to_string()
        }
    }

    /// Reports as a table.
    pub fn reports_table(reports: &[Report]) -> String {
        let mut builder = Builder::new();
        builder.push_record([
            "#", "Created", "Instrument", "Strategy", "Interval", "Range", "Params", "Profit",
            "Hold",
        ]);

        for (i, report) in reports.iter().enumerate() {
            builder.push_record([
                (i + 1).to_string(),
                report.created_at.format("%Y-%m-%d %H:%M").to_string(),
                report.instrument.clone(),
                report.strategy.clone(),
                report.interval.to_string(),
                format!(
                    "{} to {}",
                    report.range_from.format("%Y-%m-%d"),
                    report.range_to.format("%Y-%m-%d")
                ),
                report
                    .params
                    .map(|p| format!("{}/{}/{}", p.fast, p.n, p.slow))
                    .unwrap_or_else(|| "-".to_string()),
                format!("{:+.4}", report.strategy_profit),
                format!("{:+.4}", report.hold_profit),
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    pub fn print_reports(reports: &[Report]) {
        if reports.is_empty() {
            println!("No reports.");
            return;
        }
        println!("{}", Self::reports_table(reports));
    }

    /// Candles as a table, at most `limit` rows when `limit > 0`.
    pub fn prices_table(candles: &[PriceCandle], limit: usize) -> String {
        let shown = if limit > 0 && limit < candles.len() {
            &candles[..limit]
        } else {
            candles
        };

        let mut builder = Builder::new();
        builder.push_record(["Timestamp", "Open", "High", "Low", "Close"]);
        for c in shown {
            builder.push_record([
                c.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                format!("{:.4}", c.open),
                format!("{:.4}", c.high),
                format!("{:.4}", c.low),
                format!("{:.4}", c.close),
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    pub fn print_prices(candles: &[PriceCandle], limit: usize) {
        if candles.is_empty() {
            println!("No candles.");
            return;
        }
        println!("{}", Self::prices_table(candles, limit));
        if limit > 0 && limit < candles.len() {
            println!("... and {} more candles", candles.len() - limit);
        }
    }

    /// Closed trades as a table.
    pub fn trades_table(trades: &[Trade]) -> String {
        let mut builder = Builder::new();
        builder.push_record(["#", "Entry t", "Entry", "Exit t", "Exit", "Return %"]);

        for (i, trade) in trades.iter().enumerate() {
            let ret = trade.return_pct() * 100.0;
            let ret_str = if ret >= 0.0 {
                format!("+{:.2}%", ret)
            } else {
                format!("{:.2}%", ret)
            };
            builder.push_record([
                (i + 1).to_string(),
                trade.entry_index.to_string(),
                format!("{:.4}", trade.entry_price),
                trade.exit_index.to_string(),
                format!("{:.4}", trade.exit_price),
                ret_str,
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    pub fn print_trades(trades: &[Trade]) {
        if trades.is_empty() {
            println!("No closed trades.");
            return;
        }
        println!("{}", Self::trades_table(trades));
    }

    pub fn print_strategies(registry: &StrategyRegistry) {
        let mut builder = Builder::new();
        builder.push_record(["Id", "Name", "Description"]);
        for strategy in registry.iter() {
            builder.push_record([
                strategy.id().to_string(),
                strategy.name().to_string(),
                strategy.description().to_string(),
            ]);
        }
        println!("{}", builder.build().with(Style::rounded()));
    }

    /// Export any result to pretty JSON.
    pub fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }
}
