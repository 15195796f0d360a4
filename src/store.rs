//! Persistence of backtest reports.
//!
//! A [`Report`] is written once per successful test or training run. Stores
//! answer two questions: whether a run already covered a date range
//! ([`ResultCache::lookup`]), and which runs did best ([`ResultCache::top`]).

use crate::error::{BacktestError, Result};
use crate::types::{Interval, ParameterSet, StrategyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Default number of reports returned by [`ResultCache::top`].
pub const DEFAULT_TOP_LIMIT: usize = 10;

/// A persisted backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub created_at: DateTime<Utc>,
    pub instrument: String,
    pub strategy: String,
    pub interval: Interval,
    pub range_from: DateTime<Utc>,
    pub range_to: DateTime<Utc>,
    pub strategy_profit: f64,
    pub hold_profit: f64,
    #[serde(default)]
    pub params: Option<ParameterSet>,
}

impl Report {
    /// Whether this report's range contains `[from, to]`.
    pub fn covers(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.range_from <= from && self.range_to >= to
    }

    pub fn result(&self) -> StrategyResult {
        StrategyResult {
            strategy_profit: self.strategy_profit,
            hold_profit: self.hold_profit,
            params: self.params,
        }
    }

    fn distinct_key(&self) -> (DateTime<Utc>, DateTime<Utc>, u64, u64, &str, &str) {
        (
            self.range_from,
            self.range_to,
            self.strategy_profit.to_bits(),
            self.hold_profit.to_bits(),
            &self.strategy,
            &self.instrument,
        )
    }
}

/// Filter for [`ResultCache::top`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopQuery {
    /// Reports created at or after this time.
    pub created_from: Option<DateTime<Utc>>,
    /// Reports created strictly before this time.
    pub created_to: Option<DateTime<Utc>>,
    pub strategy: Option<String>,
    pub instrument: Option<String>,
    /// Defaults to [`DEFAULT_TOP_LIMIT`].
    pub limit: Option<usize>,
}

impl TopQuery {
    pub fn matches(&self, report: &Report) -> bool {
        self.created_from.map_or(true, |t| report.created_at >= t)
            && self.created_to.map_or(true, |t| report.created_at < t)
            && self
                .strategy
                .as_deref()
                .map_or(true, |s| report.strategy == s)
            && self
                .instrument
                .as_deref()
                .map_or(true, |i| report.instrument == i)
    }
}

/// Best reports first, without duplicate runs, truncated to the query limit.
pub fn rank_reports<'a>(reports: impl Iterator<Item = &'a Report>, query: &TopQuery) -> Vec<Report> {
    let mut matching: Vec<&Report> = reports.filter(|r| query.matches(r)).collect();
    matching.sort_by(|a, b| b.strategy_profit.total_cmp(&a.strategy_profit));

    let limit = query.limit.unwrap_or(DEFAULT_TOP_LIMIT);
    let mut ranked: Vec<Report> = Vec::new();
    for report in matching {
        if ranked.len() >= limit {
            break;
        }
        if ranked.iter().any(|r| r.distinct_key() == report.distinct_key()) {
            continue;
        }
        ranked.push(report.clone());
    }
    ranked
}

/// Storage of backtest reports.
pub trait ResultCache: Send + Sync {
    /// The first stored report for the same instrument, strategy and interval
    /// whose range contains `[from, to]`.
    fn lookup(
        &self,
        instrument: &str,
        strategy: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<Report>>;

    /// Append a report.
    fn store(&self, report: Report) -> Result<()>;

    /// Best reports matching `query`, by strategy profit descending.
    fn top(&self, query: &TopQuery) -> Result<Vec<Report>>;
}

fn find_covering<'a>(
    mut reports: impl Iterator<Item = &'a Report>,
    instrument: &str,
    strategy: &str,
    interval: Interval,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Option<Report> {
    reports
        .find(|r| {
            r.instrument == instrument
                && r.strategy == strategy
                && r.interval == interval
                && r.covers(from, to)
        })
        .cloned()
}

/// Reports kept in memory for the life of the process.
#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    reports: RwLock<Vec<Report>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reports.read().map_or(0, |r| r.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultCache for InMemoryReportStore {
    fn lookup(
        &self,
        instrument: &str,
        strategy: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<Report>> {
        let reports = self.reports.read().unwrap_or_else(|p| p.into_inner());
        Ok(find_covering(
            reports.iter(),
            instrument,
            strategy,
            interval,
            from,
            to,
        ))
    }

    fn store(&self, report: Report) -> Result<()> {
        let mut reports = self.reports.write().unwrap_or_else(|p| p.into_inner());
        reports.push(report);
        Ok(())
    }

    fn top(&self, query: &TopQuery) -> Result<Vec<Report>> {
        let reports = self.reports.read().unwrap_or_else(|p| p.into_inner());
        Ok(rank_reports(reports.iter(), query))
    }
}

/// Reports appended to a JSON Lines file.
///
/// The file is read once on open; later writes append one line each.
#[derive(Debug)]
pub struct JsonReportStore {
    path: PathBuf,
    reports: RwLock<Vec<Report>>,
    writer: Mutex<()>,
}

impl JsonReportStore {
    /// Open the store, creating the file (and parent directories) if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            File::create(path)?;
            debug!("Created report store at {}", path.display());
        }
        Self::open_existing(path)
    }

    /// Open a store that must already exist; nothing is written to disk.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(BacktestError::DataError(format!(
                "report store {} does not exist",
                path.display()
            )));
        }

        let mut reports = Vec::new();
        let reader = BufReader::new(File::open(&path)?);
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Report>(&line) {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Skipping corrupt report on line {}: {}", line_num + 1, e),
            }
        }
        info!("Loaded {} reports from {}", reports.len(), path.display());

        Ok(Self {
            path,
            reports: RwLock::new(reports),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultCache for JsonReportStore {
    fn lookup(
        &self,
        instrument: &str,
        strategy: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<Report>> {
        let reports = self.reports.read().unwrap_or_else(|p| p.into_inner());
        Ok(find_covering(
            reports.iter(),
            instrument,
            strategy,
            interval,
            from,
            to,
        ))
    }

    fn store(&self, report: Report) -> Result<()> {
        let line = serde_json::to_string(&report)?;
        {
            let _guard = self.writer.lock().unwrap_or_else(|p| p.into_inner());
            let mut file = OpenOptions::new().append(true).open(&self.path)?;
            writeln!(file, "{}", line)?;
        }
        self.reports
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(report);
        Ok(())
    }

    fn top(&self, query: &TopQuery) -> Result<Vec<Report>> {
        let reports = self.reports.read().unwrap_or_else(|p| p.into_inner());
        Ok(rank_reports(reports.iter(), query))
    }
}
