//! Price data loading and providers.

use crate::error::{BacktestError, Result};
use crate::types::{Interval, PriceCandle};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Raw CSV row with flexible column names.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "Time",
        alias = "time",
        alias = "datetime",
        alias = "Datetime"
    )]
    date: String,
    #[serde(alias = "Open", alias = "open", alias = "o")]
    open: f64,
    #[serde(alias = "High", alias = "high", alias = "h")]
    high: f64,
    #[serde(alias = "Low", alias = "low", alias = "l")]
    low: f64,
    #[serde(alias = "Close", alias = "close", alias = "c", alias = "Adj Close")]
    close: f64,
}

/// Data source configuration.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Date format string for parsing (e.g., "%Y-%m-%d" or "%Y-%m-%d %H:%M:%S").
    pub date_format: Option<String>,
    /// Whether the CSV has headers.
    pub has_headers: bool,
    /// CSV delimiter character. If None, delimiter is auto-detected.
    pub delimiter: Option<u8>,
    /// Skip invalid rows instead of failing.
    pub skip_invalid: bool,
    /// Validate candle data (high >= low, etc.).
    pub validate_candles: bool,
    /// Interval recorded on loaded candles.
    pub interval: Interval,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            has_headers: true,
            delimiter: None,
            skip_invalid: true,
            validate_candles: true,
            interval: Interval::Day,
        }
    }
}

/// Detect the CSV delimiter from the first few lines of the file.
///
/// Picks the delimiter among comma, tab, semicolon and pipe that splits
/// every line into the same number of fields, at least five.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)?;
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .take(5)
        .filter_map(|l| l.ok())
        .collect();

    let mut best = (b',', 0);
    for delim in [b',', b'\t', b';', b'|'] {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.bytes().filter(|&b| b == delim).count() + 1)
            .collect();
        let Some(&first) = counts.first() else {
            continue;
        };
        if first >= 5 && counts.iter().all(|&c| c == first) && first > best.1 {
            best = (delim, first);
        }
    }

    debug!("Detected delimiter {:?}", best.0 as char);
    Ok(best.0)
}

fn midnight(d: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN))
}

/// Parse a date string with multiple format attempts.
pub fn parse_datetime(s: &str, format: Option<&str>) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Some(fmt) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(midnight(d));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S",
        "%d.%m.%Y %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%d/%m/%Y", "%d-%b-%Y"];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(midnight(d));
        }
    }

    // Unix timestamp in seconds
    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(BacktestError::DataError(format!("Could not parse date: '{}'", s)))
}

/// Sort candles by timestamp and drop duplicate timestamps (first one wins).
pub fn normalize_candles(candles: &mut Vec<PriceCandle>) {
    candles.sort_by_key(|c| c.timestamp);
    let original_len = candles.len();
    candles.dedup_by_key(|c| c.timestamp);
    if candles.len() < original_len {
        warn!("Removed {} duplicate timestamps", original_len - candles.len());
    }
}

/// Load price candles from a CSV file.
pub fn load_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<PriceCandle>> {
    let path = path.as_ref();
    info!("Loading prices from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;

    let mut candles = Vec::new();
    let mut skipped = 0;

    for (row_num, result) in reader.deserialize().enumerate() {
        let row_num = row_num + 1;
        let row: CsvRow = match result {
            Ok(r) => r,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(BacktestError::CsvError(e)),
        };

        let timestamp = match parse_datetime(&row.date, config.date_format.as_deref()) {
            Ok(ts) => ts,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {} due to date parse error: {}", row_num, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        let candle = PriceCandle::new(
            timestamp,
            row.open,
            row.close,
            row.high,
            row.low,
            config.interval,
        );

        if config.validate_candles && !candle.validate() {
            if config.skip_invalid {
                debug!("Skipping row {} due to invalid candle: {:?}", row_num, candle);
                skipped += 1;
                continue;
            }
            return Err(BacktestError::DataError(format!(
                "Invalid candle at row {}: {:?}",
                row_num, candle
            )));
        }

        candles.push(candle);
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows", skipped);
    }

    normalize_candles(&mut candles);

    if candles.is_empty() {
        return Err(BacktestError::NoData);
    }

    info!(
        "Loaded {} candles from {} to {}",
        candles.len(),
        candles[0].timestamp,
        candles[candles.len() - 1].timestamp
    );

    Ok(candles)
}

/// Write candles to a CSV file with a `date,open,high,low,close` header.
pub fn write_csv(path: impl AsRef<Path>, candles: &[PriceCandle]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["date", "open", "high", "low", "close"])?;
    for c in candles {
        writer.write_record(&[
            c.timestamp.to_rfc3339(),
            c.open.to_string(),
            c.high.to_string(),
            c.low.to_string(),
            c.close.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Candles within `[from, to]`, both ends inclusive.
pub fn filter_range(
    candles: &[PriceCandle],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<PriceCandle> {
    candles
        .iter()
        .filter(|c| c.timestamp >= from && c.timestamp <= to)
        .cloned()
        .collect()
}

/// Source of historical candles.
///
/// Implementations return candles sorted ascending by timestamp without
/// duplicate timestamps.
pub trait PriceProvider: Send + Sync {
    fn fetch(
        &self,
        instrument: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<PriceCandle>>;
}

/// Provider over candles held in memory.
#[derive(Debug, Default)]
pub struct InMemoryPriceProvider {
    data: HashMap<(String, Interval), Vec<PriceCandle>>,
}

impl InMemoryPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add candles for an instrument; they are sorted and de-duplicated.
    pub fn insert(&mut self, instrument: impl Into<String>, mut candles: Vec<PriceCandle>) {
        normalize_candles(&mut candles);
        let interval = candles.first().map(|c| c.interval).unwrap_or_default();
        self.data.insert((instrument.into(), interval), candles);
    }

    pub fn with(mut self, instrument: impl Into<String>, candles: Vec<PriceCandle>) -> Self {
        self.insert(instrument, candles);
        self
    }
}

impl PriceProvider for InMemoryPriceProvider {
    fn fetch(
        &self,
        instrument: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<PriceCandle>> {
        let candles = self
            .data
            .get(&(instrument.to_string(), interval))
            .ok_or_else(|| {
                BacktestError::DataError(format!(
                    "No {} data for instrument: {}",
                    interval, instrument
                ))
            })?;
        Ok(filter_range(candles, from, to))
    }
}

/// Provider reading `<INSTRUMENT>.csv` files from a directory.
///
/// Files for intervals other than `day` are looked up as
/// `<INSTRUMENT>_<interval>.csv`.
#[derive(Debug, Clone)]
pub struct CsvPriceProvider {
    dir: PathBuf,
    config: DataConfig,
}

impl CsvPriceProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            config: DataConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DataConfig) -> Self {
        self.config = config;
        self
    }

    pub fn path_for(&self, instrument: &str, interval: Interval) -> PathBuf {
        match interval {
            Interval::Day => self.dir.join(format!("{}.csv", instrument)),
            other => self.dir.join(format!("{}_{}.csv", instrument, other)),
        }
    }
}

impl PriceProvider for CsvPriceProvider {
    fn fetch(
        &self,
        instrument: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<PriceCandle>> {
        let path = self.path_for(instrument, interval);
        if !path.exists() {
            return Err(BacktestError::DataError(format!(
                "No data file for {} at {}",
                instrument,
                path.display()
            )));
        }
        let config = DataConfig {
            interval,
            ..self.config.clone()
        };
        let candles = load_csv(&path, &config)?;
        Ok(filter_range(&candles, from, to))
    }
}

/// Candles of one (instrument, interval) with the request ranges they answer.
#[derive(Debug, Default)]
struct CachedSeries {
    candles: BTreeMap<DateTime<Utc>, PriceCandle>,
    /// Disjoint fetched ranges, sorted by start.
    ranges: Vec<(DateTime<Utc>, DateTime<Utc>)>,
}

impl CachedSeries {
    fn add_range(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) {
        self.ranges.push((from, to));
        self.ranges.sort_by_key(|r| r.0);
        let mut merged: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::with_capacity(self.ranges.len());
        for &(start, end) in &self.ranges {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        self.ranges = merged;
    }

    fn covers(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.ranges
            .iter()
            .any(|&(start, end)| start <= from && to <= end)
    }
}

/// Local cache of candles already fetched from a provider.
///
/// Besides the candles it remembers which `[from, to]` requests were
/// answered, so a partial earlier fetch is never mistaken for a full one.
#[derive(Debug, Default)]
pub struct CandleStore {
    series: RwLock<HashMap<(String, Interval), CachedSeries>>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the provider's answer for `[from, to]`; an existing candle with
    /// the same timestamp is kept.
    pub fn write(
        &self,
        instrument: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        candles: &[PriceCandle],
    ) {
        let mut guard = self
            .series
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let series = guard
            .entry((instrument.to_string(), interval))
            .or_default();
        for candle in candles {
            series
                .candles
                .entry(candle.timestamp)
                .or_insert_with(|| candle.clone());
        }
        if from <= to {
            series.add_range(from, to);
        }
    }

    /// Whether a single earlier fetch answered all of `[from, to]`.
    pub fn covers(
        &self,
        instrument: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> bool {
        let guard = self
            .series
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .get(&(instrument.to_string(), interval))
            .is_some_and(|series| series.covers(from, to))
    }

    /// Candles within `[from, to]`, sorted ascending.
    pub fn read(
        &self,
        instrument: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<PriceCandle> {
        if from > to {
            return Vec::new();
        }
        let guard = self
            .series
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .get(&(instrument.to_string(), interval))
            .map(|series| {
                series
                    .candles
                    .range(from..=to)
                    .map(|(_, c)| c.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, instrument: &str, interval: Interval) -> usize {
        let guard = self
            .series
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .get(&(instrument.to_string(), interval))
            .map_or(0, |series| series.candles.len())
    }
}
