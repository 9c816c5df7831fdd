//! In-process metrics with periodic SQLite snapshots.
//!
//! Names used by the synthesizer:
//! - `synthesis.attempts` histogram (generation calls per finished session)
//! - `synthesis.committed` / `synthesis.aborted` counters
//! - `synthesis.violations{rule}` counter
//! - `generation.errors{kind}` counter
//! - `synthesis.in_flight` gauge (cases currently running in a batch)

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "gauge" => Self::Gauge,
            "histogram" => Self::Histogram,
            _ => Self::Counter,
        }
    }
}

/// A persisted metric value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub id: i64,
    pub timestamp: String,
    pub name: String,
    pub value: f64,
    pub labels: Option<String>,
    pub metric_type: MetricType,
}

#[derive(Clone, Debug, Default)]
pub struct MetricsQuery {
    pub name: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
}

impl HistogramSummary {
    fn from_observations(obs: &[f64]) -> Self {
        if obs.is_empty() {
            return Self::default();
        }
        let mut sorted = obs.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let at = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];
        Self {
            count: n as u64,
            sum: sorted.iter().sum(),
            min: sorted[0],
            max: sorted[n - 1],
            p50: at(0.5),
            p95: at(0.95),
        }
    }
}

/// Name plus labels sorted by key, so label order at the call site is irrelevant.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    fn labels_json(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        let map: BTreeMap<&str, &str> = self
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        serde_json::to_string(&map).ok()
    }

    fn render(&self) -> String {
        if self.labels.is_empty() {
            return self.name.clone();
        }
        let labels: Vec<String> = self.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}{{{}}}", self.name, labels.join(","))
    }
}

/// Gauges keep f64 bits in an atomic.
enum Cell {
    Counter(AtomicU64),
    Gauge(AtomicU64),
    Histogram(Mutex<Vec<f64>>),
}

impl Cell {
    fn metric_type(&self) -> MetricType {
        match self {
            Self::Counter(_) => MetricType::Counter,
            Self::Gauge(_) => MetricType::Gauge,
            Self::Histogram(_) => MetricType::Histogram,
        }
    }

    /// Current scalar value; histograms report their median.
    fn current(&self) -> f64 {
        match self {
            Self::Counter(v) => v.load(Ordering::Relaxed) as f64,
            Self::Gauge(bits) => f64::from_bits(bits.load(Ordering::Relaxed)),
            Self::Histogram(obs) => HistogramSummary::from_observations(&obs.lock()).p50,
        }
    }
}

/// Thread-safe recorder. Recording is lock-free per key; only snapshots and
/// queries touch SQLite.
pub struct MetricsRecorder {
    cells: DashMap<MetricKey, Cell>,
    db: Mutex<Connection>,
}

impl MetricsRecorder {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS metrics_snapshots (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 name TEXT NOT NULL,
                 value REAL NOT NULL,
                 labels TEXT,
                 metric_type TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_metrics_name ON metrics_snapshots(name, timestamp);",
        )?;
        Ok(Self {
            cells: DashMap::new(),
            db: Mutex::new(conn),
        })
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let cell = self
            .cells
            .entry(MetricKey::new(name, labels))
            .or_insert_with(|| Cell::Counter(AtomicU64::new(0)));
        if let Cell::Counter(v) = cell.value() {
            let _ = v.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let cell = self
            .cells
            .entry(MetricKey::new(name, labels))
            .or_insert_with(|| Cell::Gauge(AtomicU64::new(0f64.to_bits())));
        if let Cell::Gauge(bits) = cell.value() {
            bits.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn gauge_add(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        let cell = self
            .cells
            .entry(MetricKey::new(name, labels))
            .or_insert_with(|| Cell::Gauge(AtomicU64::new(0f64.to_bits())));
        if let Cell::Gauge(bits) = cell.value() {
            let _ = bits.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some((f64::from_bits(cur) + delta).to_bits())
            });
        }
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let cell = self
            .cells
            .entry(MetricKey::new(name, labels))
            .or_insert_with(|| Cell::Histogram(Mutex::new(Vec::new())));
        if let Cell::Histogram(obs) = cell.value() {
            obs.lock().push(value);
        }
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        match self.cells.get(&MetricKey::new(name, labels)).as_deref() {
            Some(Cell::Counter(v)) => v.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        match self.cells.get(&MetricKey::new(name, labels)).as_deref() {
            Some(Cell::Gauge(bits)) => f64::from_bits(bits.load(Ordering::Relaxed)),
            _ => 0.0,
        }
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        match self.cells.get(&MetricKey::new(name, labels)).as_deref() {
            Some(Cell::Histogram(obs)) => HistogramSummary::from_observations(&obs.lock()),
            _ => HistogramSummary::default(),
        }
    }

    /// Sum of a counter across every label combination.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.cells
            .iter()
            .filter(|entry| entry.key().name == name)
            .map(|entry| match entry.value() {
                Cell::Counter(v) => v.load(Ordering::Relaxed),
                _ => 0,
            })
            .sum()
    }

    /// Current values rendered as `name{k=v}` lines, sorted. Used for the
    /// end-of-batch summary.
    pub fn report(&self) -> Vec<(String, f64)> {
        let mut rows: Vec<(MetricKey, f64)> = self
            .cells
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().current()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter().map(|(k, v)| (k.render(), v)).collect()
    }

    /// Persist every current value; returns the number of rows written.
    pub fn snapshot(&self) -> Result<usize, rusqlite::Error> {
        let now = Utc::now().to_rfc3339();
        let rows: Vec<(MetricKey, f64, MetricType)> = self
            .cells
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().current(), entry.value().metric_type()))
            .collect();

        let mut db = self.db.lock();
        let tx = db.transaction()?;
        for (key, value, metric_type) in &rows {
            let _ = tx.execute(
                "INSERT INTO metrics_snapshots (timestamp, name, value, labels, metric_type)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![now, key.name, value, key.labels_json(), metric_type.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn query(&self, q: &MetricsQuery) -> Result<Vec<MetricsSnapshot>, rusqlite::Error> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT id, timestamp, name, value, labels, metric_type FROM metrics_snapshots
             WHERE (?1 IS NULL OR name = ?1) AND (?2 IS NULL OR timestamp >= ?2)
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![q.name, q.since, i64::from(q.limit.unwrap_or(100))],
            |row| {
                let metric_type: String = row.get(5)?;
                Ok(MetricsSnapshot {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    name: row.get(2)?,
                    value: row.get(3)?,
                    labels: row.get(4)?,
                    metric_type: MetricType::parse(&metric_type),
                })
            },
        )?;
        rows.collect()
    }

    /// Delete snapshots older than `retention_days`.
    pub fn prune(&self, retention_days: u32) -> Result<usize, rusqlite::Error> {
        let cutoff = (Utc::now() - chrono::Duration::days(i64::from(retention_days))).to_rfc3339();
        self.db.lock().execute(
            "DELETE FROM metrics_snapshots WHERE timestamp <= ?1",
            rusqlite::params![cutoff],
        )
    }
}
