//! Logging and metrics setup for the synthesizer.
//!
//! Human-readable or JSON lines go to stderr; WARN+ events are also persisted
//! to SQLite with their case/session ids so failed runs can be inspected
//! after the fact.

#![deny(unsafe_code)]

mod logging;
mod metrics;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};
pub use metrics::{HistogramSummary, MetricType, MetricsQuery, MetricsRecorder, MetricsSnapshot};

use std::path::PathBuf;
use std::sync::Arc;

use cbtsynth_settings::LoggingSettings;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default level. `RUST_LOG` takes precedence when set.
    pub log_level: Level,
    /// Per-module overrides, e.g. `("cbtsynth_llm", DEBUG)`.
    pub module_levels: Vec<(String, Level)>,
    pub json: bool,
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
    pub metrics_enabled: bool,
    pub metrics_db_path: PathBuf,
    pub metrics_retention_days: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_settings(&LoggingSettings::default())
    }
}

impl TelemetryConfig {
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            log_level: parse_level(&settings.level).unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            json: settings.json,
            log_to_sqlite: settings.persist_warnings,
            log_db_path: PathBuf::from(&settings.log_db_path),
            metrics_enabled: settings.metrics_enabled,
            metrics_db_path: PathBuf::from(&settings.metrics_db_path),
            metrics_retention_days: settings.metrics_retention_days,
        }
    }

    fn filter_directive(&self) -> String {
        let mut directive = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            directive.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
        }
        directive
    }
}

/// Accepts `trace`..`error` in any case.
pub fn parse_level(s: &str) -> Option<Level> {
    s.trim().parse().ok()
}

/// Handles to the persistent sinks. Takes a final metrics snapshot on drop.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl TelemetryGuard {
    /// A guard with no sinks, for tests and `--no-telemetry` runs.
    pub fn disabled() -> Self {
        Self {
            log_sink: None,
            metrics: None,
        }
    }

    pub fn metrics(&self) -> Option<Arc<MetricsRecorder>> {
        self.metrics.clone()
    }

    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(metrics) = &self.metrics {
            if let Err(e) = metrics.snapshot() {
                eprintln!("cbtsynth-telemetry: final metrics snapshot failed: {e}");
            }
        }
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// keep the first subscriber but still open the sinks.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let log_sink = if config.log_to_sqlite {
        match SqliteLogSink::open(&config.log_db_path) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                eprintln!("cbtsynth-telemetry: failed to open log DB: {e}");
                None
            }
        }
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .with(log_sink.clone().map(SqliteLogLayer::new))
        .try_init();

    let metrics = if config.metrics_enabled {
        match MetricsRecorder::open(&config.metrics_db_path) {
            Ok(recorder) => {
                if let Err(e) = recorder.prune(config.metrics_retention_days) {
                    tracing::warn!(error = %e, "failed to prune metrics snapshots");
                }
                Some(Arc::new(recorder))
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to open metrics DB");
                None
            }
        }
    } else {
        None
    };

    TelemetryGuard { log_sink, metrics }
}
