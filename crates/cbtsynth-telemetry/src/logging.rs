//! Warn-and-above log persistence.
//!
//! Failed attempts, provider errors and aborted sessions are the events worth
//! reading back after a batch run, so they land in SQLite tagged with the
//! case and session they belong to.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A persisted log line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub case_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub case_id: Option<String>,
    pub session_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
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
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 case_id TEXT,
                 session_id TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_logs_case ON logs(case_id, session_id);
             CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, line: &PendingLine) {
        let conn = self.conn.lock();
        // Logging must never fail the caller.
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, case_id, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                line.timestamp,
                line.level,
                line.target,
                line.message,
                line.fields,
                line.case_id,
                line.session_id,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, case_id, session_id FROM logs WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        let mut filter = |clause: &str, value: String| {
            sql.push_str(&format!(" AND {clause} ?{}", params.len() + 1));
            params.push(Box::new(value));
        };
        if let Some(level) = &q.level {
            filter("level =", level.to_uppercase());
        }
        if let Some(target) = &q.target {
            filter("target LIKE", format!("%{target}%"));
        }
        if let Some(case_id) = &q.case_id {
            filter("case_id =", case_id.clone());
        }
        if let Some(session_id) = &q.session_id {
            filter("session_id =", session_id.clone());
        }
        if let Some(since) = &q.since {
            filter("timestamp >=", since.clone());
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                case_id: row.get(6)?,
                session_id: row.get(7)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct PendingLine {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    case_id: Option<String>,
    session_id: Option<String>,
}

/// Layer that forwards WARN and ERROR events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    case_id: Option<String>,
    session_id: Option<String>,
}

impl FieldVisitor {
    fn put(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "case_id" => self.case_id = Some(value),
            "session_id" => self.session_id = Some(value),
            other => {
                let _ = self
                    .fields
                    .insert(other.to_string(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        self.put(field.name(), rendered.trim_matches('"').to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        let _ = self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let _ = self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            let _ = self
                .fields
                .insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        let _ = self.fields.insert(field.name().to_string(), value.into());
    }
}

/// Case/session identifiers captured from span attributes so events logged
/// deep inside the repair loop still carry them.
struct SpanFields {
    case_id: Option<String>,
    session_id: Option<String>,
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if visitor.case_id.is_none() && visitor.session_id.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields {
                case_id: visitor.case_id,
                session_id: visitor.session_id,
            });
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if visitor.case_id.is_some() && visitor.session_id.is_some() {
                    break;
                }
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    if visitor.case_id.is_none() {
                        visitor.case_id.clone_from(&fields.case_id);
                    }
                    if visitor.session_id.is_none() {
                        visitor.session_id.clone_from(&fields.session_id);
                    }
                }
            }
        }

        let fields = (!visitor.fields.is_empty())
            .then(|| serde_json::to_string(&visitor.fields).unwrap_or_default());

        self.sink.insert(&PendingLine {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            case_id: visitor.case_id,
            session_id: visitor.session_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn line(level: &str, message: &str, case_id: Option<&str>, session_id: Option<&str>) -> PendingLine {
        PendingLine {
            timestamp: Utc::now().to_rfc3339(),
            level: level.into(),
            target: "cbtsynth_engine::orchestrator".into(),
            message: message.into(),
            fields: None,
            case_id: case_id.map(str::to_string),
            session_id: session_id.map(str::to_string),
        }
    }

    #[test]
    fn file_sink_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("cbtsynth-logs-{}", uuid::Uuid::now_v7()));
        let sink = SqliteLogSink::open(&dir.join("nested/logs.db")).unwrap();
        sink.insert(&line("WARN", "x", None, None));
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn query_filters_by_case_and_session() {
        let sink = SqliteLogSink::in_memory().unwrap();
        sink.insert(&line("WARN", "rejected", Some("case_00001"), Some("S2")));
        sink.insert(&line("WARN", "rejected", Some("case_00001"), Some("S3")));
        sink.insert(&line("ERROR", "aborted", Some("case_00002"), Some("S1")));

        let by_case = sink
            .query(&LogQuery {
                case_id: Some("case_00001".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_case.len(), 2);

        let by_session = sink
            .query(&LogQuery {
                case_id: Some("case_00001".into()),
                session_id: Some("S3".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_session.len(), 1);

        let errors = sink
            .query(&LogQuery {
                level: Some("error".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors[0].message, "aborted");
    }

    #[test]
    fn query_limit_returns_newest_first() {
        let sink = SqliteLogSink::in_memory().unwrap();
        for i in 0..5 {
            sink.insert(&line("WARN", &format!("msg {i}"), None, None));
        }
        let rows = sink
            .query(&LogQuery {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message, "msg 4");
    }

    #[test]
    fn layer_persists_warnings_with_span_context() {
        let sink = Arc::new(SqliteLogSink::in_memory().unwrap());
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("attempt", case_id = "case_00009", session_id = "S4");
            let _entered = span.enter();
            tracing::info!("not persisted");
            tracing::warn!(attempt = 2u64, "candidate rejected");
        });

        let rows = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "candidate rejected");
        assert_eq!(rows[0].case_id.as_deref(), Some("case_00009"));
        assert_eq!(rows[0].session_id.as_deref(), Some("S4"));
        assert!(rows[0].fields.as_deref().unwrap_or_default().contains("attempt"));
    }
}
