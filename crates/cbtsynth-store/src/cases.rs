use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use cbtsynth_core::case::CaseProfile;
use cbtsynth_core::ids::CaseId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// One line of `list_cases`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub id: CaseId,
    pub client_name: String,
    /// Committed sessions, including the intake record.
    pub sessions: u32,
    pub created_at: String,
}

pub struct CaseRepo {
    db: Database,
}

impl CaseRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert within an open transaction. Fails with `Conflict` if the id exists.
    pub(crate) fn insert_in(conn: &rusqlite::Connection, profile: &CaseProfile) -> Result<String, StoreError> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM cases WHERE id = ?1)",
            [profile.id.as_str()],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::Conflict(format!("case {} already registered", profile.id)));
        }
        let now = Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO cases (id, client_name, profile, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                profile.id.as_str(),
                profile.client().name,
                serde_json::to_string(profile)?,
                now,
            ],
        )?;
        Ok(now)
    }

    #[instrument(skip(self), fields(case_id = %id))]
    pub fn get(&self, id: &CaseId) -> Result<CaseProfile, StoreError> {
        self.db.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row("SELECT profile FROM cases WHERE id = ?1", [id.as_str()], |row| row.get(0))
                .optional()?;
            let raw = raw.ok_or_else(|| StoreError::NotFound(format!("case {id}")))?;
            row_helpers::parse_json(&raw, "cases", "profile")
        })
    }

    pub fn exists(&self, id: &CaseId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM cases WHERE id = ?1)",
                [id.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    pub fn list(&self) -> Result<Vec<CaseSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.client_name, c.created_at,
                        (SELECT COUNT(*) FROM sessions s WHERE s.case_id = c.id)
                 FROM cases c ORDER BY c.id",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row_helpers::get(row, 0, "cases", "id")?;
                let count: i64 = row_helpers::get(row, 3, "sessions", "ordinal")?;
                out.push(CaseSummary {
                    id: CaseId::from_raw(id),
                    client_name: row_helpers::get(row, 1, "cases", "client_name")?,
                    created_at: row_helpers::get(row, 2, "cases", "created_at")?,
                    sessions: row_helpers::ordinal(count, "sessions")?,
                });
            }
            Ok(out)
        })
    }
}
