use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use cbtsynth_core::ids::CaseId;
use cbtsynth_core::session::{Artifact, DialogueTurn, Role, SessionNumber, SessionRecord};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Proof of a durable commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub case_id: CaseId,
    pub session_id: SessionNumber,
    pub content_sha256: String,
    pub committed_at: String,
}

/// Hex SHA-256 of the record's canonical JSON.
pub fn content_hash(record: &SessionRecord) -> Result<String, StoreError> {
    let json = serde_json::to_vec(record)?;
    Ok(format!("{:x}", Sha256::digest(&json)))
}

pub struct HistoryRepo {
    db: Database,
}

impl HistoryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Number the next session must carry.
    pub(crate) fn next_ordinal_in(conn: &rusqlite::Connection, case_id: &CaseId) -> Result<u32, StoreError> {
        let next: i64 = conn.query_row(
            "SELECT COALESCE(MAX(ordinal), -1) + 1 FROM sessions WHERE case_id = ?1",
            [case_id.as_str()],
            |row| row.get(0),
        )?;
        row_helpers::ordinal(next, "sessions")
    }

    /// Append within an open transaction after checking the sequence.
    pub(crate) fn append_in(
        conn: &rusqlite::Connection,
        case_id: &CaseId,
        record: &SessionRecord,
    ) -> Result<CommitReceipt, StoreError> {
        let expected = Self::next_ordinal_in(conn, case_id)?;
        let found = record.session_id.get();
        if found != expected {
            return Err(StoreError::Sequence { expected, found });
        }

        let hash = content_hash(record)?;
        let now = Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO sessions (case_id, ordinal, stage, stage_objective, artifact_type,
                                   artifact_content, content_sha256, committed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                case_id.as_str(),
                found,
                record.stage,
                record.stage_objective,
                record.artifact.kind,
                record.artifact.content,
                hash,
                now,
            ],
        )?;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO turns (case_id, ordinal, position, role, content) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (position, turn) in record.dialogue.iter().enumerate() {
            let _ = stmt.execute(rusqlite::params![
                case_id.as_str(),
                found,
                position as i64,
                turn.role.as_str(),
                turn.content,
            ])?;
        }

        Ok(CommitReceipt {
            case_id: case_id.clone(),
            session_id: record.session_id,
            content_sha256: hash,
            committed_at: now,
        })
    }

    /// All committed sessions, ordered by session number.
    pub fn list(&self, case_id: &CaseId) -> Result<Vec<SessionRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut turns: BTreeMap<u32, Vec<DialogueTurn>> = BTreeMap::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT ordinal, role, content FROM turns WHERE case_id = ?1 ORDER BY ordinal, position",
                )?;
                let mut rows = stmt.query([case_id.as_str()])?;
                while let Some(row) = rows.next()? {
                    let ordinal = row_helpers::ordinal(row_helpers::get(row, 0, "turns", "ordinal")?, "turns")?;
                    let role: String = row_helpers::get(row, 1, "turns", "role")?;
                    turns.entry(ordinal).or_default().push(DialogueTurn {
                        role: row_helpers::parse_enum::<Role>(&role, "turns", "role")?,
                        content: row_helpers::get(row, 2, "turns", "content")?,
                    });
                }
            }

            let mut stmt = conn.prepare(
                "SELECT ordinal, stage, stage_objective, artifact_type, artifact_content
                 FROM sessions WHERE case_id = ?1 ORDER BY ordinal",
            )?;
            let mut rows = stmt.query([case_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let ordinal = row_helpers::ordinal(row_helpers::get(row, 0, "sessions", "ordinal")?, "sessions")?;
                out.push(SessionRecord {
                    session_id: SessionNumber::new(ordinal),
                    stage: row_helpers::get(row, 1, "sessions", "stage")?,
                    stage_objective: row_helpers::get(row, 2, "sessions", "stage_objective")?,
                    artifact: Artifact {
                        kind: row_helpers::get(row, 3, "sessions", "artifact_type")?,
                        content: row_helpers::get(row, 4, "sessions", "artifact_content")?,
                    },
                    dialogue: turns.remove(&ordinal).unwrap_or_default(),
                });
            }
            Ok(out)
        })
    }

    /// Stored content hash of one session, for integrity checks.
    pub fn stored_hash(&self, case_id: &CaseId, session: SessionNumber) -> Result<String, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT content_sha256 FROM sessions WHERE case_id = ?1 AND ordinal = ?2",
                rusqlite::params![case_id.as_str(), session.get()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("{case_id} {session}"))
                }
                other => other.into(),
            })
        })
    }
}
