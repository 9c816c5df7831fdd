use cbtsynth_core::facts::Contradiction;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    /// The incoming session is not the next one for the case.
    #[error("sequence error: expected S{expected}, got S{found}")]
    Sequence { expected: u32, found: u32 },

    /// The record contradicts the case profile.
    #[error("continuity error in {case_id} {session}: {}", summarize(.contradictions))]
    Continuity {
        case_id: String,
        session: String,
        contradictions: Vec<Contradiction>,
    },
}

fn summarize(contradictions: &[Contradiction]) -> String {
    contradictions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StoreError {
    /// Continuity failures can be repaired by regenerating; everything else is terminal.
    pub fn is_repairable(&self) -> bool {
        matches!(self, Self::Continuity { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
