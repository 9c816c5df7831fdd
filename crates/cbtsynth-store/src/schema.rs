/// SQL DDL for the case store. Committed rows are append-only: triggers
/// abort every UPDATE and DELETE.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS cases (
    id TEXT PRIMARY KEY,
    client_name TEXT NOT NULL,
    profile TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    case_id TEXT NOT NULL REFERENCES cases(id),
    ordinal INTEGER NOT NULL,
    stage TEXT NOT NULL,
    stage_objective TEXT NOT NULL,
    artifact_type TEXT NOT NULL,
    artifact_content TEXT NOT NULL,
    content_sha256 TEXT NOT NULL,
    committed_at TEXT NOT NULL,
    PRIMARY KEY (case_id, ordinal)
);

CREATE TABLE IF NOT EXISTS turns (
    case_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    position INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    PRIMARY KEY (case_id, ordinal, position),
    FOREIGN KEY (case_id, ordinal) REFERENCES sessions(case_id, ordinal)
);

CREATE TRIGGER IF NOT EXISTS cases_immutable_update BEFORE UPDATE ON cases
BEGIN SELECT RAISE(ABORT, 'cases are immutable'); END;
CREATE TRIGGER IF NOT EXISTS cases_immutable_delete BEFORE DELETE ON cases
BEGIN SELECT RAISE(ABORT, 'cases are immutable'); END;
CREATE TRIGGER IF NOT EXISTS sessions_immutable_update BEFORE UPDATE ON sessions
BEGIN SELECT RAISE(ABORT, 'committed sessions are immutable'); END;
CREATE TRIGGER IF NOT EXISTS sessions_immutable_delete BEFORE DELETE ON sessions
BEGIN SELECT RAISE(ABORT, 'committed sessions are immutable'); END;
CREATE TRIGGER IF NOT EXISTS turns_immutable_update BEFORE UPDATE ON turns
BEGIN SELECT RAISE(ABORT, 'committed turns are immutable'); END;
CREATE TRIGGER IF NOT EXISTS turns_immutable_delete BEFORE DELETE ON turns
BEGIN SELECT RAISE(ABORT, 'committed turns are immutable'); END;

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
