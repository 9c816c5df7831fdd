//! Durable, append-only storage for case profiles and committed sessions.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use cbtsynth_core::case::CaseProfile;
use cbtsynth_core::facts;
use cbtsynth_core::ids::CaseId;
use cbtsynth_core::session::{Artifact, Role, SessionNumber, SessionRecord};

use crate::cases::{CaseRepo, CaseSummary};
use crate::database::Database;
use crate::error::StoreError;
use crate::history::{CommitReceipt, HistoryRepo};

pub const INTAKE_STAGE: &str = "Intake";
pub const INTAKE_OBJECTIVE: &str = "Gather presenting concerns and establish rapport";
pub const INTAKE_ARTIFACT: &str = "Intake Summary";

/// Build the S0 record from a profile's intake material.
pub fn intake_record(profile: &CaseProfile) -> SessionRecord {
    SessionRecord {
        session_id: SessionNumber::INTAKE,
        stage: INTAKE_STAGE.to_string(),
        stage_objective: INTAKE_OBJECTIVE.to_string(),
        artifact: Artifact {
            kind: INTAKE_ARTIFACT.to_string(),
            content: profile.intake_summary(),
        },
        dialogue: profile.dialogue.clone(),
    }
}

pub struct CaseStore {
    db: Database,
    cases: CaseRepo,
    history: HistoryRepo,
    case_locks: DashMap<CaseId, Arc<Mutex<()>>>,
}

impl CaseStore {
    pub fn new(db: Database) -> Self {
        Self {
            cases: CaseRepo::new(db.clone()),
            history: HistoryRepo::new(db.clone()),
            db,
            case_locks: DashMap::new(),
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    fn lock_for(&self, case_id: &CaseId) -> Arc<Mutex<()>> {
        self.case_locks
            .entry(case_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Store an immutable profile and seed its intake record (S0).
    #[instrument(skip(self, profile), fields(case_id = %profile.id))]
    pub fn register_case(&self, profile: &CaseProfile) -> Result<CommitReceipt, StoreError> {
        let lock = self.lock_for(&profile.id);
        let _guard = lock.lock();
        let intake = intake_record(profile);

        let receipt = self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let _ = CaseRepo::insert_in(&tx, profile)?;
            let receipt = HistoryRepo::append_in(&tx, &profile.id, &intake)?;
            tx.commit()?;
            Ok(receipt)
        })?;
        info!(turns = intake.dialogue.len(), "case registered");
        Ok(receipt)
    }

    pub fn get_case(&self, case_id: &CaseId) -> Result<CaseProfile, StoreError> {
        self.cases.get(case_id)
    }

    pub fn has_case(&self, case_id: &CaseId) -> Result<bool, StoreError> {
        self.cases.exists(case_id)
    }

    /// Committed sessions in order, starting with S0. `NotFound` for unknown cases.
    #[instrument(skip(self), fields(case_id = %case_id))]
    pub fn get_history(&self, case_id: &CaseId) -> Result<Vec<SessionRecord>, StoreError> {
        if !self.cases.exists(case_id)? {
            return Err(StoreError::NotFound(format!("case {case_id}")));
        }
        self.history.list(case_id)
    }

    pub fn list_cases(&self) -> Result<Vec<CaseSummary>, StoreError> {
        self.cases.list()
    }

    pub fn content_hash(&self, case_id: &CaseId, session: SessionNumber) -> Result<String, StoreError> {
        self.history.stored_hash(case_id, session)
    }

    /// Append the next session. Checks, in order: the case exists, its number
    /// is the next one, and the record does not contradict the profile.
    /// The append itself is one transaction.
    #[instrument(skip(self, record), fields(case_id = %case_id, session_id = %record.session_id))]
    pub fn commit(&self, case_id: &CaseId, record: &SessionRecord) -> Result<CommitReceipt, StoreError> {
        let lock = self.lock_for(case_id);
        let _guard = lock.lock();

        let profile = self.cases.get(case_id)?;
        let receipt = self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let expected = HistoryRepo::next_ordinal_in(&tx, case_id)?;
            let found = record.session_id.get();
            if found != expected {
                return Err(StoreError::Sequence { expected, found });
            }

            let contradictions = scan_profile(&profile, record);
            if !contradictions.is_empty() {
                warn!(count = contradictions.len(), "commit rejected by profile scan");
                return Err(StoreError::Continuity {
                    case_id: case_id.to_string(),
                    session: record.session_id.to_string(),
                    contradictions,
                });
            }

            let receipt = HistoryRepo::append_in(&tx, case_id, record)?;
            tx.commit()?;
            Ok(receipt)
        })?;
        info!(turns = record.dialogue.len(), sha256 = %short_hash(&receipt.content_sha256), "session committed");
        Ok(receipt)
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Cheap fact scan of a record against the profile. Artifact text is written
/// in the client's voice, so it is scanned as client speech.
pub fn scan_profile(profile: &CaseProfile, record: &SessionRecord) -> Vec<facts::Contradiction> {
    let mut claims = facts::extract_claims(&record.dialogue);
    claims.extend(facts::extract_text_claims(&record.artifact.content, Role::Client));
    facts::check_profile(profile.client(), &claims)
}
