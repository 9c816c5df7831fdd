pub mod case;
pub mod constraint;
pub mod errors;
pub mod events;
pub mod facts;
pub mod ids;
pub mod intake;
pub mod prompt;
pub mod provider;
pub mod security;
pub mod session;
pub mod stage;
pub mod text;

pub use case::{CaseProfile, ClientInfo, IntakeForm};
pub use constraint::{ConstraintResult, Severity, ValidationReport, ViolationKind};
pub use errors::GenerationError;
pub use ids::{AttemptId, CaseId, RunId};
pub use session::{Artifact, DialogueTurn, Role, SessionNumber, SessionRecord};
pub use stage::StagePlan;
