pub mod attempt;
pub mod batch;
pub mod candidate;
pub mod ccd;
pub mod composer;
pub mod constraints;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod transcript;
pub mod truncate;
pub mod validator;

#[cfg(test)]
mod fixtures;

pub use attempt::GenerationAttempt;
pub use batch::{synthesize_cases, CaseOutcome};
pub use candidate::Candidate;
pub use ccd::{Ccd, CcdError, CcdExtractor, CcdReport};
pub use composer::PromptComposer;
pub use constraints::{CheckContext, Constraint, ConstraintRegistry};
pub use error::{PlanningError, SynthesisError, SynthesisFailure};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use planner::{StagePlanner, StageSpec, DEFAULT_ARC};
pub use transcript::{TranscriptBundle, TranscriptError};
pub use validator::{Validation, Validator};
