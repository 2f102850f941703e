//! Engine-level error taxonomy.
//!
//! Transient collaborator failures never reach this level; stages retry them
//! under a governed permit and only let them surface once their budget is
//! spent. Everything that halts a run maps onto a `RunErrorKind`
//! so the recorded state carries the same classification as the returned
//! error.

use crate::checkpoint::CheckpointError;
use crate::governor::GovernorError;
use crate::stages::StageError;
use reel_protocol::{RunErrorKind, RunStatus, StageKind};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the engine and registry.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A stage artifact never passed its validation gate within the retry
    /// budget.
    #[error("validation exhausted for stage {stage}: {reason}")]
    ValidationExhausted { stage: StageKind, reason: String },

    /// A collaborator call failed after its transient-retry budget.
    #[error("external call failed in stage {stage}: {source}")]
    ExternalCall {
        stage: StageKind,
        source: StageError,
    },

    /// Checkpoint persistence failed; the run halts because resumability
    /// cannot be guaranteed.
    #[error("checkpoint persistence failed: {0}")]
    Persistence(#[from] CheckpointError),

    /// The run was aborted through the review interface or the abort flag.
    #[error("run aborted at stage {stage}")]
    Aborted { stage: StageKind },

    #[error(transparent)]
    Governor(#[from] GovernorError),

    /// The engine's stage set has no implementation for a stage.
    #[error("no implementation registered for stage {0}")]
    StageUnavailable(StageKind),

    /// The run id is not registered and has no checkpoints.
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    /// A review was resolved for a run that is not awaiting one.
    #[error("run {0} has no pending review")]
    NoPendingReview(Uuid),

    /// Resume was requested for a run whose status does not allow it.
    #[error("run {run_id} is not resumable from status {status:?}")]
    NotResumable { run_id: Uuid, status: RunStatus },
}

impl EngineError {
    /// The `RunErrorKind` this error records into the run state, if any.
    pub fn run_error_kind(&self) -> Option<RunErrorKind> {
        match self {
            EngineError::ValidationExhausted { .. } => Some(RunErrorKind::ValidationExhausted),
            EngineError::ExternalCall { .. } => Some(RunErrorKind::ExternalCallFailure),
            EngineError::Persistence(_) => Some(RunErrorKind::PersistenceError),
            EngineError::Aborted { .. } => Some(RunErrorKind::Aborted),
            _ => None,
        }
    }
}
