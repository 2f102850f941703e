//! Inter-process communication protocol.
//!
//! This module defines the message types for asynchronous communication
//! between the CLI/UI layer and the Core.
//!
//! The protocol follows an Operation/Event pattern:
//! - `Op`: Commands sent from the client to the Core
//! - `Event`: Status updates pushed from the Core to the client
//!
//! Events are emitted on a channel in transition order, so a client that
//! consumes them sequentially observes every status change at least once.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run_models::{ReviewDecision, RunErrorKind, RunStatus, StageKind};

/// Operations sent from the client to the Core.
///
/// Uses tagged enum serialization:
/// ```json
/// {
///   "type": "startRun",
///   "payload": { "topic": "the water cycle" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Op {
    /// Start a new run for a topic.
    StartRun { topic: String },

    /// Request the current summary of a run.
    GetRunStatus { run_id: Uuid },

    /// Resolve a pending human review.
    ResolveReview {
        run_id: Uuid,
        decision: ReviewDecision,
    },

    /// Resume an interrupted run from its latest checkpoint.
    ResumeRun { run_id: Uuid },

    /// Abort a run between stages.
    AbortRun { run_id: Uuid },

    /// Poll a background task handle.
    PollTask { task_id: Uuid },

    /// Shut down the core gracefully.
    Shutdown,
}

/// Events pushed from the Core to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// A new run has been created.
    RunStarted { run_id: Uuid, topic: String },

    /// A stage began executing (attempt 1 or a retry).
    StageStarted {
        run_id: Uuid,
        stage: StageKind,
        attempt: u32,
    },

    /// A stage's artifact was recorded and checkpointed.
    StageCompleted { run_id: Uuid, stage: StageKind },

    /// A stage artifact already present was replayed without external calls.
    StageReplayed { run_id: Uuid, stage: StageKind },

    /// The run's status changed.
    RunStatusUpdate {
        run_id: Uuid,
        status: RunStatus,
        stage: StageKind,
    },

    /// The run is suspended waiting for a review decision.
    AwaitingReview {
        run_id: Uuid,
        stage: StageKind,
        summary: String,
    },

    /// The run finished successfully.
    RunCompleted { run_id: Uuid },

    /// The run halted with a recorded error.
    RunFailed {
        run_id: Uuid,
        kind: RunErrorKind,
        message: String,
    },
}
