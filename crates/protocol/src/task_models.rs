//! Background task handles.
//!
//! The interactive variant dispatches long-running API work to background
//! workers and hands the client a `Task` handle to poll. Tasks live in the
//! core's task registry until the client observes a terminal status or a
//! retention sweep collects them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a background task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Running,
    Done,
    Error,
}

impl TaskStatus {
    /// Whether the task has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }
}

/// A handle to an asynchronous unit of API work.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Task {
    pub task_id: Uuid,

    /// What kind of work was dispatched, e.g. "start_run" or "resume_run".
    pub kind: String,

    pub status: TaskStatus,

    /// Result payload once `status == Done`.
    pub result: Option<serde_json::Value>,

    /// Failure description once `status == Error`.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a freshly dispatched task handle.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            kind: kind.into(),
            status: TaskStatus::Running,
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}
