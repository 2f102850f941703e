//! Live run and background task registries.
//!
//! The `RunRegistry` is the process-wide front door: it spawns engine runs,
//! tracks their shared state, routes review decisions and aborts to the
//! right run, and falls back to the checkpoint store for runs that are no
//! longer resident. Each spawned engine run is dispatched through the
//! `TaskRegistry`, so callers hold a pollable handle to the eventual
//! outcome.

use crate::checkpoint::CheckpointStore;
use crate::config::EngineConfig;
use crate::engine::PipelineEngine;
use crate::errors::EngineError;
use chrono::Utc;
use reel_protocol::{
    Event, ReviewDecision, RunErrorKind, RunState, RunStatus, RunSummary, Task, TaskStatus,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Bookkeeping for one resident run.
struct RunHandle {
    state: Arc<Mutex<RunState>>,
    review_tx: mpsc::Sender<ReviewDecision>,
    abort: Arc<AtomicBool>,
    /// Task handle for the spawned engine future.
    task_id: Uuid,
}

/// Registry of resident runs, backed by the checkpoint store for the rest.
pub struct RunRegistry {
    engine: Arc<PipelineEngine>,
    store: Arc<dyn CheckpointStore>,
    config: Arc<EngineConfig>,
    tasks: Arc<TaskRegistry>,
    runs: Mutex<HashMap<Uuid, RunHandle>>,
    events_tx: mpsc::Sender<Event>,
}

impl RunRegistry {
    pub fn new(
        engine: Arc<PipelineEngine>,
        store: Arc<dyn CheckpointStore>,
        config: Arc<EngineConfig>,
        events_tx: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            engine,
            store,
            config,
            tasks: Arc::new(TaskRegistry::new()),
            runs: Mutex::new(HashMap::new()),
            events_tx,
        }
    }

    /// Create and start a fresh run for `topic`, returning its id.
    pub async fn start(&self, topic: impl Into<String>) -> Uuid {
        let state = RunState::new(topic);
        let run_id = state.run_id;
        let _ = self
            .events_tx
            .send(Event::RunStarted {
                run_id,
                topic: state.topic.clone(),
            })
            .await;
        tracing::info!(%run_id, topic = %state.topic, "starting run");

        let handle = self.spawn(Arc::new(Mutex::new(state)), "start_run").await;
        self.runs.lock().await.insert(run_id, handle);
        run_id
    }

    /// Current summary of a run, from resident state or the latest
    /// checkpoint. Terminal resident runs are released after the summary is
    /// taken; later queries read the checkpoint store.
    pub async fn status(&self, run_id: Uuid) -> Result<RunSummary, EngineError> {
        let mut runs = self.runs.lock().await;
        if let Some(handle) = runs.get(&run_id) {
            let (summary, terminal) = {
                let state = handle.state.lock().await;
                (RunSummary::from(&*state), state.is_terminal())
            };
            if terminal {
                runs.remove(&run_id);
            }
            return Ok(summary);
        }
        drop(runs);

        match self.store.load_latest(run_id).await? {
            Some(state) => Ok(RunSummary::from(&state)),
            None => Err(EngineError::RunNotFound(run_id)),
        }
    }

    /// Deliver a review decision to a resident run awaiting one.
    ///
    /// A suspended (non-resident) run must be resumed first; its engine
    /// re-enters the review wait and the decision can then be delivered.
    pub async fn resolve_review(
        &self,
        run_id: Uuid,
        decision: ReviewDecision,
    ) -> Result<(), EngineError> {
        let runs = self.runs.lock().await;
        let handle = runs.get(&run_id).ok_or(EngineError::RunNotFound(run_id))?;

        {
            let state = handle.state.lock().await;
            if state.status != RunStatus::AwaitingReview || state.pending_review.is_none() {
                return Err(EngineError::NoPendingReview(run_id));
            }
        }
        handle
            .review_tx
            .send(decision)
            .await
            .map_err(|_| EngineError::NoPendingReview(run_id))
    }

    /// Resume a checkpointed run, returning the task handle for the new
    /// engine future.
    ///
    /// An `Error` run resumes with the failed stage's retry budget reset;
    /// the manual intervention is the reset. A `Complete` run, or one still
    /// executing in this process, is not resumable.
    pub async fn resume(&self, run_id: Uuid) -> Result<Uuid, EngineError> {
        {
            let mut runs = self.runs.lock().await;
            if let Some(handle) = runs.get(&run_id) {
                let status = handle.state.lock().await.status;
                if matches!(status, RunStatus::Error | RunStatus::Complete) {
                    runs.remove(&run_id);
                } else {
                    return Err(EngineError::NotResumable { run_id, status });
                }
            }
        }

        let mut state = self
            .store
            .load_latest(run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))?;

        match state.status {
            RunStatus::Complete => {
                return Err(EngineError::NotResumable {
                    run_id,
                    status: RunStatus::Complete,
                })
            }
            RunStatus::Error => {
                state.retry_counts.remove(&state.current_stage);
                state.touch();
            }
            // Pending, Running, and AwaitingReview re-enter where they left
            // off; replay skips work that already has artifacts.
            _ => {}
        }
        tracing::info!(%run_id, stage = %state.current_stage, "resuming run");

        let handle = self.spawn(Arc::new(Mutex::new(state)), "resume_run").await;
        let task_id = handle.task_id;
        self.runs.lock().await.insert(run_id, handle);
        Ok(task_id)
    }

    /// Abort a run: resident runs halt between stages (or immediately if
    /// awaiting review); suspended runs are marked aborted in the store.
    pub async fn abort(&self, run_id: Uuid) -> Result<(), EngineError> {
        {
            let runs = self.runs.lock().await;
            if let Some(handle) = runs.get(&run_id) {
                handle.abort.store(true, Ordering::SeqCst);
                let awaiting =
                    handle.state.lock().await.status == RunStatus::AwaitingReview;
                if awaiting {
                    let _ = handle.review_tx.send(ReviewDecision::Abort).await;
                }
                return Ok(());
            }
        }

        let mut state = self
            .store
            .load_latest(run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))?;
        if state.is_terminal() {
            return Err(EngineError::NotResumable {
                run_id,
                status: state.status,
            });
        }
        let stage = state.current_stage;
        state.record_error(
            RunErrorKind::Aborted,
            stage,
            format!("aborted at stage {stage}"),
        );
        state.status = RunStatus::Error;
        state.pending_review = None;
        self.store.save(&state).await?;
        let _ = self
            .events_tx
            .send(Event::RunFailed {
                run_id,
                kind: RunErrorKind::Aborted,
                message: format!("aborted at stage {stage}"),
            })
            .await;
        Ok(())
    }

    /// Poll a background task handle, sweeping expired terminal tasks.
    pub async fn poll_task(&self, task_id: Uuid) -> Option<Task> {
        self.tasks.sweep(self.config.task_retention()).await;
        self.tasks.poll(task_id).await
    }

    async fn spawn(&self, shared: Arc<Mutex<RunState>>, kind: &str) -> RunHandle {
        let (review_tx, mut review_rx) = mpsc::channel(8);
        let abort = Arc::new(AtomicBool::new(false));

        let engine = Arc::clone(&self.engine);
        let events_tx = self.events_tx.clone();
        let run_shared = Arc::clone(&shared);
        let abort_flag = Arc::clone(&abort);
        let task_id = self
            .tasks
            .dispatch(kind, async move {
                match engine
                    .run(Arc::clone(&run_shared), &mut review_rx, &abort_flag, &events_tx)
                    .await
                {
                    Ok(()) => {
                        let summary = RunSummary::from(&*run_shared.lock().await);
                        serde_json::to_value(&summary).map_err(|err| err.to_string())
                    }
                    Err(err) => Err(err.to_string()),
                }
            })
            .await;

        RunHandle {
            state: shared,
            review_tx,
            abort,
            task_id,
        }
    }
}

/// Pollable handles for dispatched background work.
///
/// Terminal tasks are removed on the first poll that observes them, or by a
/// retention sweep if never polled.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<Uuid, Task>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn `work` and return a handle that resolves to its outcome.
    pub async fn dispatch<F>(self: &Arc<Self>, kind: &str, work: F) -> Uuid
    where
        F: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        let task = Task::new(kind);
        let task_id = task.task_id;
        self.tasks.lock().await.insert(task_id, task);

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = work.await;
            let mut tasks = registry.tasks.lock().await;
            if let Some(task) = tasks.get_mut(&task_id) {
                task.finished_at = Some(Utc::now());
                match outcome {
                    Ok(value) => {
                        task.status = TaskStatus::Done;
                        task.result = Some(value);
                    }
                    Err(message) => {
                        task.status = TaskStatus::Error;
                        task.error = Some(message);
                    }
                }
            }
        });
        task_id
    }

    /// Current snapshot of a task; a terminal task is released by the poll
    /// that observes it.
    pub async fn poll(&self, task_id: Uuid) -> Option<Task> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get(&task_id).cloned()?;
        if task.status.is_terminal() {
            tasks.remove(&task_id);
        }
        Some(task)
    }

    /// Drop terminal tasks that finished longer than `retention` ago.
    pub async fn sweep(&self, retention: Duration) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        self.tasks.lock().await.retain(|_, task| {
            !task.status.is_terminal() || task.finished_at.map(|t| t > cutoff).unwrap_or(true)
        });
    }
}
