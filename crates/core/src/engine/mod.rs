//! Pipeline execution engine.
//!
//! The engine drives one run through the stage state machine: each stage
//! executes under its validation gate, the resulting artifact is recorded
//! and checkpointed, approval stages suspend until a review decision
//! arrives, and every transition is pushed to the event channel. Control
//! flow is decided by the transition table in [`transitions`]; this module
//! only produces events and performs the bookkeeping they imply.
//!
//! The shared `RunState` lock is held only for short synchronous sections,
//! never across a stage execution or a checkpoint write.

pub mod transitions;

use crate::checkpoint::CheckpointStore;
use crate::engine::transitions::{next_state, EngineState, StageEvent};
use crate::errors::EngineError;
use crate::gate::{run_gated, GateOutcome, Validator};
use crate::stages::{Stage, StageContext};
use chrono::Utc;
use reel_protocol::{
    Event, ReviewDecision, ReviewRequest, RunErrorKind, RunState, RunStatus, StageArtifact,
    StageKind,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Short human-readable description of an artifact for review prompts.
fn artifact_summary(artifact: &StageArtifact) -> String {
    match artifact {
        StageArtifact::Research { sources } => format!("{} research sources", sources.len()),
        StageArtifact::Script { word_count, .. } => {
            format!("script draft, {word_count} words")
        }
        StageArtifact::Storyboard { scenes } => format!("storyboard with {} scenes", scenes.len()),
        StageArtifact::Images { items } => format!("{} candidate images", items.len()),
        StageArtifact::Audio { clips, voice } => {
            format!("{} narration clips, voice '{voice}'", clips.len())
        }
        StageArtifact::Videos { clips } => format!("{} video clips", clips.len()),
        StageArtifact::Manifest { path } => format!("run manifest at {path}"),
    }
}

/// Executes runs against a fixed stage set, checkpointing every transition.
pub struct PipelineEngine {
    stages: BTreeMap<StageKind, Arc<dyn Stage>>,
    store: Arc<dyn CheckpointStore>,
    ctx: StageContext,
}

impl PipelineEngine {
    pub fn new(
        stages: BTreeMap<StageKind, Arc<dyn Stage>>,
        store: Arc<dyn CheckpointStore>,
        ctx: StageContext,
    ) -> Self {
        Self { stages, store, ctx }
    }

    /// Drive `shared` from its current position to a terminal state.
    ///
    /// Review decisions arrive on `review_rx`; a closed channel suspends the
    /// run in `AwaitingReview` rather than failing it, so a shutdown while a
    /// review is pending stays resumable. The abort flag is honored between
    /// stages.
    ///
    /// Returns `Ok(())` when the run completes or suspends; the error
    /// mirrors what was recorded into the run state otherwise.
    pub async fn run(
        &self,
        shared: Arc<Mutex<RunState>>,
        review_rx: &mut mpsc::Receiver<ReviewDecision>,
        abort: &AtomicBool,
        events_tx: &mpsc::Sender<Event>,
    ) -> Result<(), EngineError> {
        let (run_id, mut engine_state) = {
            let state = shared.lock().await;
            let entry = if state.status == RunStatus::AwaitingReview
                && state.pending_review.is_some()
            {
                EngineState::Review(state.current_stage)
            } else {
                EngineState::Run(state.current_stage)
            };
            (state.run_id, entry)
        };

        // Resuming into a pending review: re-announce it so a freshly
        // attached client knows a decision is wanted.
        if let EngineState::Review(stage) = engine_state {
            let summary = {
                let state = shared.lock().await;
                state
                    .pending_review
                    .as_ref()
                    .map(|r| r.summary.clone())
                    .unwrap_or_default()
            };
            let _ = events_tx
                .send(Event::AwaitingReview {
                    run_id,
                    stage,
                    summary,
                })
                .await;
        }

        loop {
            match engine_state {
                EngineState::Run(stage) => {
                    if abort.load(Ordering::SeqCst) {
                        return self.fail_aborted(&shared, events_tx, stage).await;
                    }

                    let event = self.run_stage(&shared, events_tx, run_id, stage).await?;
                    engine_state = next_state(engine_state, event);
                }

                EngineState::Review(stage) => {
                    let Some(decision) = review_rx.recv().await else {
                        // Decision channel closed: suspend, stay resumable.
                        tracing::info!(%run_id, %stage, "review channel closed, suspending run");
                        return Ok(());
                    };

                    let event = match decision {
                        ReviewDecision::Approve => {
                            self.apply_approval(&shared, events_tx, run_id, stage).await?;
                            StageEvent::Approved
                        }
                        ReviewDecision::Reject { feedback } => {
                            self.apply_rejection(&shared, events_tx, stage, feedback).await?;
                            StageEvent::Rejected
                        }
                        ReviewDecision::Abort => {
                            return self.fail_aborted(&shared, events_tx, stage).await;
                        }
                    };
                    engine_state = next_state(engine_state, event);
                }

                EngineState::Done => {
                    let stage = {
                        let mut state = shared.lock().await;
                        state.status = RunStatus::Complete;
                        state.touch();
                        state.current_stage
                    };
                    self.checkpoint_or_fail(&shared, events_tx, stage).await?;
                    let _ = events_tx.send(Event::RunCompleted { run_id }).await;
                    tracing::info!(%run_id, "run complete");
                    return Ok(());
                }

                // Failure paths return early, so the table never lands here
                // from a valid sequence. Treat it as a no-op suspension.
                EngineState::Halted => return Ok(()),
            }
        }
    }

    /// Execute one stage under its gate and report what happened.
    async fn run_stage(
        &self,
        shared: &Arc<Mutex<RunState>>,
        events_tx: &mpsc::Sender<Event>,
        run_id: uuid::Uuid,
        stage: StageKind,
    ) -> Result<StageEvent, EngineError> {
        let attempt = {
            let mut state = shared.lock().await;
            state.current_stage = stage;
            state.status = RunStatus::Running;
            state.touch();
            state.retries_used(stage) + 1
        };
        self.checkpoint_or_fail(shared, events_tx, stage).await?;
        let _ = events_tx
            .send(Event::RunStatusUpdate {
                run_id,
                status: RunStatus::Running,
                stage,
            })
            .await;

        // Replay: a well-formed artifact from a previous attempt of this
        // stage advances without re-executing or re-approving.
        let replayable = {
            let state = shared.lock().await;
            state.pending_review.is_none()
                && state
                    .artifact(stage)
                    .map(|a| a.is_well_formed(Utc::now()))
                    .unwrap_or(false)
        };
        if replayable {
            self.advance_past(shared, stage).await;
            self.checkpoint_or_fail(shared, events_tx, stage).await?;
            let _ = events_tx.send(Event::StageReplayed { run_id, stage }).await;
            tracing::debug!(%run_id, %stage, "replayed checkpointed artifact");
            return Ok(StageEvent::Succeeded);
        }

        let _ = events_tx
            .send(Event::StageStarted {
                run_id,
                stage,
                attempt,
            })
            .await;

        let stage_impl = self
            .stages
            .get(&stage)
            .ok_or(EngineError::StageUnavailable(stage))?;
        let settings = self.ctx.config.stage(stage);
        let validator = Validator::for_stage(stage, &self.ctx.config.validation);

        let outcome = run_gated(
            stage_impl.as_ref(),
            shared,
            &self.ctx,
            validator,
            settings.max_retries,
            &self.ctx.config.backoff,
        )
        .await;

        match outcome {
            GateOutcome::Passed(artifact) => {
                if settings.require_approval {
                    let request = ReviewRequest {
                        stage,
                        requested_at: Utc::now(),
                        summary: artifact_summary(&artifact),
                    };
                    let summary = request.summary.clone();
                    {
                        let mut state = shared.lock().await;
                        state.record_artifact(artifact);
                        state.status = RunStatus::AwaitingReview;
                        state.pending_review = Some(request);
                    }
                    // One checkpoint covers artifact + suspension, so a
                    // crash here resumes straight into the review wait.
                    self.checkpoint_or_fail(shared, events_tx, stage).await?;
                    let _ = events_tx
                        .send(Event::AwaitingReview {
                            run_id,
                            stage,
                            summary,
                        })
                        .await;
                    Ok(StageEvent::ApprovalRequired)
                } else {
                    {
                        let mut state = shared.lock().await;
                        state.record_artifact(artifact);
                    }
                    self.advance_past(shared, stage).await;
                    self.checkpoint_or_fail(shared, events_tx, stage).await?;
                    let _ = events_tx.send(Event::StageCompleted { run_id, stage }).await;
                    Ok(StageEvent::Succeeded)
                }
            }

            GateOutcome::Exhausted { reason } => {
                self.fail(
                    shared,
                    events_tx,
                    stage,
                    RunErrorKind::ValidationExhausted,
                    reason.clone(),
                )
                .await?;
                Err(EngineError::ValidationExhausted { stage, reason })
            }

            GateOutcome::Failed(source) => {
                self.fail(
                    shared,
                    events_tx,
                    stage,
                    RunErrorKind::ExternalCallFailure,
                    source.to_string(),
                )
                .await?;
                Err(EngineError::ExternalCall { stage, source })
            }
        }
    }

    /// Clear the review, advance, and checkpoint after an approval.
    async fn apply_approval(
        &self,
        shared: &Arc<Mutex<RunState>>,
        events_tx: &mpsc::Sender<Event>,
        run_id: uuid::Uuid,
        stage: StageKind,
    ) -> Result<(), EngineError> {
        {
            let mut state = shared.lock().await;
            state.pending_review = None;
            state.touch();
        }
        self.advance_past(shared, stage).await;
        self.checkpoint_or_fail(shared, events_tx, stage).await?;
        let _ = events_tx.send(Event::StageCompleted { run_id, stage }).await;
        Ok(())
    }

    /// Discard the rejected artifact, thread the feedback, and checkpoint.
    /// The stage re-enters its gate against the same retry budget.
    async fn apply_rejection(
        &self,
        shared: &Arc<Mutex<RunState>>,
        events_tx: &mpsc::Sender<Event>,
        stage: StageKind,
        feedback: String,
    ) -> Result<(), EngineError> {
        {
            let mut state = shared.lock().await;
            state.pending_review = None;
            state.review_feedback.insert(stage, feedback);
            state.clear_artifact(stage);
        }
        self.checkpoint_or_fail(shared, events_tx, stage).await
    }

    /// Move `current_stage` to the stage after `stage`, if any.
    async fn advance_past(&self, shared: &Arc<Mutex<RunState>>, stage: StageKind) {
        if let Some(next) = stage.next() {
            let mut state = shared.lock().await;
            state.current_stage = next;
            state.touch();
        }
    }

    /// Record a failure, mark the run `Error`, checkpoint, and emit.
    async fn fail(
        &self,
        shared: &Arc<Mutex<RunState>>,
        events_tx: &mpsc::Sender<Event>,
        stage: StageKind,
        kind: RunErrorKind,
        message: String,
    ) -> Result<(), EngineError> {
        let run_id = {
            let mut state = shared.lock().await;
            state.record_error(kind, stage, message.clone());
            state.status = RunStatus::Error;
            state.pending_review = None;
            state.run_id
        };
        // The last good checkpoint must survive even if this one fails.
        if let Err(err) = self.checkpoint(shared).await {
            tracing::warn!(%run_id, %err, "failed to checkpoint error state");
        }
        let _ = events_tx
            .send(Event::RunFailed {
                run_id,
                kind,
                message: message.clone(),
            })
            .await;
        tracing::error!(%run_id, %stage, ?kind, %message, "run halted");
        Ok(())
    }

    async fn fail_aborted(
        &self,
        shared: &Arc<Mutex<RunState>>,
        events_tx: &mpsc::Sender<Event>,
        stage: StageKind,
    ) -> Result<(), EngineError> {
        self.fail(
            shared,
            events_tx,
            stage,
            RunErrorKind::Aborted,
            format!("aborted at stage {stage}"),
        )
        .await?;
        Err(EngineError::Aborted { stage })
    }

    async fn checkpoint(&self, shared: &Arc<Mutex<RunState>>) -> Result<(), EngineError> {
        let snapshot = { shared.lock().await.clone() };
        self.store.save(&snapshot).await?;
        Ok(())
    }

    /// Checkpoint; on failure the run is marked `Error` in memory before the
    /// error propagates, so registry handles watching the shared state see a
    /// terminal run even though the store is down.
    async fn checkpoint_or_fail(
        &self,
        shared: &Arc<Mutex<RunState>>,
        events_tx: &mpsc::Sender<Event>,
        stage: StageKind,
    ) -> Result<(), EngineError> {
        let Err(err) = self.checkpoint(shared).await else {
            return Ok(());
        };
        if let Some(kind) = err.run_error_kind() {
            self.fail(shared, events_tx, stage, kind, err.to_string())
                .await?;
        }
        Err(err)
    }
}
