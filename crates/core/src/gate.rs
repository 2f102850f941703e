//! Conditional validation gates.
//!
//! A gate wraps one stage execution in a check-and-retry loop. Validation
//! failures (including unparseable collaborator output) consume the stage's
//! retry budget, with the failure reason threaded into the next attempt as
//! feedback; any other failure aborts the gate immediately. The gate never
//! records artifacts or checkpoints, that is the engine's job.

use crate::config::{BackoffPolicy, ValidationConfig};
use crate::stages::{Stage, StageContext, StageError};
use chrono::Utc;
use reel_protocol::{RunState, StageArtifact, StageKind};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Artifact acceptance rule applied after a stage executes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Validator {
    /// Any well-formed artifact passes.
    Accept,

    /// Script word count within inclusive bounds.
    WordCountRange { min: usize, max: usize },

    /// At least `min` items in a collection artifact.
    MinItems { min: usize, what: &'static str },

    /// Best research source relevance score at or above `min`.
    ScoreAtLeast { min: f64 },
}

impl Validator {
    /// The rule configured for `stage`.
    pub fn for_stage(stage: StageKind, validation: &ValidationConfig) -> Validator {
        match stage {
            StageKind::Research => match validation.research_min_score {
                Some(min) => Validator::ScoreAtLeast { min },
                None => Validator::Accept,
            },
            StageKind::SynthesizeScript => Validator::WordCountRange {
                min: validation.script_min_words,
                max: validation.script_max_words,
            },
            StageKind::Storyboard => Validator::MinItems {
                min: validation.min_scenes,
                what: "scenes",
            },
            StageKind::CollectImages => Validator::MinItems {
                min: validation.min_images,
                what: "images",
            },
            _ => Validator::Accept,
        }
    }

    /// Check `artifact`, returning the human-readable rejection reason on
    /// failure. The reason doubles as feedback for the next attempt.
    pub fn check(&self, artifact: &StageArtifact) -> Result<(), String> {
        match (self, artifact) {
            (Validator::Accept, artifact) => {
                if artifact.is_well_formed(Utc::now()) {
                    Ok(())
                } else {
                    Err(format!(
                        "{} artifact is empty or not well formed",
                        artifact.stage()
                    ))
                }
            }
            (
                Validator::WordCountRange { min, max },
                StageArtifact::Script { word_count, .. },
            ) => {
                if (*min..=*max).contains(word_count) {
                    Ok(())
                } else {
                    Err(format!(
                        "script is {word_count} words, expected between {min} and {max}"
                    ))
                }
            }
            (Validator::MinItems { min, what }, artifact) => {
                let count = match artifact {
                    StageArtifact::Research { sources } => sources.len(),
                    StageArtifact::Storyboard { scenes } => scenes.len(),
                    StageArtifact::Images { items } => items.len(),
                    StageArtifact::Audio { clips, .. } => clips.len(),
                    StageArtifact::Videos { clips } => clips.len(),
                    _ => 0,
                };
                if count >= *min {
                    Ok(())
                } else {
                    Err(format!("got {count} {what}, expected at least {min}"))
                }
            }
            (Validator::ScoreAtLeast { min }, StageArtifact::Research { sources }) => {
                let best = sources
                    .iter()
                    .filter_map(|s| s.score)
                    .fold(f64::NEG_INFINITY, f64::max);
                if best >= *min {
                    Ok(())
                } else {
                    Err(format!(
                        "best source relevance is {best:.2}, expected at least {min:.2}"
                    ))
                }
            }
            (validator, artifact) => Err(format!(
                "validator {validator:?} does not apply to {} artifact",
                artifact.stage()
            )),
        }
    }
}

/// How a gated stage execution ended.
pub enum GateOutcome {
    /// The artifact passed validation.
    Passed(StageArtifact),

    /// The retry budget is spent without a passing artifact; `reason` is the
    /// last rejection.
    Exhausted { reason: String },

    /// A non-validation failure; not retried by the gate.
    Failed(StageError),
}

/// Execute `stage` under its validation gate.
///
/// Each attempt runs against a fresh snapshot of the shared state, so
/// feedback recorded after a rejection is visible to the next attempt. The
/// retry ledger accumulates across gate invocations: a human rejection that
/// re-enters the stage draws on the same budget.
pub async fn run_gated(
    stage: &dyn Stage,
    shared: &Arc<Mutex<RunState>>,
    ctx: &StageContext,
    validator: Validator,
    max_retries: u32,
    backoff: &BackoffPolicy,
) -> GateOutcome {
    // A resumed state can arrive with its budget already spent (e.g. a
    // checkpoint taken under a larger per-stage budget); no attempt may run.
    {
        let state = shared.lock().await;
        let used = state.retries_used(stage.kind());
        if used >= max_retries {
            return GateOutcome::Exhausted {
                reason: format!(
                    "{} retry budget already spent ({used} of {max_retries})",
                    stage.kind()
                ),
            };
        }
    }

    loop {
        let snapshot = { shared.lock().await.clone() };

        let artifact = match stage.execute(&snapshot, ctx).await {
            Ok(artifact) => artifact,
            // Unparseable output is a quality failure, charged like one.
            Err(StageError::Malformed(reason)) => {
                match charge_attempt(stage.kind(), shared, max_retries, reason).await {
                    Charge::Exhausted { reason } => return GateOutcome::Exhausted { reason },
                    Charge::Retry { used } => {
                        tokio::time::sleep(backoff.delay(used)).await;
                        continue;
                    }
                }
            }
            Err(err) => return GateOutcome::Failed(err),
        };

        match validator.check(&artifact) {
            Ok(()) => {
                let mut state = shared.lock().await;
                state.review_feedback.remove(&stage.kind());
                state.touch();
                return GateOutcome::Passed(artifact);
            }
            Err(reason) => match charge_attempt(stage.kind(), shared, max_retries, reason).await {
                Charge::Exhausted { reason } => return GateOutcome::Exhausted { reason },
                Charge::Retry { used } => {
                    tokio::time::sleep(backoff.delay(used)).await;
                    continue;
                }
            },
        }
    }
}

enum Charge {
    Retry { used: u32 },
    Exhausted { reason: String },
}

async fn charge_attempt(
    stage: StageKind,
    shared: &Arc<Mutex<RunState>>,
    max_retries: u32,
    reason: String,
) -> Charge {
    let mut state = shared.lock().await;
    let used = state.bump_retry(stage);
    if used >= max_retries {
        Charge::Exhausted { reason }
    } else {
        tracing::debug!(stage = %stage, attempt = used, %reason, "validation failed, retrying");
        state.review_feedback.insert(stage, reason);
        Charge::Retry { used }
    }
}
