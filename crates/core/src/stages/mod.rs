//! Pipeline stages.
//!
//! Each stage is a pure function from the accumulated run state to one
//! artifact. Stages never mutate `RunState` themselves; the engine records
//! the returned artifact and checkpoints. All collaborator traffic goes
//! through [`governed_call`], which pairs every attempt with a governor
//! permit and retries transient failures with backoff.

mod audio;
mod images;
mod outputs;
mod research;
mod script;
mod storyboard;
mod video;

pub use audio::GenerateAudioStage;
pub use images::CollectImagesStage;
pub use outputs::SaveOutputsStage;
pub use research::ResearchStage;
pub use script::SynthesizeScriptStage;
pub use storyboard::StoryboardStage;
pub use video::GenerateVideosStage;

use crate::collaborators::{ArtifactWriter, CollaboratorError, Collaborators, WriterError};
use crate::config::{BackoffPolicy, EngineConfig};
use crate::governor::{GovernorError, RateGovernor};
use async_trait::async_trait;
use reel_protocol::{RunState, StageArtifact, StageKind};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single stage execution.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error(transparent)]
    Governor(#[from] GovernorError),

    /// A spawned worker panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// Collaborator output could not be parsed into the expected shape.
    #[error("malformed collaborator output: {0}")]
    Malformed(String),

    /// A prerequisite artifact is missing from the run state.
    #[error("missing input artifact: {0}")]
    MissingInput(&'static str),
}

/// Everything a stage needs to execute, shared across runs.
#[derive(Clone)]
pub struct StageContext {
    pub collaborators: Collaborators,
    pub writer: Arc<dyn ArtifactWriter>,
    pub governor: Arc<RateGovernor>,
    pub config: Arc<EngineConfig>,
}

/// One pipeline stage.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Produce this stage's artifact from the accumulated state.
    ///
    /// `state` is a snapshot; implementations read prior artifacts and the
    /// threaded review feedback from it but never write back.
    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StageArtifact, StageError>;
}

/// The standard seven-stage pipeline, keyed by stage.
pub fn standard_set() -> BTreeMap<StageKind, Arc<dyn Stage>> {
    let stages: [Arc<dyn Stage>; 7] = [
        Arc::new(ResearchStage),
        Arc::new(SynthesizeScriptStage),
        Arc::new(StoryboardStage),
        Arc::new(CollectImagesStage),
        Arc::new(GenerateAudioStage),
        Arc::new(GenerateVideosStage),
        Arc::new(SaveOutputsStage),
    ];
    stages.into_iter().map(|s| (s.kind(), s)).collect()
}

/// Run one collaborator call under governance, retrying transient failures.
///
/// Each attempt acquires a fresh permit for `api` and releases it before
/// backing off, so a waiting retry never occupies an in-flight slot.
/// `attempts` bounds the total number of calls; a non-transient error, or a
/// transient error on the final attempt, is returned as-is.
pub async fn governed_call<T, F, Fut>(
    governor: &RateGovernor,
    backoff: &BackoffPolicy,
    attempts: u32,
    api: &str,
    mut call: F,
) -> Result<T, StageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut used = 0;
    loop {
        let permit = governor.acquire(api).await?;
        let result = call().await;
        drop(permit);

        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                used += 1;
                if !err.is_transient() || used >= attempts {
                    return Err(StageError::Collaborator(err));
                }
                tokio::time::sleep(backoff.delay(used)).await;
            }
        }
    }
}

/// Pull the JSON payload out of an LLM reply.
///
/// Providers wrap JSON in markdown fences or prose more often than not.
/// This strips an optional ``` fence and slices from the first opening
/// bracket to the matching-side last closing bracket.
pub(crate) fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let body = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start();
        match rest.find("```") {
            Some(end) => rest[..end].trim_end(),
            None => rest,
        }
    } else {
        trimmed
    };

    let start = body.find(['{', '['])?;
    let close = if body.as_bytes()[start] == b'{' {
        '}'
    } else {
        ']'
    };
    let end = body.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&body[start..=end])
}
