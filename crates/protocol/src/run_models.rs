//! Run state models.
//!
//! This module defines the structures for tracking the state of a content
//! generation run: the stage tags, the artifacts each stage produces, the
//! retry ledger, and the recorded errors. `RunState` is the single mutable
//! record threading through the pipeline and the payload of every checkpoint,
//! so everything here must serialize stably.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// One unit of pipeline work, in fixed topological order.
///
/// The declaration order is the execution order; `StageKind::ALL` and
/// [`StageKind::next`] derive from it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Gather background sources for the topic via the search collaborator.
    Research,

    /// Synthesize the narration script from topic + research via the LLM.
    SynthesizeScript,

    /// Split the script into timed scenes with visual direction.
    Storyboard,

    /// Collect candidate images for each scene via the search collaborator.
    CollectImages,

    /// Synthesize narration audio per scene via the TTS collaborator.
    GenerateAudio,

    /// Generate video clips per scene via the video collaborator.
    GenerateVideos,

    /// Write the final run manifest tying all artifacts together.
    SaveOutputs,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [StageKind; 7] = [
        StageKind::Research,
        StageKind::SynthesizeScript,
        StageKind::Storyboard,
        StageKind::CollectImages,
        StageKind::GenerateAudio,
        StageKind::GenerateVideos,
        StageKind::SaveOutputs,
    ];

    /// The entry stage of a fresh run.
    pub fn first() -> StageKind {
        StageKind::Research
    }

    /// The stage following this one, or `None` for the last stage.
    pub fn next(self) -> Option<StageKind> {
        let idx = StageKind::ALL.iter().position(|s| *s == self)?;
        StageKind::ALL.get(idx + 1).copied()
    }

    /// Stable snake_case name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Research => "research",
            StageKind::SynthesizeScript => "synthesize_script",
            StageKind::Storyboard => "storyboard",
            StageKind::CollectImages => "collect_images",
            StageKind::GenerateAudio => "generate_audio",
            StageKind::GenerateVideos => "generate_videos",
            StageKind::SaveOutputs => "save_outputs",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a run.
///
/// Normal progression: Pending -> Running -> Complete.
///
/// Special states:
/// - AwaitingReview: suspended on a human-approval gate; no API calls are
///   made until the review resolves
/// - Error: terminal, unrecoverable without manual intervention (the last
///   good checkpoint remains loadable)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run has been created but not started yet.
    Pending,

    /// Run is actively executing a stage.
    Running,

    /// Run is suspended waiting for a human review decision.
    AwaitingReview,

    /// Run halted with a recorded error.
    Error,

    /// All required stages produced their artifacts.
    Complete,
}

/// One background source gathered during research.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResearchSource {
    pub title: String,
    pub url: String,
    pub content: String,
    /// Relevance score reported by the search collaborator, if any.
    pub score: Option<f64>,
}

/// One timed scene from the storyboard.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Scene {
    /// Zero-based position within the storyboard.
    pub index: usize,
    /// Narration text spoken over this scene.
    pub narration: String,
    /// Visual direction fed to image search and video generation.
    pub visual_prompt: String,
    /// Target duration in seconds.
    pub duration_secs: f64,
}

/// One collected candidate image.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub url: String,
    pub description: String,
    /// Search query that found this image.
    pub query: String,
    /// Local path once downloaded into the run directory.
    pub local_path: Option<String>,
}

/// One synthesized narration chunk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub scene_index: usize,
    /// Path within the run directory.
    pub path: String,
}

/// One generated video clip.
///
/// Clip retrieval URLs are time-limited; a clip is only durable once
/// `local_path` is set. An expired, undownloaded clip is treated as absent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VideoClip {
    pub scene_index: usize,
    pub retrieval_url: String,
    pub expires_at: DateTime<Utc>,
    pub local_path: Option<String>,
}

impl VideoClip {
    /// Whether the clip can still be consumed at `now`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.local_path.is_some() || self.expires_at > now
    }
}

/// The artifact a stage produces, recorded into `RunState::stage_outputs`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageArtifact {
    Research { sources: Vec<ResearchSource> },
    Script { text: String, word_count: usize },
    Storyboard { scenes: Vec<Scene> },
    Images { items: Vec<ImageAsset> },
    Audio { clips: Vec<AudioClip>, voice: String },
    Videos { clips: Vec<VideoClip> },
    Manifest { path: String },
}

impl StageArtifact {
    /// The stage this artifact belongs to.
    pub fn stage(&self) -> StageKind {
        match self {
            StageArtifact::Research { .. } => StageKind::Research,
            StageArtifact::Script { .. } => StageKind::SynthesizeScript,
            StageArtifact::Storyboard { .. } => StageKind::Storyboard,
            StageArtifact::Images { .. } => StageKind::CollectImages,
            StageArtifact::Audio { .. } => StageKind::GenerateAudio,
            StageArtifact::Videos { .. } => StageKind::GenerateVideos,
            StageArtifact::Manifest { .. } => StageKind::SaveOutputs,
        }
    }

    /// Whether the artifact can be replayed on resume instead of recomputed.
    ///
    /// A malformed or expired artifact is treated as absent, so the stage
    /// re-executes rather than advancing on bad data.
    pub fn is_well_formed(&self, now: DateTime<Utc>) -> bool {
        match self {
            StageArtifact::Research { sources } => !sources.is_empty(),
            StageArtifact::Script { text, word_count } => {
                !text.trim().is_empty() && *word_count > 0
            }
            StageArtifact::Storyboard { scenes } => !scenes.is_empty(),
            StageArtifact::Images { items } => !items.is_empty(),
            StageArtifact::Audio { clips, .. } => !clips.is_empty(),
            StageArtifact::Videos { clips } => {
                !clips.is_empty() && clips.iter().all(|c| c.is_usable(now))
            }
            StageArtifact::Manifest { path } => !path.is_empty(),
        }
    }
}

/// Classification of a recorded run failure.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunErrorKind {
    /// A stage artifact never passed its validation gate within the retry
    /// budget. User-actionable; the last artifact and reason are recorded.
    ValidationExhausted,

    /// A collaborator call failed or timed out after its own retry budget.
    ExternalCallFailure,

    /// A checkpoint write or read failed. Fatal: resumability cannot be
    /// guaranteed past this point.
    PersistenceError,

    /// The run was aborted through the review interface.
    Aborted,
}

/// One recorded failure, appended in order to `RunState::errors`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub stage: StageKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// A pending human review, present iff the run status is `AwaitingReview`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReviewRequest {
    /// The stage whose artifact is up for review.
    pub stage: StageKind,
    pub requested_at: DateTime<Utc>,
    /// Short human-readable description of the artifact under review.
    pub summary: String,
}

/// A human decision resolving a pending review.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Accept the artifact and advance to the next stage.
    Approve,
    /// Re-enter the stage with revision feedback threaded into the next
    /// attempt. Counts against the same retry budget.
    Reject { feedback: String },
    /// Halt the run; recorded as an `Aborted` error.
    Abort,
}

/// The single mutable record threading through the pipeline.
///
/// Every checkpoint is an immutable serialization of this structure taken
/// immediately after a stage transition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunState {
    /// Stable identifier, assigned once at run creation. Immutable.
    pub run_id: Uuid,

    /// The user's input topic.
    pub topic: String,

    /// The stage currently executing, or the next stage to execute if the
    /// run is suspended.
    pub current_stage: StageKind,

    /// Artifacts produced so far, keyed by stage.
    pub stage_outputs: BTreeMap<StageKind, StageArtifact>,

    /// Attempts consumed per stage. Never exceeds the configured maximum.
    pub retry_counts: BTreeMap<StageKind, u32>,

    pub status: RunStatus,

    /// Ordered sequence of recorded failures.
    pub errors: Vec<RunError>,

    /// The pending human decision, present iff status is `AwaitingReview`.
    pub pending_review: Option<ReviewRequest>,

    /// Rejection or validator feedback threaded into the next attempt of the
    /// keyed stage, cleared once that attempt succeeds.
    pub review_feedback: BTreeMap<StageKind, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Create a fresh run for `topic` with a new `run_id`.
    pub fn new(topic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            topic: topic.into(),
            current_stage: StageKind::first(),
            stage_outputs: BTreeMap::new(),
            retry_counts: BTreeMap::new(),
            status: RunStatus::Pending,
            errors: Vec::new(),
            pending_review: None,
            review_feedback: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The recorded artifact for `stage`, if any.
    pub fn artifact(&self, stage: StageKind) -> Option<&StageArtifact> {
        self.stage_outputs.get(&stage)
    }

    /// Record a stage artifact, replacing any prior attempt's output.
    pub fn record_artifact(&mut self, artifact: StageArtifact) {
        self.stage_outputs.insert(artifact.stage(), artifact);
        self.touch();
    }

    /// Discard the artifact for `stage` so the stage re-executes.
    pub fn clear_artifact(&mut self, stage: StageKind) {
        self.stage_outputs.remove(&stage);
        self.touch();
    }

    /// Attempts consumed so far for `stage`.
    pub fn retries_used(&self, stage: StageKind) -> u32 {
        self.retry_counts.get(&stage).copied().unwrap_or(0)
    }

    /// Consume one attempt for `stage`, returning the new count.
    pub fn bump_retry(&mut self, stage: StageKind) -> u32 {
        let count = self.retry_counts.entry(stage).or_insert(0);
        *count += 1;
        let used = *count;
        self.touch();
        used
    }

    /// Append a failure to the error log.
    pub fn record_error(&mut self, kind: RunErrorKind, stage: StageKind, message: impl Into<String>) {
        self.errors.push(RunError {
            kind,
            stage,
            message: message.into(),
            occurred_at: Utc::now(),
        });
        self.touch();
    }

    /// Whether the run reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Error | RunStatus::Complete)
    }

    /// Refresh `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Condensed view of a run for status queries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub topic: String,
    pub status: RunStatus,
    pub current_stage: StageKind,
    /// Stages with a recorded artifact.
    pub stages_done: usize,
    pub retry_counts: BTreeMap<StageKind, u32>,
    pub pending_review: Option<ReviewRequest>,
    pub last_error: Option<RunError>,
    pub updated_at: DateTime<Utc>,
}

impl From<&RunState> for RunSummary {
    fn from(state: &RunState) -> Self {
        Self {
            run_id: state.run_id,
            topic: state.topic.clone(),
            status: state.status,
            current_stage: state.current_stage,
            stages_done: state.stage_outputs.len(),
            retry_counts: state.retry_counts.clone(),
            pending_review: state.pending_review.clone(),
            last_error: state.errors.last().cloned(),
            updated_at: state.updated_at,
        }
    }
}
