//! Storyboard stage: script -> timed scenes with visual direction.

use crate::collaborators::LlmClient;
use crate::stages::{extract_json, governed_call, Stage, StageContext, StageError};
use async_trait::async_trait;
use reel_protocol::{RunState, Scene, StageArtifact, StageKind};
use serde::Deserialize;

/// Asks the LLM to split the script into scenes and parses the JSON reply.
/// A reply that is not valid JSON in the expected shape is a `Malformed`
/// error, which the gate counts against the stage's retry budget.
pub struct StoryboardStage;

/// Scene shape the LLM is asked to emit; indices are assigned by position.
#[derive(Deserialize)]
struct SceneSpec {
    narration: String,
    visual_prompt: String,
    duration_secs: f64,
}

fn build_prompt(state: &RunState, min_scenes: usize) -> String {
    let mut prompt = format!(
        "Split the provided narration script into at least {min_scenes} scenes \
         for a short video.\n\
         Reply with ONLY a JSON array; each element must have exactly these keys:\n\
         - \"narration\": the portion of the script spoken over the scene\n\
         - \"visual_prompt\": a concrete visual description for image and video generation\n\
         - \"duration_secs\": estimated spoken duration as a number\n\
         Every word of the script must appear in exactly one scene, in order."
    );
    if let Some(feedback) = state.review_feedback.get(&StageKind::Storyboard) {
        prompt.push_str(
            "\n\nA previous storyboard was rejected by the reviewer. Address this feedback:\n",
        );
        prompt.push_str(feedback);
    }
    prompt
}

fn parse_scenes(raw: &str) -> Result<Vec<Scene>, StageError> {
    let payload = extract_json(raw)
        .ok_or_else(|| StageError::Malformed("no JSON array in storyboard reply".to_string()))?;
    let specs: Vec<SceneSpec> = serde_json::from_str(payload)
        .map_err(|err| StageError::Malformed(format!("storyboard JSON: {err}")))?;
    Ok(specs
        .into_iter()
        .enumerate()
        .map(|(index, spec)| Scene {
            index,
            narration: spec.narration,
            visual_prompt: spec.visual_prompt,
            duration_secs: spec.duration_secs,
        })
        .collect())
}

#[async_trait]
impl Stage for StoryboardStage {
    fn kind(&self) -> StageKind {
        StageKind::Storyboard
    }

    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StageArtifact, StageError> {
        let Some(StageArtifact::Script { text, .. }) =
            state.artifact(StageKind::SynthesizeScript)
        else {
            return Err(StageError::MissingInput("script"));
        };

        let prompt = build_prompt(state, ctx.config.validation.min_scenes);
        let raw = governed_call(
            &ctx.governor,
            &ctx.config.backoff,
            ctx.config.transient_attempts,
            "llm",
            || ctx.collaborators.llm.generate(&prompt, text),
        )
        .await?;

        let scenes = parse_scenes(&raw)?;
        Ok(StageArtifact::Storyboard { scenes })
    }
}
