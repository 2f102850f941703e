//! Output stage: tie every artifact together into a run manifest.

use crate::collaborators::ArtifactWriter;
use crate::stages::{Stage, StageContext, StageError};
use async_trait::async_trait;
use reel_protocol::{RunState, StageArtifact, StageKind};
use serde_json::json;

/// Writes `manifest.json` into the run directory, referencing the script,
/// scenes, and the media files produced by the earlier stages. No external
/// APIs are involved, so this stage bypasses the governor.
pub struct SaveOutputsStage;

fn build_manifest(state: &RunState) -> Result<serde_json::Value, StageError> {
    let Some(StageArtifact::Script { text, word_count }) =
        state.artifact(StageKind::SynthesizeScript)
    else {
        return Err(StageError::MissingInput("script"));
    };
    let Some(StageArtifact::Storyboard { scenes }) = state.artifact(StageKind::Storyboard) else {
        return Err(StageError::MissingInput("storyboard"));
    };

    let mut manifest = json!({
        "run_id": state.run_id,
        "topic": state.topic,
        "created_at": state.created_at,
        "script": { "text": text, "word_count": word_count },
        "scenes": scenes,
    });

    if let Some(StageArtifact::Research { sources }) = state.artifact(StageKind::Research) {
        manifest["sources"] = json!(sources
            .iter()
            .map(|s| json!({ "title": s.title, "url": s.url }))
            .collect::<Vec<_>>());
    }
    if let Some(StageArtifact::Images { items }) = state.artifact(StageKind::CollectImages) {
        manifest["images"] = json!(items);
    }
    if let Some(StageArtifact::Audio { clips, voice }) = state.artifact(StageKind::GenerateAudio)
    {
        manifest["audio"] = json!({ "voice": voice, "clips": clips });
    }
    if let Some(StageArtifact::Videos { clips }) = state.artifact(StageKind::GenerateVideos) {
        manifest["videos"] = json!(clips);
    }

    Ok(manifest)
}

#[async_trait]
impl Stage for SaveOutputsStage {
    fn kind(&self) -> StageKind {
        StageKind::SaveOutputs
    }

    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StageArtifact, StageError> {
        let manifest = build_manifest(state)?;
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| StageError::Malformed(format!("manifest serialization: {err}")))?;
        let path = ctx.writer.write(state.run_id, "manifest.json", &bytes).await?;
        Ok(StageArtifact::Manifest { path })
    }
}
