//! Audio stage: per-scene narration -> synthesized speech files.

use crate::collaborators::{ArtifactWriter, TtsClient};
use crate::stages::{governed_call, Stage, StageContext, StageError};
use async_trait::async_trait;
use reel_protocol::{AudioClip, RunState, StageArtifact, StageKind};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Synthesizes one narration clip per scene and writes it into the run
/// directory. Scenes run in parallel under the `tts` governor budget.
pub struct GenerateAudioStage;

#[async_trait]
impl Stage for GenerateAudioStage {
    fn kind(&self) -> StageKind {
        StageKind::GenerateAudio
    }

    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StageArtifact, StageError> {
        let Some(StageArtifact::Storyboard { scenes }) = state.artifact(StageKind::Storyboard)
        else {
            return Err(StageError::MissingInput("storyboard"));
        };

        let voice = ctx.config.tts_voice.clone();
        let run_id = state.run_id;

        let mut workers = JoinSet::new();
        for scene in scenes {
            let narration = scene.narration.clone();
            let scene_index = scene.index;
            let voice = voice.clone();
            let tts = Arc::clone(&ctx.collaborators.tts);
            let writer = Arc::clone(&ctx.writer);
            let governor = Arc::clone(&ctx.governor);
            let backoff = ctx.config.backoff;
            let attempts = ctx.config.transient_attempts;
            workers.spawn(async move {
                let bytes = governed_call(&governor, &backoff, attempts, "tts", || {
                    tts.synthesize(&narration, &voice)
                })
                .await?;
                let path = writer
                    .write(run_id, &format!("audio/scene-{scene_index}.mp3"), &bytes)
                    .await?;
                Ok::<_, StageError>(AudioClip { scene_index, path })
            });
        }

        let mut clips = Vec::new();
        while let Some(joined) = workers.join_next().await {
            clips.push(joined.map_err(|err| StageError::Worker(err.to_string()))??);
        }
        clips.sort_by_key(|clip| clip.scene_index);

        Ok(StageArtifact::Audio { clips, voice })
    }
}
