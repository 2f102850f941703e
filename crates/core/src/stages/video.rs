//! Video stage: per-scene visual prompts -> generated, downloaded clips.

use crate::collaborators::{ArtifactWriter, VideoClient};
use crate::stages::{governed_call, Stage, StageContext, StageError};
use async_trait::async_trait;
use reel_protocol::{RunState, StageArtifact, StageKind, VideoClip};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Generates one clip per scene and downloads it immediately, while the
/// provider's retrieval URL is still valid. Only a clip with a `local_path`
/// survives a resume; an expired undownloaded one forces re-generation.
pub struct GenerateVideosStage;

#[async_trait]
impl Stage for GenerateVideosStage {
    fn kind(&self) -> StageKind {
        StageKind::GenerateVideos
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

        let resolution = ctx.config.video_resolution.clone();
        let run_id = state.run_id;

        let mut workers = JoinSet::new();
        for scene in scenes {
            let prompt = scene.visual_prompt.clone();
            let duration_secs = scene.duration_secs;
            let scene_index = scene.index;
            let resolution = resolution.clone();
            let video = Arc::clone(&ctx.collaborators.video);
            let writer = Arc::clone(&ctx.writer);
            let governor = Arc::clone(&ctx.governor);
            let backoff = ctx.config.backoff;
            let attempts = ctx.config.transient_attempts;
            workers.spawn(async move {
                let handle = governed_call(&governor, &backoff, attempts, "video", || {
                    video.generate(&prompt, duration_secs, &resolution)
                })
                .await?;
                let bytes = governed_call(&governor, &backoff, attempts, "video", || {
                    video.download(&handle.retrieval_url)
                })
                .await?;
                let local_path = writer
                    .write(run_id, &format!("video/scene-{scene_index}.mp4"), &bytes)
                    .await?;
                Ok::<_, StageError>(VideoClip {
                    scene_index,
                    retrieval_url: handle.retrieval_url,
                    expires_at: handle.expires_at,
                    local_path: Some(local_path),
                })
            });
        }

        let mut clips = Vec::new();
        while let Some(joined) = workers.join_next().await {
            clips.push(joined.map_err(|err| StageError::Worker(err.to_string()))??);
        }
        clips.sort_by_key(|clip| clip.scene_index);

        Ok(StageArtifact::Videos { clips })
    }
}
