//! Image collection stage: storyboard scenes -> candidate images.

use crate::collaborators::SearchClient;
use crate::stages::{governed_call, Stage, StageContext, StageError};
use async_trait::async_trait;
use reel_protocol::{ImageAsset, RunState, StageArtifact, StageKind};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Images kept per scene before the total-count gate applies.
const IMAGES_PER_SCENE: usize = 4;

/// Searches for candidate images per scene visual prompt, in parallel,
/// deduplicated by URL across scenes.
pub struct CollectImagesStage;

#[async_trait]
impl Stage for CollectImagesStage {
    fn kind(&self) -> StageKind {
        StageKind::CollectImages
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

        let mut workers = JoinSet::new();
        for scene in scenes {
            let query = scene.visual_prompt.clone();
            let scene_index = scene.index;
            let search = Arc::clone(&ctx.collaborators.search);
            let governor = Arc::clone(&ctx.governor);
            let backoff = ctx.config.backoff;
            let attempts = ctx.config.transient_attempts;
            workers.spawn(async move {
                let results = governed_call(&governor, &backoff, attempts, "search", || {
                    search.search_images(&query)
                })
                .await?;
                Ok::<_, StageError>((scene_index, query, results))
            });
        }

        let mut per_scene = Vec::new();
        while let Some(joined) = workers.join_next().await {
            let entry = joined.map_err(|err| StageError::Worker(err.to_string()))??;
            per_scene.push(entry);
        }
        per_scene.sort_by_key(|(index, _, _)| *index);

        let mut items = Vec::new();
        let mut seen = HashSet::new();
        for (_, query, results) in per_scene {
            for result in results.into_iter().take(IMAGES_PER_SCENE) {
                if seen.insert(result.url.clone()) {
                    items.push(ImageAsset {
                        url: result.url,
                        description: result.description,
                        query: query.clone(),
                        local_path: None,
                    });
                }
            }
        }

        Ok(StageArtifact::Images { items })
    }
}
