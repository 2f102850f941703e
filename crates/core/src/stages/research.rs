//! Research stage: gather background sources for the topic.

use crate::collaborators::SearchClient;
use crate::stages::{governed_call, Stage, StageContext, StageError};
use async_trait::async_trait;
use reel_protocol::{ResearchSource, RunState, StageArtifact, StageKind};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Fans out a small set of angle queries to the search collaborator and
/// merges the results, deduplicated by URL and ordered by reported score.
pub struct ResearchStage;

fn angle_queries(topic: &str) -> [String; 3] {
    [
        format!("{topic} overview"),
        format!("{topic} key facts and statistics"),
        format!("{topic} recent developments"),
    ]
}

#[async_trait]
impl Stage for ResearchStage {
    fn kind(&self) -> StageKind {
        StageKind::Research
    }

    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StageArtifact, StageError> {
        let mut workers = JoinSet::new();
        for query in angle_queries(&state.topic) {
            let search = Arc::clone(&ctx.collaborators.search);
            let governor = Arc::clone(&ctx.governor);
            let backoff = ctx.config.backoff;
            let attempts = ctx.config.transient_attempts;
            workers.spawn(async move {
                governed_call(&governor, &backoff, attempts, "search", || {
                    search.search(&query)
                })
                .await
            });
        }

        let mut sources = Vec::new();
        let mut seen = HashSet::new();
        while let Some(joined) = workers.join_next().await {
            let results = joined.map_err(|err| StageError::Worker(err.to_string()))??;
            for result in results {
                if seen.insert(result.url.clone()) {
                    sources.push(ResearchSource {
                        title: result.title,
                        url: result.url,
                        content: result.content,
                        score: result.score,
                    });
                }
            }
        }

        sources.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(StageArtifact::Research { sources })
    }
}
