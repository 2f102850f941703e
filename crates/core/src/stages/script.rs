//! Script synthesis stage: research + topic -> narration script.

use crate::collaborators::LlmClient;
use crate::config::ValidationConfig;
use crate::stages::{governed_call, Stage, StageContext, StageError};
use async_trait::async_trait;
use reel_protocol::{RunState, StageArtifact, StageKind};

/// Asks the LLM for a spoken-word narration script, threading any review
/// feedback from a prior rejected draft into the prompt.
pub struct SynthesizeScriptStage;

fn build_prompt(state: &RunState, validation: &ValidationConfig) -> String {
    let mut prompt = format!(
        "Write a narration script for a short video about \"{}\".\n\
         Requirements:\n\
         - between {} and {} words\n\
         - spoken-word prose only: no headings, scene markers, or stage directions\n\
         - engaging opening line, concrete facts from the provided research, clear closing",
        state.topic, validation.script_min_words, validation.script_max_words
    );
    if let Some(feedback) = state.review_feedback.get(&StageKind::SynthesizeScript) {
        prompt.push_str(
            "\n\nA previous draft was rejected by the reviewer. Address this feedback:\n",
        );
        prompt.push_str(feedback);
    }
    prompt
}

fn research_digest(state: &RunState) -> Result<String, StageError> {
    let Some(StageArtifact::Research { sources }) = state.artifact(StageKind::Research) else {
        return Err(StageError::MissingInput("research"));
    };
    Ok(sources
        .iter()
        .take(8)
        .map(|s| format!("- {} ({})\n  {}", s.title, s.url, s.content))
        .collect::<Vec<_>>()
        .join("\n"))
}

#[async_trait]
impl Stage for SynthesizeScriptStage {
    fn kind(&self) -> StageKind {
        StageKind::SynthesizeScript
    }

    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StageArtifact, StageError> {
        let context = research_digest(state)?;
        let prompt = build_prompt(state, &ctx.config.validation);

        let text = governed_call(
            &ctx.governor,
            &ctx.config.backoff,
            ctx.config.transient_attempts,
            "llm",
            || ctx.collaborators.llm.generate(&prompt, &context),
        )
        .await?;

        let text = text.trim().to_string();
        let word_count = text.split_whitespace().count();
        Ok(StageArtifact::Script { text, word_count })
    }
}
