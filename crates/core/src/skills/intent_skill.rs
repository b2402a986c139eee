//! # Intent Skill
//!
//! Restates the user's request as a clear, professional process
//! description. Every later stage works from this restatement.

use super::llm_helpers::{generate, previous_block, SkillContext};
use super::prompts;
use crate::agent::pipeline::PipelineStage;
use crate::error::PipelineError;
use crate::state::{RevisionState, Role};

pub struct IntentSkill;

impl IntentSkill {
    pub async fn run(ctx: &SkillContext<'_>, state: &mut RevisionState) -> Result<(), PipelineError> {
        let request = state
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(PipelineError::EmptyInput)?;

        let mut prompt = format!("## User request\n{}", request);
        if let Some(previous) = previous_block(state) {
            prompt.push_str(&previous);
        }

        let intent = generate(ctx, state, PipelineStage::IntentParsing, prompts::INTENT, prompt)
            .await?;
        tracing::debug!(chars = intent.len(), "intent normalized");

        state.push_assistant(intent.trim());
        Ok(())
    }
}
