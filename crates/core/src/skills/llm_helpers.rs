//! # LLM Helpers
//!
//! Shared plumbing for every skill: one gateway call per stage, with token
//! progress and cooperative cancellation handled in a single place.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::agent::events::ProgressEvent;
use crate::agent::pipeline::PipelineStage;
use crate::error::PipelineError;
use crate::gateway::{GatewayError, GenerationGateway, GenerationRequest};
use crate::state::RevisionState;

/// What a skill needs besides the revision state
pub struct SkillContext<'a> {
    pub gateway: &'a dyn GenerationGateway,
    /// Stream tokens and emit `chunk` events
    pub stream_tokens: bool,
    pub cancel: &'a CancellationToken,
}

/// Run one generation for `stage`
///
/// With token streaming on, each fragment is forwarded to the state's
/// progress sink as it arrives and cancellation is checked between
/// fragments.
pub async fn generate(
    ctx: &SkillContext<'_>,
    state: &RevisionState,
    stage: PipelineStage,
    system: &str,
    prompt: String,
) -> Result<String, PipelineError> {
    let request = GenerationRequest::new(prompt)
        .with_system(system)
        .with_step(stage.step_id());

    if !ctx.stream_tokens {
        let text = ctx.gateway.generate(&request).await?;
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        return Ok(text);
    }

    let mut stream = ctx.gateway.stream(&request).await?;
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let fragment = fragment?;
        if fragment.is_empty() {
            continue;
        }
        state.emit(&ProgressEvent::chunk(stage, fragment.as_str()));
        text.push_str(&fragment);
    }

    if text.trim().is_empty() {
        return Err(GatewayError::Empty.into());
    }
    Ok(text)
}

/// Drop a wrapping ```` ``` ```` fence (```` ```markdown ```` etc.) if present
pub fn strip_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let without_open = match trimmed.find('\n') {
        Some(newline) => &trimmed[newline + 1..],
        None => return String::new(),
    };
    without_open
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
        .to_string()
}

/// Edit-mode context block describing the artifacts from an earlier run
pub fn previous_block(state: &RevisionState) -> Option<String> {
    let previous = state.previous()?;
    let mut block = String::from("\n\n## Existing procedure (revise it, do not start over)\n");
    if let Some(diagram) = previous.diagram.as_deref() {
        block.push_str(&format!("\n### Current diagram\n```mermaid\n{}\n```\n", diagram.trim()));
    }
    if let Some(document) = previous.document.as_deref() {
        block.push_str(&format!("\n### Current document\n{}\n", document.trim()));
    }
    Some(block)
}
