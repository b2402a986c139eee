//! # Dispatch Skill
//!
//! Terminal stage. Has the model write a subject line and cover summary,
//! hands the finished pair to the configured tool and records the tool's
//! confirmation.

use super::llm_helpers::{generate, SkillContext};
use super::prompts;
use crate::agent::pipeline::PipelineStage;
use crate::error::PipelineError;
use crate::state::RevisionState;
use crate::tools::dispatch::{DispatchPayload, DispatchTool};
use crate::tools::mermaid;

const FALLBACK_SUBJECT: &str = "Workflow procedure";

pub struct DispatchSkill;

impl DispatchSkill {
    pub async fn run(
        ctx: &SkillContext<'_>,
        tool: &dyn DispatchTool,
        state: &mut RevisionState,
    ) -> Result<(), PipelineError> {
        if !state.is_satisfied() {
            return Err(PipelineError::NotSatisfied);
        }
        let diagram = state
            .diagram()
            .filter(|d| !d.trim().is_empty())
            .map(str::to_string)
            .ok_or(PipelineError::MissingArtifact("diagram"))?;
        let document = state
            .document()
            .filter(|d| !d.trim().is_empty())
            .map(str::to_string)
            .ok_or(PipelineError::MissingArtifact("document"))?;

        let prompt = format!("## Procedure document\n{}", document);
        let raw = generate(ctx, state, PipelineStage::Dispatch, prompts::DISPATCH, prompt).await?;
        let (subject, summary) = split_subject(&raw, &document);

        let payload = DispatchPayload {
            session_id: state.session_id().to_string(),
            subject,
            summary,
            document,
            diagram,
        };

        let confirmation = tool.dispatch(&payload).await?;
        tracing::info!(
            session_id = state.session_id(),
            tool = tool.name(),
            subject = %payload.subject,
            "result dispatched"
        );

        state.push_assistant(confirmation);
        Ok(())
    }
}

/// Split `Subject: ...` from the summary body
///
/// Falls back to the document's first heading when the model skipped the
/// subject line.
fn split_subject(raw: &str, document: &str) -> (String, String) {
    let text = raw.trim();
    let mut lines = text.lines();
    if let Some(first) = lines.next() {
        let first = first.trim().trim_start_matches('*');
        if let Some((label, rest)) = first.split_once(':') {
            if label.trim().eq_ignore_ascii_case("subject") {
                let subject = rest.trim().trim_start_matches('*').trim_end_matches('*').trim();
                let summary = lines.collect::<Vec<_>>().join("\n").trim().to_string();
                if !subject.is_empty() {
                    return (subject.to_string(), summary);
                }
            }
        }
    }

    let subject = mermaid::headings(document)
        .into_iter()
        .next()
        .unwrap_or_else(|| FALLBACK_SUBJECT.to_string());
    (subject, text.to_string())
}
