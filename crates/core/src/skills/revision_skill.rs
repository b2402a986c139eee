//! # Revision Skill
//!
//! The two halves of the revision loop. The diagram is revised first, then
//! the document is brought in line with the revised diagram; both address
//! only what the latest critique flags.
//!
//! When the pair is already satisfied both are no-ops that leave a note in
//! history.

use super::document_skill::required_headings;
use super::llm_helpers::{generate, strip_fence, SkillContext};
use super::prompts;
use crate::agent::pipeline::PipelineStage;
use crate::error::PipelineError;
use crate::state::RevisionState;
use crate::tools::mermaid;

pub struct RevisionSkill;

impl RevisionSkill {
    pub async fn revise_diagram(
        ctx: &SkillContext<'_>,
        state: &mut RevisionState,
    ) -> Result<(), PipelineError> {
        if state.is_satisfied() {
            state.push_assistant("Diagram already passed review; no revision needed.");
            return Ok(());
        }
        let (diagram, document) = artifacts(state)?;

        let prompt = format!(
            "## Current diagram\n```mermaid\n{}\n```\n\n## Current document (for context)\n{}\n\n{}",
            diagram,
            document,
            critique_block(state)
        );

        let raw = generate(
            ctx,
            state,
            PipelineStage::DiagramRevise,
            prompts::REVISE_DIAGRAM,
            prompt,
        )
        .await?;
        let revised = mermaid::extract_flowchart(&raw);
        tracing::debug!(
            nodes = mermaid::parse(&revised).nodes.len(),
            "diagram revised"
        );

        state.set_diagram(revised.clone());
        state.push_assistant(revised);
        Ok(())
    }

    pub async fn revise_document(
        ctx: &SkillContext<'_>,
        state: &mut RevisionState,
    ) -> Result<(), PipelineError> {
        if state.is_satisfied() {
            state.push_assistant("Document already passed review; no revision needed.");
            return Ok(());
        }
        let (diagram, document) = artifacts(state)?;

        let prompt = format!(
            "## Current diagram\n```mermaid\n{}\n```\n\n{}\n## Current document\n{}\n\n{}",
            diagram,
            required_headings(&diagram),
            document,
            critique_block(state)
        );

        let raw = generate(
            ctx,
            state,
            PipelineStage::DocRevise,
            prompts::REVISE_DOCUMENT,
            prompt,
        )
        .await?;
        let revised = strip_fence(&raw);
        tracing::debug!(chars = revised.len(), "document revised");

        state.set_document(revised.clone());
        state.push_assistant(revised);
        Ok(())
    }
}

fn artifacts(state: &RevisionState) -> Result<(String, String), PipelineError> {
    let diagram = state
        .diagram()
        .filter(|d| !d.trim().is_empty())
        .ok_or(PipelineError::MissingArtifact("diagram"))?;
    let document = state
        .document()
        .filter(|d| !d.trim().is_empty())
        .ok_or(PipelineError::MissingArtifact("document"))?;
    Ok((diagram.to_string(), document.to_string()))
}

/// The critique plus its recommendations, when they parsed
fn critique_block(state: &RevisionState) -> String {
    let mut block = format!(
        "## Reviewer critique\n{}\n",
        state.latest_critique().unwrap_or("(no critique recorded)")
    );
    if let Some(critique) = state.critique() {
        if !critique.recommendations.is_empty() {
            block.push_str("\n## Address these recommendations\n");
            for recommendation in &critique.recommendations {
                block.push_str(&format!("- {}\n", recommendation));
            }
        }
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::scripted::{ONBOARDING_DIAGRAM, ONBOARDING_DOCUMENT, ONBOARDING_FAIL, ONBOARDING_PASS};
    use crate::gateway::ScriptedGateway;
    use crate::skills::validator_skill::Critique;
    use tokio_util::sync::CancellationToken;

    fn reviewed_state(critique: &str) -> RevisionState {
        let diagram = mermaid::extract_flowchart(ONBOARDING_DIAGRAM);
        let mut state = RevisionState::new("s");
        state.push_user("onboarding");
        state.set_diagram(diagram);
        state.set_document(ONBOARDING_DOCUMENT.to_string());
        state.record_critique(Critique::parse(critique), critique.to_string());
        state.push_assistant(critique);
        state
    }

    #[tokio::test]
    async fn test_satisfied_state_is_a_noop() {
        let gateway = ScriptedGateway::onboarding();
        let cancel = CancellationToken::new();
        let ctx = SkillContext {
            gateway: &gateway,
            stream_tokens: false,
            cancel: &cancel,
        };
        let mut state = reviewed_state(ONBOARDING_PASS);
        let before = state.messages().len();

        RevisionSkill::revise_diagram(&ctx, &mut state).await.unwrap();
        RevisionSkill::revise_document(&ctx, &mut state).await.unwrap();

        assert_eq!(state.messages().len(), before + 2);
        assert!(state.last_message().unwrap().content.contains("no revision needed"));
        assert!(gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_document_revision_sees_critique_after_diagram_revision() {
        let gateway = ScriptedGateway::onboarding();
        let cancel = CancellationToken::new();
        let ctx = SkillContext {
            gateway: &gateway,
            stream_tokens: false,
            cancel: &cancel,
        };
        let mut state = reviewed_state(ONBOARDING_FAIL);

        RevisionSkill::revise_diagram(&ctx, &mut state).await.unwrap();
        RevisionSkill::revise_document(&ctx, &mut state).await.unwrap();

        let requests = gateway.requests();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert!(request.prompt.contains("Add a branch for rejected approvals."));
        }
        assert_eq!(requests[1].step.as_deref(), Some("revise_document"));
        assert!(requests[1].prompt.contains("- First Week Plan\n"));
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let gateway = ScriptedGateway::onboarding();
        let cancel = CancellationToken::new();
        let ctx = SkillContext {
            gateway: &gateway,
            stream_tokens: false,
            cancel: &cancel,
        };
        let mut state = RevisionState::new("s");
        state.set_diagram("flowchart TD\n A --> B".into());

        assert!(matches!(
            RevisionSkill::revise_document(&ctx, &mut state).await,
            Err(PipelineError::MissingArtifact("document"))
        ));
    }
}
