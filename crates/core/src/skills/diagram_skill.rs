//! # Diagram Skill
//!
//! Draws the Mermaid flowchart for the normalized intent. Syntax is not
//! checked here; the validator does that.

use super::llm_helpers::{generate, previous_block, SkillContext};
use super::prompts;
use crate::agent::pipeline::PipelineStage;
use crate::error::PipelineError;
use crate::state::RevisionState;
use crate::tools::mermaid;

pub struct DiagramSkill;

impl DiagramSkill {
    pub async fn run(ctx: &SkillContext<'_>, state: &mut RevisionState) -> Result<(), PipelineError> {
        let intent = state
            .last_message()
            .map(|m| m.content.clone())
            .ok_or(PipelineError::EmptyInput)?;

        let mut prompt = format!("## Process description\n{}", intent);
        if let Some(previous) = previous_block(state) {
            prompt.push_str(&previous);
        }

        let raw = generate(ctx, state, PipelineStage::DiagramGen, prompts::DIAGRAM, prompt).await?;
        let diagram = mermaid::extract_flowchart(&raw);

        let chart = mermaid::parse(&diagram);
        tracing::debug!(
            nodes = chart.nodes.len(),
            edges = chart.edges.len(),
            decisions = chart.decision_nodes().len(),
            "diagram generated"
        );

        state.set_diagram(diagram.clone());
        state.push_assistant(diagram);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_stores_extracted_flowchart() {
        let gateway = ScriptedGateway::onboarding();
        let cancel = CancellationToken::new();
        let ctx = SkillContext {
            gateway: &gateway,
            stream_tokens: true,
            cancel: &cancel,
        };
        let mut state = RevisionState::new("s");
        state.push_user("onboarding");
        state.push_assistant("Normalized: onboarding with manager approval");

        DiagramSkill::run(&ctx, &mut state).await.unwrap();

        let diagram = state.diagram().unwrap();
        assert!(diagram.starts_with("flowchart TD"));
        assert!(!diagram.contains("```"));
        assert_eq!(state.last_message().unwrap().content, diagram);
        assert!(gateway.requests()[0]
            .prompt
            .contains("onboarding with manager approval"));
    }

    #[tokio::test]
    async fn test_approval_intent_yields_decision_node() {
        let gateway = ScriptedGateway::onboarding();
        let cancel = CancellationToken::new();
        let ctx = SkillContext {
            gateway: &gateway,
            stream_tokens: false,
            cancel: &cancel,
        };
        let mut state = RevisionState::new("s");
        state.push_user("onboarding where the manager must approve the plan");
        state.push_assistant("Normalized intent mentioning approval");

        DiagramSkill::run(&ctx, &mut state).await.unwrap();

        let chart = mermaid::parse(state.diagram().unwrap());
        assert!(!chart.decision_nodes().is_empty());
    }
}
