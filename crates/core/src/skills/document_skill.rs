//! # Document Skill
//!
//! Writes the procedure document for the current diagram. The prompt lists
//! every node label as a required section heading so the document follows
//! the diagram's topology.

use super::llm_helpers::{generate, previous_block, strip_fence, SkillContext};
use super::prompts;
use crate::agent::pipeline::PipelineStage;
use crate::error::PipelineError;
use crate::state::RevisionState;
use crate::tools::mermaid;

pub struct DocumentSkill;

impl DocumentSkill {
    pub async fn run(ctx: &SkillContext<'_>, state: &mut RevisionState) -> Result<(), PipelineError> {
        let diagram = state
            .diagram()
            .filter(|d| !d.trim().is_empty())
            .map(str::to_string)
            .ok_or(PipelineError::MissingDiagram)?;
        // The diagram is the last entry; the intent sits just before it
        let intent = state
            .message_from_end(1)
            .map(|m| m.content.clone())
            .ok_or(PipelineError::EmptyInput)?;

        let mut prompt = format!(
            "## Process description\n{}\n\n## Diagram\n```mermaid\n{}\n```\n\n{}",
            intent,
            diagram,
            required_headings(&diagram)
        );
        if let Some(previous) = previous_block(state) {
            prompt.push_str(&previous);
        }

        let raw = generate(ctx, state, PipelineStage::DocGen, prompts::DOCUMENT, prompt).await?;
        let document = strip_fence(&raw);
        tracing::debug!(chars = document.len(), "document generated");

        state.set_document(document.clone());
        state.push_assistant(document);
        Ok(())
    }
}

/// Prompt section naming one heading per diagram node
pub(crate) fn required_headings(diagram: &str) -> String {
    let labels = mermaid::parse(diagram).labels();
    if labels.is_empty() {
        return String::new();
    }
    let mut section =
        String::from("## Required section headings (one per diagram node, in this order)\n");
    for label in labels {
        section.push_str(&format!("- {}\n", label));
    }
    section
}
