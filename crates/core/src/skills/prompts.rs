//! Default prompt templates bundled at compile time.
//!
//! One system prompt per pipeline stage, keyed by the stage's step id.

/// Intent Normalizer - restates the request as a clear process description
pub const INTENT: &str = include_str!("defaults/intent.md");

/// Diagram Generator - draws the Mermaid flowchart
pub const DIAGRAM: &str = include_str!("defaults/diagram.md");

/// Document Generator - writes the procedure document
pub const DOCUMENT: &str = include_str!("defaults/document.md");

/// Validator - rates the pair and returns a JSON verdict
pub const VALIDATOR: &str = include_str!("defaults/validator.md");

/// Diagram Reviser - repairs the flowchart from a critique
pub const REVISE_DIAGRAM: &str = include_str!("defaults/revise_diagram.md");

/// Document Reviser - repairs the document from a critique
pub const REVISE_DOCUMENT: &str = include_str!("defaults/revise_document.md");

/// Dispatch - subject line and cover summary
pub const DISPATCH: &str = include_str!("defaults/dispatch.md");

/// All default prompts with their step ids
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("intent", INTENT),
        ("diagram", DIAGRAM),
        ("document", DOCUMENT),
        ("validate", VALIDATOR),
        ("revise_diagram", REVISE_DIAGRAM),
        ("revise_document", REVISE_DOCUMENT),
        ("dispatch", DISPATCH),
    ]
}
