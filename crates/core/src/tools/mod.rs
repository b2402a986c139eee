//! # Opex Tools
//!
//! Deterministic machinery around the model's output.
//!
//! ## Modules
//!
//! - `mermaid` - Flowchart extraction, parsing, plausibility and coverage checks
//! - `dispatch` - Terminal action tools (log, webhook, Notion)

pub mod dispatch;
pub mod mermaid;
