//! # Opex Skills
//!
//! One skill per pipeline stage. Each reads what it needs from the
//! [`RevisionState`](crate::state::RevisionState), makes a single gateway
//! call through [`llm_helpers::generate`] and writes its artifact back.
//!
//! ```text
//! IntentSkill -> DiagramSkill -> DocumentSkill -> ValidatorSkill
//!                                     ^               |
//!                                     |           (fail)
//!                RevisionSkill::revise_document <- RevisionSkill::revise_diagram
//!
//! ValidatorSkill (pass) -> DispatchSkill
//! ```

pub mod llm_helpers;
pub mod prompts;

pub mod diagram_skill;
pub mod dispatch_skill;
pub mod document_skill;
pub mod intent_skill;
pub mod revision_skill;
pub mod validator_skill;

pub use diagram_skill::DiagramSkill;
pub use dispatch_skill::DispatchSkill;
pub use document_skill::DocumentSkill;
pub use intent_skill::IntentSkill;
pub use llm_helpers::SkillContext;
pub use revision_skill::RevisionSkill;
pub use validator_skill::{automated_findings, Critique, DimensionRating, ValidatorSkill, Verdict};
