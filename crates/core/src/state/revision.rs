//! # Revision State
//!
//! The mutable record threaded through every pipeline stage for one run:
//! conversation history, the current diagram/document pair, and the
//! validator's verdict.
//!
//! History is append-only. Stages read the most recent entries and push
//! their own output; nothing is removed or edited in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::agent::events::ProgressEvent;
use crate::agent::progress::ProgressSink;
use crate::skills::validator_skill::Critique;

/// Who produced a history entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "user" => Role::User,
            _ => Role::Assistant,
        }
    }
}

/// One history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Artifacts from an earlier run in the same session
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PriorArtifacts {
    #[serde(default)]
    pub diagram: Option<String>,
    #[serde(default)]
    pub document: Option<String>,
}

impl PriorArtifacts {
    pub fn is_empty(&self) -> bool {
        self.diagram.as_deref().map_or(true, |d| d.trim().is_empty())
            && self.document.as_deref().map_or(true, |d| d.trim().is_empty())
    }
}

/// Shared state for a single pipeline run
pub struct RevisionState {
    history: Vec<Message>,
    diagram: Option<String>,
    document: Option<String>,
    is_satisfied: bool,
    session_id: String,
    progress: Option<Arc<dyn ProgressSink>>,
    previous: Option<PriorArtifacts>,
    critique: Option<Critique>,
    critique_text: Option<String>,
    revisions: u32,
}

impl RevisionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            history: Vec::new(),
            diagram: None,
            document: None,
            is_satisfied: false,
            session_id: session_id.into(),
            progress: None,
            previous: None,
            critique: None,
            critique_text: None,
            revisions: 0,
        }
    }

    /// Attach a side-channel sink for progress events
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content.into());
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content.into());
    }

    fn push(&mut self, role: Role, content: String) {
        self.history.push(Message {
            role,
            content,
            created_at: Utc::now(),
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.history
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.history.last()
    }

    /// `n` entries back from the newest; `0` is the last message
    pub fn message_from_end(&self, n: usize) -> Option<&Message> {
        self.history.len().checked_sub(n + 1).map(|i| &self.history[i])
    }

    pub fn diagram(&self) -> Option<&str> {
        self.diagram.as_deref()
    }

    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    pub fn is_satisfied(&self) -> bool {
        self.is_satisfied
    }

    pub fn previous(&self) -> Option<&PriorArtifacts> {
        self.previous.as_ref()
    }

    /// Seed edit mode from an earlier run; empty pairs are ignored
    pub fn set_previous(&mut self, previous: PriorArtifacts) {
        if !previous.is_empty() {
            self.previous = Some(previous);
        }
    }

    pub fn critique(&self) -> Option<&Critique> {
        self.critique.as_ref()
    }

    /// Raw text of the most recent validator critique
    pub fn latest_critique(&self) -> Option<&str> {
        self.critique_text.as_deref()
    }

    pub fn revisions(&self) -> u32 {
        self.revisions
    }

    pub(crate) fn set_diagram(&mut self, diagram: String) {
        self.diagram = Some(diagram);
    }

    pub(crate) fn set_document(&mut self, document: String) {
        self.document = Some(document);
    }

    /// Only the validator calls this; it is the sole writer of `is_satisfied`
    pub(crate) fn record_critique(&mut self, critique: Critique, raw: String) {
        self.is_satisfied = critique.passed();
        self.critique = Some(critique);
        self.critique_text = Some(raw);
    }

    /// Mirror the pipeline's loop counter, which is the only one that counts
    pub(crate) fn set_revisions(&mut self, revisions: u32) {
        self.revisions = revisions;
    }

    /// Forward to the progress sink, if any
    pub fn emit(&self, event: &ProgressEvent) {
        if let Some(sink) = &self.progress {
            sink.emit(event);
        }
    }
}

impl fmt::Debug for RevisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevisionState")
            .field("session_id", &self.session_id)
            .field("history_len", &self.history.len())
            .field("has_diagram", &self.diagram.is_some())
            .field("has_document", &self.document.is_some())
            .field("is_satisfied", &self.is_satisfied)
            .field("revisions", &self.revisions)
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::validator_skill::Verdict;

    #[test]
    fn test_history_grows_in_order() {
        let mut state = RevisionState::new("s-1");
        state.push_user("Describe onboarding");
        state.push_assistant("Normalized intent");
        state.push_assistant("flowchart TD");

        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.messages()[0].role, Role::User);
        assert_eq!(state.last_message().unwrap().content, "flowchart TD");
        assert_eq!(
            state.message_from_end(1).unwrap().content,
            "Normalized intent"
        );
        assert!(state.message_from_end(3).is_none());
    }

    #[test]
    fn test_critique_sets_satisfaction() {
        let mut state = RevisionState::new("s-1");
        assert!(!state.is_satisfied());

        let pass = Critique {
            ratings: vec![],
            verdict: Verdict::Pass,
            recommendations: vec![],
        };
        state.record_critique(pass, "looks good".into());
        assert!(state.is_satisfied());
        assert_eq!(state.latest_critique(), Some("looks good"));

        let fail = Critique {
            ratings: vec![],
            verdict: Verdict::Fail,
            recommendations: vec!["add a branch".into()],
        };
        state.record_critique(fail, "needs work".into());
        assert!(!state.is_satisfied());
    }

    #[test]
    fn test_empty_previous_is_ignored() {
        let mut state = RevisionState::new("s-1");
        state.set_previous(PriorArtifacts {
            diagram: Some("  ".into()),
            document: None,
        });
        assert!(state.previous().is_none());

        state.set_previous(PriorArtifacts {
            diagram: Some("flowchart TD\n A --> B".into()),
            document: None,
        });
        assert!(state.previous().is_some());
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!(Role::from_str(Role::User.as_str()), Role::User);
        assert_eq!(Role::from_str("assistant"), Role::Assistant);
    }
}
