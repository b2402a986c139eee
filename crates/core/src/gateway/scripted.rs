//! Deterministic gateway for tests.
//!
//! Responses are scripted per pipeline step (the request's `step` tag).
//! Each step holds a queue; calls pop from the front until one entry is
//! left, which then repeats forever. Every request is recorded so tests can
//! assert on what was asked and how often.

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{GatewayError, GenerationGateway, GenerationRequest, TextStream};

type Script = VecDeque<Result<String, GatewayError>>;

#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one more response for `step`
    pub fn respond(self, step: &str, text: impl Into<String>) -> Self {
        self.push(step, Ok(text.into()));
        self
    }

    /// Replace the script for `step` with these texts, in order
    pub fn with_responses(self, step: &str, texts: Vec<&str>) -> Self {
        let script = texts.into_iter().map(|t| Ok(t.to_string())).collect();
        self.lock_scripts().insert(step.to_string(), script);
        self
    }

    /// Make every call for `step` fail with `err`
    pub fn fail(self, step: &str, err: GatewayError) -> Self {
        self.lock_scripts()
            .insert(step.to_string(), VecDeque::from(vec![Err(err)]));
        self
    }

    /// Every request seen so far, in call order
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Number of calls made for one step
    pub fn calls_for(&self, step: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.step.as_deref() == Some(step))
            .count()
    }

    /// A full happy-path script for an employee onboarding workflow
    pub fn onboarding() -> Self {
        Self::new()
            .respond("intent", ONBOARDING_INTENT)
            .respond("diagram", ONBOARDING_DIAGRAM)
            .respond("document", ONBOARDING_DOCUMENT)
            .respond("validate", ONBOARDING_PASS)
            .respond("revise_diagram", ONBOARDING_DIAGRAM)
            .respond("revise_document", ONBOARDING_DOCUMENT)
            .respond(
                "dispatch",
                "Subject: New hire onboarding procedure\nA six-step onboarding flow with a manager approval gate.",
            )
    }

    fn push(&self, step: &str, response: Result<String, GatewayError>) {
        self.lock_scripts()
            .entry(step.to_string())
            .or_default()
            .push_back(response);
    }

    fn lock_scripts(&self) -> std::sync::MutexGuard<'_, HashMap<String, Script>> {
        // A poisoned lock only means another test thread panicked
        self.scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_response(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let step = request.step_tag().to_string();
        let mut scripts = self.lock_scripts();
        let script = scripts
            .get_mut(&step)
            .ok_or_else(|| GatewayError::Decode(format!("no scripted response for '{}'", step)))?;
        let response = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        response.unwrap_or_else(|| {
            Err(GatewayError::Decode(format!(
                "no scripted response for '{}'",
                step
            )))
        })
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream, GatewayError> {
        let text = self.next_response(request)?;
        let fragments: Vec<Result<String, GatewayError>> = text
            .split_inclusive(' ')
            .map(|fragment| Ok(fragment.to_string()))
            .collect();
        Ok(stream::iter(fragments).boxed())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
        let text = self.next_response(request)?;
        if text.trim().is_empty() {
            return Err(GatewayError::Empty);
        }
        Ok(text)
    }
}

pub const ONBOARDING_INTENT: &str = "The user wants a procedure for onboarding a new employee: \
after the offer is accepted IT provisions accounts, HR assigns a mentor, and the hiring manager \
reviews the plan. If the manager requests changes the mentor assignment is revisited; once \
approved the first week plan is issued and onboarding completes.";

pub const ONBOARDING_DIAGRAM: &str = "Here is the process:\n\n```mermaid\nflowchart TD\n    \
A[Offer Accepted] --> B[Provision Accounts]\n    \
B --> C[Assign Mentor]\n    \
C --> D{Manager Approval}\n    \
D -->|Approved| E[First Week Plan]\n    \
D -->|Changes Requested| C\n    \
E --> F[Onboarding Complete]\n```\n";

pub const ONBOARDING_DOCUMENT: &str = "# New Hire Onboarding\n\n\
## Offer Accepted\nHR confirms the signed offer and opens the onboarding ticket.\n\n\
## Provision Accounts\nIT creates email, chat and payroll accounts before day one.\n\n\
## Assign Mentor\nHR pairs the new hire with a mentor from the same team.\n\n\
## Manager Approval\nThe hiring manager reviews accounts and mentor. \
Approved plans continue; requested changes go back to mentor assignment.\n\n\
## First Week Plan\nThe mentor shares a day-by-day schedule for the first week.\n\n\
## Onboarding Complete\nHR closes the ticket after the first week review.\n";

pub const ONBOARDING_PASS: &str = r#"{
  "ratings": [
    {"dimension": "logical_consistency", "score": 9, "justification": "The approval loop returns to mentor assignment."},
    {"dimension": "completeness", "score": 9, "justification": "Every node has a matching section."},
    {"dimension": "clarity", "score": 8, "justification": "Roles are named for each step."},
    {"dimension": "diagram_syntax", "score": 10, "justification": "Valid flowchart."}
  ],
  "verdict": "pass",
  "recommendations": []
}"#;

pub const ONBOARDING_FAIL: &str = r#"{
  "ratings": [
    {"dimension": "completeness", "score": 5, "justification": "No rejection path is shown."}
  ],
  "verdict": "fail",
  "recommendations": ["Add a branch for rejected approvals."]
}"#;
