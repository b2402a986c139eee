//! # Validator Skill
//!
//! Critiques the diagram/document pair and decides whether the run may
//! dispatch. The model is asked for a JSON object with a required
//! `verdict` field; automated Mermaid findings are fed in so obvious
//! defects cannot be rated away.
//!
//! Verdict resolution, first match wins:
//! 1. a JSON object that deserializes as [`Critique`]
//! 2. a line-anchored `VERDICT: PASS` / `VERDICT: FAIL` marker
//! 3. `Fail`

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::llm_helpers::{generate, SkillContext};
use super::prompts;
use crate::agent::pipeline::PipelineStage;
use crate::error::PipelineError;
use crate::state::RevisionState;
use crate::tools::mermaid;

static VERDICT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\s>*_#]*verdict[\s*_]*:[\s*_]*(pass|fail)\b").expect("valid regex")
});

/// Explicit validator outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[serde(alias = "PASS", alias = "Pass")]
    Pass,
    #[serde(alias = "FAIL", alias = "Fail")]
    Fail,
}

/// Score for one review dimension
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DimensionRating {
    /// One of: logical_consistency, completeness, clarity, diagram_syntax
    pub dimension: String,
    /// 1 (unusable) to 10 (flawless)
    pub score: f32,
    /// Why this score was given
    pub justification: String,
}

/// Structured output of the validator
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Critique {
    #[serde(default)]
    pub ratings: Vec<DimensionRating>,
    /// "pass" only when the pair is ready to dispatch
    pub verdict: Verdict,
    /// Concrete changes, each naming a step or section
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl Critique {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Parse model output; never fails, unreadable output is a `Fail`
    pub fn parse(raw: &str) -> Critique {
        for candidate in json_candidates(raw) {
            if let Ok(mut critique) = serde_json::from_str::<Critique>(candidate) {
                for rating in &mut critique.ratings {
                    rating.score = rating.score.clamp(1.0, 10.0);
                }
                return critique;
            }
        }

        let verdict = VERDICT_MARKER
            .captures_iter(raw)
            .last()
            .and_then(|c| c.get(1))
            .map(|m| {
                if m.as_str().eq_ignore_ascii_case("pass") {
                    Verdict::Pass
                } else {
                    Verdict::Fail
                }
            })
            .unwrap_or(Verdict::Fail);

        Critique {
            ratings: Vec::new(),
            verdict,
            recommendations: Vec::new(),
        }
    }

    /// JSON schema handed to the model
    pub fn schema_json() -> String {
        serde_json::to_string_pretty(&schemars::schema_for!(Critique)).unwrap_or_default()
    }
}

/// Whole text, then a fenced block, then the outermost braces
fn json_candidates(raw: &str) -> Vec<&str> {
    let trimmed = raw.trim();
    let mut candidates = vec![trimmed];

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map_or(0, |i| i + 1);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            candidates.push(body[..end].trim());
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            candidates.push(&trimmed[start..=end]);
        }
    }

    candidates
}

/// Deterministic findings the reviewer must account for
pub fn automated_findings(diagram: &str, document: &str) -> Vec<String> {
    let mut findings = mermaid::check_syntax(diagram);
    let chart = mermaid::parse(diagram);
    for label in mermaid::uncovered_labels(document, &chart) {
        findings.push(format!("document has no section heading for node '{}'", label));
    }
    findings
}

pub struct ValidatorSkill;

impl ValidatorSkill {
    pub async fn run(ctx: &SkillContext<'_>, state: &mut RevisionState) -> Result<(), PipelineError> {
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

        let findings = automated_findings(&diagram, &document);
        let findings_text = if findings.is_empty() {
            "- none".to_string()
        } else {
            findings
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            "## Diagram\n```mermaid\n{}\n```\n\n## Document\n{}\n\n## Automated findings\n{}\n\n## Response schema\n```json\n{}\n```",
            diagram,
            document,
            findings_text,
            Critique::schema_json()
        );

        let raw = generate(ctx, state, PipelineStage::Validating, prompts::VALIDATOR, prompt).await?;
        let critique = Critique::parse(&raw);
        tracing::info!(
            session_id = state.session_id(),
            verdict = ?critique.verdict,
            findings = findings.len(),
            recommendations = critique.recommendations.len(),
            "validation complete"
        );

        let raw = raw.trim().to_string();
        state.record_critique(critique, raw.clone());
        state.push_assistant(raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::scripted::{
        ONBOARDING_DIAGRAM, ONBOARDING_DOCUMENT, ONBOARDING_FAIL, ONBOARDING_PASS,
    };
    use crate::gateway::ScriptedGateway;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_parse_json_critique() {
        let critique = Critique::parse(ONBOARDING_PASS);
        assert!(critique.passed());
        assert_eq!(critique.ratings.len(), 4);

        let failing = Critique::parse(ONBOARDING_FAIL);
        assert!(!failing.passed());
        assert_eq!(failing.recommendations.len(), 1);
    }

    #[test]
    fn test_parse_fenced_and_chatty_json() {
        let fenced = format!("Here is my review:\n```json\n{}\n```", ONBOARDING_PASS);
        assert!(Critique::parse(&fenced).passed());

        let chatty = r#"Overall fine. {"verdict": "PASS", "ratings": [{"dimension": "clarity", "score": 14, "justification": "x"}]} Thanks!"#;
        let critique = Critique::parse(chatty);
        assert!(critique.passed());
        assert_eq!(critique.ratings[0].score, 10.0);
    }

    #[test]
    fn test_marker_fallback() {
        assert!(Critique::parse("Looks solid.\n**VERDICT: PASS**").passed());
        assert!(!Critique::parse("Verdict: fail\nMissing a branch.").passed());
        // Sentiment alone never passes
        assert!(!Critique::parse("This is excellent work, I approve.").passed());
        // A marker buried mid-line does not count
        assert!(!Critique::parse("I would not say VERDICT: PASS here").passed());
    }

    #[test]
    fn test_missing_verdict_field_is_fail() {
        let critique = Critique::parse(r#"{"ratings": [], "recommendations": []}"#);
        assert_eq!(critique.verdict, Verdict::Fail);
    }

    #[test]
    fn test_schema_mentions_verdict() {
        let schema = Critique::schema_json();
        assert!(schema.contains("verdict"));
        assert!(schema.contains("pass"));
    }

    #[test]
    fn test_automated_findings() {
        let diagram = mermaid::extract_flowchart(ONBOARDING_DIAGRAM);
        assert!(automated_findings(&diagram, ONBOARDING_DOCUMENT).is_empty());

        let findings = automated_findings(&diagram, "# Onboarding\n\n## Offer Accepted\n");
        assert_eq!(findings.len(), 5);
    }

    fn state_with(diagram: Option<&str>, document: Option<&str>) -> RevisionState {
        let mut state = RevisionState::new("s");
        state.push_user("onboarding");
        if let Some(d) = diagram {
            state.set_diagram(d.to_string());
        }
        if let Some(d) = document {
            state.set_document(d.to_string());
        }
        state
    }

    #[tokio::test]
    async fn test_requires_both_artifacts() {
        let gateway = ScriptedGateway::onboarding();
        let cancel = CancellationToken::new();
        let ctx = SkillContext {
            gateway: &gateway,
            stream_tokens: false,
            cancel: &cancel,
        };

        let mut no_doc = state_with(Some("flowchart TD\n A --> B"), None);
        assert!(matches!(
            ValidatorSkill::run(&ctx, &mut no_doc).await,
            Err(PipelineError::MissingArtifact("document"))
        ));

        let mut blank_diagram = state_with(Some("  "), Some("# Doc"));
        assert!(matches!(
            ValidatorSkill::run(&ctx, &mut blank_diagram).await,
            Err(PipelineError::MissingArtifact("diagram"))
        ));
        assert_eq!(gateway.calls_for("validate"), 0);
    }

    #[tokio::test]
    async fn test_sets_satisfaction_and_appends_critique() {
        let gateway = ScriptedGateway::onboarding();
        let cancel = CancellationToken::new();
        let ctx = SkillContext {
            gateway: &gateway,
            stream_tokens: false,
            cancel: &cancel,
        };
        let diagram = mermaid::extract_flowchart(ONBOARDING_DIAGRAM);
        let mut state = state_with(Some(&diagram), Some(ONBOARDING_DOCUMENT));

        ValidatorSkill::run(&ctx, &mut state).await.unwrap();

        assert!(state.is_satisfied());
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.latest_critique(), Some(ONBOARDING_PASS.trim()));
        let prompt = &gateway.requests()[0].prompt;
        assert!(prompt.contains("## Automated findings\n- none"));
        assert!(prompt.contains("\"verdict\""));
    }
}
