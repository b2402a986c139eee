//! # Dispatch Tools
//!
//! The terminal action a finished run hands its artifacts to. Every tool
//! takes the same [`DispatchPayload`] and answers with a confirmation line
//! that is appended to the run's history.
//!
//! - `none` - log the payload locally (default)
//! - `webhook` - POST the payload as JSON (email relays, automation hooks)
//! - `notion` - create a page under a parent page

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::DispatchConfig;

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
/// Notion rejects rich text objects longer than this
const NOTION_TEXT_LIMIT: usize = 2000;
/// Notion accepts at most 100 children per request
const NOTION_MAX_BLOCKS: usize = 100;
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a dispatch tool receives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchPayload {
    pub session_id: String,
    pub subject: String,
    pub summary: String,
    pub document: String,
    pub diagram: String,
}

impl DispatchPayload {
    /// Plain-text rendering for email-like channels
    pub fn body(&self) -> String {
        format!(
            "{}\n\n## Procedure\n\n{}\n\n## Process Diagram\n\n```mermaid\n{}\n```\n",
            self.summary.trim(),
            self.document.trim(),
            self.diagram.trim()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch tool misconfigured: {0}")]
    Config(String),

    #[error("dispatch target returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("dispatch transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::Transport(err.to_string())
    }
}

/// External action tool
#[async_trait]
pub trait DispatchTool: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver the payload and describe what happened
    async fn dispatch(&self, payload: &DispatchPayload) -> Result<String, DispatchError>;
}

/// Build the configured tool
pub fn from_config(config: &DispatchConfig) -> Result<Arc<dyn DispatchTool>> {
    let tool: Arc<dyn DispatchTool> = match config {
        DispatchConfig::Log => Arc::new(LogDispatch),
        DispatchConfig::Webhook { url } => Arc::new(WebhookDispatch::new(url.clone())?),
        DispatchConfig::Notion {
            token,
            parent_page_id,
        } => {
            let token = token
                .clone()
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| DispatchError::Config("NOTION_TOKEN is not set".to_string()))?;
            Arc::new(NotionDispatch::new(token, parent_page_id.clone())?)
        }
    };
    tracing::info!(tool = tool.name(), "dispatch tool ready");
    Ok(tool)
}

async fn rejected(response: reqwest::Response) -> DispatchError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    DispatchError::Rejected {
        status,
        body: body.chars().take(500).collect(),
    }
}

/// Records the payload in the log and confirms locally
pub struct LogDispatch;

#[async_trait]
impl DispatchTool for LogDispatch {
    fn name(&self) -> &str {
        "none"
    }

    async fn dispatch(&self, payload: &DispatchPayload) -> Result<String, DispatchError> {
        tracing::info!(
            session_id = %payload.session_id,
            subject = %payload.subject,
            document_chars = payload.document.len(),
            diagram_chars = payload.diagram.len(),
            "dispatch recorded locally"
        );
        Ok(format!(
            "Recorded \"{}\" locally; no external dispatch tool is configured.",
            payload.subject
        ))
    }
}

/// POSTs the payload (plus a rendered `body`) as JSON
pub struct WebhookDispatch {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatch {
    pub fn new(url: String) -> Result<Self, DispatchError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DispatchError::Config(format!(
                "webhook url must be http(s): {}",
                url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl DispatchTool for WebhookDispatch {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn dispatch(&self, payload: &DispatchPayload) -> Result<String, DispatchError> {
        let mut body = serde_json::to_value(payload)
            .map_err(|e| DispatchError::Config(format!("payload not serializable: {}", e)))?;
        body["body"] = Value::String(payload.body());

        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(format!(
            "Delivered \"{}\" to webhook (HTTP {}).",
            payload.subject,
            response.status().as_u16()
        ))
    }
}

/// Creates a Notion page holding the summary, document and diagram
pub struct NotionDispatch {
    client: reqwest::Client,
    token: String,
    parent_page_id: String,
}

impl NotionDispatch {
    pub fn new(token: String, parent_page_id: String) -> Result<Self, DispatchError> {
        if parent_page_id.trim().is_empty() {
            return Err(DispatchError::Config(
                "NOTION_PARENT_PAGE_ID is not set".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            token,
            parent_page_id,
        })
    }

    fn page_body(&self, payload: &DispatchPayload) -> Value {
        json!({
            "parent": { "page_id": self.parent_page_id },
            "properties": {
                "title": { "title": rich_text(&payload.subject) }
            },
            "children": page_blocks(payload),
        })
    }
}

#[async_trait]
impl DispatchTool for NotionDispatch {
    fn name(&self) -> &str {
        "notion"
    }

    async fn dispatch(&self, payload: &DispatchPayload) -> Result<String, DispatchError> {
        let response = self
            .client
            .post(format!("{}/pages", NOTION_API))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(&self.page_body(payload))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let page: Value = response.json().await?;
        let url = page.get("url").and_then(Value::as_str).unwrap_or("(no url)");
        Ok(format!("Created Notion page \"{}\": {}", payload.subject, url))
    }
}

/// Rich text array, split to respect Notion's per-object limit
fn rich_text(text: &str) -> Vec<Value> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(NOTION_TEXT_LIMIT)
        .map(|chunk| json!({ "type": "text", "text": { "content": chunk.iter().collect::<String>() } }))
        .collect()
}

fn paragraph(text: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": { "rich_text": rich_text(text) }
    })
}

fn page_blocks(payload: &DispatchPayload) -> Vec<Value> {
    let mut blocks = vec![paragraph(payload.summary.trim())];

    // Reserve the last slot for the diagram
    let room = NOTION_MAX_BLOCKS - 2;
    let paragraphs: Vec<&str> = payload
        .document
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.len() > room {
        tracing::warn!(
            paragraphs = paragraphs.len(),
            kept = room,
            "document too long for one Notion request, truncating"
        );
    }
    blocks.extend(paragraphs.into_iter().take(room).map(paragraph));

    blocks.push(json!({
        "object": "block",
        "type": "code",
        "code": {
            "language": "mermaid",
            "rich_text": rich_text(payload.diagram.trim()),
        }
    }));
    blocks
}

/// Captures payloads in memory
#[cfg(any(test, feature = "test-util"))]
#[derive(Default)]
pub struct RecordingDispatch {
    payloads: std::sync::Mutex<Vec<DispatchPayload>>,
    failure: Option<String>,
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dispatch fails with a transport error
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            payloads: Default::default(),
            failure: Some(message.into()),
        }
    }

    pub fn payloads(&self) -> Vec<DispatchPayload> {
        self.payloads
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl DispatchTool for RecordingDispatch {
    fn name(&self) -> &str {
        "recording"
    }

    async fn dispatch(&self, payload: &DispatchPayload) -> Result<String, DispatchError> {
        if let Some(message) = &self.failure {
            return Err(DispatchError::Transport(message.clone()));
        }
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.push(payload.clone());
        }
        Ok(format!("Recorded dispatch \"{}\"", payload.subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> DispatchPayload {
        DispatchPayload {
            session_id: "s-1".into(),
            subject: "Onboarding".into(),
            summary: "Six steps.".into(),
            document: "# Onboarding\n\n## Offer Accepted\nHR confirms.".into(),
            diagram: "flowchart TD\n  A --> B".into(),
        }
    }

    #[test]
    fn test_body_embeds_both_artifacts() {
        let body = payload().body();
        assert!(body.starts_with("Six steps."));
        assert!(body.contains("## Offer Accepted"));
        assert!(body.contains("```mermaid\nflowchart TD"));
    }

    #[test]
    fn test_rich_text_chunks() {
        let long = "x".repeat(NOTION_TEXT_LIMIT * 2 + 5);
        let parts = rich_text(&long);
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[2]["text"]["content"].as_str().map(str::len),
            Some(5)
        );
    }

    #[test]
    fn test_notion_page_body() {
        let notion = NotionDispatch::new("secret".into(), "parent-1".into()).unwrap();
        let body = notion.page_body(&payload());

        assert_eq!(body["parent"]["page_id"], "parent-1");
        assert_eq!(
            body["properties"]["title"]["title"][0]["text"]["content"],
            "Onboarding"
        );
        let children = body["children"].as_array().unwrap();
        // summary + two document paragraphs + diagram
        assert_eq!(children.len(), 4);
        assert_eq!(children[3]["code"]["language"], "mermaid");
    }

    #[test]
    fn test_notion_block_cap() {
        let mut long = payload();
        long.document = (0..200).map(|i| format!("para {}", i)).collect::<Vec<_>>().join("\n\n");
        assert_eq!(page_blocks(&long).len(), NOTION_MAX_BLOCKS);
    }

    #[test]
    fn test_from_config_validation() {
        assert!(from_config(&DispatchConfig::Log).is_ok());
        assert!(from_config(&DispatchConfig::Webhook {
            url: "ftp://relay".into()
        })
        .is_err());
        assert!(from_config(&DispatchConfig::Notion {
            token: None,
            parent_page_id: "p".into()
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_log_and_recording_tools() {
        let confirmation = LogDispatch.dispatch(&payload()).await.unwrap();
        assert!(confirmation.contains("Onboarding"));

        let recording = RecordingDispatch::new();
        recording.dispatch(&payload()).await.unwrap();
        assert_eq!(recording.payloads().len(), 1);

        let failing = RecordingDispatch::failing("smtp down");
        assert!(matches!(
            failing.dispatch(&payload()).await,
            Err(DispatchError::Transport(_))
        ));
    }
}
