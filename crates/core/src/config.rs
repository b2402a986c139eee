//! # Agent Configuration
//!
//! Layered configuration for a workflow run:
//!
//! 1. built-in defaults
//! 2. `.opex/config.json` (or an explicit `--config` path)
//! 3. environment variables (`OPEX_*`, `NOTION_*`)
//!
//! CLI flags are applied last by the server binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::gateway::RetryPolicy;
use crate::models::{LlmProvider, ModelConfig};

/// Default location of the config file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = ".opex/config.json";

/// Default location of the session database
pub const DEFAULT_DB_PATH: &str = ".opex/opex.db";

const REDACTED: &str = "********";

/// External tool the dispatch stage hands finished artifacts to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchConfig {
    /// Log the payload and confirm locally
    #[default]
    #[serde(rename = "none", alias = "log")]
    Log,
    /// POST the payload as JSON to an endpoint
    Webhook { url: String },
    /// Create a Notion page under a parent page
    Notion {
        #[serde(default)]
        token: Option<String>,
        parent_page_id: String,
    },
}

impl DispatchConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchConfig::Log => "none",
            DispatchConfig::Webhook { .. } => "webhook",
            DispatchConfig::Notion { .. } => "notion",
        }
    }
}

/// Complete configuration for the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Provider and model every stage uses
    pub model: ModelConfig,
    /// Revision loop iterations before giving up
    pub max_revisions: u32,
    /// Backoff for retriable gateway failures
    pub retry: RetryPolicy,
    /// Emit token-level progress events
    pub stream_tokens: bool,
    pub dispatch: DispatchConfig,
    /// SQLite file for session history
    pub db_path: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            max_revisions: 3,
            retry: RetryPolicy::default(),
            stream_tokens: true,
            dispatch: DispatchConfig::default(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

impl AgentConfig {
    /// Load from an explicit file, or from the default path when it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        if !path.exists() {
            if required {
                anyhow::bail!("config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AgentConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// File layer plus process environment
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `OPEX_*` / `NOTION_*` overrides read through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(provider) = get("OPEX_PROVIDER") {
            let provider: LlmProvider = provider.parse().map_err(anyhow::Error::msg)?;
            if provider != self.model.provider {
                // A model name from another provider would never resolve
                self.model.model = provider.default_model().to_string();
            }
            self.model.provider = provider;
        }
        if let Some(model) = get("OPEX_MODEL") {
            self.model.model = model;
        }
        if let Some(base_url) = get("OPEX_BASE_URL") {
            self.model.base_url = Some(base_url);
        }
        if let Some(value) = get("OPEX_MAX_REVISIONS") {
            self.max_revisions = value
                .trim()
                .parse()
                .with_context(|| format!("OPEX_MAX_REVISIONS is not a number: {}", value))?;
        }
        if let Some(value) = get("OPEX_MAX_RETRIES") {
            self.retry.max_retries = value
                .trim()
                .parse()
                .with_context(|| format!("OPEX_MAX_RETRIES is not a number: {}", value))?;
        }
        if let Some(value) = get("OPEX_STREAM_TOKENS") {
            self.stream_tokens = parse_flag(&value)
                .with_context(|| format!("OPEX_STREAM_TOKENS is not a boolean: {}", value))?;
        }
        if let Some(path) = get("OPEX_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }

        if let Some(kind) = get("OPEX_DISPATCH") {
            self.dispatch = match kind.trim().to_ascii_lowercase().as_str() {
                "none" | "log" => DispatchConfig::Log,
                "webhook" => DispatchConfig::Webhook {
                    url: get("OPEX_WEBHOOK_URL")
                        .context("OPEX_DISPATCH=webhook requires OPEX_WEBHOOK_URL")?,
                },
                "notion" => DispatchConfig::Notion {
                    token: None,
                    parent_page_id: get("NOTION_PARENT_PAGE_ID")
                        .context("OPEX_DISPATCH=notion requires NOTION_PARENT_PAGE_ID")?,
                },
                other => anyhow::bail!("unknown dispatch tool '{}'", other),
            };
        }

        match &mut self.dispatch {
            DispatchConfig::Webhook { url } => {
                if let Some(override_url) = get("OPEX_WEBHOOK_URL") {
                    *url = override_url;
                }
            }
            DispatchConfig::Notion {
                token,
                parent_page_id,
            } => {
                if let Some(env_token) = get("NOTION_TOKEN") {
                    *token = Some(env_token);
                }
                if let Some(parent) = get("NOTION_PARENT_PAGE_ID") {
                    *parent_page_id = parent;
                }
            }
            DispatchConfig::Log => {}
        }

        Ok(())
    }

    /// Copy safe to show over the API
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let DispatchConfig::Notion { token, .. } = &mut config.dispatch {
            if token.is_some() {
                *token = Some(REDACTED.to_string());
            }
        }
        config
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("expected true/false"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_revisions, 3);
        assert_eq!(config.retry.max_retries, 2);
        assert!(config.stream_tokens);
        assert_eq!(config.dispatch, DispatchConfig::Log);
        assert_eq!(config.db_path, PathBuf::from(".opex/opex.db"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"max_revisions": 5, "dispatch": {"kind": "webhook", "url": "http://relay"}}"#,
        )
        .unwrap();

        let config = AgentConfig::load(Some(&path)).unwrap();
        assert_eq!(config.max_revisions, 5);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(
            config.dispatch,
            DispatchConfig::Webhook {
                url: "http://relay".into()
            }
        );
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AgentConfig::load(Some(&dir.path().join("nope.json"))).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AgentConfig::default();
        config
            .apply_overrides(env(&[
                ("OPEX_PROVIDER", "openai"),
                ("OPEX_BASE_URL", "http://localhost:4000/v1"),
                ("OPEX_MAX_REVISIONS", "1"),
                ("OPEX_MAX_RETRIES", "0"),
                ("OPEX_STREAM_TOKENS", "false"),
            ]))
            .unwrap();

        assert_eq!(config.model.provider, LlmProvider::OpenAI);
        assert_eq!(config.model.model, "gpt-4o");
        assert_eq!(config.model.resolved_base_url(), "http://localhost:4000/v1");
        assert_eq!(config.max_revisions, 1);
        assert_eq!(config.retry.max_retries, 0);
        assert!(!config.stream_tokens);
    }

    #[test]
    fn test_notion_dispatch_from_env() {
        let mut config = AgentConfig::default();
        config
            .apply_overrides(env(&[
                ("OPEX_DISPATCH", "notion"),
                ("NOTION_TOKEN", "secret_abc"),
                ("NOTION_PARENT_PAGE_ID", "page-123"),
            ]))
            .unwrap();

        assert_eq!(
            config.dispatch,
            DispatchConfig::Notion {
                token: Some("secret_abc".into()),
                parent_page_id: "page-123".into()
            }
        );

        let shown = serde_json::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("secret_abc"));
        assert!(shown.contains("\"kind\":\"notion\""));
    }

    #[test]
    fn test_bad_overrides_are_errors() {
        let mut config = AgentConfig::default();
        assert!(config
            .apply_overrides(env(&[("OPEX_MAX_REVISIONS", "many")]))
            .is_err());
        assert!(config
            .apply_overrides(env(&[("OPEX_DISPATCH", "webhook")]))
            .is_err());
        assert!(config
            .apply_overrides(env(&[("OPEX_DISPATCH", "carrier-pigeon")]))
            .is_err());
    }

    #[test]
    fn test_dispatch_kind_names() {
        let parsed: DispatchConfig = serde_json::from_str(r#"{"kind":"none"}"#).unwrap();
        assert_eq!(parsed, DispatchConfig::Log);
        assert_eq!(parsed.kind(), "none");
        let alias: DispatchConfig = serde_json::from_str(r#"{"kind":"log"}"#).unwrap();
        assert_eq!(alias, DispatchConfig::Log);
    }
}
