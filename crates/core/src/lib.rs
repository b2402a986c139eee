//! # Opex Core
//!
//! Turns a plain-language description of a business process into a Mermaid
//! flowchart plus a Markdown procedure document, critiques the pair, revises
//! it until it passes (or a revision cap is hit) and hands the result to a
//! dispatch tool.
//!
//! ## Architecture
//!
//! - `agent/` - Coordinator, pipeline state machine, progress reporting
//! - `skills/` - One skill per pipeline stage
//! - `gateway/` - Text-generation providers with retry
//! - `tools/` - Mermaid toolkit and dispatch tools
//! - `state/` - Revision state and SQLite session history
//! - `config` / `models` - Configuration and provider settings
//!
//! ## Usage
//!
//! ```rust,ignore
//! use opex_core::agent::{Coordinator, RunRequest};
//! use opex_core::config::AgentConfig;
//!
//! let config = AgentConfig::resolve(None)?;
//! let coordinator = Coordinator::from_config(&config)?;
//! let output = coordinator
//!     .run(RunRequest::new("session-1", "Onboard a new hire"), None, Default::default())
//!     .await?;
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod skills;
pub mod state;
pub mod tools;

pub use error::PipelineError;
