//! # Pipeline Errors
//!
//! Failure taxonomy for a workflow run. Precondition variants mean a stage
//! ran out of order and are never retried; gateway and dispatch failures
//! wrap the collaborator's own error.

use crate::gateway::GatewayError;
use crate::tools::dispatch::DispatchError;

/// Error that aborts a pipeline run
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// No prior message to act on
    #[error("no user message to act on")]
    EmptyInput,

    /// Document generation attempted before a diagram exists
    #[error("document generation requires a diagram")]
    MissingDiagram,

    /// A stage needed an artifact that is absent or empty
    #[error("required artifact missing: {0}")]
    MissingArtifact(&'static str),

    /// Dispatch attempted without a passing validation verdict
    #[error("dispatch requires a passing validation verdict")]
    NotSatisfied,

    /// Text generation failed or timed out (after retries)
    #[error("generation gateway failed: {0}")]
    Gateway(#[from] GatewayError),

    /// The terminal external tool failed
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// Observer went away and the run was stopped cooperatively
    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// True for stage-ordering violations
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            PipelineError::EmptyInput
                | PipelineError::MissingDiagram
                | PipelineError::MissingArtifact(_)
                | PipelineError::NotSatisfied
        )
    }
}
