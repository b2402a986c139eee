//! # Pipeline Stages
//!
//! The run's state machine. Linear apart from one loop:
//!
//! ```text
//! IntentParsing → DiagramGen → DocGen → Validating ─satisfied──▶ Dispatch → Complete
//!                                          ▲    │
//!                                          │    └─not satisfied─▶ DiagramRevise
//!                                          │                          │
//!                                          └──────── DocRevise ◀──────┘
//! ```
//!
//! The loop is bounded by `max_revisions`; hitting the cap ends the run in
//! `Exhausted` without dispatching.

use serde::{Deserialize, Serialize};

/// Stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Normalizing the user's request
    IntentParsing,
    /// Drawing the flowchart
    DiagramGen,
    /// Writing the procedure document
    DocGen,
    /// Critiquing the artifact pair
    Validating,
    /// Revising the diagram from the critique
    DiagramRevise,
    /// Revising the document from the critique
    DocRevise,
    /// Handing the result to the dispatch tool
    Dispatch,
    /// Complete
    Complete,
    /// Revision cap reached without a passing verdict
    Exhausted,
    /// Failed
    Failed,
}

impl PipelineStage {
    /// Stable id used in progress events and gateway step tags
    pub fn step_id(&self) -> &'static str {
        match self {
            PipelineStage::IntentParsing => "intent",
            PipelineStage::DiagramGen => "diagram",
            PipelineStage::DocGen => "document",
            PipelineStage::Validating => "validate",
            PipelineStage::DiagramRevise => "revise_diagram",
            PipelineStage::DocRevise => "revise_document",
            PipelineStage::Dispatch => "dispatch",
            PipelineStage::Complete => "complete",
            PipelineStage::Exhausted => "exhausted",
            PipelineStage::Failed => "failed",
        }
    }

    /// Human-readable label for progress UIs
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::IntentParsing => "Understanding request",
            PipelineStage::DiagramGen => "Drawing process diagram",
            PipelineStage::DocGen => "Writing procedure document",
            PipelineStage::Validating => "Reviewing quality",
            PipelineStage::DiagramRevise => "Revising diagram",
            PipelineStage::DocRevise => "Revising document",
            PipelineStage::Dispatch => "Dispatching result",
            PipelineStage::Complete => "Complete",
            PipelineStage::Exhausted => "Revision limit reached",
            PipelineStage::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Complete | PipelineStage::Exhausted | PipelineStage::Failed
        )
    }
}

/// The pipeline state machine
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Current stage
    pub stage: PipelineStage,
    /// Completed revision loop iterations
    pub revisions: u32,
    /// Maximum revision iterations before giving up
    pub max_revisions: u32,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            stage: PipelineStage::IntentParsing,
            revisions: 0,
            max_revisions: 3,
        }
    }
}

impl Pipeline {
    /// Create a new pipeline
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_revisions(max_revisions: u32) -> Self {
        Self {
            max_revisions,
            ..Self::default()
        }
    }

    /// Advance to the next stage; `is_satisfied` only matters after validation
    pub fn advance(&mut self, is_satisfied: bool) {
        self.stage = match self.stage {
            PipelineStage::IntentParsing => PipelineStage::DiagramGen,
            PipelineStage::DiagramGen => PipelineStage::DocGen,
            PipelineStage::DocGen => PipelineStage::Validating,
            PipelineStage::Validating if is_satisfied => PipelineStage::Dispatch,
            PipelineStage::Validating if self.revisions >= self.max_revisions => {
                PipelineStage::Exhausted
            }
            PipelineStage::Validating => PipelineStage::DiagramRevise,
            PipelineStage::DiagramRevise => PipelineStage::DocRevise,
            PipelineStage::DocRevise => {
                self.revisions += 1;
                PipelineStage::Validating
            }
            PipelineStage::Dispatch => PipelineStage::Complete,
            terminal => terminal,
        };
    }

    /// Fail the pipeline
    pub fn fail(&mut self) {
        self.stage = PipelineStage::Failed;
    }

    /// Check if pipeline reached a terminal stage
    pub fn is_complete(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Check if pipeline succeeded
    pub fn is_success(&self) -> bool {
        self.stage == PipelineStage::Complete
    }
}
