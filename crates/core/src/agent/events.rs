//! # Agent Events
//!
//! Progress events emitted while a run executes, and the frames the
//! streaming endpoint writes to its client.

use serde::{Deserialize, Serialize};

use super::coordinator::RunOutput;
use super::pipeline::PipelineStage;

/// Terminator written after the last frame of every stream
pub const DONE: &str = "[DONE]";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Start,
    End,
}

/// Side-channel notification; never affects the run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A stage started or finished
    Status {
        step: String,
        label: String,
        status: StepStatus,
    },
    /// Generated text as it arrives
    Chunk {
        step: String,
        label: String,
        delta: String,
    },
}

impl ProgressEvent {
    pub fn start(stage: PipelineStage) -> Self {
        Self::status(stage, StepStatus::Start)
    }

    pub fn end(stage: PipelineStage) -> Self {
        Self::status(stage, StepStatus::End)
    }

    fn status(stage: PipelineStage, status: StepStatus) -> Self {
        ProgressEvent::Status {
            step: stage.step_id().to_string(),
            label: stage.label().to_string(),
            status,
        }
    }

    pub fn chunk(stage: PipelineStage, delta: impl Into<String>) -> Self {
        ProgressEvent::Chunk {
            step: stage.step_id().to_string(),
            label: stage.label().to_string(),
            delta: delta.into(),
        }
    }

    pub fn step(&self) -> &str {
        match self {
            ProgressEvent::Status { step, .. } | ProgressEvent::Chunk { step, .. } => step,
        }
    }
}

/// One `data:` frame of the streaming response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Status {
        step: String,
        label: String,
        status: StepStatus,
    },
    Chunk {
        step: String,
        label: String,
        delta: String,
    },
    /// Final state of a successful run
    Response(RunOutput),
    /// Replaces the response when the run aborts
    Error { message: String },
}

impl StreamFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Response(_) | StreamFrame::Error { .. })
    }
}

impl From<ProgressEvent> for StreamFrame {
    fn from(event: ProgressEvent) -> Self {
        match event {
            ProgressEvent::Status {
                step,
                label,
                status,
            } => StreamFrame::Status {
                step,
                label,
                status,
            },
            ProgressEvent::Chunk { step, label, delta } => {
                StreamFrame::Chunk { step, label, delta }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_event_shape() {
        let event = ProgressEvent::start(PipelineStage::Validating);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "status",
                "step": "validate",
                "label": "Reviewing quality",
                "status": "start"
            })
        );
        assert_eq!(event.step(), "validate");
    }

    #[test]
    fn test_chunk_converts_to_frame() {
        let frame: StreamFrame = ProgressEvent::chunk(PipelineStage::DiagramGen, "flow").into();
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "chunk");
        assert_eq!(value["delta"], "flow");
        assert!(!frame.is_terminal());
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = StreamFrame::Error {
            message: "boom".into(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({ "type": "error", "message": "boom" })
        );
        assert!(frame.is_terminal());
    }
}
