//! # Agent Orchestration
//!
//! Runs the workflow pipeline for one request.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Intent → Diagram → Document → Validate ⟷ (Revise Diagram → Revise Document) → Dispatch
//! ```

pub mod coordinator;
pub mod events;
pub mod pipeline;
pub mod progress;

pub use coordinator::{Coordinator, RunOutput, RunRequest, RunStatus};
pub use events::{ProgressEvent, StepStatus, StreamFrame, DONE};
pub use pipeline::{Pipeline, PipelineStage};
pub use progress::{ChannelSink, FanoutSink, ObserverRegistry, ProgressSink};
