//! # Coordinator
//!
//! Drives one request through the pipeline: seeds a [`RevisionState`],
//! executes stages in order until the state machine reaches a terminal
//! stage, and returns the final artifacts.
//!
//! The gateway, dispatch tool and session store are built once at startup
//! and shared across requests; everything else lives for a single run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::error::PipelineError;
use crate::gateway::{self, GenerationGateway};
use crate::skills::{
    DiagramSkill, DispatchSkill, DocumentSkill, IntentSkill, RevisionSkill, SkillContext,
    ValidatorSkill,
};
use crate::state::{OpexDb, PriorArtifacts, RevisionState, SessionManager, SessionStore};
use crate::tools::dispatch::{self, DispatchTool};

use super::events::ProgressEvent;
use super::pipeline::{Pipeline, PipelineStage};
use super::progress::ProgressSink;

/// Client request for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub chat_session_id: String,
    pub prompt: String,
}

impl RunRequest {
    pub fn new(chat_session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            chat_session_id: chat_session_id.into(),
            prompt: prompt.into(),
        }
    }
}

/// How a run that did not fail ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Validated and dispatched
    Complete,
    /// Revision cap reached; artifacts are best effort and were not dispatched
    MaxIterationsReached,
}

/// Final state of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub chat_session_id: String,
    /// Content of the last history entry
    pub assistant_message: String,
    pub document: Option<String>,
    pub diagram: Option<String>,
    /// Full history, oldest first
    pub messages: Vec<String>,
    pub status: RunStatus,
    pub revisions: u32,
}

/// Pipeline driver
pub struct Coordinator {
    gateway: Arc<dyn GenerationGateway>,
    dispatch: Arc<dyn DispatchTool>,
    store: Option<Arc<dyn SessionStore>>,
    max_revisions: u32,
    stream_tokens: bool,
}

impl Coordinator {
    pub fn new(gateway: Arc<dyn GenerationGateway>, dispatch: Arc<dyn DispatchTool>) -> Self {
        let defaults = AgentConfig::default();
        Self {
            gateway,
            dispatch,
            store: None,
            max_revisions: defaults.max_revisions,
            stream_tokens: defaults.stream_tokens,
        }
    }

    /// Build every collaborator from configuration
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let gateway = gateway::from_config(config).context("Failed to build generation gateway")?;
        let dispatch = dispatch::from_config(&config.dispatch)?;
        let db = OpexDb::open_at(&config.db_path)
            .with_context(|| format!("Failed to open session store at {}", config.db_path.display()))?;

        Ok(Self::new(gateway, dispatch)
            .with_store(Arc::new(SessionManager::new(&db)))
            .with_max_revisions(config.max_revisions)
            .with_token_streaming(config.stream_tokens))
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_max_revisions(mut self, max_revisions: u32) -> Self {
        self.max_revisions = max_revisions;
        self
    }

    pub fn with_token_streaming(mut self, stream_tokens: bool) -> Self {
        self.stream_tokens = stream_tokens;
        self
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    pub fn dispatch_name(&self) -> &str {
        self.dispatch.name()
    }

    /// Execute one request to a terminal stage
    ///
    /// Any stage error aborts the run; nothing is persisted in that case.
    /// `cancel` is checked before every stage and between streamed tokens.
    #[tracing::instrument(skip_all, fields(session_id = %request.chat_session_id))]
    pub async fn run(
        &self,
        request: RunRequest,
        progress: Option<Arc<dyn ProgressSink>>,
        cancel: CancellationToken,
    ) -> Result<RunOutput, PipelineError> {
        let mut state = RevisionState::new(request.chat_session_id.as_str());
        if let Some(sink) = progress {
            state = state.with_progress(sink);
        }
        let prompt = request.prompt.trim();
        if !prompt.is_empty() {
            state.push_user(prompt);
        }
        if let Some(previous) = self.load_previous(&request.chat_session_id) {
            tracing::debug!("edit mode: seeded from previous run");
            state.set_previous(previous);
        }

        let mut pipeline = Pipeline::with_max_revisions(self.max_revisions);
        let ctx = SkillContext {
            gateway: self.gateway.as_ref(),
            stream_tokens: self.stream_tokens,
            cancel: &cancel,
        };

        while !pipeline.is_complete() {
            if cancel.is_cancelled() {
                tracing::info!(stage = pipeline.stage.step_id(), "run cancelled");
                return Err(PipelineError::Cancelled);
            }

            let stage = pipeline.stage;
            tracing::debug!(stage = stage.step_id(), revisions = pipeline.revisions, "stage start");
            state.emit(&ProgressEvent::start(stage));

            if let Err(err) = self.run_stage(stage, &ctx, &mut state).await {
                pipeline.fail();
                tracing::error!(stage = stage.step_id(), error = %err, "run aborted");
                return Err(err);
            }

            state.emit(&ProgressEvent::end(stage));
            pipeline.advance(state.is_satisfied());
            state.set_revisions(pipeline.revisions);
        }

        let status = if pipeline.is_success() {
            RunStatus::Complete
        } else {
            tracing::warn!(
                revisions = pipeline.revisions,
                "revision cap reached without a passing verdict"
            );
            RunStatus::MaxIterationsReached
        };

        let output = RunOutput {
            chat_session_id: request.chat_session_id.clone(),
            assistant_message: state
                .last_message()
                .map(|m| m.content.clone())
                .unwrap_or_default(),
            document: state.document().map(str::to_string),
            diagram: state.diagram().map(str::to_string),
            messages: state.messages().iter().map(|m| m.content.clone()).collect(),
            status,
            revisions: pipeline.revisions,
        };

        self.persist(prompt, &output);
        tracing::info!(
            status = ?output.status,
            revisions = output.revisions,
            history = output.messages.len(),
            "run finished"
        );
        Ok(output)
    }

    async fn run_stage(
        &self,
        stage: PipelineStage,
        ctx: &SkillContext<'_>,
        state: &mut RevisionState,
    ) -> Result<(), PipelineError> {
        match stage {
            PipelineStage::IntentParsing => IntentSkill::run(ctx, state).await,
            PipelineStage::DiagramGen => DiagramSkill::run(ctx, state).await,
            PipelineStage::DocGen => DocumentSkill::run(ctx, state).await,
            PipelineStage::Validating => ValidatorSkill::run(ctx, state).await,
            PipelineStage::DiagramRevise => RevisionSkill::revise_diagram(ctx, state).await,
            PipelineStage::DocRevise => RevisionSkill::revise_document(ctx, state).await,
            PipelineStage::Dispatch => DispatchSkill::run(ctx, self.dispatch.as_ref(), state).await,
            PipelineStage::Complete | PipelineStage::Exhausted | PipelineStage::Failed => Ok(()),
        }
    }

    fn load_previous(&self, session_id: &str) -> Option<PriorArtifacts> {
        let store = self.store.as_ref()?;
        match store.latest_artifacts(session_id) {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load previous artifacts; continuing without");
                None
            }
        }
    }

    fn persist(&self, prompt: &str, output: &RunOutput) {
        let Some(store) = &self.store else {
            return;
        };
        let artifacts = PriorArtifacts {
            diagram: output.diagram.clone(),
            document: output.document.clone(),
        };
        if let Err(e) = store.record_run(
            &output.chat_session_id,
            prompt,
            &output.assistant_message,
            &artifacts,
        ) {
            tracing::warn!(error = %e, "failed to persist run");
        }
    }
}
