//! # Workflow API
//!
//! `POST /run` answers once the run finishes; `POST /chat` streams progress
//! frames over SSE and always ends with exactly one `[DONE]`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use opex_core::agent::{
    ChannelSink, FanoutSink, ProgressSink, RunOutput, RunRequest, RunStatus, StreamFrame, DONE,
};
use opex_core::PipelineError;

use crate::AppState;

const CRASHED: &str = "run failed unexpectedly";

/// Request body for both endpoints
#[derive(Debug, Deserialize, ToSchema)]
pub struct RunRequestBody {
    pub chat_session_id: String,
    pub prompt: String,
}

impl From<RunRequestBody> for RunRequest {
    fn from(body: RunRequestBody) -> Self {
        RunRequest::new(body.chat_session_id, body.prompt)
    }
}

/// Final state of a run
#[derive(Debug, Serialize, ToSchema)]
pub struct RunResponse {
    pub chat_session_id: String,
    pub document: Option<String>,
    pub diagram: Option<String>,
    pub messages: Vec<String>,
    /// `complete` or `max_iterations_reached`
    pub status: String,
    pub revisions: u32,
}

impl From<RunOutput> for RunResponse {
    fn from(output: RunOutput) -> Self {
        let status = match output.status {
            RunStatus::Complete => "complete",
            RunStatus::MaxIterationsReached => "max_iterations_reached",
        };
        Self {
            chat_session_id: output.chat_session_id,
            document: output.document,
            diagram: output.diagram,
            messages: output.messages,
            status: status.to_string(),
            revisions: output.revisions,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// A failed run as an HTTP response
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// The run task died without reporting a result
    fn crashed(err: JoinError) -> Self {
        tracing::error!(error = %err, "run task crashed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: CRASHED.to_string(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = if err.is_precondition() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/run", post(run_workflow))
        .route("/chat", post(chat))
}

/// Run the pipeline and return the final state
#[utoipa::path(
    post,
    path = "/run",
    tag = "workflow",
    request_body = RunRequestBody,
    responses(
        (status = 200, description = "Run finished", body = RunResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 500, description = "Run aborted", body = ErrorResponse)
    )
)]
pub async fn run_workflow(
    State(state): State<AppState>,
    Json(body): Json<RunRequestBody>,
) -> Result<Json<RunResponse>, ApiError> {
    let request: RunRequest = body.into();
    let sink = state.observers.sink(&request.chat_session_id);
    let coordinator = state.coordinator.clone();
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let output = tokio::spawn(async move { coordinator.run(request, Some(sink), cancel).await })
        .await
        .map_err(ApiError::crashed)??;
    Ok(Json(output.into()))
}

/// Run the pipeline, streaming progress as SSE
#[utoipa::path(
    post,
    path = "/chat",
    tag = "workflow",
    request_body = RunRequestBody,
    responses(
        (status = 200, description = "Stream of status, chunk and response frames ending in [DONE]", content_type = "text/event-stream")
    )
)]
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<RunRequestBody>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = frame_stream(state, body.into()).map(|data| Ok(Event::default().data(data)));
    Sse::new(frames).keep_alive(KeepAlive::default())
}

/// Serialized frames for one streamed run, terminated by [`DONE`]
///
/// The run is spawned so it keeps its own pace; dropping the stream (client
/// gone) cancels it. A run task that dies without a result still produces
/// an `error` frame.
pub(crate) fn frame_stream(state: AppState, request: RunRequest) -> impl Stream<Item = String> {
    let (tx, rx) = mpsc::unbounded_channel::<StreamFrame>();
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let sink: Arc<dyn ProgressSink> = Arc::new(FanoutSink::new(vec![
        Arc::new(ChannelSink::new(tx.clone())),
        state.observers.sink(&request.chat_session_id),
    ]));
    let coordinator = state.coordinator.clone();

    let run = tokio::spawn(async move { coordinator.run(request, Some(sink), cancel).await });
    tokio::spawn(async move {
        let frame = match run.await {
            Ok(Ok(output)) => StreamFrame::Response(output),
            Ok(Err(PipelineError::Cancelled)) => return,
            Ok(Err(e)) => StreamFrame::Error {
                message: e.to_string(),
            },
            Err(e) => {
                tracing::error!(error = %e, "run task crashed");
                StreamFrame::Error {
                    message: CRASHED.to_string(),
                }
            }
        };
        let _ = tx.send(frame);
    });

    UnboundedReceiverStream::new(rx)
        .map(move |frame| {
            let _ = &guard;
            serde_json::to_string(&frame).unwrap_or_else(|e| {
                serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
            })
        })
        .chain(stream::once(async { DONE.to_string() }))
}
