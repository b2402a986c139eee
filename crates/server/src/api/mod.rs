//! # HTTP API
//!
//! - `workflow` - `/run` and the `/chat` SSE stream
//! - `progress` - `/ws/:chat_session_id` observer socket
//! - `ops` - health, config and OpenAPI

pub mod ops;
pub mod progress;
pub mod workflow;

use axum::Router;

use crate::AppState;

/// Every route, with state applied
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(workflow::workflow_routes())
        .merge(progress::progress_routes())
        .merge(ops::ops_routes())
        .with_state(state)
}
