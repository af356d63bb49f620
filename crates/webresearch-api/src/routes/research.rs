use axum::{
    Json, Router,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use tracing::instrument;
use webresearch_core::{is_valid_session_id, read_session_log};

use crate::error::AppError;
use crate::payload::SessionPayload;
use crate::state::{ActiveSession, AppState, CapacitySnapshot, ResearchRequest};

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<ActiveSession>,
    pub capacity: CapacitySnapshot,
}

pub fn research_router() -> Router<AppState> {
    Router::new()
        .route("/research", post(start_research))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id/log", get(session_log))
}

#[instrument(skip_all)]
async fn start_research(
    State(state): State<AppState>,
    Json(request): Json<ResearchRequest>,
) -> Result<Json<SessionPayload>, AppError> {
    let session = state.run_session(request, None).await?;
    Ok(Json(SessionPayload::from(&session)))
}

async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    Json(ListSessionsResponse {
        sessions: state.active_sessions(),
        capacity: state.capacity(),
    })
}

async fn session_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !is_valid_session_id(&id) {
        return Err(AppError::bad_request(format!("invalid session id `{id}`")));
    }
    let dir = state
        .journal_dir()
        .ok_or_else(|| AppError::not_found("session journals are disabled"))?;
    let contents = read_session_log(&dir, &id)?
        .ok_or_else(|| AppError::not_found(format!("no journal found for session {id}")))?;

    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], contents))
}
