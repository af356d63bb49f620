use axum::{Json, extract::State};
use serde::Serialize;

use crate::state::{AppState, CapacitySnapshot};

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    capacity: CapacitySnapshot,
}

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        capacity: state.capacity(),
    })
}
