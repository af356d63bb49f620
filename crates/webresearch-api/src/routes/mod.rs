mod health;
mod research;
mod ws;

use axum::{Router, routing::get};
use health::health;
use research::research_router;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .nest("/api", research_router())
        .with_state(state)
}
