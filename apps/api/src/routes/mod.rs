pub mod evaluations;
pub mod events;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    // Body limit sits above the validation limit so an oversized upload gets
    // the friendly validation error instead of a bare 413.
    let body_limit = state.config.max_file_size_bytes + 1024 * 1024;
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/evaluations", post(evaluations::handle_create))
        .route("/api/v1/evaluations/events", get(events::handle_events))
        .route("/api/v1/evaluations/:id", get(evaluations::handle_get))
        .route(
            "/api/v1/evaluations/:id/cancel",
            post(evaluations::handle_cancel),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
