pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::ranking::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_request_bytes();

    Router::new()
        .route("/", get(health::root_handler))
        .route("/health", get(health::health_handler))
        .route(
            "/api/extract-criteria",
            post(handlers::handle_extract_criteria),
        )
        .route("/api/rank-resumes", post(handlers::handle_rank_resumes))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
