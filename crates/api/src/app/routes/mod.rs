use axum::{
    routing::{get, post},
    Router,
};

pub mod import;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/$import", post(import::submit))
        .route("/$import-poll-status", get(import::poll_status))
}
