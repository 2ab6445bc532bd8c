use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use crate::app::{dto::HealthResponse, services::ImportServices};

/// GET /health
///
/// Liveness plus executor statistics.
pub async fn health(Extension(services): Extension<Arc<ImportServices>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        executor: services.executor_stats(),
    })
}
