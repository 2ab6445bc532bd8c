//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: registry, submission handler, poll responder and executor pool
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::ImportServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<ImportServices>) -> Router {
    // Tenant-scoped routes.
    let scoped = routes::router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn(middleware::tenant_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .layer(Extension(services))
        .merge(scoped)
        .layer(ServiceBuilder::new())
}
