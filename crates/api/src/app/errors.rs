use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use bulkimport_infra::jobs::RegistryError;
use bulkimport_infra::SubmissionError;

pub fn submission_error_to_response(err: SubmissionError) -> axum::response::Response {
    match err {
        SubmissionError::AsyncRequired => {
            json_error(StatusCode::BAD_REQUEST, "async_required", err.to_string())
        }
        SubmissionError::MalformedRequest(msg) => {
            json_error(StatusCode::BAD_REQUEST, "malformed_request", msg)
        }
        SubmissionError::UnknownJob(_) => json_error(StatusCode::NOT_FOUND, "unknown_job", err.to_string()),
        SubmissionError::JobNotStaging(_) => {
            json_error(StatusCode::CONFLICT, "job_not_staging", err.to_string())
        }
        SubmissionError::Registry(e) => registry_error_to_response(e),
    }
}

pub fn registry_error_to_response(err: RegistryError) -> axum::response::Response {
    match err {
        RegistryError::UnknownJob(_) => json_error(StatusCode::NOT_FOUND, "unknown_job", err.to_string()),
        RegistryError::Job(e) => json_error(StatusCode::CONFLICT, "invalid_transition", e.to_string()),
        RegistryError::Storage(msg) => {
            tracing::error!(error = %msg, "registry storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
