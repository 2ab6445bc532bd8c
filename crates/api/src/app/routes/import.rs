//! Bulk import endpoints: submit and poll.
//!
//! Both handlers run registry work on the blocking pool; the submit body is
//! streamed into the multipart reader through a sync bridge, so it is never
//! buffered whole.

use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, Query},
    http::{
        header::{CONTENT_LOCATION, CONTENT_TYPE, HOST, RETRY_AFTER},
        HeaderMap, HeaderName, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use tokio_stream::StreamExt;
use tokio_util::io::{StreamReader, SyncIoBridge};

use bulkimport_core::JobId;
use bulkimport_infra::jobs::PollStatus;
use bulkimport_infra::{RawImportParams, SubmissionRequest};

use crate::app::{dto, errors, services::ImportServices};
use crate::context::TenantContext;

const PREFER: HeaderName = HeaderName::from_static("prefer");
const X_PROGRESS: HeaderName = HeaderName::from_static("x-progress");

/// POST /$import
///
/// Requires `Prefer: respond-async` and a `multipart/form-data` body. Answers
/// `202 Accepted` with a `Content-Location` pointing at the poll endpoint.
pub async fn submit(
    Extension(services): Extension<Arc<ImportServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(params): Query<RawImportParams>,
    headers: HeaderMap,
    body: Body,
) -> axum::response::Response {
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));
    let request = SubmissionRequest {
        tenant: tenant.tenant_id(),
        prefer: header_string(&headers, &PREFER),
        content_type: header_string(&headers, &CONTENT_TYPE),
        params,
        body: SyncIoBridge::new(StreamReader::new(stream)),
    };

    let handler = services.submission().clone();
    let receipt = match tokio::task::spawn_blocking(move || handler.submit(request)).await {
        Ok(Ok(receipt)) => receipt,
        Ok(Err(e)) => {
            tracing::debug!(tenant = %tenant.tenant_id(), error = %e, "import submission rejected");
            return errors::submission_error_to_response(e);
        }
        Err(e) => {
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string());
        }
    };

    let location = poll_location(services.public_base_url(), &headers, receipt.job_id);
    (
        StatusCode::ACCEPTED,
        [(CONTENT_LOCATION, location.clone())],
        Json(dto::SubmitAcceptedResponse {
            job_id: receipt.job_id.to_string(),
            file_count: receipt.file_count,
            declared_file_count: receipt.declared_file_count,
            poll_location: location,
        }),
    )
        .into_response()
}

/// GET /$import-poll-status?jobId=...
///
/// - `202` with `X-Progress` and `Retry-After` while the job is not terminal
/// - `200` with a success outcome once COMPLETE
/// - `500` with the failure message as an outcome issue once ERROR
pub async fn poll_status(
    Extension(services): Extension<Arc<ImportServices>>,
    Query(query): Query<dto::PollQuery>,
) -> axum::response::Response {
    let Some(raw) = query.job_id.filter(|id| !id.trim().is_empty()) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "missing_job_id", "jobId is required");
    };
    let job_id: JobId = match raw.parse() {
        Ok(id) => id,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_job_id", format!("{e}")),
    };

    let poll = services.poll().clone();
    let status = match tokio::task::spawn_blocking(move || poll.poll(job_id)).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return errors::registry_error_to_response(e),
        Err(e) => {
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string());
        }
    };

    match status {
        PollStatus::InProgress {
            progress, retry_after, ..
        } => (
            StatusCode::ACCEPTED,
            [
                (RETRY_AFTER, retry_after.as_secs().to_string()),
                (X_PROGRESS, progress),
            ],
        )
            .into_response(),
        PollStatus::Complete { outcome, .. } => (StatusCode::OK, Json(outcome)).into_response(),
        PollStatus::Failed { outcome, .. } => (StatusCode::INTERNAL_SERVER_ERROR, Json(outcome)).into_response(),
    }
}

fn header_string(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn poll_location(base: Option<&str>, headers: &HeaderMap, job_id: JobId) -> String {
    let base = match base {
        Some(base) => base.to_string(),
        None => match header_string(headers, &HOST) {
            Some(host) => format!("http://{host}"),
            None => String::new(),
        },
    };
    format!("{base}/$import-poll-status?jobId={job_id}")
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn poll_location_prefers_configured_base() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("localhost:8080"));
        let id = JobId::new();

        assert_eq!(
            poll_location(Some("https://import.example.com"), &headers, id),
            format!("https://import.example.com/$import-poll-status?jobId={id}")
        );
        assert_eq!(
            poll_location(None, &headers, id),
            format!("http://localhost:8080/$import-poll-status?jobId={id}")
        );
        assert_eq!(poll_location(None, &HeaderMap::new(), id), format!("/$import-poll-status?jobId={id}"));
    }
}
