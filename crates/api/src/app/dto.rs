use serde::{Deserialize, Serialize};

use bulkimport_infra::jobs::ExecutorStats;

/// Body of a `202 Accepted` submit response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAcceptedResponse {
    pub job_id: String,
    pub file_count: usize,
    pub declared_file_count: u32,
    pub poll_location: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    #[serde(rename = "jobId")]
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub executor: Option<ExecutorStats>,
}
