//! Poll-status protocol: maps a job snapshot to what the client sees.

use std::time::Duration;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use bulkimport_core::JobId;
use bulkimport_jobs::{JobOutcome, JobSnapshot, JobStatus};

use super::registry::{JobRegistry, RegistryError};

/// Default retry hint returned while a job is not terminal.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(120);

/// One entry of an [`OperationOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeIssue {
    pub severity: String,
    pub code: String,
    pub diagnostics: String,
}

/// Outcome payload returned for terminal jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    pub issue: Vec<OutcomeIssue>,
}

impl OperationOutcome {
    /// Outcome without issues.
    pub fn success() -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue: Vec::new(),
        }
    }

    /// Outcome carrying a single processing error.
    pub fn error(diagnostics: impl Into<String>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue: vec![OutcomeIssue {
                severity: "error".to_string(),
                code: "processing".to_string(),
                diagnostics: diagnostics.into(),
            }],
        }
    }
}

/// Client-visible state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// STAGING, READY or RUNNING.
    InProgress {
        status: JobStatus,
        /// `Status set to <STATUS> at <RFC 3339 time>`.
        progress: String,
        retry_after: Duration,
    },
    Complete {
        outcome: OperationOutcome,
        summary: Option<JobOutcome>,
    },
    Failed {
        outcome: OperationOutcome,
        summary: Option<JobOutcome>,
    },
}

impl PollStatus {
    pub fn from_snapshot(snapshot: &JobSnapshot, retry_after: Duration) -> Self {
        match snapshot.status {
            JobStatus::Staging | JobStatus::Ready | JobStatus::Running => PollStatus::InProgress {
                status: snapshot.status,
                progress: format!(
                    "Status set to {} at {}",
                    snapshot.status,
                    snapshot.status_time.to_rfc3339_opts(SecondsFormat::Millis, true)
                ),
                retry_after,
            },
            JobStatus::Complete => PollStatus::Complete {
                outcome: OperationOutcome::success(),
                summary: snapshot.outcome,
            },
            JobStatus::Error => PollStatus::Failed {
                outcome: OperationOutcome::error(
                    snapshot.status_message.clone().unwrap_or_default(),
                ),
                summary: snapshot.outcome,
            },
        }
    }
}

/// Read-only responder for the poll operation.
#[derive(Debug, Clone)]
pub struct PollResponder<R: JobRegistry> {
    registry: R,
    retry_after: Duration,
}

impl<R: JobRegistry> PollResponder<R> {
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn poll(&self, job_id: JobId) -> Result<PollStatus, RegistryError> {
        let snapshot = self.registry.get_status(job_id)?;
        Ok(PollStatus::from_snapshot(&snapshot, self.retry_after))
    }
}

#[cfg(test)]
mod tests {
    use bulkimport_core::TenantId;
    use bulkimport_jobs::{FileProgress, FileStatus, JobFileId, JobSpec, NewJobFile};

    use super::*;
    use crate::jobs::in_memory::InMemoryJobRegistry;

    fn running(registry: &InMemoryJobRegistry) -> (JobId, bulkimport_jobs::Lease) {
        let id = registry
            .create_job(JobSpec {
                declared_file_count: 1,
                ..JobSpec::default()
            })
            .unwrap();
        registry
            .append_files(
                id,
                vec![NewJobFile {
                    tenant: TenantId::default_partition(),
                    description: String::new(),
                    content: b"{}".to_vec(),
                }],
            )
            .unwrap();
        registry.activate(id).unwrap();
        let claimed = registry.claim_next_ready("w").unwrap().unwrap();
        (id, claimed.lease)
    }

    #[test]
    fn non_terminal_jobs_report_progress_and_retry_hint() {
        let registry = InMemoryJobRegistry::arc();
        let responder = PollResponder::new(registry.clone());
        let id = registry.create_job(JobSpec::default()).unwrap();

        match responder.poll(id).unwrap() {
            PollStatus::InProgress { status, progress, retry_after } => {
                assert_eq!(status, JobStatus::Staging);
                assert!(progress.starts_with("Status set to STAGING at "), "{progress}");
                assert!(progress.ends_with('Z'));
                assert_eq!(retry_after, Duration::from_secs(120));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn failed_job_reports_status_message_as_issue() {
        let registry = InMemoryJobRegistry::arc();
        let responder = PollResponder::new(registry.clone()).with_retry_after(Duration::from_secs(5));
        let (id, lease) = running(&registry);
        registry
            .record_file_outcome(
                &lease,
                JobFileId(0),
                FileProgress {
                    row_cursor: 1,
                    status: FileStatus::Error,
                    new_failures: Vec::new(),
                    message: None,
                },
            )
            .unwrap();
        registry.fail_job(&lease, "file 0: row 0: bad", JobOutcome::default()).unwrap();

        let first = responder.poll(id).unwrap();
        assert_eq!(
            first,
            PollStatus::Failed {
                outcome: OperationOutcome::error("file 0: row 0: bad"),
                summary: Some(JobOutcome::default()),
            }
        );
        // Terminal results are stable.
        assert_eq!(responder.poll(id).unwrap(), first);
    }

    #[test]
    fn complete_job_has_empty_outcome() {
        let registry = InMemoryJobRegistry::arc();
        let (id, lease) = running(&registry);
        registry.complete_job(&lease, JobOutcome::default()).unwrap();

        let status = PollResponder::new(registry).poll(id).unwrap();
        match status {
            PollStatus::Complete { outcome, .. } => {
                let json = serde_json::to_value(&outcome).unwrap();
                assert_eq!(json, serde_json::json!({"resourceType": "OperationOutcome", "issue": []}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_job_is_not_found() {
        let responder = PollResponder::new(InMemoryJobRegistry::new());
        assert!(matches!(responder.poll(JobId::new()), Err(RegistryError::UnknownJob(_))));
    }
}
