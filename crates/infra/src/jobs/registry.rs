//! Job registry abstraction.

use std::sync::Arc;

use bulkimport_core::JobId;
use bulkimport_jobs::{
    FileProgress, ImportJob, JobError, JobFileId, JobOutcome, JobSnapshot, JobSpec, Lease,
    NewJobFile,
};

/// A job handed to exactly one worker by [`JobRegistry::claim_next_ready`].
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub lease: Lease,
    /// State at claim time, including file content.
    pub job: ImportJob,
}

/// Durable store of import jobs and their files.
///
/// Every mutating operation on one job is serialized; operations on distinct
/// jobs may run in parallel. Transition legality is enforced by
/// [`ImportJob`]; the registry only makes each operation atomic.
///
/// Methods are blocking. Async callers run them on a blocking thread.
pub trait JobRegistry: Send + Sync {
    /// Persist a new STAGING job with no files.
    fn create_job(&self, spec: JobSpec) -> Result<JobId, RegistryError>;

    /// Append files in order. All or none are stored.
    fn append_files(&self, job_id: JobId, files: Vec<NewJobFile>) -> Result<Vec<JobFileId>, RegistryError>;

    /// STAGING -> READY.
    fn activate(&self, job_id: JobId) -> Result<(), RegistryError>;

    /// Atomically take the oldest READY job, mark it RUNNING and lease it to `worker`.
    fn claim_next_ready(&self, worker: &str) -> Result<Option<ClaimedJob>, RegistryError>;

    fn record_file_outcome(
        &self,
        lease: &Lease,
        file_id: JobFileId,
        progress: FileProgress,
    ) -> Result<(), RegistryError>;

    fn complete_job(&self, lease: &Lease, outcome: JobOutcome) -> Result<JobSnapshot, RegistryError>;

    fn fail_job(&self, lease: &Lease, message: &str, outcome: JobOutcome) -> Result<JobSnapshot, RegistryError>;

    /// Read-only view; never waits on writers.
    fn get_status(&self, job_id: JobId) -> Result<JobSnapshot, RegistryError>;

    /// Full job including file content.
    fn get_job(&self, job_id: JobId) -> Result<ImportJob, RegistryError>;
}

/// Job registry error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("job not found: {0}")]
    UnknownJob(JobId),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl<R: JobRegistry + ?Sized> JobRegistry for Arc<R> {
    fn create_job(&self, spec: JobSpec) -> Result<JobId, RegistryError> {
        (**self).create_job(spec)
    }

    fn append_files(&self, job_id: JobId, files: Vec<NewJobFile>) -> Result<Vec<JobFileId>, RegistryError> {
        (**self).append_files(job_id, files)
    }

    fn activate(&self, job_id: JobId) -> Result<(), RegistryError> {
        (**self).activate(job_id)
    }

    fn claim_next_ready(&self, worker: &str) -> Result<Option<ClaimedJob>, RegistryError> {
        (**self).claim_next_ready(worker)
    }

    fn record_file_outcome(
        &self,
        lease: &Lease,
        file_id: JobFileId,
        progress: FileProgress,
    ) -> Result<(), RegistryError> {
        (**self).record_file_outcome(lease, file_id, progress)
    }

    fn complete_job(&self, lease: &Lease, outcome: JobOutcome) -> Result<JobSnapshot, RegistryError> {
        (**self).complete_job(lease, outcome)
    }

    fn fail_job(&self, lease: &Lease, message: &str, outcome: JobOutcome) -> Result<JobSnapshot, RegistryError> {
        (**self).fail_job(lease, message, outcome)
    }

    fn get_status(&self, job_id: JobId) -> Result<JobSnapshot, RegistryError> {
        (**self).get_status(job_id)
    }

    fn get_job(&self, job_id: JobId) -> Result<ImportJob, RegistryError> {
        (**self).get_job(job_id)
    }
}
