//! Import job aggregate and its state machine.

use core::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bulkimport_core::{Entity, JobId, TenantId};

use crate::error::JobError;
use crate::outcome::{JobOutcome, RowFailure};
use crate::status::{FileStatus, JobStatus, ProcessingMode};

/// Position of a file within its job (insertion order, 0-based).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobFileId(pub u32);

impl fmt::Display for JobFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Parameters a job is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub description: Option<String>,
    pub processing_mode: ProcessingMode,
    pub batch_size: u32,
    pub declared_file_count: u32,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            description: None,
            processing_mode: ProcessingMode::AtomicBatch,
            batch_size: 1,
            declared_file_count: 0,
        }
    }
}

impl JobSpec {
    pub fn validate(&self) -> Result<(), JobError> {
        if self.batch_size == 0 {
            return Err(JobError::InvalidSpec("batchSize must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// A file extracted from a submission, not yet attached to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJobFile {
    pub tenant: TenantId,
    /// Raw header block of the multipart part.
    pub description: String,
    pub content: Vec<u8>,
}

/// A file owned by a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFile {
    pub id: JobFileId,
    pub job_id: JobId,
    pub tenant: TenantId,
    pub description: String,
    pub content: Vec<u8>,
    /// Number of rows already attempted.
    pub row_cursor: u64,
    pub status: FileStatus,
    pub failed_rows: Vec<RowFailure>,
    pub message: Option<String>,
}

/// Exclusive right to drive one RUNNING job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub job_id: JobId,
    pub owner: String,
    pub token: Uuid,
    /// Claim time, moved forward on every renewal.
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Progress report for one file, produced by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProgress {
    pub row_cursor: u64,
    pub status: FileStatus,
    /// Failures since the previous report; appended to the file's list.
    pub new_failures: Vec<RowFailure>,
    pub message: Option<String>,
}

/// Everything about a job except its files.
///
/// Exposed so storage backends can rebuild an [`ImportJob`] with
/// [`ImportJob::restore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: JobId,
    pub description: Option<String>,
    pub processing_mode: ProcessingMode,
    pub batch_size: u32,
    pub declared_file_count: u32,
    pub status: JobStatus,
    pub status_message: Option<String>,
    pub status_time: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
    pub lease: Option<Lease>,
    pub outcome: Option<JobOutcome>,
}

/// Import job aggregate.
///
/// All mutation goes through methods that validate first and apply second:
/// an `Err` return means nothing changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportJob {
    record: JobRecord,
    files: Vec<JobFile>,
}

impl Entity for ImportJob {
    type Id = JobId;

    fn id(&self) -> &Self::Id {
        &self.record.id
    }
}

impl ImportJob {
    /// A fresh STAGING job with no files.
    pub fn new(id: JobId, spec: JobSpec, now: DateTime<Utc>) -> Result<Self, JobError> {
        spec.validate()?;
        Ok(Self {
            record: JobRecord {
                id,
                description: spec.description,
                processing_mode: spec.processing_mode,
                batch_size: spec.batch_size,
                declared_file_count: spec.declared_file_count,
                status: JobStatus::Staging,
                status_message: None,
                status_time: now,
                created_time: now,
                lease: None,
                outcome: None,
            },
            files: Vec::new(),
        })
    }

    /// Rebuild a job from stored state. Files are sorted by id.
    pub fn restore(record: JobRecord, mut files: Vec<JobFile>) -> Self {
        files.sort_by_key(|f| f.id);
        Self { record, files }
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub fn status(&self) -> JobStatus {
        self.record.status
    }

    pub fn processing_mode(&self) -> ProcessingMode {
        self.record.processing_mode
    }

    pub fn batch_size(&self) -> u32 {
        self.record.batch_size
    }

    pub fn declared_file_count(&self) -> u32 {
        self.record.declared_file_count
    }

    pub fn files(&self) -> &[JobFile] {
        &self.files
    }

    pub fn file(&self, id: JobFileId) -> Option<&JobFile> {
        self.files.get(id.0 as usize)
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.record.lease.as_ref()
    }

    /// Whether every declared file has arrived.
    pub fn has_all_declared_files(&self) -> bool {
        self.files.len() as u64 == u64::from(self.record.declared_file_count)
    }

    /// Attach files in order. Returns the ids assigned to them.
    pub fn append_files(&mut self, files: Vec<NewJobFile>) -> Result<Vec<JobFileId>, JobError> {
        if self.record.status != JobStatus::Staging {
            return Err(JobError::JobNotStaging(self.record.status));
        }
        let attempted = self.files.len() + files.len();
        if attempted as u64 > u64::from(self.record.declared_file_count) {
            return Err(JobError::FileCountExceeded {
                declared: self.record.declared_file_count,
                attempted,
            });
        }

        let first = self.files.len() as u32;
        let job_id = self.record.id;
        let ids: Vec<JobFileId> = (first..first + files.len() as u32).map(JobFileId).collect();
        self.files.extend(files.into_iter().zip(&ids).map(|(file, id)| JobFile {
            id: *id,
            job_id,
            tenant: file.tenant,
            description: file.description,
            content: file.content,
            row_cursor: 0,
            status: FileStatus::Pending,
            failed_rows: Vec::new(),
            message: None,
        }));
        Ok(ids)
    }

    /// STAGING -> READY.
    ///
    /// Whether the job *should* be activated is the caller's decision.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.record.status != JobStatus::Staging {
            return Err(JobError::JobNotStaging(self.record.status));
        }
        self.transition(JobStatus::Ready, now)
    }

    /// READY -> RUNNING, granting `owner` a lease valid for `ttl`.
    pub fn start(&mut self, owner: &str, now: DateTime<Utc>, ttl: TimeDelta) -> Result<Lease, JobError> {
        self.transition(JobStatus::Running, now)?;
        let lease = Lease {
            job_id: self.record.id,
            owner: owner.to_string(),
            token: Uuid::now_v7(),
            acquired_at: now,
            expires_at: now + ttl,
        };
        self.record.lease = Some(lease.clone());
        Ok(lease)
    }

    /// Apply a progress report to one file. Renews the lease.
    pub fn record_file(
        &mut self,
        lease: &Lease,
        file_id: JobFileId,
        progress: FileProgress,
        now: DateTime<Utc>,
    ) -> Result<(), JobError> {
        self.check_lease(lease)?;

        let file = self
            .files
            .get_mut(file_id.0 as usize)
            .ok_or(JobError::UnknownFile(file_id))?;
        if file.status.is_terminal() {
            return Err(JobError::FileTerminal(file_id));
        }
        if progress.row_cursor < file.row_cursor {
            return Err(JobError::CursorRegression {
                file: file_id,
                current: file.row_cursor,
                proposed: progress.row_cursor,
            });
        }
        if progress.status != file.status && !file.status.can_transition_to(progress.status) {
            return Err(JobError::InvalidTransition {
                from: file.status.as_str(),
                to: progress.status.as_str(),
            });
        }

        file.row_cursor = progress.row_cursor;
        file.status = progress.status;
        file.failed_rows.extend(progress.new_failures);
        if progress.message.is_some() {
            file.message = progress.message;
        }

        if let Some(held) = self.record.lease.as_mut() {
            let ttl = held.expires_at - held.acquired_at;
            held.acquired_at = now;
            held.expires_at = now + ttl;
        }
        Ok(())
    }

    /// RUNNING -> COMPLETE.
    pub fn complete(&mut self, lease: &Lease, outcome: JobOutcome, now: DateTime<Utc>) -> Result<(), JobError> {
        self.check_lease(lease)?;
        self.transition(JobStatus::Complete, now)?;
        self.record.outcome = Some(outcome);
        self.record.lease = None;
        Ok(())
    }

    /// RUNNING -> ERROR, keeping `message` as the status message.
    pub fn fail(
        &mut self,
        lease: &Lease,
        message: impl Into<String>,
        outcome: JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), JobError> {
        self.check_lease(lease)?;
        self.transition(JobStatus::Error, now)?;
        self.record.status_message = Some(message.into());
        self.record.outcome = Some(outcome);
        self.record.lease = None;
        Ok(())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.record.id,
            description: self.record.description.clone(),
            processing_mode: self.record.processing_mode,
            batch_size: self.record.batch_size,
            declared_file_count: self.record.declared_file_count,
            status: self.record.status,
            status_message: self.record.status_message.clone(),
            status_time: self.record.status_time,
            created_time: self.record.created_time,
            lease_owner: self.record.lease.as_ref().map(|l| l.owner.clone()),
            lease_expires_at: self.record.lease.as_ref().map(|l| l.expires_at),
            outcome: self.record.outcome,
            files: self.files.iter().map(FileSnapshot::from).collect(),
        }
    }

    fn check_lease(&self, lease: &Lease) -> Result<(), JobError> {
        if self.record.status != JobStatus::Running {
            return Err(JobError::JobNotRunning(self.record.status));
        }
        match &self.record.lease {
            Some(held) if held.token == lease.token && lease.job_id == self.record.id => Ok(()),
            _ => Err(JobError::LeaseMismatch),
        }
    }

    fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), JobError> {
        if !self.record.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.record.status.as_str(),
                to: next.as_str(),
            });
        }
        self.record.status = next;
        self.record.status_time = now;
        Ok(())
    }
}

/// Read-only view of a job, without file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub description: Option<String>,
    pub processing_mode: ProcessingMode,
    pub batch_size: u32,
    pub declared_file_count: u32,
    pub status: JobStatus,
    pub status_message: Option<String>,
    pub status_time: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub outcome: Option<JobOutcome>,
    pub files: Vec<FileSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    pub id: JobFileId,
    pub tenant: TenantId,
    pub description: String,
    pub size_bytes: u64,
    pub row_cursor: u64,
    pub status: FileStatus,
    pub failed_rows: Vec<RowFailure>,
    pub message: Option<String>,
}

impl From<&JobFile> for FileSnapshot {
    fn from(file: &JobFile) -> Self {
        Self {
            id: file.id,
            tenant: file.tenant,
            description: file.description.clone(),
            size_bytes: file.content.len() as u64,
            row_cursor: file.row_cursor,
            status: file.status,
            failed_rows: file.failed_rows.clone(),
            message: file.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn spec(declared: u32) -> JobSpec {
        JobSpec {
            declared_file_count: declared,
            ..JobSpec::default()
        }
    }

    fn file(content: &str) -> NewJobFile {
        NewJobFile {
            tenant: TenantId::default_partition(),
            description: "Content-Type: application/x-ndjson".to_string(),
            content: content.as_bytes().to_vec(),
        }
    }

    fn running_job(files: u32) -> (ImportJob, Lease) {
        let mut job = ImportJob::new(JobId::new(), spec(files), t(0)).unwrap();
        job.append_files((0..files).map(|_| file("{}")).collect()).unwrap();
        job.activate(t(1)).unwrap();
        let lease = job.start("worker-0", t(2), TimeDelta::seconds(300)).unwrap();
        (job, lease)
    }

    fn progress(cursor: u64, status: FileStatus) -> FileProgress {
        FileProgress {
            row_cursor: cursor,
            status,
            new_failures: Vec::new(),
            message: None,
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = ImportJob::new(
            JobId::new(),
            JobSpec {
                batch_size: 0,
                ..JobSpec::default()
            },
            t(0),
        )
        .unwrap_err();
        assert!(matches!(err, JobError::InvalidSpec(_)));
    }

    #[test]
    fn files_keep_insertion_order_and_respect_declared_count() {
        let mut job = ImportJob::new(JobId::new(), spec(3), t(0)).unwrap();
        assert_eq!(job.append_files(vec![file("a"), file("b")]).unwrap(), vec![JobFileId(0), JobFileId(1)]);
        assert!(!job.has_all_declared_files());

        let err = job.append_files(vec![file("c"), file("d")]).unwrap_err();
        assert_eq!(err, JobError::FileCountExceeded { declared: 3, attempted: 4 });
        assert_eq!(job.files().len(), 2);

        assert_eq!(job.append_files(vec![file("c")]).unwrap(), vec![JobFileId(2)]);
        assert!(job.has_all_declared_files());
        let contents: Vec<&[u8]> = job.files().iter().map(|f| f.content.as_slice()).collect();
        assert_eq!(contents, vec![&b"a"[..], b"b", b"c"]);
    }

    #[test]
    fn append_after_activation_is_rejected() {
        let mut job = ImportJob::new(JobId::new(), spec(2), t(0)).unwrap();
        job.append_files(vec![file("a")]).unwrap();
        job.activate(t(1)).unwrap();

        assert_eq!(
            job.append_files(vec![file("b")]).unwrap_err(),
            JobError::JobNotStaging(JobStatus::Ready)
        );
        assert_eq!(job.activate(t(2)).unwrap_err(), JobError::JobNotStaging(JobStatus::Ready));
    }

    #[test]
    fn start_records_lease_and_status_time() {
        let (job, lease) = running_job(1);
        assert_eq!(job.status(), JobStatus::Running);
        assert_eq!(job.record().status_time, t(2));
        assert_eq!(lease.owner, "worker-0");
        assert_eq!(lease.expires_at, t(302));
        assert_eq!(job.lease(), Some(&lease));
    }

    #[test]
    fn staging_job_cannot_be_started() {
        let mut job = ImportJob::new(JobId::new(), spec(0), t(0)).unwrap();
        let err = job.start("w", t(1), TimeDelta::seconds(10)).unwrap_err();
        assert_eq!(err, JobError::InvalidTransition { from: "STAGING", to: "RUNNING" });
    }

    #[test]
    fn file_progress_is_monotonic() {
        let (mut job, lease) = running_job(1);
        job.record_file(&lease, JobFileId(0), progress(5, FileStatus::Running), t(3)).unwrap();

        let err = job
            .record_file(&lease, JobFileId(0), progress(4, FileStatus::Running), t(4))
            .unwrap_err();
        assert!(matches!(err, JobError::CursorRegression { current: 5, proposed: 4, .. }));

        job.record_file(&lease, JobFileId(0), progress(7, FileStatus::Complete), t(5)).unwrap();
        assert_eq!(
            job.record_file(&lease, JobFileId(0), progress(7, FileStatus::Complete), t(6))
                .unwrap_err(),
            JobError::FileTerminal(JobFileId(0))
        );
        assert_eq!(
            job.record_file(&lease, JobFileId(9), progress(0, FileStatus::Running), t(6))
                .unwrap_err(),
            JobError::UnknownFile(JobFileId(9))
        );
    }

    #[test]
    fn recording_progress_renews_the_lease() {
        let (mut job, lease) = running_job(1);
        job.record_file(&lease, JobFileId(0), progress(1, FileStatus::Running), t(100)).unwrap();
        assert_eq!(job.lease().unwrap().expires_at, t(400));
    }

    #[test]
    fn repeated_renewals_keep_the_original_ttl() {
        let (mut job, lease) = running_job(1);
        for (cursor, at) in [(1, 100), (2, 200), (3, 300)] {
            job.record_file(&lease, JobFileId(0), progress(cursor, FileStatus::Running), t(at))
                .unwrap();
        }

        let held = job.lease().unwrap();
        assert_eq!(held.acquired_at, t(300));
        assert_eq!(held.expires_at, t(600));
    }

    #[test]
    fn foreign_lease_is_rejected() {
        let (mut job, lease) = running_job(1);
        let forged = Lease {
            token: Uuid::now_v7(),
            ..lease.clone()
        };

        assert_eq!(
            job.record_file(&forged, JobFileId(0), progress(1, FileStatus::Running), t(3))
                .unwrap_err(),
            JobError::LeaseMismatch
        );
        assert_eq!(
            job.complete(&forged, JobOutcome::default(), t(3)).unwrap_err(),
            JobError::LeaseMismatch
        );
        assert_eq!(job.status(), JobStatus::Running);
    }

    #[test]
    fn failure_keeps_message_and_releases_lease() {
        let (mut job, lease) = running_job(1);
        let outcome = JobOutcome {
            files_total: 1,
            files_failed: 1,
            ..JobOutcome::default()
        };
        job.fail(&lease, "row 0: not a JSON object", outcome, t(10)).unwrap();

        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Error);
        assert_eq!(snap.status_message.as_deref(), Some("row 0: not a JSON object"));
        assert_eq!(snap.outcome, Some(outcome));
        assert_eq!(snap.lease_owner, None);

        assert_eq!(
            job.complete(&lease, JobOutcome::default(), t(11)).unwrap_err(),
            JobError::JobNotRunning(JobStatus::Error)
        );
    }

    #[test]
    fn snapshot_serializes_camel_case_without_content() {
        let (job, _) = running_job(1);
        let json = serde_json::to_value(job.snapshot()).unwrap();
        assert_eq!(json["status"], "RUNNING");
        assert_eq!(json["processingMode"], "ATOMIC_BATCH");
        assert_eq!(json["declaredFileCount"], 1);
        assert_eq!(json["files"][0]["sizeBytes"], 2);
        assert!(json["files"][0].get("content").is_none());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append,
        Activate,
        Start,
        Progress,
        Complete,
        Fail,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Append),
            Just(Op::Activate),
            Just(Op::Start),
            Just(Op::Progress),
            Just(Op::Complete),
            Just(Op::Fail),
        ]
    }

    proptest! {
        /// Property: whatever operations are attempted, the statuses a job
        /// passes through are a subsequence of the canonical lifecycle and
        /// nothing moves after a terminal status.
        #[test]
        fn observed_statuses_follow_the_lifecycle(ops in prop::collection::vec(op(), 0..40)) {
            use JobStatus::*;

            let mut job = ImportJob::new(JobId::new(), spec(4), t(0)).unwrap();
            let mut lease: Option<Lease> = None;
            let mut observed = vec![job.status()];

            for (i, op) in ops.into_iter().enumerate() {
                let now = t(i as i64 + 1);
                let before = job.clone();
                let result = match op {
                    Op::Append => job.append_files(vec![file("{}")]).map(|_| ()),
                    Op::Activate => job.activate(now),
                    Op::Start => job.start("w", now, TimeDelta::seconds(60)).map(|l| lease = Some(l)),
                    Op::Progress => match &lease {
                        Some(l) => job.record_file(l, JobFileId(0), progress(i as u64, FileStatus::Running), now),
                        None => Err(JobError::LeaseMismatch),
                    },
                    Op::Complete => match &lease {
                        Some(l) => job.complete(l, JobOutcome::default(), now),
                        None => Err(JobError::LeaseMismatch),
                    },
                    Op::Fail => match &lease {
                        Some(l) => job.fail(l, "boom", JobOutcome::default(), now),
                        None => Err(JobError::LeaseMismatch),
                    },
                };

                if result.is_err() {
                    prop_assert_eq!(&job, &before);
                }
                if before.status().is_terminal() {
                    prop_assert_eq!(job.status(), before.status());
                }
                prop_assert!(job.files().len() <= 4);
                if observed.last() != Some(&job.status()) {
                    observed.push(job.status());
                }
            }

            let canonical_complete = [Staging, Ready, Running, Complete];
            let canonical_error = [Staging, Ready, Running, Error];
            let is_prefix = |c: &[JobStatus]| observed.len() <= c.len() && observed[..] == c[..observed.len()];
            prop_assert!(is_prefix(&canonical_complete) || is_prefix(&canonical_error), "{:?}", observed);
        }
    }
}
