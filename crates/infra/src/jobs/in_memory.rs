//! In-memory job registry for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{TimeDelta, Utc};
use tracing::{debug, warn};

use bulkimport_core::JobId;
use bulkimport_jobs::{
    FileProgress, ImportJob, JobError, JobFileId, JobOutcome, JobSnapshot, JobSpec, Lease,
    NewJobFile,
};

use super::registry::{ClaimedJob, JobRegistry, RegistryError};

/// Default lease time-to-live recorded on claim, in seconds.
pub const DEFAULT_LEASE_SECS: i64 = 300;

#[derive(Debug)]
struct JobEntry {
    /// Serializes transitions on this job.
    job: Mutex<ImportJob>,
    /// Last committed view, swapped after each successful transition.
    snapshot: RwLock<Arc<JobSnapshot>>,
}

/// In-memory job registry.
///
/// Each job has its own lock, so transitions on distinct jobs never contend.
/// Readers see the snapshot published by the last committed transition and
/// never wait for an in-flight one.
#[derive(Debug)]
pub struct InMemoryJobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    /// READY jobs in activation order.
    ready: Mutex<VecDeque<JobId>>,
    lease_ttl: TimeDelta,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ready: Mutex::new(VecDeque::new()),
            lease_ttl: TimeDelta::seconds(DEFAULT_LEASE_SECS),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_lease_ttl(mut self, ttl: TimeDelta) -> Self {
        self.lease_ttl = ttl;
        self
    }

    fn entry(&self, job_id: JobId) -> Result<Arc<JobEntry>, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        jobs.get(&job_id).cloned().ok_or(RegistryError::UnknownJob(job_id))
    }

    /// Apply `f` under the job's lock and publish the new snapshot on success.
    fn mutate<T>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut ImportJob) -> Result<T, JobError>,
    ) -> Result<(T, Arc<JobSnapshot>), RegistryError> {
        let entry = self.entry(job_id)?;
        let mut job = entry.job.lock().map_err(|_| poisoned())?;
        let value = f(&mut job)?;

        let snapshot = Arc::new(job.snapshot());
        *entry.snapshot.write().map_err(|_| poisoned())? = snapshot.clone();
        Ok((value, snapshot))
    }
}

impl Default for InMemoryJobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> RegistryError {
    RegistryError::Storage("lock poisoned".to_string())
}

impl JobRegistry for InMemoryJobRegistry {
    fn create_job(&self, spec: JobSpec) -> Result<JobId, RegistryError> {
        let job = ImportJob::new(JobId::new(), spec, Utc::now())?;
        let id = job.record().id;

        let entry = Arc::new(JobEntry {
            snapshot: RwLock::new(Arc::new(job.snapshot())),
            job: Mutex::new(job),
        });
        self.jobs.write().map_err(|_| poisoned())?.insert(id, entry);

        debug!(job_id = %id, "job created");
        Ok(id)
    }

    fn append_files(&self, job_id: JobId, files: Vec<NewJobFile>) -> Result<Vec<JobFileId>, RegistryError> {
        let (ids, _) = self.mutate(job_id, |job| job.append_files(files))?;
        Ok(ids)
    }

    fn activate(&self, job_id: JobId) -> Result<(), RegistryError> {
        let entry = self.entry(job_id)?;
        let mut job = entry.job.lock().map_err(|_| poisoned())?;
        job.activate(Utc::now())?;

        // Enqueue while still holding the job lock so a claimer never sees a
        // queued id whose job is not yet READY.
        self.ready.lock().map_err(|_| poisoned())?.push_back(job_id);
        *entry.snapshot.write().map_err(|_| poisoned())? = Arc::new(job.snapshot());
        Ok(())
    }

    fn claim_next_ready(&self, worker: &str) -> Result<Option<ClaimedJob>, RegistryError> {
        loop {
            let Some(job_id) = self.ready.lock().map_err(|_| poisoned())?.pop_front() else {
                return Ok(None);
            };

            let started = self.mutate(job_id, |job| {
                let lease = job.start(worker, Utc::now(), self.lease_ttl)?;
                Ok((lease, job.clone()))
            });

            match started {
                Ok(((lease, job), _)) => return Ok(Some(ClaimedJob { lease, job })),
                Err(RegistryError::Job(e)) => {
                    // Only claimers pop the queue, so this means the entry is stale.
                    warn!(job_id = %job_id, error = %e, "skipping queued job that is not READY");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn record_file_outcome(
        &self,
        lease: &Lease,
        file_id: JobFileId,
        progress: FileProgress,
    ) -> Result<(), RegistryError> {
        self.mutate(lease.job_id, |job| job.record_file(lease, file_id, progress, Utc::now()))?;
        Ok(())
    }

    fn complete_job(&self, lease: &Lease, outcome: JobOutcome) -> Result<JobSnapshot, RegistryError> {
        let ((), snapshot) = self.mutate(lease.job_id, |job| job.complete(lease, outcome, Utc::now()))?;
        Ok((*snapshot).clone())
    }

    fn fail_job(&self, lease: &Lease, message: &str, outcome: JobOutcome) -> Result<JobSnapshot, RegistryError> {
        let ((), snapshot) =
            self.mutate(lease.job_id, |job| job.fail(lease, message, outcome, Utc::now()))?;
        Ok((*snapshot).clone())
    }

    fn get_status(&self, job_id: JobId) -> Result<JobSnapshot, RegistryError> {
        let entry = self.entry(job_id)?;
        let snapshot = entry.snapshot.read().map_err(|_| poisoned())?.clone();
        Ok((*snapshot).clone())
    }

    fn get_job(&self, job_id: JobId) -> Result<ImportJob, RegistryError> {
        let entry = self.entry(job_id)?;
        let job = entry.job.lock().map_err(|_| poisoned())?;
        Ok(job.clone())
    }
}
