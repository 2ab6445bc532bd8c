//! Batch executor: a pool of worker threads draining READY jobs.
//!
//! ## Worker loop
//!
//! Each worker claims the next READY job, replays its files in order into the
//! [`RecordSink`] and drives the job to COMPLETE or ERROR. When nothing is
//! ready the worker sleeps with a doubling backoff, capped at
//! `max_idle_backoff`, and wakes early on shutdown.
//!
//! ## Processing modes
//!
//! - `ATOMIC_BATCH`: rows are committed in groups of `batch_size`; the first
//!   rejected group marks the file ERROR and its remaining rows are skipped.
//!   `rows_failed` counts every rolled-back row of that group, while the file
//!   lists a single `RowFailure` naming the row the sink blamed.
//! - `PER_ROW`: every row is committed alone; rejections are recorded on the
//!   file, which still ends COMPLETE.
//!
//! Progress is checkpointed through the registry after every group, so the
//! stored `row_cursor` always reflects the rows attempted so far.

use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use bulkimport_core::JobId;
use bulkimport_jobs::{
    FileProgress, FileStatus, JobFile, JobOutcome, JobSnapshot, JobStatus, Lease, ProcessingMode,
    RowFailure,
};

use super::registry::{ClaimedJob, JobRegistry, RegistryError};
use crate::notify::{CacheInvalidator, NoopInvalidator};
use crate::sink::{split_rows, RecordSink};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Name for logging; workers are named `<name>-<n>`.
    pub name: String,
    /// Number of worker threads.
    pub workers: usize,
    /// Initial idle backoff.
    pub poll_interval: Duration,
    /// Cap for the doubling idle backoff.
    pub max_idle_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "import-executor".to_string(),
            workers: 2,
            poll_interval: Duration::from_millis(100),
            max_idle_backoff: Duration::from_secs(2),
        }
    }
}

impl ExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_idle_backoff(mut self, max: Duration) -> Self {
        self.max_idle_backoff = max;
        self
    }
}

/// When per-row failures alone turn a job into ERROR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureTolerance {
    /// `None`: per-row failures never fail the job. `Some(n)`: more than `n`
    /// failed rows across the job do.
    pub max_failed_rows: Option<u64>,
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub workers: usize,
    pub jobs_processed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub rows_committed: u64,
    pub rows_failed: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to control a running executor pool.
#[derive(Debug)]
pub struct ExecutorHandle {
    shutdown: Vec<mpsc::Sender<()>>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
    started: Instant,
}

impl ExecutorHandle {
    /// Request graceful shutdown and wait for in-flight jobs to finish.
    pub fn shutdown(self) {
        for tx in &self.shutdown {
            let _ = tx.send(());
        }
        for join in self.joins {
            let _ = join.join();
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Result of running one claimed job.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub snapshot: JobSnapshot,
}

/// Replays claimed jobs into a [`RecordSink`].
pub struct BatchExecutor<R: JobRegistry, S: RecordSink> {
    registry: R,
    sink: S,
    invalidator: Arc<dyn CacheInvalidator>,
    tolerance: FailureTolerance,
}

impl<R: JobRegistry + 'static, S: RecordSink + 'static> BatchExecutor<R, S> {
    pub fn new(registry: R, sink: S) -> Self {
        Self {
            registry,
            sink,
            invalidator: Arc::new(NoopInvalidator),
            tolerance: FailureTolerance::default(),
        }
    }

    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = invalidator;
        self
    }

    pub fn with_tolerance(mut self, tolerance: FailureTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Spawn `config.workers` worker threads.
    pub fn spawn(self, config: ExecutorConfig) -> ExecutorHandle {
        let executor = Arc::new(self);
        let stats = Arc::new(Mutex::new(ExecutorStats {
            workers: config.workers,
            ..ExecutorStats::default()
        }));

        let mut shutdown = Vec::with_capacity(config.workers);
        let mut joins = Vec::with_capacity(config.workers);
        for n in 0..config.workers {
            let (tx, rx) = mpsc::channel::<()>();
            let worker = format!("{}-{n}", config.name);
            let executor = executor.clone();
            let stats = stats.clone();
            let config = config.clone();

            let join = thread::Builder::new()
                .name(worker.clone())
                .spawn(move || worker_loop(&executor, &worker, &config, rx, &stats))
                .expect("failed to spawn import executor thread");

            shutdown.push(tx);
            joins.push(join);
        }

        info!(executor = %config.name, workers = config.workers, "import executor started");
        ExecutorHandle {
            shutdown,
            joins,
            stats,
            started: Instant::now(),
        }
    }

    /// Claim and run a single job on the calling thread.
    pub fn run_once(&self, worker: &str) -> Result<Option<JobRun>, RegistryError> {
        match self.registry.claim_next_ready(worker)? {
            Some(claimed) => self.execute_claimed(worker, claimed).map(Some),
            None => Ok(None),
        }
    }

    /// Process every file of a claimed job and record its terminal status.
    ///
    /// Storage failures are captured on the job. Only registry failures are
    /// returned, in which case the job may still be RUNNING.
    pub fn execute_claimed(&self, worker: &str, claimed: ClaimedJob) -> Result<JobRun, RegistryError> {
        let ClaimedJob { lease, job } = claimed;
        let job_id = lease.job_id;
        info!(
            worker = %worker,
            job_id = %job_id,
            files = job.files().len(),
            mode = %job.processing_mode(),
            batch_size = job.batch_size(),
            "claimed import job"
        );

        let mut tally = Tally::new(job.files().len());
        let batch_size = job.batch_size().max(1) as usize;

        for file in job.files() {
            if file.status.is_terminal() {
                tally.add_resumed(file);
                continue;
            }

            let result = match job.processing_mode() {
                ProcessingMode::AtomicBatch => self.run_atomic(&lease, file, batch_size)?,
                ProcessingMode::PerRow => self.run_per_row(&lease, file, batch_size)?,
            };
            debug!(
                job_id = %job_id,
                file = %file.id,
                status = %result.status,
                committed = result.committed,
                failed = result.failed,
                "file finished"
            );
            tally.add(file, result);
        }

        let snapshot = self.finish(&lease, tally)?;
        if let Err(e) = self.invalidator.job_terminal(&snapshot) {
            warn!(job_id = %job_id, error = %e, "cache invalidation failed");
        }

        info!(job_id = %job_id, status = %snapshot.status, "import job finished");
        Ok(JobRun { snapshot })
    }

    fn run_atomic(&self, lease: &Lease, file: &JobFile, batch_size: usize) -> Result<FileResult, RegistryError> {
        let rows = split_rows(&file.content);
        let mut cursor = (file.row_cursor as usize).min(rows.len());
        let mut result = FileResult::default();
        self.checkpoint(lease, file, cursor, FileStatus::Running, Vec::new(), None)?;

        for group in rows[cursor..].chunks(batch_size) {
            cursor += group.len();
            match self.sink.commit_batch(file.tenant, group) {
                Ok(()) => {
                    result.committed += group.len() as u64;
                    self.checkpoint(lease, file, cursor, FileStatus::Running, Vec::new(), None)?;
                }
                Err(e) => {
                    let row = e.row.unwrap_or(group[0].index);
                    let message = format!("file {}: {}", file.id, e.message);
                    result.failed += group.len() as u64;
                    result.status = FileStatus::Error;
                    result.message = Some(message.clone());
                    self.checkpoint(
                        lease,
                        file,
                        cursor,
                        FileStatus::Error,
                        vec![RowFailure::new(row, e.message)],
                        Some(message),
                    )?;
                    return Ok(result);
                }
            }
        }

        result.status = FileStatus::Complete;
        self.checkpoint(lease, file, cursor, FileStatus::Complete, Vec::new(), None)?;
        Ok(result)
    }

    fn run_per_row(&self, lease: &Lease, file: &JobFile, batch_size: usize) -> Result<FileResult, RegistryError> {
        let rows = split_rows(&file.content);
        let mut cursor = (file.row_cursor as usize).min(rows.len());
        let mut result = FileResult::default();
        self.checkpoint(lease, file, cursor, FileStatus::Running, Vec::new(), None)?;

        for group in rows[cursor..].chunks(batch_size) {
            let mut failures = Vec::new();
            for row in group {
                match self.sink.commit_batch(file.tenant, std::slice::from_ref(row)) {
                    Ok(()) => result.committed += 1,
                    Err(e) => failures.push(RowFailure::new(row.index, e.message)),
                }
            }
            cursor += group.len();
            result.failed += failures.len() as u64;
            self.checkpoint(lease, file, cursor, FileStatus::Running, failures, None)?;
        }

        let previously_failed = file.failed_rows.len() as u64;
        let message = (result.failed + previously_failed > 0).then(|| {
            format!("{} of {} rows failed", result.failed + previously_failed, rows.len())
        });
        result.status = FileStatus::Complete;
        self.checkpoint(lease, file, cursor, FileStatus::Complete, Vec::new(), message)?;
        Ok(result)
    }

    fn checkpoint(
        &self,
        lease: &Lease,
        file: &JobFile,
        cursor: usize,
        status: FileStatus,
        new_failures: Vec<RowFailure>,
        message: Option<String>,
    ) -> Result<(), RegistryError> {
        self.registry.record_file_outcome(
            lease,
            file.id,
            FileProgress {
                row_cursor: cursor as u64,
                status,
                new_failures,
                message,
            },
        )
    }

    fn finish(&self, lease: &Lease, tally: Tally) -> Result<JobSnapshot, RegistryError> {
        let outcome = tally.outcome;
        if let Some(message) = tally.first_error {
            return self.registry.fail_job(lease, &message, outcome);
        }
        if let Some(max) = self.tolerance.max_failed_rows {
            if outcome.rows_failed > max {
                let message = format!("{} rows failed, tolerance is {max}", outcome.rows_failed);
                return self.registry.fail_job(lease, &message, outcome);
            }
        }
        self.registry.complete_job(lease, outcome)
    }
}

#[derive(Debug, Clone, Default)]
struct FileResult {
    status: FileStatus,
    committed: u64,
    failed: u64,
    message: Option<String>,
}

struct Tally {
    outcome: JobOutcome,
    first_error: Option<String>,
}

impl Tally {
    fn new(files: usize) -> Self {
        Self {
            outcome: JobOutcome {
                files_total: files as u64,
                ..JobOutcome::default()
            },
            first_error: None,
        }
    }

    fn add(&mut self, file: &JobFile, result: FileResult) {
        self.outcome.rows_committed += result.committed;
        self.outcome.rows_failed += result.failed + file.failed_rows.len() as u64;
        self.count_status(result.status, result.message);
    }

    /// A file finished by an earlier pass over this job.
    fn add_resumed(&mut self, file: &JobFile) {
        self.outcome.rows_failed += file.failed_rows.len() as u64;
        self.count_status(file.status, file.message.clone());
    }

    fn count_status(&mut self, status: FileStatus, message: Option<String>) {
        match status {
            FileStatus::Error => {
                self.outcome.files_failed += 1;
                if self.first_error.is_none() {
                    self.first_error = Some(message.unwrap_or_else(|| "file failed".to_string()));
                }
            }
            _ => self.outcome.files_completed += 1,
        }
    }
}

fn worker_loop<R: JobRegistry + 'static, S: RecordSink + 'static>(
    executor: &BatchExecutor<R, S>,
    worker: &str,
    config: &ExecutorConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: &Mutex<ExecutorStats>,
) {
    debug!(worker = %worker, "import worker started");
    let mut backoff = config.poll_interval;

    loop {
        if !matches!(shutdown_rx.try_recv(), Err(mpsc::TryRecvError::Empty)) {
            break;
        }

        match executor.registry.claim_next_ready(worker) {
            Ok(Some(claimed)) => {
                backoff = config.poll_interval;
                let job_id = claimed.lease.job_id;
                let lease = claimed.lease.clone();
                with_stats(stats, |s| s.current_running += 1);

                let result = executor.execute_claimed(worker, claimed);

                with_stats(stats, |s| {
                    s.current_running = s.current_running.saturating_sub(1);
                    s.jobs_processed += 1;
                    match &result {
                        Ok(run) => {
                            if let Some(outcome) = run.snapshot.outcome {
                                s.rows_committed += outcome.rows_committed;
                                s.rows_failed += outcome.rows_failed;
                            }
                            if run.snapshot.status == JobStatus::Complete {
                                s.jobs_completed += 1;
                            } else {
                                s.jobs_failed += 1;
                            }
                        }
                        Err(_) => s.jobs_failed += 1,
                    }
                });

                if let Err(e) = result {
                    abort_job(executor, job_id, &lease, &e);
                }
            }
            Ok(None) => {
                match shutdown_rx.recv_timeout(backoff) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
                backoff = (backoff * 2).min(config.max_idle_backoff);
            }
            Err(e) => {
                error!(worker = %worker, error = %e, "failed to claim import job");
                match shutdown_rx.recv_timeout(config.max_idle_backoff) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        }
    }

    debug!(worker = %worker, "import worker stopped");
}

/// Best effort: move a job whose execution hit a registry error to ERROR.
fn abort_job<R: JobRegistry + 'static, S: RecordSink + 'static>(
    executor: &BatchExecutor<R, S>,
    job_id: JobId,
    lease: &Lease,
    cause: &RegistryError,
) {
    error!(job_id = %job_id, error = %cause, "import job execution aborted");

    let message = format!("execution aborted: {cause}");
    match executor.registry.fail_job(lease, &message, JobOutcome::default()) {
        Ok(snapshot) => {
            if let Err(e) = executor.invalidator.job_terminal(&snapshot) {
                warn!(job_id = %job_id, error = %e, "cache invalidation failed");
            }
        }
        Err(e) => warn!(job_id = %job_id, error = %e, "could not record aborted job"),
    }
}

fn with_stats(stats: &Mutex<ExecutorStats>, f: impl FnOnce(&mut ExecutorStats)) {
    let mut guard = stats.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard);
}
