use thiserror::Error;

use crate::job::JobFileId;
use crate::status::JobStatus;

/// Illegal operation on an import job.
///
/// Raised by the state machine before any change is applied, so a failed
/// operation leaves the job untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("job is {0}, files can only be added while STAGING")]
    JobNotStaging(JobStatus),

    #[error("job is {0}, expected RUNNING")]
    JobNotRunning(JobStatus),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("job declares {declared} files, {attempted} would exceed it")]
    FileCountExceeded { declared: u32, attempted: usize },

    #[error("job has no file {0}")]
    UnknownFile(JobFileId),

    #[error("row cursor of file {file} cannot move back from {current} to {proposed}")]
    CursorRegression {
        file: JobFileId,
        current: u64,
        proposed: u64,
    },

    #[error("file {0} already reached a terminal status")]
    FileTerminal(JobFileId),

    #[error("lease is not held by the caller")]
    LeaseMismatch,

    #[error("invalid job specification: {0}")]
    InvalidSpec(String),
}
