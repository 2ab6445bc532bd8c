//! Import job domain module.
//!
//! This crate contains the import job model and its state machine,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage). Registries persist [`ImportJob`] values and apply every mutation
//! through the methods defined here, so transition rules live in one place.

pub mod error;
pub mod job;
pub mod outcome;
pub mod status;

pub use error::JobError;
pub use job::{
    FileProgress, FileSnapshot, ImportJob, JobFile, JobFileId, JobRecord, JobSnapshot, JobSpec,
    Lease, NewJobFile,
};
pub use outcome::{JobOutcome, RowFailure};
pub use status::{FileStatus, JobStatus, ProcessingMode};
