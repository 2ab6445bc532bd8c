//! Infrastructure layer: job registries, submission, execution and the
//! collaborators the executor writes to.

pub mod jobs;
pub mod notify;
pub mod sink;
pub mod submission;

pub use submission::{
    prefers_async, AppendReceipt, AppendRequest, ImportParams, RawImportParams, SubmissionError,
    SubmissionHandler, SubmissionReceipt, SubmissionRequest,
};
