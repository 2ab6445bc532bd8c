//! Import job lifecycle: registry, activation, execution and polling.
//!
//! ## Components
//!
//! - `JobRegistry`: durable job state and the only place transitions happen
//!   (in-memory or Postgres)
//! - `JobActivator`: moves fully staged jobs to READY
//! - `BatchExecutor`: worker pool that claims READY jobs and commits their rows
//! - `PollResponder`: maps job state to the client-visible poll result

pub mod activator;
pub mod executor;
pub mod in_memory;
pub mod poll;
pub mod postgres;
pub mod registry;

pub use activator::{Activation, JobActivator};
pub use executor::{
    BatchExecutor, ExecutorConfig, ExecutorHandle, ExecutorStats, FailureTolerance, JobRun,
};
pub use in_memory::{InMemoryJobRegistry, DEFAULT_LEASE_SECS};
pub use poll::{OperationOutcome, OutcomeIssue, PollResponder, PollStatus, DEFAULT_RETRY_AFTER};
pub use postgres::PostgresJobRegistry;
pub use registry::{ClaimedJob, JobRegistry, RegistryError};
