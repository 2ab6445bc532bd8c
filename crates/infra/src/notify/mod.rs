//! Downstream cache invalidation after terminal job transitions.
//!
//! Invalidators run strictly after the terminal state has been committed by
//! the registry. A failed invalidation is logged and never changes the job.

#[cfg(feature = "redis")]
mod redis_cache;

use std::sync::Arc;

use bulkimport_jobs::JobSnapshot;

#[cfg(feature = "redis")]
pub use redis_cache::RedisCacheInvalidator;

#[derive(Debug, Clone, thiserror::Error)]
#[error("cache invalidation failed: {0}")]
pub struct InvalidationError(pub String);

/// Notified once per job when it reaches COMPLETE or ERROR.
pub trait CacheInvalidator: Send + Sync {
    fn job_terminal(&self, snapshot: &JobSnapshot) -> Result<(), InvalidationError>;
}

impl<C: CacheInvalidator + ?Sized> CacheInvalidator for Arc<C> {
    fn job_terminal(&self, snapshot: &JobSnapshot) -> Result<(), InvalidationError> {
        (**self).job_terminal(snapshot)
    }
}

/// Invalidator for deployments without a downstream cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn job_terminal(&self, _snapshot: &JobSnapshot) -> Result<(), InvalidationError> {
        Ok(())
    }
}
