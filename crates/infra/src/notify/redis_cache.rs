//! Redis-backed cache invalidation (optional).
//!
//! Deletes the cached job entry and publishes the terminal snapshot so other
//! processes can drop their own copies. Pub/sub delivery is best-effort.

use redis::Commands;

use bulkimport_jobs::JobSnapshot;

use super::{CacheInvalidator, InvalidationError};

/// Key prefix of cached job entries.
pub const JOB_KEY_PREFIX: &str = "bulkimport:job:";

/// Channel terminal snapshots are published on.
pub const TERMINAL_CHANNEL: &str = "bulkimport.job.terminal";

#[derive(Debug, Clone)]
pub struct RedisCacheInvalidator {
    client: redis::Client,
    channel: String,
}

impl RedisCacheInvalidator {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, InvalidationError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| InvalidationError(e.to_string()))?;
        Ok(Self {
            client,
            channel: TERMINAL_CHANNEL.to_string(),
        })
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

impl CacheInvalidator for RedisCacheInvalidator {
    fn job_terminal(&self, snapshot: &JobSnapshot) -> Result<(), InvalidationError> {
        let payload =
            serde_json::to_string(snapshot).map_err(|e| InvalidationError(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| InvalidationError(e.to_string()))?;

        let _: i64 = conn
            .del(format!("{JOB_KEY_PREFIX}{}", snapshot.id))
            .map_err(|e| InvalidationError(e.to_string()))?;
        let _: i64 = conn
            .publish(&self.channel, payload)
            .map_err(|e| InvalidationError(e.to_string()))?;

        Ok(())
    }
}
