use std::sync::{Arc, Mutex, PoisonError};

use chrono::TimeDelta;

use bulkimport_infra::jobs::{
    BatchExecutor, ExecutorConfig, ExecutorHandle, ExecutorStats, FailureTolerance,
    InMemoryJobRegistry, JobRegistry, PollResponder, PostgresJobRegistry,
};
use bulkimport_infra::notify::{CacheInvalidator, NoopInvalidator};
use bulkimport_infra::sink::{InMemoryRecordSink, RecordSink};
use bulkimport_infra::SubmissionHandler;

use crate::config::AppConfig;

pub type SharedRegistry = Arc<dyn JobRegistry>;

/// Everything the import routes need, shared across requests.
pub struct ImportServices {
    registry: SharedRegistry,
    submission: SubmissionHandler<SharedRegistry>,
    poll: PollResponder<SharedRegistry>,
    executor: Mutex<Option<ExecutorHandle>>,
    public_base_url: Option<String>,
}

impl std::fmt::Debug for ImportServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportServices")
            .field("public_base_url", &self.public_base_url)
            .field("executor", &self.executor_stats())
            .finish_non_exhaustive()
    }
}

impl ImportServices {
    /// Wire services from configuration: Postgres when `DATABASE_URL` is set,
    /// in-memory otherwise.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let lease_ttl = TimeDelta::seconds(config.lease_secs);
        let registry: SharedRegistry = match &config.database_url {
            Some(url) => {
                let registry = PostgresJobRegistry::connect(url).await?.with_lease_ttl(lease_ttl);
                registry.ensure_schema().await?;
                tracing::info!("using postgres job registry");
                Arc::new(registry)
            }
            None => {
                tracing::info!("using in-memory job registry");
                Arc::new(InMemoryJobRegistry::new().with_lease_ttl(lease_ttl))
            }
        };

        let invalidator = build_invalidator(config)?;
        Ok(Self::new(registry, Arc::new(InMemoryRecordSink::new()), invalidator, config))
    }

    /// In-memory registry and sink (dev/test).
    pub fn in_memory(config: &AppConfig) -> Self {
        let registry = InMemoryJobRegistry::new().with_lease_ttl(TimeDelta::seconds(config.lease_secs));
        Self::new(
            Arc::new(registry),
            Arc::new(InMemoryRecordSink::new()),
            Arc::new(NoopInvalidator),
            config,
        )
    }

    pub fn new(
        registry: SharedRegistry,
        sink: Arc<dyn RecordSink>,
        invalidator: Arc<dyn CacheInvalidator>,
        config: &AppConfig,
    ) -> Self {
        let executor = (config.workers > 0).then(|| {
            BatchExecutor::new(registry.clone(), sink)
                .with_invalidator(invalidator)
                .with_tolerance(FailureTolerance {
                    max_failed_rows: config.max_failed_rows,
                })
                .spawn(
                    ExecutorConfig::default()
                        .with_workers(config.workers)
                        .with_poll_interval(config.poll_interval)
                        .with_max_idle_backoff(config.max_idle_backoff),
                )
        });

        Self {
            submission: SubmissionHandler::new(registry.clone()).with_buffer_size(config.read_buffer_bytes),
            poll: PollResponder::new(registry.clone()).with_retry_after(config.retry_after),
            registry,
            executor: Mutex::new(executor),
            public_base_url: config.public_base_url.clone(),
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn submission(&self) -> &SubmissionHandler<SharedRegistry> {
        &self.submission
    }

    pub fn poll(&self) -> &PollResponder<SharedRegistry> {
        &self.poll
    }

    pub fn public_base_url(&self) -> Option<&str> {
        self.public_base_url.as_deref()
    }

    /// `None` when background execution is disabled or stopped.
    pub fn executor_stats(&self) -> Option<ExecutorStats> {
        self.executor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(ExecutorHandle::stats)
    }

    /// Stop the executor pool, waiting for in-flight jobs. Blocking.
    pub fn shutdown_executor(&self) {
        let handle = self.executor.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.shutdown();
        }
    }
}

#[cfg(feature = "redis")]
fn build_invalidator(config: &AppConfig) -> anyhow::Result<Arc<dyn CacheInvalidator>> {
    use bulkimport_infra::notify::RedisCacheInvalidator;

    match &config.redis_url {
        Some(url) => {
            tracing::info!("publishing terminal job invalidations to redis");
            Ok(Arc::new(RedisCacheInvalidator::new(url)?))
        }
        None => Ok(Arc::new(NoopInvalidator)),
    }
}

#[cfg(not(feature = "redis"))]
fn build_invalidator(config: &AppConfig) -> anyhow::Result<Arc<dyn CacheInvalidator>> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the `redis` feature is disabled; cache invalidation is off");
    }
    Ok(Arc::new(NoopInvalidator))
}
