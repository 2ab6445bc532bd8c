//! Postgres-backed job registry.
//!
//! ## Schema
//!
//! - `import_jobs`: one row per job; `(status, status_time)` is indexed so
//!   the claim query is a short index scan.
//! - `import_job_files`: one row per file, keyed by `(job_id, file_id)`.
//!
//! ## Concurrency
//!
//! Every transition runs in a transaction that first takes the job row with
//! `SELECT ... FOR UPDATE`, so transitions on one job are serialized while
//! distinct jobs proceed in parallel. The state machine itself is
//! [`ImportJob`]: the row is loaded, the domain method applied, and only the
//! changed columns written back.
//!
//! `claim_next_ready` uses `FOR UPDATE SKIP LOCKED`, so concurrent claimers
//! (threads or processes) never receive the same job.
//!
//! ## Blocking bridge
//!
//! [`JobRegistry`] is synchronous. Each call blocks on the tokio runtime
//! captured at construction, so it must be made from a thread that is not
//! driving that runtime (executor workers, or `spawn_blocking` in handlers).

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use bulkimport_core::{JobId, TenantId};
use bulkimport_jobs::{
    FileProgress, ImportJob, JobError, JobFile, JobFileId, JobOutcome, JobRecord, JobSnapshot,
    JobSpec, Lease, NewJobFile, RowFailure,
};

use super::in_memory::DEFAULT_LEASE_SECS;
use super::registry::{ClaimedJob, JobRegistry, RegistryError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS import_jobs (
        id UUID PRIMARY KEY,
        description TEXT,
        processing_mode TEXT NOT NULL,
        batch_size INTEGER NOT NULL CHECK (batch_size >= 1),
        declared_file_count INTEGER NOT NULL CHECK (declared_file_count >= 0),
        status TEXT NOT NULL,
        status_message TEXT,
        status_time TIMESTAMPTZ NOT NULL,
        created_time TIMESTAMPTZ NOT NULL,
        lease_owner TEXT,
        lease_token UUID,
        lease_acquired_at TIMESTAMPTZ,
        lease_expires_at TIMESTAMPTZ,
        outcome JSONB
    )
    "#,
    "CREATE INDEX IF NOT EXISTS import_jobs_status_idx ON import_jobs (status, status_time)",
    r#"
    CREATE TABLE IF NOT EXISTS import_job_files (
        job_id UUID NOT NULL REFERENCES import_jobs (id),
        file_id INTEGER NOT NULL,
        tenant_id UUID NOT NULL,
        description TEXT NOT NULL,
        content BYTEA NOT NULL,
        row_cursor BIGINT NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        failed_rows JSONB NOT NULL DEFAULT '[]',
        message TEXT,
        PRIMARY KEY (job_id, file_id)
    )
    "#,
];

/// Postgres-backed job registry.
#[derive(Debug, Clone)]
pub struct PostgresJobRegistry {
    pool: PgPool,
    runtime: Handle,
    lease_ttl: TimeDelta,
}

impl PostgresJobRegistry {
    /// Connect and capture the current tokio runtime for the blocking bridge.
    pub async fn connect(database_url: &str) -> Result<Self, RegistryError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, Handle::current()))
    }

    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool,
            runtime,
            lease_ttl: TimeDelta::seconds(DEFAULT_LEASE_SECS),
        }
    }

    pub fn with_lease_ttl(mut self, ttl: TimeDelta) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Create tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), RegistryError> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self, spec), fields(declared = spec.declared_file_count), err)]
    async fn insert_job(&self, spec: JobSpec) -> Result<JobId, RegistryError> {
        let job = ImportJob::new(JobId::new(), spec, Utc::now())?;
        let record = job.record();

        sqlx::query(
            r#"
            INSERT INTO import_jobs (
                id, description, processing_mode, batch_size, declared_file_count,
                status, status_message, status_time, created_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.description)
        .bind(record.processing_mode.as_str())
        .bind(int_column::<_, i32>("batch_size", record.batch_size)?)
        .bind(int_column::<_, i32>("declared_file_count", record.declared_file_count)?)
        .bind(record.status.as_str())
        .bind(&record.status_message)
        .bind(record.status_time)
        .bind(record.created_time)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        Ok(record.id)
    }

    /// Lock the job row, apply `f`, persist what changed and commit.
    async fn transition<T>(
        &self,
        operation: &'static str,
        job_id: JobId,
        with_content: bool,
        f: impl FnOnce(&mut ImportJob) -> Result<T, JobError>,
    ) -> Result<(T, ImportJob), RegistryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        let before = load_job(&mut tx, job_id, true, with_content)
            .await?
            .ok_or(RegistryError::UnknownJob(job_id))?;
        let mut after = before.clone();
        let value = f(&mut after)?;

        persist(&mut tx, &before, &after).await?;
        tx.commit().await.map_err(|e| map_sqlx_error(operation, e))?;
        Ok((value, after))
    }

    #[instrument(skip(self, worker), err)]
    async fn claim(&self, worker: &str) -> Result<Option<ClaimedJob>, RegistryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("claim_next_ready", e))?;

        let candidate: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM import_jobs
            WHERE status = 'READY'
            ORDER BY status_time, created_time
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_next_ready", e))?;

        let Some(id) = candidate else {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(None);
        };
        let job_id = JobId::from_uuid(id);

        // Row is already locked by this transaction.
        let before = load_job(&mut tx, job_id, false, true)
            .await?
            .ok_or(RegistryError::UnknownJob(job_id))?;
        let mut after = before.clone();
        let lease = after.start(worker, Utc::now(), self.lease_ttl)?;

        persist(&mut tx, &before, &after).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("claim_next_ready", e))?;

        Ok(Some(ClaimedJob { lease, job: after }))
    }

    #[instrument(skip(self), err)]
    async fn load_snapshot(&self, job_id: JobId) -> Result<JobSnapshot, RegistryError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("get_status", e))?;
        let job = load_job(&mut conn, job_id, false, false)
            .await?
            .ok_or(RegistryError::UnknownJob(job_id))?;
        Ok(job.snapshot())
    }

    #[instrument(skip(self), err)]
    async fn load_full(&self, job_id: JobId) -> Result<ImportJob, RegistryError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;
        load_job(&mut conn, job_id, false, true)
            .await?
            .ok_or(RegistryError::UnknownJob(job_id))
    }
}

impl JobRegistry for PostgresJobRegistry {
    fn create_job(&self, spec: JobSpec) -> Result<JobId, RegistryError> {
        self.runtime.block_on(self.insert_job(spec))
    }

    fn append_files(&self, job_id: JobId, files: Vec<NewJobFile>) -> Result<Vec<JobFileId>, RegistryError> {
        let (ids, _) = self
            .runtime
            .block_on(self.transition("append_files", job_id, false, |job| job.append_files(files)))?;
        Ok(ids)
    }

    fn activate(&self, job_id: JobId) -> Result<(), RegistryError> {
        self.runtime
            .block_on(self.transition("activate", job_id, false, |job| job.activate(Utc::now())))?;
        Ok(())
    }

    fn claim_next_ready(&self, worker: &str) -> Result<Option<ClaimedJob>, RegistryError> {
        self.runtime.block_on(self.claim(worker))
    }

    fn record_file_outcome(
        &self,
        lease: &Lease,
        file_id: JobFileId,
        progress: FileProgress,
    ) -> Result<(), RegistryError> {
        self.runtime.block_on(self.transition("record_file_outcome", lease.job_id, false, |job| {
            job.record_file(lease, file_id, progress, Utc::now())
        }))?;
        Ok(())
    }

    fn complete_job(&self, lease: &Lease, outcome: JobOutcome) -> Result<JobSnapshot, RegistryError> {
        let ((), job) = self.runtime.block_on(self.transition("complete_job", lease.job_id, false, |job| {
            job.complete(lease, outcome, Utc::now())
        }))?;
        Ok(job.snapshot())
    }

    fn fail_job(&self, lease: &Lease, message: &str, outcome: JobOutcome) -> Result<JobSnapshot, RegistryError> {
        let ((), job) = self.runtime.block_on(self.transition("fail_job", lease.job_id, false, |job| {
            job.fail(lease, message, outcome, Utc::now())
        }))?;
        Ok(job.snapshot())
    }

    fn get_status(&self, job_id: JobId) -> Result<JobSnapshot, RegistryError> {
        self.runtime.block_on(self.load_snapshot(job_id))
    }

    fn get_job(&self, job_id: JobId) -> Result<ImportJob, RegistryError> {
        self.runtime.block_on(self.load_full(job_id))
    }
}

async fn load_job(
    conn: &mut PgConnection,
    job_id: JobId,
    for_update: bool,
    with_content: bool,
) -> Result<Option<ImportJob>, RegistryError> {
    let job_sql = if for_update {
        "SELECT * FROM import_jobs WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT * FROM import_jobs WHERE id = $1"
    };
    let Some(row) = sqlx::query(job_sql)
        .bind(job_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_job", e))?
    else {
        return Ok(None);
    };
    let record = job_record(&row).map_err(|e| map_sqlx_error("decode_job", e))?;

    let files_sql = if with_content {
        "SELECT * FROM import_job_files WHERE job_id = $1 ORDER BY file_id"
    } else {
        r#"
        SELECT job_id, file_id, tenant_id, description, ''::bytea AS content,
               row_cursor, status, failed_rows, message
        FROM import_job_files WHERE job_id = $1 ORDER BY file_id
        "#
    };
    let rows = sqlx::query(files_sql)
        .bind(job_id.as_uuid())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_files", e))?;

    let files = rows
        .iter()
        .map(job_file)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| map_sqlx_error("decode_file", e))?;

    Ok(Some(ImportJob::restore(record, files)))
}

/// Write the job row and every file row that differs between `before` and `after`.
async fn persist(conn: &mut PgConnection, before: &ImportJob, after: &ImportJob) -> Result<(), RegistryError> {
    let record = after.record();
    let lease = record.lease.as_ref();

    sqlx::query(
        r#"
        UPDATE import_jobs SET
            status = $2,
            status_message = $3,
            status_time = $4,
            lease_owner = $5,
            lease_token = $6,
            lease_acquired_at = $7,
            lease_expires_at = $8,
            outcome = $9
        WHERE id = $1
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(record.status.as_str())
    .bind(&record.status_message)
    .bind(record.status_time)
    .bind(lease.map(|l| l.owner.clone()))
    .bind(lease.map(|l| l.token))
    .bind(lease.map(|l| l.acquired_at))
    .bind(lease.map(|l| l.expires_at))
    .bind(record.outcome.map(Json))
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_job", e))?;

    for file in after.files() {
        if before.file(file.id) == Some(file) {
            continue;
        }
        sqlx::query(
            r#"
            INSERT INTO import_job_files (
                job_id, file_id, tenant_id, description, content,
                row_cursor, status, failed_rows, message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (job_id, file_id) DO UPDATE SET
                row_cursor = EXCLUDED.row_cursor,
                status = EXCLUDED.status,
                failed_rows = EXCLUDED.failed_rows,
                message = EXCLUDED.message
            "#,
        )
        .bind(file.job_id.as_uuid())
        .bind(int_column::<_, i32>("file_id", file.id.0)?)
        .bind(file.tenant.as_uuid())
        .bind(&file.description)
        .bind(&file.content)
        .bind(int_column::<_, i64>("row_cursor", file.row_cursor)?)
        .bind(file.status.as_str())
        .bind(Json(&file.failed_rows))
        .bind(&file.message)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("upsert_file", e))?;
    }

    Ok(())
}

fn job_record(row: &PgRow) -> Result<JobRecord, sqlx::Error> {
    let lease_token: Option<Uuid> = row.try_get("lease_token")?;
    let id = JobId::from_uuid(row.try_get("id")?);

    let lease = match lease_token {
        Some(token) => Some(Lease {
            job_id: id,
            owner: row.try_get::<Option<String>, _>("lease_owner")?.unwrap_or_default(),
            token,
            acquired_at: required_time(row, "lease_acquired_at")?,
            expires_at: required_time(row, "lease_expires_at")?,
        }),
        None => None,
    };
    let outcome: Option<Json<JobOutcome>> = row.try_get("outcome")?;

    Ok(JobRecord {
        id,
        description: row.try_get("description")?,
        processing_mode: decode_enum(row, "processing_mode")?,
        batch_size: row.try_get::<i32, _>("batch_size")? as u32,
        declared_file_count: row.try_get::<i32, _>("declared_file_count")? as u32,
        status: decode_enum(row, "status")?,
        status_message: row.try_get("status_message")?,
        status_time: row.try_get("status_time")?,
        created_time: row.try_get("created_time")?,
        lease,
        outcome: outcome.map(|o| o.0),
    })
}

fn job_file(row: &PgRow) -> Result<JobFile, sqlx::Error> {
    let failed_rows: Json<Vec<RowFailure>> = row.try_get("failed_rows")?;
    Ok(JobFile {
        id: JobFileId(row.try_get::<i32, _>("file_id")? as u32),
        job_id: JobId::from_uuid(row.try_get("job_id")?),
        tenant: TenantId::from_uuid(row.try_get("tenant_id")?),
        description: row.try_get("description")?,
        content: row.try_get("content")?,
        row_cursor: row.try_get::<i64, _>("row_cursor")? as u64,
        status: decode_enum(row, "status")?,
        failed_rows: failed_rows.0,
        message: row.try_get("message")?,
    })
}

fn required_time(row: &PgRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    row.try_get::<Option<DateTime<Utc>>, _>(column)?
        .ok_or_else(|| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: "NULL lease timestamp on a leased job".into(),
        })
}

fn decode_enum<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: T::Err| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// Map SQLx errors to RegistryError.
/// Checked conversion into a signed column type.
fn int_column<T, U>(column: &str, value: T) -> Result<U, RegistryError>
where
    T: Copy + std::fmt::Display + TryInto<U>,
{
    value
        .try_into()
        .map_err(|_| RegistryError::Storage(format!("{column} value {value} is out of range for its column")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RegistryError {
    match err {
        sqlx::Error::Database(db_err) => {
            RegistryError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            RegistryError::Storage(format!("connection pool closed in {operation}"))
        }
        other => RegistryError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_column_rejects_values_that_would_wrap() {
        assert_eq!(int_column::<u32, i32>("batch_size", i32::MAX as u32).unwrap(), i32::MAX);

        let err = int_column::<u32, i32>("batch_size", 3_000_000_000).unwrap_err();
        assert!(matches!(err, RegistryError::Storage(ref m) if m.contains("batch_size")), "{err:?}");
        assert!(int_column::<u64, i64>("row_cursor", u64::MAX).is_err());
    }
}
