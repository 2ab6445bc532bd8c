//! Submission handler: validates an import request, parses its multipart body
//! and records the resulting job.
//!
//! All validation and parsing happen before the registry is touched, so a
//! rejected request leaves no job behind.

use std::io::Read;

use serde::Deserialize;
use tracing::{debug, info};

use bulkimport_core::{JobId, TenantId};
use bulkimport_jobs::{JobError, JobFileId, JobSpec, JobStatus, NewJobFile, ProcessingMode};
use bulkimport_multipart::{boundary_from_content_type, MultipartError, MultipartReader, DEFAULT_BUFFER_SIZE};

use crate::jobs::{Activation, JobActivator, JobRegistry, RegistryError};

/// Preference token a client sends to acknowledge asynchronous handling.
pub const RESPOND_ASYNC: &str = "respond-async";

/// Submission-time failures. None of them leave a job behind.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmissionError {
    #[error("asynchronous processing must be requested with `Prefer: respond-async`")]
    AsyncRequired,
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("job not found: {0}")]
    UnknownJob(JobId),
    #[error("job is {0}, no longer accepting files")]
    JobNotStaging(JobStatus),
    #[error(transparent)]
    Registry(RegistryError),
}

impl SubmissionError {
    fn malformed(message: impl Into<String>) -> Self {
        SubmissionError::MalformedRequest(message.into())
    }
}

impl From<MultipartError> for SubmissionError {
    fn from(err: MultipartError) -> Self {
        SubmissionError::MalformedRequest(err.to_string())
    }
}

impl From<RegistryError> for SubmissionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownJob(id) => SubmissionError::UnknownJob(id),
            RegistryError::Job(JobError::JobNotStaging(status)) => SubmissionError::JobNotStaging(status),
            RegistryError::Job(e @ (JobError::FileCountExceeded { .. } | JobError::InvalidSpec(_))) => {
                SubmissionError::MalformedRequest(e.to_string())
            }
            other => SubmissionError::Registry(other),
        }
    }
}

/// Import parameters exactly as they arrived on the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawImportParams {
    pub job_description: Option<String>,
    pub processing_mode: Option<String>,
    pub declared_file_count: Option<String>,
    pub batch_size: Option<String>,
}

/// Validated import parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportParams {
    pub description: Option<String>,
    pub processing_mode: ProcessingMode,
    pub declared_file_count: Option<u32>,
    pub batch_size: u32,
}

impl Default for ImportParams {
    fn default() -> Self {
        Self {
            description: None,
            processing_mode: ProcessingMode::AtomicBatch,
            declared_file_count: None,
            batch_size: 1,
        }
    }
}

/// Upper bound for count parameters; they are stored as 32-bit signed columns.
const MAX_COUNT_PARAM: u32 = i32::MAX as u32;

impl RawImportParams {
    pub fn parse(&self) -> Result<ImportParams, SubmissionError> {
        let processing_mode = match non_empty(&self.processing_mode) {
            Some(raw) => raw
                .parse()
                .map_err(|_| SubmissionError::malformed(format!("unknown processingMode `{raw}`")))?,
            None => ProcessingMode::default(),
        };

        let declared_file_count = match non_empty(&self.declared_file_count) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n <= MAX_COUNT_PARAM => Some(n),
                _ => {
                    return Err(SubmissionError::malformed(format!(
                        "declaredFileCount must be an integer between 0 and {MAX_COUNT_PARAM}, got `{raw}`"
                    )));
                }
            },
            None => None,
        };

        let batch_size = match non_empty(&self.batch_size) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if (1..=MAX_COUNT_PARAM).contains(&n) => n,
                _ => {
                    return Err(SubmissionError::malformed(format!(
                        "batchSize must be an integer between 1 and {MAX_COUNT_PARAM}, got `{raw}`"
                    )));
                }
            },
            None => 1,
        };

        Ok(ImportParams {
            description: self.job_description.clone(),
            processing_mode,
            declared_file_count,
            batch_size,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Whether a `Prefer` header value contains `respond-async`.
pub fn prefers_async(prefer: Option<&str>) -> bool {
    prefer.is_some_and(|value| {
        value
            .split(',')
            .map(|pref| pref.split(';').next().unwrap_or_default().trim())
            .any(|token| token.eq_ignore_ascii_case(RESPOND_ASYNC))
    })
}

/// A submit request with a streaming body.
#[derive(Debug)]
pub struct SubmissionRequest<B> {
    pub tenant: TenantId,
    pub prefer: Option<String>,
    pub content_type: Option<String>,
    pub params: RawImportParams,
    pub body: B,
}

/// A further batch of files for a STAGING job.
#[derive(Debug)]
pub struct AppendRequest<B> {
    pub tenant: TenantId,
    pub content_type: Option<String>,
    pub body: B,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub job_id: JobId,
    pub file_count: usize,
    pub declared_file_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub job_id: JobId,
    pub appended: Vec<JobFileId>,
    pub activation: Activation,
}

/// Turns import requests into jobs.
#[derive(Debug, Clone)]
pub struct SubmissionHandler<R: JobRegistry + Clone> {
    registry: R,
    activator: JobActivator<R>,
    buffer_size: usize,
}

impl<R: JobRegistry + Clone> SubmissionHandler<R> {
    pub fn new(registry: R) -> Self {
        Self {
            activator: JobActivator::new(registry.clone()),
            registry,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Requested parser read buffer; raised to fit the boundary when needed.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Create a job from one request and activate it immediately.
    ///
    /// Without an explicit `declaredFileCount` the job declares exactly the
    /// parts observed. An explicit count below the observed count is rejected.
    pub fn submit<B: Read>(&self, request: SubmissionRequest<B>) -> Result<SubmissionReceipt, SubmissionError> {
        if !prefers_async(request.prefer.as_deref()) {
            debug!(tenant = %request.tenant, "submission rejected: async not requested");
            return Err(SubmissionError::AsyncRequired);
        }
        let params = request.params.parse()?;
        let files = self.read_files(request.tenant, request.content_type.as_deref(), request.body)?;

        let observed = u32::try_from(files.len())
            .map_err(|_| SubmissionError::malformed("too many parts in one request"))?;
        let declared = match params.declared_file_count {
            Some(declared) if declared < observed => {
                return Err(SubmissionError::malformed(format!(
                    "declaredFileCount {declared} is less than the {observed} parts supplied"
                )));
            }
            Some(declared) => declared,
            None => observed,
        };

        let job_id = self.registry.create_job(JobSpec {
            description: params.description,
            processing_mode: params.processing_mode,
            batch_size: params.batch_size,
            declared_file_count: declared,
        })?;
        self.registry.append_files(job_id, files)?;
        self.activator.force_activate(job_id)?;

        info!(
            job_id = %job_id,
            tenant = %request.tenant,
            files = observed,
            declared,
            mode = %params.processing_mode,
            "import job submitted"
        );

        Ok(SubmissionReceipt {
            job_id,
            file_count: observed as usize,
            declared_file_count: declared,
        })
    }

    /// Create a STAGING job that will receive its files through [`append`](Self::append).
    pub fn open(&self, params: ImportParams) -> Result<JobId, SubmissionError> {
        let declared = params
            .declared_file_count
            .ok_or_else(|| SubmissionError::malformed("declaredFileCount is required to open a job"))?;
        let job_id = self.registry.create_job(JobSpec {
            description: params.description,
            processing_mode: params.processing_mode,
            batch_size: params.batch_size,
            declared_file_count: declared,
        })?;
        info!(job_id = %job_id, declared, "import job opened");
        Ok(job_id)
    }

    /// Append the parts of another multipart body to a STAGING job, then
    /// activate it if every declared file has arrived.
    pub fn append<B: Read>(&self, job_id: JobId, request: AppendRequest<B>) -> Result<AppendReceipt, SubmissionError> {
        let files = self.read_files(request.tenant, request.content_type.as_deref(), request.body)?;
        let appended = self.registry.append_files(job_id, files)?;
        let activation = self.activator.try_activate(job_id)?;

        info!(job_id = %job_id, appended = appended.len(), ?activation, "files appended");
        Ok(AppendReceipt {
            job_id,
            appended,
            activation,
        })
    }

    fn read_files<B: Read>(
        &self,
        tenant: TenantId,
        content_type: Option<&str>,
        body: B,
    ) -> Result<Vec<NewJobFile>, SubmissionError> {
        let boundary = boundary_from_content_type(content_type)?;
        let reader = MultipartReader::new(body, &boundary, self.buffer_size)?;

        let mut files = Vec::new();
        for part in reader.parts() {
            let part = part?;
            files.push(NewJobFile {
                tenant,
                description: part.headers.raw().to_string(),
                content: part.body,
            });
        }
        debug!(parts = files.len(), "multipart body parsed");
        Ok(files)
    }
}
