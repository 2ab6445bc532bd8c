//! Closed enums for job/file status and processing mode.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use bulkimport_core::DomainError;

/// Commit granularity used by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingMode {
    /// Each group of `batch_size` rows is committed all-or-nothing; a failed
    /// group stops the file.
    #[default]
    AtomicBatch,
    /// Every row is committed on its own; failures are recorded and skipped.
    PerRow,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::AtomicBatch => "ATOMIC_BATCH",
            ProcessingMode::PerRow => "PER_ROW",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ATOMIC_BATCH" => Ok(ProcessingMode::AtomicBatch),
            "PER_ROW" => Ok(ProcessingMode::PerRow),
            other => Err(DomainError::validation(format!(
                "unknown processingMode '{other}' (expected ATOMIC_BATCH or PER_ROW)"
            ))),
        }
    }
}

/// Job lifecycle status.
///
/// `STAGING -> READY -> RUNNING -> COMPLETE | ERROR`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepting files.
    Staging,
    /// Waiting to be claimed by a worker.
    Ready,
    /// Leased to exactly one worker.
    Running,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Staging, JobStatus::Ready)
                | (JobStatus::Ready, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Complete)
                | (JobStatus::Running, JobStatus::Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Staging => "STAGING",
            JobStatus::Ready => "READY",
            JobStatus::Running => "RUNNING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STAGING" => Ok(JobStatus::Staging),
            "READY" => Ok(JobStatus::Ready),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETE" => Ok(JobStatus::Complete),
            "ERROR" => Ok(JobStatus::Error),
            other => Err(DomainError::validation(format!("unknown job status '{other}'"))),
        }
    }
}

/// Per-file processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Error,
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Complete | FileStatus::Error)
    }

    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        match self {
            FileStatus::Pending => next != FileStatus::Pending,
            FileStatus::Running => next != FileStatus::Pending,
            FileStatus::Complete | FileStatus::Error => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "PENDING",
            FileStatus::Running => "RUNNING",
            FileStatus::Complete => "COMPLETE",
            FileStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(FileStatus::Pending),
            "RUNNING" => Ok(FileStatus::Running),
            "COMPLETE" => Ok(FileStatus::Complete),
            "ERROR" => Ok(FileStatus::Error),
            other => Err(DomainError::validation(format!("unknown file status '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_mode_parses_enum_names_only() {
        assert_eq!("ATOMIC_BATCH".parse::<ProcessingMode>().unwrap(), ProcessingMode::AtomicBatch);
        assert_eq!(" PER_ROW ".parse::<ProcessingMode>().unwrap(), ProcessingMode::PerRow);
        assert!(matches!(
            "per_row".parse::<ProcessingMode>(),
            Err(DomainError::Validation(_))
        ));
        assert!("BATCH".parse::<ProcessingMode>().is_err());
        assert_eq!(ProcessingMode::default(), ProcessingMode::AtomicBatch);
    }

    #[test]
    fn only_forward_job_transitions_are_legal() {
        use JobStatus::*;
        let all = [Staging, Ready, Running, Complete, Error];
        let legal = [(Staging, Ready), (Ready, Running), (Running, Complete), (Running, Error)];

        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_files_never_move() {
        assert!(!FileStatus::Complete.can_transition_to(FileStatus::Running));
        assert!(!FileStatus::Error.can_transition_to(FileStatus::Complete));
        assert!(FileStatus::Pending.can_transition_to(FileStatus::Error));
        assert!(!FileStatus::Running.can_transition_to(FileStatus::Pending));
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            JobStatus::Staging,
            JobStatus::Ready,
            JobStatus::Running,
            JobStatus::Complete,
            JobStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.as_str().to_string())
            );
        }
    }
}
