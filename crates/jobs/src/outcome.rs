use serde::{Deserialize, Serialize};

/// A row the storage collaborator rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    /// 0-based index among the file's non-blank rows.
    pub row: u64,
    pub message: String,
}

impl RowFailure {
    pub fn new(row: u64, message: impl Into<String>) -> Self {
        Self {
            row,
            message: message.into(),
        }
    }
}

/// Summary stored on a job when it reaches a terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub files_total: u64,
    pub files_completed: u64,
    pub files_failed: u64,
    pub rows_committed: u64,
    pub rows_failed: u64,
}
