//! Storage collaborator that imported rows are committed to.
//!
//! The executor never interprets row content; it splits file bodies into rows
//! with [`split_rows`] and hands groups of them to a [`RecordSink`].

mod in_memory;

use std::sync::Arc;

use bulkimport_core::TenantId;

pub use in_memory::InMemoryRecordSink;

/// One logical row of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportRow<'a> {
    /// 0-based index among the file's non-blank rows.
    pub index: u64,
    pub data: &'a [u8],
}

/// Storage failure for a batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SinkError {
    /// Offending row, when the sink can attribute the failure to one.
    pub row: Option<u64>,
    pub message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            row: None,
            message: message.into(),
        }
    }

    pub fn at_row(row: u64, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            message: message.into(),
        }
    }
}

/// Backing store for imported rows.
pub trait RecordSink: Send + Sync {
    /// Commit `rows` as one all-or-nothing unit under `tenant`.
    ///
    /// On `Err`, none of the rows may be visible.
    fn commit_batch(&self, tenant: TenantId, rows: &[ImportRow<'_>]) -> Result<(), SinkError>;
}

impl<S: RecordSink + ?Sized> RecordSink for Arc<S> {
    fn commit_batch(&self, tenant: TenantId, rows: &[ImportRow<'_>]) -> Result<(), SinkError> {
        (**self).commit_batch(tenant, rows)
    }
}

/// Split newline-delimited content into rows.
///
/// Blank lines are skipped and do not consume an index; a trailing `\r` is
/// stripped.
pub fn split_rows(content: &[u8]) -> Vec<ImportRow<'_>> {
    content
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .enumerate()
        .map(|(index, data)| ImportRow {
            index: index as u64,
            data,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_skip_blank_lines_and_strip_cr() {
        let rows = split_rows(b"{\"a\":1}\r\n\r\n  \n{\"b\":2}\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ImportRow { index: 0, data: b"{\"a\":1}" });
        assert_eq!(rows[1], ImportRow { index: 1, data: b"{\"b\":2}" });
    }

    #[test]
    fn last_row_needs_no_newline() {
        let rows = split_rows(b"x\ny");
        assert_eq!(rows.iter().map(|r| r.data).collect::<Vec<_>>(), vec![&b"x"[..], b"y"]);
    }

    #[test]
    fn empty_content_has_no_rows() {
        assert!(split_rows(b"").is_empty());
        assert!(split_rows(b"\n\r\n").is_empty());
    }
}
