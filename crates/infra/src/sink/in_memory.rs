use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use bulkimport_core::TenantId;

use super::{ImportRow, RecordSink, SinkError};

/// In-memory record sink for tests/dev.
///
/// Accepts rows that parse as JSON objects. A batch containing any other row
/// is rejected as a whole.
#[derive(Debug, Default)]
pub struct InMemoryRecordSink {
    records: RwLock<HashMap<TenantId, Vec<JsonValue>>>,
}

impl InMemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records committed under `tenant`, in commit order.
    pub fn committed(&self, tenant: TenantId) -> Vec<JsonValue> {
        self.records
            .read()
            .map(|records| records.get(&tenant).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.records
            .read()
            .map(|records| records.values().map(Vec::len).sum())
            .unwrap_or_default()
    }
}

impl RecordSink for InMemoryRecordSink {
    fn commit_batch(&self, tenant: TenantId, rows: &[ImportRow<'_>]) -> Result<(), SinkError> {
        let mut parsed = Vec::with_capacity(rows.len());
        for row in rows {
            let value: JsonValue = serde_json::from_slice(row.data)
                .map_err(|e| SinkError::at_row(row.index, format!("row {}: {e}", row.index)))?;
            if !value.is_object() {
                return Err(SinkError::at_row(
                    row.index,
                    format!("row {}: expected a JSON object", row.index),
                ));
            }
            parsed.push(value);
        }

        let mut records = self
            .records
            .write()
            .map_err(|_| SinkError::new("lock poisoned"))?;
        records.entry(tenant).or_default().extend(parsed);
        Ok(())
    }
}
