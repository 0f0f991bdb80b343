use crate::errors::ImportError;
use crate::model::StudentRecord;
use serde::Serialize;

/// Batch-create seam for new students. Implementations either persist the
/// whole slice or none of it.
pub trait StudentStore {
    fn create_students(&mut self, records: &[StudentRecord]) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSummary {
    pub created_count: usize,
}

pub fn submit_batch<S: StudentStore + ?Sized>(
    store: &mut S,
    records: &[StudentRecord],
) -> Result<SubmitSummary, ImportError> {
    if records.is_empty() {
        return Ok(SubmitSummary { created_count: 0 });
    }
    let created_count = store
        .create_students(records)
        .map_err(|e| ImportError::BackendSubmission(format!("{e:#}")))?;
    Ok(SubmitSummary { created_count })
}
