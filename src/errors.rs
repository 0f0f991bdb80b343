use thiserror::Error;

/// Failures of the import pipeline. Duplicates and unresolved reference names
/// are classifications reported in the preview, not errors.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("malformed file: {0}")]
    MalformedFile(String),

    #[error("batch submission failed: {0}")]
    BackendSubmission(String),

    #[error("document upload failed for {file_name}: {message}")]
    DocumentUpload { file_name: String, message: String },
}

impl ImportError {
    /// IPC error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::MalformedFile(_) => "malformed_file",
            ImportError::BackendSubmission(_) => "submission_failed",
            ImportError::DocumentUpload { .. } => "upload_failed",
        }
    }
}
