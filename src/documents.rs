use crate::errors::ImportError;
use crate::model::{DocumentAssociation, DocumentType};
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Largest single document accepted from an archive.
pub const MAX_DOCUMENT_BYTES: u64 = 50 * 1024 * 1024;

/// Storage seam for student documents. One call per file.
pub trait DocumentStore {
    fn put_document(&mut self, doc: &DocumentAssociation) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StemMatch {
    #[default]
    Exact,
    CaseInsensitive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZipScan {
    pub associations: Vec<DocumentAssociation>,
    /// Entry names that did not fit `<Folder>/<RegistrationId>.<ext>`.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadStatus {
    Uploaded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub file_name: String,
    pub registration_id: String,
    pub document_type: DocumentType,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn match_key(id: &str, mode: StemMatch) -> String {
    match mode {
        StemMatch::Exact => id.to_string(),
        StemMatch::CaseInsensitive => id.to_lowercase(),
    }
}

/// Splits `Folder/Stem.ext` into its document type, stem and file name.
fn classify_entry(name: &str) -> Option<(DocumentType, &str, &str)> {
    let mut parts = name.split(['/', '\\']).filter(|p| !p.is_empty());
    let folder = parts.next()?;
    let file_name = parts.next()?;
    if parts.next().is_some() || file_name == ".." || file_name.starts_with('.') {
        return None;
    }
    let doc_type = DocumentType::from_folder(folder)?;
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some((doc_type, stem, file_name))
}

/// Unpacks a document archive in memory and keys its files to students of the
/// current batch by file stem. Anything that does not fit the layout is
/// skipped, not rejected.
pub fn associate_documents(
    zip_bytes: &[u8],
    registration_ids: &[String],
    mode: StemMatch,
) -> Result<ZipScan, ImportError> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))
        .map_err(|e| ImportError::MalformedFile(format!("invalid zip archive: {e}")))?;

    let wanted = registration_ids
        .iter()
        .map(|id| (match_key(id, mode), id.as_str()))
        .collect::<HashMap<_, _>>();

    let mut scan = ZipScan::default();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ImportError::MalformedFile(format!("unreadable zip entry {i}: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let Some((document_type, stem, file_name)) = classify_entry(&name) else {
            debug!("skipping archive entry {name}: not <Folder>/<RegistrationId>.<ext>");
            scan.skipped.push(name.clone());
            continue;
        };
        let Some(registration_id) = wanted.get(&match_key(stem, mode)) else {
            debug!("skipping archive entry {name}: no student {stem} in this batch");
            scan.skipped.push(name.clone());
            continue;
        };

        // The declared size is untrusted; check it, then cap the actual read too.
        if entry.size() > MAX_DOCUMENT_BYTES {
            return Err(ImportError::MalformedFile(format!(
                "{name} declares {} bytes, over the {MAX_DOCUMENT_BYTES} byte limit",
                entry.size()
            )));
        }
        let mut bytes = Vec::new();
        (&mut entry)
            .take(MAX_DOCUMENT_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| ImportError::MalformedFile(format!("failed to read {name}: {e}")))?;
        if bytes.len() as u64 > MAX_DOCUMENT_BYTES {
            return Err(ImportError::MalformedFile(format!(
                "{name} is over the {MAX_DOCUMENT_BYTES} byte limit"
            )));
        }
        scan.associations.push(DocumentAssociation {
            document_type,
            registration_id: registration_id.to_string(),
            bytes,
            file_name: file_name.to_string(),
        });
    }
    Ok(scan)
}

/// Uploads associations one at a time. A failed file is recorded and the
/// rest still go through.
pub fn upload_documents<D: DocumentStore + ?Sized>(
    store: &mut D,
    associations: &[DocumentAssociation],
) -> Vec<UploadResult> {
    associations
        .iter()
        .map(|doc| match store.put_document(doc) {
            Ok(()) => UploadResult {
                file_name: doc.file_name.clone(),
                registration_id: doc.registration_id.clone(),
                document_type: doc.document_type,
                status: UploadStatus::Uploaded,
                error: None,
            },
            Err(e) => {
                let err = ImportError::DocumentUpload {
                    file_name: doc.file_name.clone(),
                    message: format!("{e:#}"),
                };
                warn!("{err}");
                UploadResult {
                    file_name: doc.file_name.clone(),
                    registration_id: doc.registration_id.clone(),
                    document_type: doc.document_type,
                    status: UploadStatus::Failed,
                    error: Some(err.to_string()),
                }
            }
        })
        .collect()
}
