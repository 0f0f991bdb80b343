use crate::db;
use crate::documents::DocumentStore;
use crate::model::{DocumentAssociation, StudentRecord};
use crate::submit::StudentStore;
use anyhow::{anyhow, Context};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DOCUMENTS_DIR: &str = "documents";

/// Workspace-backed implementation of the student and document stores:
/// rows go to SQLite, document bytes under `<workspace>/documents/`.
pub struct WorkspaceStore<'a> {
    conn: &'a rusqlite::Connection,
    root: &'a Path,
}

impl<'a> WorkspaceStore<'a> {
    pub fn new(conn: &'a rusqlite::Connection, root: &'a Path) -> Self {
        Self { conn, root }
    }

    fn document_path(&self, student_id: i64, doc: &DocumentAssociation) -> PathBuf {
        self.root
            .join(DOCUMENTS_DIR)
            .join(student_id.to_string())
            .join(doc.document_type.as_str())
            .join(&doc.file_name)
    }

    fn replace_document(
        &self,
        student_id: i64,
        doc: &DocumentAssociation,
        id: &str,
        staged: &Path,
        path: &Path,
    ) -> anyhow::Result<()> {
        let digest = format!("{:x}", Sha256::digest(&doc.bytes));
        let stored_path = path.to_string_lossy().to_string();
        let tx = self.conn.unchecked_transaction()?;
        db::upsert_document(
            &tx,
            &db::NewDocument {
                id,
                student_id,
                document_type: doc.document_type,
                file_name: &doc.file_name,
                stored_path: &stored_path,
                size_bytes: doc.bytes.len() as i64,
                sha256: &digest,
            },
        )?;
        std::fs::rename(staged, path)
            .with_context(|| format!("failed to move document into {stored_path}"))?;
        tx.commit()?;
        Ok(())
    }
}

impl StudentStore for WorkspaceStore<'_> {
    fn create_students(&mut self, records: &[StudentRecord]) -> anyhow::Result<usize> {
        db::insert_students(self.conn, records)
    }
}

impl DocumentStore for WorkspaceStore<'_> {
    fn put_document(&mut self, doc: &DocumentAssociation) -> anyhow::Result<()> {
        if doc.file_name.is_empty()
            || doc.file_name.contains(['/', '\\'])
            || doc.file_name == ".."
        {
            return Err(anyhow!("invalid file name {:?}", doc.file_name));
        }
        let student_id = db::student_id_for_registration(self.conn, &doc.registration_id)?
            .ok_or_else(|| anyhow!("no student with registration id {}", doc.registration_id))?;

        let path = self.document_path(student_id, doc);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
        }
        let id = Uuid::new_v4().to_string();
        let staged = path.with_file_name(format!(".{}.{id}.part", doc.file_name));
        std::fs::write(&staged, &doc.bytes)
            .with_context(|| format!("failed to write {}", staged.to_string_lossy()))?;

        // The previous file stays in place until its row has been replaced.
        let result = self.replace_document(student_id, doc, &id, &staged, &path);
        if result.is_err() {
            let _ = std::fs::remove_file(&staged);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CatalogKind, DocumentType};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn photo(bytes: &[u8]) -> DocumentAssociation {
        DocumentAssociation {
            document_type: DocumentType::Photo,
            registration_id: "GRW-1".to_string(),
            bytes: bytes.to_vec(),
            file_name: "GRW-1.jpg".to_string(),
        }
    }

    #[test]
    fn failed_row_write_keeps_previous_file() {
        let root = temp_workspace("credentiald-store");
        let conn = db::open_db(&root).expect("open db");
        let record = StudentRecord {
            registration_id: "GRW-1".to_string(),
            full_name: "Ada Eze".to_string(),
            faculty_id: Some(
                db::catalog_create(&conn, CatalogKind::Faculty, "Science").expect("faculty"),
            ),
            department_id: Some(
                db::catalog_create(&conn, CatalogKind::Department, "Physics").expect("department"),
            ),
            academic_year_id: Some(
                db::catalog_create(&conn, CatalogKind::AcademicYear, "2023/2024").expect("year"),
            ),
            ..StudentRecord::default()
        };
        db::insert_students(&conn, &[record]).expect("insert student");

        let mut store = WorkspaceStore::new(&conn, &root);
        store.put_document(&photo(b"first")).expect("first upload");
        let student_id = db::student_id_for_registration(&conn, "GRW-1")
            .expect("lookup")
            .expect("student");
        let path = store.document_path(student_id, &photo(b""));
        assert_eq!(std::fs::read(&path).expect("read photo"), b"first");

        conn.execute("DROP TABLE student_documents", [])
            .expect("drop documents table");
        assert!(store.put_document(&photo(b"second")).is_err());
        assert_eq!(std::fs::read(&path).expect("read photo"), b"first");

        let leftovers = std::fs::read_dir(path.parent().expect("parent"))
            .expect("list dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(leftovers, vec!["GRW-1.jpg".to_string()]);

        drop(store);
        drop(conn);
        let _ = std::fs::remove_dir_all(root);
    }
}
