use crate::model::{
    CatalogEntry, CatalogKind, ClearanceStatus, DocumentStatus, DocumentType, Gender,
    ReferenceCatalogs, StudentKeys, StudentRecord,
};
use crate::refcache::CatalogSource;
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;

pub const DB_FILE: &str = "credentials.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    for kind in [
        CatalogKind::Faculty,
        CatalogKind::Department,
        CatalogKind::AcademicYear,
    ] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {t}(
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )",
                t = kind.table()
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{t}_name ON {t}(name COLLATE NOCASE)",
                t = kind.table()
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            registration_id TEXT NOT NULL UNIQUE,
            certificate_id TEXT UNIQUE,
            full_name TEXT NOT NULL,
            gender TEXT,
            phone_number TEXT,
            department_id INTEGER NOT NULL,
            faculty_id INTEGER NOT NULL,
            academic_year_id INTEGER NOT NULL,
            gpa REAL,
            grade TEXT,
            graduation_date TEXT,
            status TEXT NOT NULL DEFAULT 'UN_CLEARED',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(department_id) REFERENCES departments(id),
            FOREIGN KEY(faculty_id) REFERENCES faculties(id),
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_faculty ON students(faculty_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_department ON students(department_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_academic_year ON students(academic_year_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_documents(
            id TEXT PRIMARY KEY,
            student_id INTEGER NOT NULL,
            document_type TEXT NOT NULL,
            file_name TEXT NOT NULL,
            stored_path TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            uploaded_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, document_type, file_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_documents_student ON student_documents(student_id)",
        [],
    )?;

    Ok(conn)
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("settings {key} is invalid JSON"))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reference catalogs

pub fn list_catalog(conn: &Connection, kind: CatalogKind) -> anyhow::Result<Vec<CatalogEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, name FROM {} ORDER BY name COLLATE NOCASE, id",
        kind.table()
    ))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(CatalogEntry {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_catalogs(conn: &Connection) -> anyhow::Result<ReferenceCatalogs> {
    Ok(ReferenceCatalogs {
        faculties: list_catalog(conn, CatalogKind::Faculty)?,
        departments: list_catalog(conn, CatalogKind::Department)?,
        academic_years: list_catalog(conn, CatalogKind::AcademicYear)?,
    })
}

impl CatalogSource for Connection {
    fn load_catalogs(&self) -> anyhow::Result<ReferenceCatalogs> {
        load_catalogs(self)
    }
}

pub fn catalog_find_by_name(
    conn: &Connection,
    kind: CatalogKind,
    name: &str,
) -> anyhow::Result<Option<i64>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT id FROM {} WHERE name = ? COLLATE NOCASE",
                kind.table()
            ),
            [name.trim()],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn catalog_create(conn: &Connection, kind: CatalogKind, name: &str) -> anyhow::Result<i64> {
    conn.execute(
        &format!("INSERT INTO {}(name, created_at) VALUES(?, ?)", kind.table()),
        params![name.trim(), now_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Returns false when no entry has that id.
pub fn catalog_rename(conn: &Connection, kind: CatalogKind, id: i64, name: &str) -> anyhow::Result<bool> {
    let n = conn.execute(
        &format!("UPDATE {} SET name = ? WHERE id = ?", kind.table()),
        params![name.trim(), id],
    )?;
    Ok(n > 0)
}

pub fn catalog_usage_count(conn: &Connection, kind: CatalogKind, id: i64) -> anyhow::Result<i64> {
    Ok(conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM students WHERE {} = ?",
            kind.student_column()
        ),
        [id],
        |r| r.get(0),
    )?)
}

pub fn catalog_delete(conn: &Connection, kind: CatalogKind, id: i64) -> anyhow::Result<bool> {
    let n = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?", kind.table()),
        [id],
    )?;
    Ok(n > 0)
}

// ---------------------------------------------------------------------------
// Students

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub id: i64,
    #[serde(flatten)]
    pub record: StudentRecord,
    pub faculty_name: String,
    pub department_name: String,
    pub academic_year_name: String,
    pub created_at: String,
    pub updated_at: String,
}

const STUDENT_SELECT: &str = "SELECT s.id, s.registration_id, s.certificate_id, s.full_name, s.gender,
        s.phone_number, s.department_id, s.faculty_id, s.academic_year_id, s.gpa, s.grade,
        s.graduation_date, s.status, s.created_at, s.updated_at,
        f.name, d.name, y.name
     FROM students s
     JOIN faculties f ON f.id = s.faculty_id
     JOIN departments d ON d.id = s.department_id
     JOIN academic_years y ON y.id = s.academic_year_id";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<StudentView> {
    let gender: Option<String> = r.get(4)?;
    let graduation_date: Option<String> = r.get(11)?;
    let status: String = r.get(12)?;
    Ok(StudentView {
        id: r.get(0)?,
        record: StudentRecord {
            registration_id: r.get(1)?,
            certificate_id: r.get(2)?,
            full_name: r.get(3)?,
            gender: gender.as_deref().and_then(Gender::parse),
            phone_number: r.get(5)?,
            department_id: r.get(6)?,
            faculty_id: r.get(7)?,
            academic_year_id: r.get(8)?,
            gpa: r.get(9)?,
            grade: r.get(10)?,
            graduation_date: graduation_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            status: ClearanceStatus::parse(&status).unwrap_or_default(),
        },
        created_at: r.get(13)?,
        updated_at: r.get(14)?,
        faculty_name: r.get(15)?,
        department_name: r.get(16)?,
        academic_year_name: r.get(17)?,
    })
}

fn opt_text(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn record_params(r: &StudentRecord) -> Vec<Value> {
    let text = |s: Option<String>| s.map(Value::Text).unwrap_or(Value::Null);
    vec![
        Value::Text(r.registration_id.trim().to_string()),
        text(r.certificate_key().map(str::to_string)),
        Value::Text(r.full_name.trim().to_string()),
        text(r.gender.map(|g| g.as_str().to_string())),
        text(opt_text(r.phone_number.as_deref())),
        r.department_id.map(Value::Integer).unwrap_or(Value::Null),
        r.faculty_id.map(Value::Integer).unwrap_or(Value::Null),
        r.academic_year_id.map(Value::Integer).unwrap_or(Value::Null),
        r.gpa.map(Value::Real).unwrap_or(Value::Null),
        text(opt_text(r.grade.as_deref())),
        text(r.graduation_date.map(|d| d.format("%Y-%m-%d").to_string())),
        Value::Text(r.status.as_str().to_string()),
    ]
}

pub fn list_student_keys(conn: &Connection) -> anyhow::Result<Vec<StudentKeys>> {
    let mut stmt = conn.prepare("SELECT registration_id, certificate_id FROM students ORDER BY id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(StudentKeys {
                registration_id: r.get(0)?,
                certificate_id: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_registration_ids(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT registration_id FROM students ORDER BY id")?;
    let rows = stmt
        .query_map([], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

/// Inserts all records in one transaction; any failure leaves the table as it was.
pub fn insert_students(conn: &Connection, records: &[StudentRecord]) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let now = now_rfc3339();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO students(
                registration_id, certificate_id, full_name, gender, phone_number,
                department_id, faculty_id, academic_year_id, gpa, grade, graduation_date,
                status, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for r in records {
            let mut binds = record_params(r);
            binds.push(Value::Text(now.clone()));
            binds.push(Value::Text(now.clone()));
            stmt.execute(params_from_iter(binds))
                .with_context(|| format!("failed to insert student {}", r.registration_id))?;
        }
    }
    tx.commit()?;
    Ok(records.len())
}

pub fn get_student(conn: &Connection, registration_id: &str) -> anyhow::Result<Option<StudentView>> {
    Ok(conn
        .query_row(
            &format!("{STUDENT_SELECT} WHERE s.registration_id = ?"),
            [registration_id],
            student_from_row,
        )
        .optional()?)
}

pub fn find_by_certificate(conn: &Connection, certificate_id: &str) -> anyhow::Result<Option<StudentView>> {
    Ok(conn
        .query_row(
            &format!("{STUDENT_SELECT} WHERE s.certificate_id = ?"),
            [certificate_id],
            student_from_row,
        )
        .optional()?)
}

pub fn student_id_for_registration(conn: &Connection, registration_id: &str) -> anyhow::Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM students WHERE registration_id = ?",
            [registration_id],
            |r| r.get(0),
        )
        .optional()?)
}

#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub search: Option<String>,
    pub faculty_id: Option<i64>,
    pub department_id: Option<i64>,
    pub academic_year_id: Option<i64>,
    pub status: Option<ClearanceStatus>,
}

/// `%q%` with LIKE wildcards in `q` matched literally, for use with `ESCAPE '\'`.
fn contains_pattern(q: &str) -> String {
    let mut out = String::with_capacity(q.len() + 2);
    out.push('%');
    for c in q.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// One page of students ordered by registration id, plus the filtered total.
pub fn list_students_page(
    conn: &Connection,
    filter: &StudentFilter,
    page: usize,
    page_size: usize,
) -> anyhow::Result<(i64, Vec<StudentView>)> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(q) = filter.search.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        clauses.push(
            "(s.full_name LIKE ? ESCAPE '\\' OR s.registration_id LIKE ? ESCAPE '\\' \
             OR s.certificate_id LIKE ? ESCAPE '\\')",
        );
        let pattern = contains_pattern(q);
        for _ in 0..3 {
            binds.push(Value::Text(pattern.clone()));
        }
    }
    if let Some(id) = filter.faculty_id {
        clauses.push("s.faculty_id = ?");
        binds.push(Value::Integer(id));
    }
    if let Some(id) = filter.department_id {
        clauses.push("s.department_id = ?");
        binds.push(Value::Integer(id));
    }
    if let Some(id) = filter.academic_year_id {
        clauses.push("s.academic_year_id = ?");
        binds.push(Value::Integer(id));
    }
    if let Some(status) = filter.status {
        clauses.push("s.status = ?");
        binds.push(Value::Text(status.as_str().to_string()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM students s{where_sql}"),
        params_from_iter(binds.iter()),
        |r| r.get(0),
    )?;

    let offset = page.saturating_sub(1).saturating_mul(page_size);
    let mut page_binds = binds;
    page_binds.push(Value::Integer(page_size as i64));
    page_binds.push(Value::Integer(offset as i64));
    let mut stmt = conn.prepare(&format!(
        "{STUDENT_SELECT}{where_sql} ORDER BY s.registration_id LIMIT ? OFFSET ?"
    ))?;
    let rows = stmt
        .query_map(params_from_iter(page_binds), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((total, rows))
}

/// Rewrites every column of the student keyed by `registration_id`.
pub fn update_student(
    conn: &Connection,
    registration_id: &str,
    record: &StudentRecord,
) -> anyhow::Result<bool> {
    let mut binds = record_params(record);
    binds.push(Value::Text(now_rfc3339()));
    binds.push(Value::Text(registration_id.to_string()));
    let n = conn.execute(
        "UPDATE students SET
            registration_id = ?, certificate_id = ?, full_name = ?, gender = ?, phone_number = ?,
            department_id = ?, faculty_id = ?, academic_year_id = ?, gpa = ?, grade = ?,
            graduation_date = ?, status = ?, updated_at = ?
         WHERE registration_id = ?",
        params_from_iter(binds),
    )?;
    Ok(n > 0)
}

/// Deletes the student and its document rows; returns the stored paths of the
/// removed documents so the caller can clean up files.
pub fn delete_student(conn: &Connection, registration_id: &str) -> anyhow::Result<Option<Vec<String>>> {
    let Some(student_id) = student_id_for_registration(conn, registration_id)? else {
        return Ok(None);
    };
    let tx = conn.unchecked_transaction()?;
    let paths = {
        let mut stmt = tx.prepare("SELECT stored_path FROM student_documents WHERE student_id = ?")?;
        let paths = stmt
            .query_map([student_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        paths
    };
    tx.execute("DELETE FROM student_documents WHERE student_id = ?", [student_id])?;
    tx.execute("DELETE FROM students WHERE id = ?", [student_id])?;
    tx.commit()?;
    Ok(Some(paths))
}

// ---------------------------------------------------------------------------
// Documents

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRow {
    pub id: String,
    pub registration_id: String,
    pub document_type: DocumentType,
    pub file_name: String,
    pub stored_path: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub status: DocumentStatus,
    pub uploaded_at: String,
}

pub struct NewDocument<'a> {
    pub id: &'a str,
    pub student_id: i64,
    pub document_type: DocumentType,
    pub file_name: &'a str,
    pub stored_path: &'a str,
    pub size_bytes: i64,
    pub sha256: &'a str,
}

/// Re-uploading the same type and file name replaces the earlier row and
/// resets its review status.
pub fn upsert_document(conn: &Connection, doc: &NewDocument<'_>) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO student_documents(
            id, student_id, document_type, file_name, stored_path, size_bytes, sha256, status, uploaded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'PENDING', ?)
         ON CONFLICT(student_id, document_type, file_name) DO UPDATE SET
            stored_path = excluded.stored_path,
            size_bytes = excluded.size_bytes,
            sha256 = excluded.sha256,
            status = 'PENDING',
            uploaded_at = excluded.uploaded_at",
        params![
            doc.id,
            doc.student_id,
            doc.document_type.as_str(),
            doc.file_name,
            doc.stored_path,
            doc.size_bytes,
            doc.sha256,
            now_rfc3339()
        ],
    )?;
    Ok(())
}

const DOCUMENT_SELECT: &str = "SELECT d.id, s.registration_id, d.document_type, d.file_name,
        d.stored_path, d.size_bytes, d.sha256, d.status, d.uploaded_at
     FROM student_documents d
     JOIN students s ON s.id = d.student_id";

fn document_from_row(r: &Row<'_>) -> rusqlite::Result<DocumentRow> {
    let doc_type: String = r.get(2)?;
    let status: String = r.get(7)?;
    Ok(DocumentRow {
        id: r.get(0)?,
        registration_id: r.get(1)?,
        document_type: DocumentType::parse(&doc_type).unwrap_or(DocumentType::Supporting),
        file_name: r.get(3)?,
        stored_path: r.get(4)?,
        size_bytes: r.get(5)?,
        sha256: r.get(6)?,
        status: DocumentStatus::parse(&status).unwrap_or_default(),
        uploaded_at: r.get(8)?,
    })
}

pub fn list_documents(conn: &Connection, registration_id: &str) -> anyhow::Result<Vec<DocumentRow>> {
    let mut stmt = conn.prepare(&format!(
        "{DOCUMENT_SELECT} WHERE s.registration_id = ? ORDER BY d.document_type, d.file_name"
    ))?;
    let rows = stmt
        .query_map([registration_id], document_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_document(conn: &Connection, id: &str) -> anyhow::Result<Option<DocumentRow>> {
    Ok(conn
        .query_row(
            &format!("{DOCUMENT_SELECT} WHERE d.id = ?"),
            [id],
            document_from_row,
        )
        .optional()?)
}

pub fn set_document_status(conn: &Connection, id: &str, status: DocumentStatus) -> anyhow::Result<bool> {
    let n = conn.execute(
        "UPDATE student_documents SET status = ? WHERE id = ?",
        params![status.as_str(), id],
    )?;
    Ok(n > 0)
}

pub fn delete_document(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM student_documents WHERE id = ?", [id])?;
    Ok(n > 0)
}
