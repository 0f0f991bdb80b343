use crate::errors::ImportError;
use crate::model::{
    CatalogKind, ClearanceStatus, FieldWarning, Gender, ReferenceCatalogs, StudentRecord,
};
use crate::validate::normalize_gpa;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use std::collections::HashMap;

pub const EXPECTED_COLUMNS: [&str; 12] = [
    "registration_no",
    "certificate_id",
    "full_name",
    "gender",
    "phone_number",
    "department",
    "faculty",
    "academic_year",
    "gpa",
    "grade",
    "graduation_date",
    "status",
];

const DATE_FORMATS: [&str; 10] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// One data row of the upload, mapped onto the canonical record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedRow {
    /// 1-based line of the row in the source file.
    pub line: usize,
    pub record: StudentRecord,
    pub raw_department: Option<String>,
    pub raw_faculty: Option<String>,
    pub raw_academic_year: Option<String>,
    pub warnings: Vec<FieldWarning>,
}

impl ParsedRow {
    pub fn raw_reference(&self, kind: CatalogKind) -> Option<&str> {
        match kind {
            CatalogKind::Faculty => self.raw_faculty.as_deref(),
            CatalogKind::Department => self.raw_department.as_deref(),
            CatalogKind::AcademicYear => self.raw_academic_year.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCsv {
    pub rows: Vec<ParsedRow>,
    pub missing_columns: Vec<&'static str>,
    pub unknown_columns: Vec<String>,
}

/// A coercion problem for a single cell; the row keeps going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellIssue {
    pub code: &'static str,
    pub message: String,
}

pub type Coerced<T> = (Option<T>, Option<CellIssue>);

fn normalize_header(h: &str) -> String {
    h.trim()
        .trim_start_matches('\u{feff}')
        .to_ascii_lowercase()
        .replace([' ', '-'], "_")
}

fn cell<'a>(rec: &'a StringRecord, idx: Option<usize>) -> Option<&'a str> {
    idx.and_then(|i| rec.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn parse_flexible_date(s: &str) -> Option<NaiveDate> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return Some(d);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.date_naive());
    }
    NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .map(|dt| dt.date())
}

pub fn coerce_graduation_date(raw: Option<&str>) -> Coerced<NaiveDate> {
    let Some(raw) = raw else {
        return (
            None,
            Some(CellIssue {
                code: "missing_graduation_date",
                message: "graduation date is empty".to_string(),
            }),
        );
    };
    match parse_flexible_date(raw) {
        Some(d) => (Some(d), None),
        None => (
            None,
            Some(CellIssue {
                code: "invalid_date",
                message: format!("could not read graduation date '{raw}'"),
            }),
        ),
    }
}

pub fn coerce_gpa(raw: Option<&str>) -> Coerced<f64> {
    let Some(raw) = raw else {
        return (None, None);
    };
    let text = if raw.contains(',') && !raw.contains('.') {
        raw.replace(',', ".")
    } else {
        raw.to_string()
    };
    match text.parse::<f64>().map(normalize_gpa) {
        Ok(Some(v)) => (Some(v), None),
        Ok(None) => (
            None,
            Some(CellIssue {
                code: "gpa_out_of_range",
                message: format!("GPA '{raw}' is outside 0.00-4.00"),
            }),
        ),
        Err(_) => (
            None,
            Some(CellIssue {
                code: "invalid_gpa",
                message: format!("GPA '{raw}' is not a number"),
            }),
        ),
    }
}

pub fn coerce_gender(raw: Option<&str>) -> Coerced<Gender> {
    let Some(raw) = raw else {
        return (None, None);
    };
    match Gender::parse(raw) {
        Some(g) => (Some(g), None),
        None => (
            None,
            Some(CellIssue {
                code: "unknown_gender",
                message: format!("gender '{raw}' is not MALE or FEMALE"),
            }),
        ),
    }
}

pub fn coerce_status(raw: Option<&str>) -> Coerced<ClearanceStatus> {
    let Some(raw) = raw else {
        return (None, None);
    };
    match ClearanceStatus::parse(raw) {
        Some(s) => (Some(s), None),
        None => (
            None,
            Some(CellIssue {
                code: "unknown_status",
                message: format!("status '{raw}' is not CLEARED or UN_CLEARED; using UN_CLEARED"),
            }),
        ),
    }
}

pub fn coerce_reference(
    catalogs: &ReferenceCatalogs,
    kind: CatalogKind,
    raw: Option<&str>,
) -> Coerced<i64> {
    let Some(raw) = raw else {
        return (None, None);
    };
    match catalogs.resolve(kind, raw) {
        Some(id) => (Some(id), None),
        None => (
            None,
            Some(CellIssue {
                code: "unresolved_reference",
                message: format!("{} '{}' not found", kind.label(), raw),
            }),
        ),
    }
}

struct RowBuilder {
    line: usize,
    warnings: Vec<FieldWarning>,
}

impl RowBuilder {
    fn take<T>(&mut self, field: &str, (value, issue): Coerced<T>) -> Option<T> {
        if let Some(issue) = issue {
            self.warnings.push(FieldWarning {
                line: self.line,
                field: field.to_string(),
                code: issue.code.to_string(),
                message: issue.message,
            });
        }
        value
    }
}

/// Maps an uploaded student CSV onto candidate records.
///
/// Only structural problems fail the call. Bad cells become empty fields with
/// a warning on the row, and unresolved reference names are left for the
/// validator to reject.
pub fn parse_student_csv(
    text: &str,
    catalogs: &ReferenceCatalogs,
) -> Result<ParsedCsv, ImportError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| ImportError::MalformedFile(format!("unreadable header row: {e}")))?
        .clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ImportError::MalformedFile("missing header row".to_string()));
    }

    let mut idx = HashMap::<String, usize>::new();
    let mut unknown_columns = Vec::new();
    for (i, h) in headers.iter().enumerate() {
        let key = normalize_header(h);
        if key.is_empty() {
            continue;
        }
        if EXPECTED_COLUMNS.contains(&key.as_str()) {
            idx.entry(key).or_insert(i);
        } else {
            unknown_columns.push(h.trim().to_string());
        }
    }
    let missing_columns = EXPECTED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !idx.contains_key(*c))
        .collect::<Vec<_>>();
    let col = |name: &str| idx.get(name).copied();

    let mut rows = Vec::new();
    for (n, result) in rdr.records().enumerate() {
        let rec = result.map_err(|e| ImportError::MalformedFile(e.to_string()))?;
        let line = rec
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(n + 2);
        let mut b = RowBuilder {
            line,
            warnings: Vec::new(),
        };

        let raw_department = cell(&rec, col("department")).map(str::to_string);
        let raw_faculty = cell(&rec, col("faculty")).map(str::to_string);
        let raw_academic_year = cell(&rec, col("academic_year")).map(str::to_string);

        let department_id = b.take(
            "department",
            coerce_reference(catalogs, CatalogKind::Department, raw_department.as_deref()),
        );
        let faculty_id = b.take(
            "faculty",
            coerce_reference(catalogs, CatalogKind::Faculty, raw_faculty.as_deref()),
        );
        let academic_year_id = b.take(
            "academic_year",
            coerce_reference(
                catalogs,
                CatalogKind::AcademicYear,
                raw_academic_year.as_deref(),
            ),
        );
        let gender = b.take("gender", coerce_gender(cell(&rec, col("gender"))));
        let gpa = b.take("gpa", coerce_gpa(cell(&rec, col("gpa"))));
        let graduation_date = b.take(
            "graduation_date",
            coerce_graduation_date(cell(&rec, col("graduation_date"))),
        );
        let status = b
            .take("status", coerce_status(cell(&rec, col("status"))))
            .unwrap_or_default();

        let record = StudentRecord {
            registration_id: cell(&rec, col("registration_no"))
                .unwrap_or_default()
                .to_string(),
            certificate_id: cell(&rec, col("certificate_id")).map(str::to_string),
            full_name: cell(&rec, col("full_name"))
                .unwrap_or_default()
                .to_string(),
            gender,
            phone_number: cell(&rec, col("phone_number")).map(str::to_string),
            department_id,
            faculty_id,
            academic_year_id,
            gpa,
            grade: cell(&rec, col("grade")).map(str::to_string),
            graduation_date,
            status,
        };

        rows.push(ParsedRow {
            line,
            record,
            raw_department,
            raw_faculty,
            raw_academic_year,
            warnings: b.warnings,
        });
    }

    Ok(ParsedCsv {
        rows,
        missing_columns,
        unknown_columns,
    })
}

/// Entry point for raw upload bytes: UTF-8 required, a leading BOM is dropped.
pub fn parse_student_csv_bytes(
    bytes: &[u8],
    catalogs: &ReferenceCatalogs,
) -> Result<ParsedCsv, ImportError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ImportError::MalformedFile(format!("file is not UTF-8: {e}")))?;
    parse_student_csv(text.trim_start_matches('\u{feff}'), catalogs)
}
