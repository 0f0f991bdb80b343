use crate::csv_import::ParsedRow;
use crate::model::{CatalogKind, FieldWarning, StudentKeys, StudentRecord};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplicateKey {
    RegistrationId,
    CertificateId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateRow {
    pub row: ParsedRow,
    pub matched_on: DuplicateKey,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidRow {
    pub row: ParsedRow,
    pub missing_fields: Vec<&'static str>,
    pub reason: String,
}

/// Three-way split of an import batch. Every input row lands in exactly one
/// partition, each partition in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub new: Vec<ParsedRow>,
    pub duplicate: Vec<DuplicateRow>,
    pub invalid: Vec<InvalidRow>,
    /// Rows of `new` that repeat a key already seen earlier in the batch.
    pub batch_warnings: Vec<FieldWarning>,
}

impl ValidationOutcome {
    pub fn total(&self) -> usize {
        self.new.len() + self.duplicate.len() + self.invalid.len()
    }

    pub fn new_records(&self) -> Vec<StudentRecord> {
        self.new.iter().map(|r| r.record.clone()).collect()
    }
}

/// Unique keys of the students already in the workspace.
struct ExistingIndex<'a> {
    registration_ids: HashSet<&'a str>,
    certificate_ids: HashSet<&'a str>,
}

impl<'a> ExistingIndex<'a> {
    fn build(existing: &'a [StudentKeys]) -> Self {
        let mut registration_ids = HashSet::new();
        let mut certificate_ids = HashSet::new();
        for s in existing {
            registration_ids.insert(s.registration_id.as_str());
            if let Some(c) = s.certificate_id.as_deref().filter(|c| !c.trim().is_empty()) {
                certificate_ids.insert(c);
            }
        }
        Self {
            registration_ids,
            certificate_ids,
        }
    }

    fn find(&self, record: &StudentRecord) -> Option<DuplicateKey> {
        if self
            .registration_ids
            .contains(record.registration_id.as_str())
        {
            return Some(DuplicateKey::RegistrationId);
        }
        match record.certificate_key() {
            Some(c) if self.certificate_ids.contains(c) => Some(DuplicateKey::CertificateId),
            _ => None,
        }
    }
}

/// GPA on the 0.00-4.00 scale, rounded to two decimals.
pub fn normalize_gpa(v: f64) -> Option<f64> {
    if v.is_finite() && (0.0..=4.0).contains(&v) {
        Some((v * 100.0).round() / 100.0)
    } else {
        None
    }
}

/// Canonical form of a record coming from a JSON request: trimmed unique keys
/// and name, blank certificate as absent, GPA checked and rounded. The CSV
/// path gets the same treatment from its cell coercions.
pub fn normalize_record(mut record: StudentRecord) -> Result<StudentRecord, String> {
    record.registration_id = record.registration_id.trim().to_string();
    record.full_name = record.full_name.trim().to_string();
    let certificate = record.certificate_key().map(str::to_string);
    record.certificate_id = certificate;
    if let Some(gpa) = record.gpa {
        let rounded =
            normalize_gpa(gpa).ok_or_else(|| format!("GPA {gpa} is outside 0.00-4.00"))?;
        record.gpa = Some(rounded);
    }
    Ok(record)
}

/// Required fields absent from the row, in a fixed order.
pub fn missing_required_fields(row: &ParsedRow) -> Vec<&'static str> {
    let r = &row.record;
    let mut missing = Vec::new();
    if r.registration_id.trim().is_empty() {
        missing.push("registration id");
    }
    if r.full_name.trim().is_empty() {
        missing.push("full name");
    }
    if r.department_id.is_none() {
        missing.push(CatalogKind::Department.label());
    }
    if r.faculty_id.is_none() {
        missing.push(CatalogKind::Faculty.label());
    }
    if r.academic_year_id.is_none() {
        missing.push(CatalogKind::AcademicYear.label());
    }
    missing
}

fn invalid_reason(row: &ParsedRow, missing: &[&'static str]) -> String {
    let parts = missing
        .iter()
        .map(|field| {
            let kind = match *field {
                "department" => Some(CatalogKind::Department),
                "faculty" => Some(CatalogKind::Faculty),
                "academic year" => Some(CatalogKind::AcademicYear),
                _ => None,
            };
            match kind.and_then(|k| row.raw_reference(k)) {
                Some(raw) => format!("{field} ('{raw}' not found)"),
                None => field.to_string(),
            }
        })
        .collect::<Vec<_>>();
    format!("missing required fields: {}", parts.join(", "))
}

/// Classifies candidates against the existing collection.
///
/// Missing required fields win over duplicate matches. Rows are not compared
/// with each other; repeats inside the batch only produce a warning.
pub fn validate_batch(rows: &[ParsedRow], existing: &[StudentKeys]) -> ValidationOutcome {
    let index = ExistingIndex::build(existing);
    let mut out = ValidationOutcome::default();
    let mut seen_registration: HashMap<&str, usize> = HashMap::new();
    let mut seen_certificate: HashMap<&str, usize> = HashMap::new();

    for row in rows {
        let missing = missing_required_fields(row);
        if !missing.is_empty() {
            let reason = invalid_reason(row, &missing);
            out.invalid.push(InvalidRow {
                row: row.clone(),
                missing_fields: missing,
                reason,
            });
            continue;
        }
        if let Some(matched_on) = index.find(&row.record) {
            out.duplicate.push(DuplicateRow {
                row: row.clone(),
                matched_on,
            });
            continue;
        }

        let reg = row.record.registration_id.as_str();
        if let Some(first_line) = seen_registration.get(reg) {
            out.batch_warnings.push(FieldWarning {
                line: row.line,
                field: "registration_no".to_string(),
                code: "duplicate_in_batch".to_string(),
                message: format!("registration id '{reg}' also appears on line {first_line}"),
            });
        } else {
            seen_registration.insert(reg, row.line);
        }
        if let Some(cert) = row.record.certificate_key() {
            if let Some(first_line) = seen_certificate.get(cert) {
                out.batch_warnings.push(FieldWarning {
                    line: row.line,
                    field: "certificate_id".to_string(),
                    code: "duplicate_in_batch".to_string(),
                    message: format!("certificate id '{cert}' also appears on line {first_line}"),
                });
            } else {
                seen_certificate.insert(cert, row.line);
            }
        }
        out.new.push(row.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(line: usize, reg: &str, cert: Option<&str>) -> ParsedRow {
        ParsedRow {
            line,
            record: StudentRecord {
                registration_id: reg.to_string(),
                certificate_id: cert.map(str::to_string),
                full_name: format!("Student {line}"),
                department_id: Some(1),
                faculty_id: Some(2),
                academic_year_id: Some(3),
                ..StudentRecord::default()
            },
            raw_department: Some("Computer Science".to_string()),
            raw_faculty: Some("Computing".to_string()),
            raw_academic_year: Some("2023/2024".to_string()),
            warnings: Vec::new(),
        }
    }

    fn existing() -> Vec<StudentKeys> {
        vec![
            StudentKeys {
                registration_id: "GRW-BCS-2001".to_string(),
                certificate_id: Some("CERT-9".to_string()),
            },
            StudentKeys {
                registration_id: "GRW-BCS-2002".to_string(),
                certificate_id: Some(String::new()),
            },
        ]
    }

    #[test]
    fn one_existing_registration_makes_one_duplicate() {
        let rows = vec![
            row(2, "GRW-BCS-2005", None),
            row(3, "GRW-BCS-2001", None),
            row(4, "GRW-BCS-2006", None),
        ];
        let out = validate_batch(&rows, &existing());
        assert_eq!(out.new.len(), 2);
        assert_eq!(out.duplicate.len(), 1);
        assert_eq!(out.invalid.len(), 0);
        assert_eq!(out.duplicate[0].row.line, 3);
        assert_eq!(out.duplicate[0].matched_on, DuplicateKey::RegistrationId);
        assert_eq!(out.total(), rows.len());
    }

    #[test]
    fn registration_match_is_case_sensitive() {
        let out = validate_batch(&[row(2, "grw-bcs-2001", None)], &existing());
        assert_eq!(out.new.len(), 1);
    }

    #[test]
    fn certificate_match_is_a_duplicate_but_empty_certificates_never_match() {
        let rows = vec![
            row(2, "GRW-X-1", Some("CERT-9")),
            row(3, "GRW-X-2", Some("")),
            row(4, "GRW-X-3", Some("  ")),
        ];
        let out = validate_batch(&rows, &existing());
        assert_eq!(out.duplicate.len(), 1);
        assert_eq!(out.duplicate[0].matched_on, DuplicateKey::CertificateId);
        assert_eq!(out.new.len(), 2);
    }

    #[test]
    fn unresolved_department_is_invalid_even_when_duplicate() {
        let mut typo = row(2, "GRW-BCS-2001", None);
        typo.record.department_id = None;
        typo.raw_department = Some("Computer Scence".to_string());
        let out = validate_batch(&[typo], &existing());
        assert_eq!(out.invalid.len(), 1);
        assert!(out.duplicate.is_empty());
        let inv = &out.invalid[0];
        assert_eq!(inv.missing_fields, vec!["department"]);
        assert!(inv.reason.contains("department"));
        assert!(inv.reason.contains("Computer Scence"));
    }

    #[test]
    fn every_missing_field_is_listed() {
        let mut r = row(2, "", None);
        r.record.full_name = String::new();
        r.record.faculty_id = None;
        r.raw_faculty = None;
        r.record.academic_year_id = None;
        let out = validate_batch(&[r], &[]);
        assert_eq!(
            out.invalid[0].missing_fields,
            vec!["registration id", "full name", "faculty", "academic year"]
        );
    }

    #[test]
    fn gpa_is_range_checked_and_rounded() {
        assert_eq!(normalize_gpa(3.456), Some(3.46));
        assert_eq!(normalize_gpa(0.0), Some(0.0));
        assert_eq!(normalize_gpa(4.0), Some(4.0));
        assert_eq!(normalize_gpa(4.01), None);
        assert_eq!(normalize_gpa(-0.5), None);
        assert_eq!(normalize_gpa(f64::NAN), None);
    }

    #[test]
    fn normalized_record_has_trimmed_keys() {
        let mut candidate = row(0, "  GRW-BCS-2001 ", Some("   "));
        candidate.record.full_name = " Ada Eze ".to_string();
        candidate.record.gpa = Some(2.999);
        candidate.record = normalize_record(candidate.record).expect("valid record");
        let r = &candidate.record;
        assert_eq!(r.registration_id, "GRW-BCS-2001");
        assert_eq!(r.full_name, "Ada Eze");
        assert_eq!(r.certificate_id, None);
        assert_eq!(r.gpa, Some(3.0));

        let out = validate_batch(std::slice::from_ref(&candidate), &existing());
        assert_eq!(out.duplicate.len(), 1);
        assert_eq!(out.duplicate[0].matched_on, DuplicateKey::RegistrationId);
    }

    #[test]
    fn out_of_range_gpa_is_rejected() {
        let err = normalize_record(StudentRecord {
            registration_id: "GRW-1".to_string(),
            gpa: Some(9.75),
            ..StudentRecord::default()
        })
        .expect_err("gpa above scale");
        assert!(err.contains("9.75"), "{err}");
    }

    #[test]
    fn empty_batch_gives_empty_partitions() {
        let out = validate_batch(&[], &existing());
        assert_eq!(out, ValidationOutcome::default());
    }

    #[test]
    fn repeats_inside_batch_stay_new_but_warn() {
        let rows = vec![
            row(2, "GRW-1", Some("C-1")),
            row(3, "GRW-1", Some("C-2")),
            row(4, "GRW-3", Some("C-1")),
        ];
        let out = validate_batch(&rows, &[]);
        assert_eq!(out.new.len(), 3);
        assert_eq!(out.batch_warnings.len(), 2);
        assert_eq!(out.batch_warnings[0].line, 3);
        assert_eq!(out.batch_warnings[1].field, "certificate_id");
    }

    #[test]
    fn validation_is_idempotent_and_order_preserving() {
        let mut bad = row(3, "GRW-2", None);
        bad.record.faculty_id = None;
        let rows = vec![
            row(2, "GRW-1", None),
            bad,
            row(4, "GRW-BCS-2002", None),
            row(5, "GRW-4", None),
        ];
        let a = validate_batch(&rows, &existing());
        let b = validate_batch(&rows, &existing());
        assert_eq!(a, b);
        let new_lines = a.new.iter().map(|r| r.line).collect::<Vec<_>>();
        assert_eq!(new_lines, vec![2, 5]);
        assert_eq!(a.total(), rows.len());
    }
}
