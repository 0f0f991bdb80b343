use crate::config;
use crate::csv_import::ParsedRow;
use crate::db::{self, StudentFilter};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_i64, get_optional_str, get_required_str, require_db, require_workspace, respond,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{ClearanceStatus, StudentRecord};
use crate::store::WorkspaceStore;
use crate::submit::submit_batch;
use crate::validate::{normalize_record, validate_batch, DuplicateKey};
use log::{info, warn};
use serde_json::{json, Value};

fn parse_record(value: &Value) -> Result<StudentRecord, HandlerErr> {
    let record = serde_json::from_value::<StudentRecord>(value.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid student: {e}")))?;
    normalize_record(record).map_err(|msg| {
        HandlerErr::new("invalid_student", msg).with_details(json!({ "invalidFields": ["gpa"] }))
    })
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.chain().any(|c| {
        matches!(
            c.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(f, _))
                if f.code == rusqlite::ErrorCode::ConstraintViolation
        )
    })
}

fn students_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let settings = config::load_import_settings(conn);
    let page = get_optional_i64(params, "page")?.unwrap_or(1).max(1) as usize;
    let page_size = get_optional_i64(params, "pageSize")?
        .map(|n| n.max(1) as usize)
        .unwrap_or(settings.default_page_size)
        .min(settings.max_page_size);
    let status = match get_optional_str(params, "status") {
        None => None,
        Some(s) => Some(
            ClearanceStatus::parse(&s)
                .ok_or_else(|| HandlerErr::bad_params("status must be CLEARED or UN_CLEARED"))?,
        ),
    };
    let filter = StudentFilter {
        search: get_optional_str(params, "search"),
        faculty_id: get_optional_i64(params, "facultyId")?,
        department_id: get_optional_i64(params, "departmentId")?,
        academic_year_id: get_optional_i64(params, "academicYearId")?,
        status,
    };
    let (total, rows) = db::list_students_page(conn, &filter, page, page_size)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let total_pages = (total as usize).div_ceil(page_size);
    Ok(json!({
        "students": rows,
        "page": page,
        "pageSize": page_size,
        "total": total,
        "totalPages": total_pages
    }))
}

fn students_get(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let registration_id = get_required_str(params, "registrationId")?;
    let student = db::get_student(conn, &registration_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    Ok(json!({ "student": student }))
}

/// Single-record create goes through the same classification as an import row.
fn students_create(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, root) = require_workspace(state)?;
    let value = params
        .get("student")
        .ok_or_else(|| HandlerErr::bad_params("missing student"))?;
    let record = parse_record(value)?;
    let keys = db::list_student_keys(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let candidate = ParsedRow {
        line: 0,
        record,
        raw_department: None,
        raw_faculty: None,
        raw_academic_year: None,
        warnings: Vec::new(),
    };
    let outcome = validate_batch(std::slice::from_ref(&candidate), &keys);
    if let Some(invalid) = outcome.invalid.first() {
        return Err(HandlerErr::new("invalid_student", invalid.reason.clone())
            .with_details(json!({ "missingFields": invalid.missing_fields })));
    }
    if let Some(dup) = outcome.duplicate.first() {
        let key = match dup.matched_on {
            DuplicateKey::RegistrationId => "registration id",
            DuplicateKey::CertificateId => "certificate id",
        };
        return Err(HandlerErr::new(
            "duplicate",
            format!("a student with this {key} already exists"),
        )
        .with_details(json!({ "matchedOn": dup.matched_on })));
    }

    let mut store = WorkspaceStore::new(conn, root);
    submit_batch(&mut store, &outcome.new_records()).map_err(HandlerErr::from)?;
    let student = db::get_student(conn, &candidate.record.registration_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "student": student }))
}

fn students_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let registration_id = get_required_str(params, "registrationId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let current = db::get_student(conn, &registration_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let mut merged = serde_json::to_value(&current.record)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    for (k, v) in patch {
        if merged.get(k).is_none() {
            return Err(HandlerErr::bad_params(format!("unknown field: {k}")));
        }
        merged[k.as_str()] = v.clone();
    }
    let record = parse_record(&merged)?;
    let candidate = ParsedRow {
        line: 0,
        record,
        raw_department: None,
        raw_faculty: None,
        raw_academic_year: None,
        warnings: Vec::new(),
    };
    let missing = crate::validate::missing_required_fields(&candidate);
    if !missing.is_empty() {
        return Err(HandlerErr::new(
            "invalid_student",
            format!("missing required fields: {}", missing.join(", ")),
        )
        .with_details(json!({ "missingFields": missing })));
    }

    match db::update_student(conn, &registration_id, &candidate.record) {
        Ok(true) => {}
        Ok(false) => return Err(HandlerErr::not_found("student not found")),
        Err(e) if is_unique_violation(&e) => {
            return Err(HandlerErr::new("conflict", format!("{e:#}")));
        }
        Err(e) => return Err(HandlerErr::db("db_update_failed", e)),
    }
    let student = db::get_student(conn, &candidate.record.registration_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "student": student }))
}

fn students_delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let registration_id = get_required_str(params, "registrationId")?;
    let paths = db::delete_student(conn, &registration_id)
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    for p in &paths {
        if let Err(e) = std::fs::remove_file(p) {
            warn!("failed to remove document file {p}: {e}");
        }
    }
    info!("deleted student {registration_id} and {} document(s)", paths.len());
    Ok(json!({ "deleted": true, "documentsRemoved": paths.len() }))
}

/// Public verification lookup by the number printed on a certificate.
fn certificates_verify(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let certificate_id = get_required_str(params, "certificateId")?;
    let found = db::find_by_certificate(conn, &certificate_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(match found {
        Some(s) => json!({
            "found": true,
            "certificateId": certificate_id,
            "holder": {
                "fullName": s.record.full_name,
                "registrationId": s.record.registration_id,
                "faculty": s.faculty_name,
                "department": s.department_name,
                "academicYear": s.academic_year_name,
                "grade": s.record.grade,
                "gpa": s.record.gpa,
                "graduationDate": s.record.graduation_date,
                "status": s.record.status
            }
        }),
        None => json!({ "found": false, "certificateId": certificate_id }),
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, &req.params),
        "students.get" => students_get(state, &req.params),
        "students.create" => students_create(state, &req.params),
        "students.update" => students_update(state, &req.params),
        "students.delete" => students_delete(state, &req.params),
        "certificates.verify" => certificates_verify(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
