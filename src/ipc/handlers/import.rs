use crate::config::{self, ImportSettings};
use crate::csv_import::parse_student_csv_bytes;
use crate::db;
use crate::documents::{
    associate_documents, upload_documents, StemMatch, UploadResult, UploadStatus, ZipScan,
};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_optional_str_list, get_required_str, read_input_file,
    respond,
};
use crate::ipc::types::{AppState, Request};
use crate::model::FieldWarning;
use crate::refcache::{ensure_fresh, ReferenceCache};
use crate::store::WorkspaceStore;
use crate::submit::submit_batch;
use crate::validate::{validate_batch, ValidationOutcome};
use chrono::Utc;
use log::info;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::Path;

struct ImportContext<'a> {
    conn: &'a Connection,
    root: &'a Path,
    settings: ImportSettings,
    cache: &'a ReferenceCache,
}

fn import_context(state: &mut AppState) -> Result<ImportContext<'_>, HandlerErr> {
    let AppState {
        workspace,
        db,
        ref_cache,
    } = state;
    let (Some(conn), Some(root)) = (db.as_ref(), workspace.as_deref()) else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let settings = config::load_import_settings(conn);
    let cache = ensure_fresh(ref_cache, conn, Utc::now(), settings.reference_ttl())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(ImportContext {
        conn,
        root,
        settings,
        cache,
    })
}

/// `caseInsensitive` on the request wins over the workspace setting.
fn stem_match(params: &Value, settings: &ImportSettings) -> Result<StemMatch, HandlerErr> {
    Ok(match get_optional_bool(params, "caseInsensitive")? {
        Some(true) => StemMatch::CaseInsensitive,
        Some(false) => StemMatch::Exact,
        None => settings.stem_match(),
    })
}

struct CsvValidation {
    outcome: ValidationOutcome,
    warnings: Vec<FieldWarning>,
    missing_columns: Vec<&'static str>,
    unknown_columns: Vec<String>,
}

fn parse_and_validate(ctx: &ImportContext<'_>, in_path: &str) -> Result<CsvValidation, HandlerErr> {
    let bytes = read_input_file(in_path)?;
    let parsed = parse_student_csv_bytes(&bytes, ctx.cache.catalogs())
        .map_err(|e| HandlerErr::from(e).with_details(json!({ "path": in_path })))?;
    let keys = db::list_student_keys(ctx.conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let outcome = validate_batch(&parsed.rows, &keys);

    let mut warnings = parsed
        .rows
        .iter()
        .flat_map(|r| r.warnings.iter().cloned())
        .chain(outcome.batch_warnings.iter().cloned())
        .collect::<Vec<_>>();
    warnings.sort_by_key(|w| w.line);

    Ok(CsvValidation {
        outcome,
        warnings,
        missing_columns: parsed.missing_columns,
        unknown_columns: parsed.unknown_columns,
    })
}

fn summary(outcome: &ValidationOutcome) -> Value {
    json!({
        "total": outcome.total(),
        "duplicates": outcome.duplicate.len(),
        "invalid": outcome.invalid.len(),
        "willImport": outcome.new.len()
    })
}

fn preview_rows(outcome: &ValidationOutcome, limit: usize) -> Vec<Value> {
    let mut rows: Vec<(usize, Value)> = Vec::with_capacity(outcome.total());
    for r in &outcome.new {
        rows.push((
            r.line,
            json!({
                "line": r.line,
                "registrationId": r.record.registration_id,
                "fullName": r.record.full_name,
                "status": "new"
            }),
        ));
    }
    for d in &outcome.duplicate {
        rows.push((
            d.row.line,
            json!({
                "line": d.row.line,
                "registrationId": d.row.record.registration_id,
                "fullName": d.row.record.full_name,
                "status": "duplicate",
                "matchedOn": d.matched_on
            }),
        ));
    }
    for i in &outcome.invalid {
        rows.push((
            i.row.line,
            json!({
                "line": i.row.line,
                "registrationId": i.row.record.registration_id,
                "fullName": i.row.record.full_name,
                "status": "invalid",
                "reason": i.reason,
                "missingFields": i.missing_fields
            }),
        ));
    }
    rows.sort_by_key(|(line, _)| *line);
    rows.into_iter().take(limit).map(|(_, v)| v).collect()
}

fn upload_summary(scan: &ZipScan, results: &[UploadResult]) -> Value {
    let uploaded = results
        .iter()
        .filter(|r| r.status == UploadStatus::Uploaded)
        .count();
    json!({
        "uploaded": uploaded,
        "failed": results.len() - uploaded,
        "skippedEntries": scan.skipped,
        "results": results
    })
}

fn association_list(scan: &ZipScan) -> Vec<Value> {
    scan.associations
        .iter()
        .map(|a| {
            json!({
                "fileName": a.file_name,
                "registrationId": a.registration_id,
                "documentType": a.document_type,
                "sizeBytes": a.bytes.len()
            })
        })
        .collect()
}

fn handle_preview_csv(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let in_path = get_required_str(params, "inPath")?;
    let ctx = import_context(state)?;
    let v = parse_and_validate(&ctx, &in_path)?;
    Ok(json!({
        "path": in_path,
        "summary": summary(&v.outcome),
        "missingColumns": v.missing_columns,
        "unknownColumns": v.unknown_columns,
        "warnings": v.warnings,
        "previewRows": preview_rows(&v.outcome, ctx.settings.preview_row_limit),
        "referenceLoadedAt": ctx.cache.loaded_at().to_rfc3339()
    }))
}

/// The confirmation step: re-reads the file, commits the `new` partition in
/// one batch and then, if given, attaches documents from the archive.
fn handle_apply_csv(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let in_path = get_required_str(params, "inPath")?;
    let zip_path = get_optional_str(params, "zipPath");
    let ctx = import_context(state)?;
    let mode = stem_match(params, &ctx.settings)?;
    let v = parse_and_validate(&ctx, &in_path)?;

    let records = v.outcome.new_records();
    let mut store = WorkspaceStore::new(ctx.conn, ctx.root);
    let submitted = submit_batch(&mut store, &records).map_err(|e| {
        HandlerErr::from(e).with_details(json!({
            "path": in_path,
            "attempted": records.len()
        }))
    })?;
    info!(
        "import from {in_path}: created {} of {} rows ({} duplicate, {} invalid)",
        submitted.created_count,
        v.outcome.total(),
        v.outcome.duplicate.len(),
        v.outcome.invalid.len()
    );

    let documents = match zip_path {
        None => Value::Null,
        Some(zip_path) => {
            let ids = records
                .iter()
                .map(|r| r.registration_id.trim().to_string())
                .collect::<Vec<_>>();
            let scanned = read_input_file(&zip_path).and_then(|bytes| {
                associate_documents(&bytes, &ids, mode).map_err(HandlerErr::from)
            });
            match scanned {
                Ok(scan) => {
                    let results = upload_documents(&mut store, &scan.associations);
                    info!(
                        "documents from {zip_path}: {} associated, {} skipped",
                        scan.associations.len(),
                        scan.skipped.len()
                    );
                    upload_summary(&scan, &results)
                }
                // Students are already committed; report the archive problem alongside.
                Err(e) => json!({
                    "error": { "code": e.code, "message": e.message }
                }),
            }
        }
    };

    Ok(json!({
        "path": in_path,
        "createdCount": submitted.created_count,
        "summary": summary(&v.outcome),
        "warnings": v.warnings,
        "documents": documents
    }))
}

fn zip_scan(ctx: &ImportContext<'_>, params: &Value) -> Result<(String, ZipScan), HandlerErr> {
    let zip_path = get_required_str(params, "zipPath")?;
    let ids = match get_optional_str_list(params, "registrationIds")? {
        Some(ids) => ids,
        None => db::list_registration_ids(ctx.conn)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?,
    };
    let mode = stem_match(params, &ctx.settings)?;
    let bytes = read_input_file(&zip_path)?;
    let scan = associate_documents(&bytes, &ids, mode)
        .map_err(|e| HandlerErr::from(e).with_details(json!({ "path": zip_path })))?;
    Ok((zip_path, scan))
}

fn handle_preview_zip(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let ctx = import_context(state)?;
    let (zip_path, scan) = zip_scan(&ctx, params)?;
    Ok(json!({
        "path": zip_path,
        "associations": association_list(&scan),
        "skippedEntries": scan.skipped
    }))
}

fn handle_upload_zip(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let ctx = import_context(state)?;
    let (zip_path, scan) = zip_scan(&ctx, params)?;
    let mut store = WorkspaceStore::new(ctx.conn, ctx.root);
    let results = upload_documents(&mut store, &scan.associations);
    info!(
        "documents from {zip_path}: {} associated, {} skipped",
        scan.associations.len(),
        scan.skipped.len()
    );
    let mut out = upload_summary(&scan, &results);
    out["path"] = json!(zip_path);
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "import.previewCsv" => handle_preview_csv(state, &req.params),
        "import.applyCsv" => handle_apply_csv(state, &req.params),
        "import.previewZip" => handle_preview_zip(state, &req.params),
        "import.uploadZip" => handle_upload_zip(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
