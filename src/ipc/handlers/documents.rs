use crate::db;
use crate::documents::DocumentStore;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, read_input_file, require_db, require_workspace, respond,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{DocumentAssociation, DocumentStatus, DocumentType};
use crate::store::WorkspaceStore;
use log::{info, warn};
use serde_json::{json, Value};
use std::path::Path;

fn documents_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let registration_id = get_required_str(params, "registrationId")?;
    if db::student_id_for_registration(conn, &registration_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_none()
    {
        return Err(HandlerErr::not_found("student not found"));
    }
    let documents = db::list_documents(conn, &registration_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "documents": documents }))
}

/// Single-file upload; `fileName` defaults to the source file's name.
fn documents_upload(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, root) = require_workspace(state)?;
    let registration_id = get_required_str(params, "registrationId")?;
    let raw_type = get_required_str(params, "documentType")?;
    let document_type = DocumentType::parse(&raw_type).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "documentType must be one of {}",
            DocumentType::ALL.map(|t| t.as_str()).join(", ")
        ))
    })?;
    let in_path = get_required_str(params, "inPath")?;
    let file_name = match get_optional_str(params, "fileName") {
        Some(name) => name,
        None => Path::new(&in_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| HandlerErr::bad_params("inPath has no file name"))?,
    };

    if db::student_id_for_registration(conn, &registration_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_none()
    {
        return Err(HandlerErr::not_found("student not found"));
    }

    let bytes = read_input_file(&in_path)?;
    let doc = DocumentAssociation {
        document_type,
        registration_id: registration_id.clone(),
        bytes,
        file_name,
    };
    let mut store = WorkspaceStore::new(conn, root);
    store
        .put_document(&doc)
        .map_err(|e| HandlerErr::new("upload_failed", format!("{e:#}")))?;

    let stored = db::list_documents(conn, &registration_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .into_iter()
        .find(|d| d.document_type == document_type && d.file_name == doc.file_name);
    info!(
        "stored {} for {registration_id} as {}",
        doc.file_name,
        document_type.as_str()
    );
    Ok(json!({ "document": stored }))
}

fn documents_set_status(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, "documentId")?;
    let raw = get_required_str(params, "status")?;
    let status = DocumentStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be PENDING, VERIFIED or REJECTED"))?;
    let found = db::set_document_status(conn, &id, status)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if !found {
        return Err(HandlerErr::not_found("document not found"));
    }
    let document = db::get_document(conn, &id).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "document": document }))
}

fn documents_delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(params, "documentId")?;
    let doc = db::get_document(conn, &id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("document not found"))?;
    db::delete_document(conn, &id).map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if let Err(e) = std::fs::remove_file(&doc.stored_path) {
        warn!("failed to remove document file {}: {e}", doc.stored_path);
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "documents.list" => documents_list(state, &req.params),
        "documents.upload" => documents_upload(state, &req.params),
        "documents.setStatus" => documents_set_status(state, &req.params),
        "documents.delete" => documents_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
