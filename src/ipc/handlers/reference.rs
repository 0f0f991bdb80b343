use crate::config;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{catalog_for_method, get_required_i64, get_required_str, require_db, respond};
use crate::ipc::types::{AppState, Request};
use crate::model::CatalogKind;
use crate::refcache::ensure_fresh;
use chrono::Utc;
use log::info;
use serde_json::{json, Value};

fn catalog_list(state: &AppState, kind: CatalogKind) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let items = db::list_catalog(conn, kind).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "items": items }))
}

fn ensure_name_free(
    conn: &rusqlite::Connection,
    kind: CatalogKind,
    name: &str,
    except_id: Option<i64>,
) -> Result<(), HandlerErr> {
    let existing = db::catalog_find_by_name(conn, kind, name)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    match existing {
        Some(id) if Some(id) != except_id => Err(HandlerErr::new(
            "conflict",
            format!("{} '{}' already exists", kind.label(), name),
        )
        .with_details(json!({ "id": id }))),
        _ => Ok(()),
    }
}

fn catalog_create(state: &mut AppState, kind: CatalogKind, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let name = get_required_str(params, "name")?;
    ensure_name_free(conn, kind, &name, None)?;
    let id = db::catalog_create(conn, kind, &name)
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    state.ref_cache = None;
    Ok(json!({ "id": id, "name": name }))
}

fn catalog_rename(state: &mut AppState, kind: CatalogKind, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_i64(params, "id")?;
    let name = get_required_str(params, "name")?;
    ensure_name_free(conn, kind, &name, Some(id))?;
    let found = db::catalog_rename(conn, kind, id, &name)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if !found {
        return Err(HandlerErr::not_found(format!("{} not found", kind.label())));
    }
    state.ref_cache = None;
    Ok(json!({ "id": id, "name": name }))
}

fn catalog_delete(state: &mut AppState, kind: CatalogKind, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_i64(params, "id")?;
    let used = db::catalog_usage_count(conn, kind, id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if used > 0 {
        return Err(HandlerErr::new(
            "in_use",
            format!("{} is referenced by {} student(s)", kind.label(), used),
        )
        .with_details(json!({ "students": used })));
    }
    let found = db::catalog_delete(conn, kind, id)
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if !found {
        return Err(HandlerErr::not_found(format!("{} not found", kind.label())));
    }
    state.ref_cache = None;
    Ok(json!({ "deleted": true }))
}

fn cache_status(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let settings = config::load_import_settings(conn);
    Ok(match state.ref_cache.as_ref() {
        Some(cache) => json!({
            "loaded": true,
            "loadedAt": cache.loaded_at().to_rfc3339(),
            "stale": cache.is_stale(Utc::now(), settings.reference_ttl()),
            "ttlSeconds": settings.reference_ttl_seconds
        }),
        None => json!({
            "loaded": false,
            "loadedAt": null,
            "stale": true,
            "ttlSeconds": settings.reference_ttl_seconds
        }),
    })
}

fn cache_refresh(state: &mut AppState) -> Result<Value, HandlerErr> {
    state.ref_cache = None;
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let settings = config::load_import_settings(conn);
    let cache = ensure_fresh(&mut state.ref_cache, conn, Utc::now(), settings.reference_ttl())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    info!(
        "reference catalogs reloaded: {} faculties, {} departments, {} academic years",
        cache.catalogs().faculties.len(),
        cache.catalogs().departments.len(),
        cache.catalogs().academic_years.len()
    );
    Ok(json!({
        "loadedAt": cache.loaded_at().to_rfc3339(),
        "catalogs": cache.catalogs()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "reference.cacheStatus" => return Some(respond(&req.id, cache_status(state))),
        "reference.refresh" => return Some(respond(&req.id, cache_refresh(state))),
        _ => {}
    }
    let (kind, action) = catalog_for_method(&req.method)?;
    let result = match action {
        "list" => catalog_list(state, kind),
        "create" => catalog_create(state, kind, &req.params),
        "rename" => catalog_rename(state, kind, &req.params),
        "delete" => catalog_delete(state, kind, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
