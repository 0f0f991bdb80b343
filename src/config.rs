use crate::db;
use crate::documents::StemMatch;
use anyhow::{anyhow, Context};
use chrono::Duration;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub const IMPORT_SETTINGS_KEY: &str = "setup.import";

/// Workspace-level import settings, stored as JSON under `setup.import`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportSettings {
    pub reference_ttl_seconds: i64,
    pub document_match_case_insensitive: bool,
    pub preview_row_limit: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            reference_ttl_seconds: 300,
            document_match_case_insensitive: false,
            preview_row_limit: 250,
            default_page_size: 25,
            max_page_size: 200,
        }
    }
}

impl ImportSettings {
    pub fn reference_ttl(&self) -> Duration {
        Duration::seconds(self.reference_ttl_seconds.max(0))
    }

    pub fn stem_match(&self) -> StemMatch {
        if self.document_match_case_insensitive {
            StemMatch::CaseInsensitive
        } else {
            StemMatch::Exact
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.reference_ttl_seconds < 0 {
            return Err(anyhow!("referenceTtlSeconds must be >= 0"));
        }
        if self.max_page_size == 0 || self.default_page_size == 0 {
            return Err(anyhow!("page sizes must be > 0"));
        }
        if self.default_page_size > self.max_page_size {
            return Err(anyhow!("defaultPageSize must not exceed maxPageSize"));
        }
        Ok(())
    }
}

/// Stored settings over defaults; unreadable stored values fall back to defaults.
pub fn load_import_settings(conn: &Connection) -> ImportSettings {
    db::settings_get_json(conn, IMPORT_SETTINGS_KEY)
        .ok()
        .flatten()
        .and_then(|v| serde_json::from_value::<ImportSettings>(v).ok())
        .unwrap_or_default()
}

/// Applies a partial object on top of the current settings and persists it.
pub fn update_import_settings(
    conn: &Connection,
    patch: &serde_json::Value,
) -> anyhow::Result<ImportSettings> {
    let Some(patch) = patch.as_object() else {
        return Err(anyhow!("patch must be an object"));
    };
    let mut current = serde_json::to_value(load_import_settings(conn))?;
    for (k, v) in patch {
        if current.get(k).is_none() {
            return Err(anyhow!("unknown setting: {k}"));
        }
        current[k.as_str()] = v.clone();
    }
    let next: ImportSettings =
        serde_json::from_value(current).context("invalid setting value")?;
    next.check()?;
    db::settings_set_json(conn, IMPORT_SETTINGS_KEY, &serde_json::to_value(&next)?)?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute(
            "CREATE TABLE settings(key TEXT PRIMARY KEY, value_json TEXT NOT NULL)",
            [],
        )
        .expect("create settings");
        conn
    }

    #[test]
    fn unset_workspace_uses_defaults() {
        let conn = conn();
        let s = load_import_settings(&conn);
        assert_eq!(s, ImportSettings::default());
        assert_eq!(s.stem_match(), StemMatch::Exact);
        assert_eq!(s.reference_ttl(), Duration::seconds(300));
    }

    #[test]
    fn partial_update_persists_over_defaults() {
        let conn = conn();
        let patch = serde_json::json!({ "documentMatchCaseInsensitive": true, "previewRowLimit": 10 });
        let s = update_import_settings(&conn, &patch).expect("update");
        assert_eq!(s.stem_match(), StemMatch::CaseInsensitive);
        assert_eq!(s.preview_row_limit, 10);
        assert_eq!(s.max_page_size, 200);
        assert_eq!(load_import_settings(&conn), s);
    }

    #[test]
    fn rejected_updates_leave_settings_untouched() {
        let conn = conn();
        assert!(update_import_settings(&conn, &serde_json::json!({ "nope": 1 })).is_err());
        assert!(update_import_settings(&conn, &serde_json::json!({ "referenceTtlSeconds": -5 })).is_err());
        assert!(update_import_settings(&conn, &serde_json::json!({ "defaultPageSize": 500 })).is_err());
        assert!(update_import_settings(&conn, &serde_json::json!({ "previewRowLimit": "many" })).is_err());
        assert_eq!(load_import_settings(&conn), ImportSettings::default());
    }
}
