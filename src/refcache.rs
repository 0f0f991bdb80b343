use crate::model::ReferenceCatalogs;
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};

/// Anything that can produce a fresh copy of the reference catalogs.
pub trait CatalogSource {
    fn load_catalogs(&self) -> anyhow::Result<ReferenceCatalogs>;
}

/// Reference data snapshot with the time it was read. Callers decide when it
/// is too old; nothing here refreshes on its own.
#[derive(Debug, Clone)]
pub struct ReferenceCache {
    catalogs: ReferenceCatalogs,
    loaded_at: DateTime<Utc>,
}

impl ReferenceCache {
    pub fn new(catalogs: ReferenceCatalogs, loaded_at: DateTime<Utc>) -> Self {
        Self {
            catalogs,
            loaded_at,
        }
    }

    pub fn catalogs(&self) -> &ReferenceCatalogs {
        &self.catalogs
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.loaded_at) >= ttl
    }
}

/// Returns the cached catalogs, reloading first when the slot is empty or
/// older than `ttl`.
pub fn ensure_fresh<'a, S: CatalogSource + ?Sized>(
    slot: &'a mut Option<ReferenceCache>,
    source: &S,
    now: DateTime<Utc>,
    ttl: Duration,
) -> anyhow::Result<&'a ReferenceCache> {
    let fresh = slot.as_ref().is_some_and(|c| !c.is_stale(now, ttl));
    if !fresh {
        if slot.is_some() {
            log::warn!("reference cache is stale; reloading catalogs");
        }
        *slot = Some(ReferenceCache::new(source.load_catalogs()?, now));
    }
    slot.as_ref()
        .ok_or_else(|| anyhow!("reference cache unavailable"))
}
