//! Lazily populated, never-invalidated cache of complete set listings.
//!
//! Two layers: an in-process map in front of the SQLite tables owned by
//! [`DbManager`]. A set is written only after its whole listing arrived, so a
//! stored record always means "complete". An interrupted fetch leaves nothing
//! behind and the next lookup starts over.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::backends::CatalogService;
use crate::db_manager::{DbManager, ScopeLoad};
use crate::error::PipelineError;
use crate::protocol::{CatalogEntry, ScopeCode};

/// Anything that can hand out the complete entry list of a set.
pub trait ScopeEntrySource: Send + Sync {
    fn entries_for_scope(&self, scope: &ScopeCode) -> Result<Arc<[CatalogEntry]>, PipelineError>;
}

pub struct ScopeCache {
    catalog: Arc<dyn CatalogService>,
    store: Mutex<DbManager>,
    memory: RwLock<HashMap<ScopeCode, Arc<[CatalogEntry]>>>,
}

impl ScopeCache {
    pub fn new(catalog: Arc<dyn CatalogService>, store: DbManager) -> Self {
        Self {
            catalog,
            store: Mutex::new(store),
            memory: RwLock::new(HashMap::new()),
        }
    }

    fn now_unix_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or(0)
    }

    fn lock_store(&self) -> MutexGuard<'_, DbManager> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn memory_hit(&self, scope: &ScopeCode) -> Option<Arc<[CatalogEntry]>> {
        self.memory
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(scope)
            .cloned()
    }

    fn remember(&self, scope: &ScopeCode, entries: Arc<[CatalogEntry]>) -> Arc<[CatalogEntry]> {
        let mut memory = self
            .memory
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(memory.entry(scope.clone()).or_insert(entries))
    }

    fn load_persisted(
        &self,
        scope: &ScopeCode,
    ) -> Result<Option<Vec<CatalogEntry>>, PipelineError> {
        let mut store = self.lock_store();
        match store.load_scope(scope)? {
            ScopeLoad::Missing => Ok(None),
            ScopeLoad::Complete(stored) => {
                debug!(
                    "ScopeCache[{}]: loaded {} entries fetched at {}",
                    scope,
                    stored.entries.len(),
                    stored.fetched_at_ms
                );
                Ok(Some(stored.entries))
            }
            ScopeLoad::Corrupt(reason) => {
                warn!(
                    "ScopeCache[{}]: discarding incomplete record ({}), fetching again",
                    scope, reason
                );
                store.delete_scope(scope)?;
                Ok(None)
            }
        }
    }

    /// Returns the complete, ordered entry list for `scope`.
    pub fn get_entries(&self, scope: &ScopeCode) -> Result<Arc<[CatalogEntry]>, PipelineError> {
        if let Some(entries) = self.memory_hit(scope) {
            return Ok(entries);
        }

        if let Some(entries) = self.load_persisted(scope)? {
            return Ok(self.remember(scope, entries.into()));
        }

        // No lock is held while fetching; racing fetches for one set both
        // write a complete record and the last one wins.
        info!("ScopeCache[{}]: fetching full set listing", scope);
        let fetched = self.catalog.list_scope_entries(scope)?;
        let entries: Arc<[CatalogEntry]> = fetched.into();
        self.lock_store()
            .replace_scope(scope, &entries, Self::now_unix_ms())?;
        info!("ScopeCache[{}]: cached {} entries", scope, entries.len());
        Ok(self.remember(scope, entries))
    }
}

impl ScopeEntrySource for ScopeCache {
    fn entries_for_scope(&self, scope: &ScopeCode) -> Result<Arc<[CatalogEntry]>, PipelineError> {
        self.get_entries(scope)
    }
}
