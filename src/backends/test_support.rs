//! In-memory catalog used by resolution tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::json;

use crate::backends::CatalogService;
use crate::error::{FailureKind, ServiceError};
use crate::protocol::{CatalogEntry, ScopeCode};

pub fn scope(code: &str) -> ScopeCode {
    ScopeCode::normalize(code).expect("test scope code should be valid")
}

pub fn entry(scope_code: &str, id: &str, name: &str, collector_number: &str) -> CatalogEntry {
    let mut attributes = BTreeMap::new();
    attributes.insert("rarity".to_string(), json!("common"));
    attributes.insert("set_name".to_string(), json!(scope_code.to_uppercase()));
    CatalogEntry {
        id: id.to_string(),
        name: name.to_string(),
        scope: scope(scope_code),
        collector_number: collector_number.to_string(),
        attributes,
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    scopes: BTreeMap<ScopeCode, Vec<CatalogEntry>>,
    search_results: HashMap<String, Vec<CatalogEntry>>,
    failing_fetches: AtomicUsize,
    failing_scope_list: AtomicBool,
    failing_searches: AtomicBool,
    scope_list_calls: AtomicUsize,
    fetch_log: Mutex<Vec<ScopeCode>>,
    search_log: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, code: &str, entries: Vec<CatalogEntry>) -> Self {
        self.scopes.insert(scope(code), entries);
        self
    }

    pub fn with_search_result(mut self, name: &str, entries: Vec<CatalogEntry>) -> Self {
        self.search_results.insert(name.to_lowercase(), entries);
        self
    }

    /// The next `count` scope fetches fail with a timeout.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Every later `list_scopes` call fails with a server error.
    pub fn fail_scope_listing(&self) {
        self.failing_scope_list.store(true, Ordering::SeqCst);
    }

    /// Every later name search times out.
    pub fn fail_searches(&self) {
        self.failing_searches.store(true, Ordering::SeqCst);
    }

    pub fn fetch_count(&self, code: &str) -> usize {
        let code = scope(code);
        self.fetch_log
            .lock()
            .expect("fetch log lock")
            .iter()
            .filter(|fetched| **fetched == code)
            .count()
    }

    pub fn search_count(&self) -> usize {
        self.search_log.lock().expect("search log lock").len()
    }

    pub fn scope_list_count(&self) -> usize {
        self.scope_list_calls.load(Ordering::SeqCst)
    }
}

impl CatalogService for FakeCatalog {
    fn list_scopes(&self) -> Result<Vec<ScopeCode>, ServiceError> {
        self.scope_list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_scope_list.load(Ordering::SeqCst) {
            return Err(ServiceError::new(
                "FakeCatalog",
                FailureKind::ServerError,
                "set list unavailable",
            ));
        }
        Ok(self.scopes.keys().cloned().collect())
    }

    fn list_scope_entries(&self, scope: &ScopeCode) -> Result<Vec<CatalogEntry>, ServiceError> {
        self.fetch_log
            .lock()
            .expect("fetch log lock")
            .push(scope.clone());
        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if failing {
            return Err(ServiceError::new(
                "FakeCatalog",
                FailureKind::Timeout,
                "connection dropped mid-listing",
            ));
        }
        Ok(self.scopes.get(scope).cloned().unwrap_or_default())
    }

    fn search_by_name(&self, name: &str) -> Result<Vec<CatalogEntry>, ServiceError> {
        self.search_log
            .lock()
            .expect("search log lock")
            .push(name.to_string());
        if self.failing_searches.load(Ordering::SeqCst) {
            return Err(ServiceError::new(
                "FakeCatalog",
                FailureKind::Timeout,
                "search timed out",
            ));
        }
        Ok(self
            .search_results
            .get(&name.trim().to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}
