//! Scan runs: photographs in, collection records out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{error, info, warn};

use crate::backends::{CardImage, RecognitionService};
use crate::db_manager::{CollectionRecord, DbManager};
use crate::disambiguation::{Disambiguator, Selection};
use crate::error::PipelineError;
use crate::protocol::{CatalogEntry, RawRead, ResolutionResult};
use crate::resolution::cross_scope_resolver::{CrossScopeResolver, IngestionSession};

/// Per-run tally, logged when the run ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionReport {
    pub added: Vec<CollectionRecord>,
    pub skipped: Vec<String>,
    pub unresolved: Vec<String>,
    /// Reads whose resolution failed at a service, with the error text.
    pub failed_reads: Vec<(String, String)>,
    pub failed_images: Vec<PathBuf>,
    pub cancelled: bool,
}

impl IngestionReport {
    fn log_summary(&self) {
        info!(
            "Ingest: added {}, skipped {}, unresolved {}, failed reads {}, failed images {}{}",
            self.added.len(),
            self.skipped.len(),
            self.unresolved.len(),
            self.failed_reads.len(),
            self.failed_images.len(),
            if self.cancelled { " (cancelled)" } else { "" }
        );
        for name in &self.unresolved {
            warn!("Ingest: could not identify '{}'", name);
        }
    }
}

pub struct Ingestor {
    recognizer: Arc<dyn RecognitionService>,
    resolver: Arc<CrossScopeResolver>,
    collection: DbManager,
}

impl Ingestor {
    pub fn new(
        recognizer: Arc<dyn RecognitionService>,
        resolver: Arc<CrossScopeResolver>,
        collection: DbManager,
    ) -> Self {
        Self {
            recognizer,
            resolver,
            collection,
        }
    }

    fn now_unix_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or(0)
    }

    fn record_ownership(
        &self,
        read: &RawRead,
        entry: &CatalogEntry,
    ) -> Result<CollectionRecord, PipelineError> {
        let record = CollectionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            catalog_id: entry.id.clone(),
            name: entry.name.clone(),
            scope: entry.scope.to_string(),
            collector_number: entry.collector_number.clone(),
            foil: read.foil,
            condition: read.condition_or_default().to_string(),
            added_at_ms: Self::now_unix_ms(),
        };
        self.collection.insert_collection_record(&record)?;
        info!(
            "Ingest: added {} ({} #{}){}",
            record.name,
            record.scope.to_ascii_uppercase(),
            record.collector_number,
            if record.foil { " foil" } else { "" }
        );
        Ok(record)
    }

    /// Resolves and records one read. Returns `false` when the run should stop.
    fn ingest_read(
        &self,
        read: &RawRead,
        session: &mut IngestionSession,
        disambiguator: &mut dyn Disambiguator,
        report: &mut IngestionReport,
    ) -> Result<bool, PipelineError> {
        let entry = match self.resolver.resolve(read, session) {
            Ok(ResolutionResult::Resolved(entry)) => entry,
            Ok(ResolutionResult::Ambiguous(candidates)) => {
                match disambiguator.choose(read, &candidates)? {
                    Selection::Chosen(entry) => {
                        session.record_scope(&entry.scope);
                        entry
                    }
                    Selection::Skipped => {
                        report.skipped.push(read.name.clone());
                        return Ok(true);
                    }
                    Selection::Cancelled => return Ok(false),
                }
            }
            Ok(ResolutionResult::NotFound) => {
                report.unresolved.push(read.name.clone());
                return Ok(true);
            }
            Err(PipelineError::MalformedRead(reason)) => {
                warn!("Ingest: dropping read {:?}: {}", read, reason);
                return Ok(true);
            }
            Err(PipelineError::Service(service_error)) => {
                error!("Ingest: resolving '{}' failed: {}", read.name, service_error);
                report
                    .failed_reads
                    .push((read.name.clone(), service_error.to_string()));
                return Ok(true);
            }
            Err(other) => return Err(other),
        };
        report.added.push(self.record_ownership(read, &entry)?);
        Ok(true)
    }

    /// Processes `images` as one batch; sets resolved early in the batch are
    /// tried before a global search for later cards. Service failures on one
    /// image or card are logged and counted, storage failures end the run.
    pub fn ingest_images(
        &self,
        images: &[PathBuf],
        disambiguator: &mut dyn Disambiguator,
    ) -> Result<IngestionReport, PipelineError> {
        let mut session = IngestionSession::new();
        let mut report = IngestionReport::default();

        'images: for path in images {
            let image = match CardImage::load(path) {
                Ok(image) => image,
                Err(io_error) => {
                    error!("Ingest: cannot read {}: {}", path.display(), io_error);
                    report.failed_images.push(path.clone());
                    continue;
                }
            };
            let reads = match self.recognizer.recognize(&image) {
                Ok(reads) => reads,
                Err(service_error) => {
                    error!(
                        "Ingest: recognition failed for {}: {}",
                        path.display(),
                        service_error
                    );
                    report.failed_images.push(path.clone());
                    continue;
                }
            };
            for read in &reads {
                if !self.ingest_read(read, &mut session, disambiguator, &mut report)? {
                    report.cancelled = true;
                    break 'images;
                }
            }
        }

        report.log_summary();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use super::Ingestor;
    use crate::backends::test_support::{entry, FakeCatalog};
    use crate::backends::{CardImage, RecognitionService};
    use crate::db_manager::DbManager;
    use crate::disambiguation::{Disambiguator, FirstCandidatePolicy, Selection};
    use crate::error::{FailureKind, ServiceError};
    use crate::protocol::{MatchCandidate, RawRead};
    use crate::resolution::cross_scope_resolver::CrossScopeResolver;
    use crate::resolution::scope_cache::ScopeCache;

    /// Recognizer answering from a table keyed by file name.
    struct ScriptedRecognizer {
        reads: HashMap<String, Vec<RawRead>>,
    }

    impl RecognitionService for ScriptedRecognizer {
        fn recognize(&self, image: &CardImage) -> Result<Vec<RawRead>, ServiceError> {
            let key = image
                .path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            self.reads.get(key).cloned().ok_or_else(|| {
                ServiceError::new("Scripted", FailureKind::Hard, "unrecognizable image")
            })
        }
    }

    struct AlwaysCancel;

    impl Disambiguator for AlwaysCancel {
        fn choose(
            &mut self,
            _read: &RawRead,
            _candidates: &[MatchCandidate],
        ) -> std::io::Result<Selection> {
            Ok(Selection::Cancelled)
        }
    }

    fn write_image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"not really a jpeg").expect("write test image");
        path
    }

    fn ingestor(reads: HashMap<String, Vec<RawRead>>) -> (Ingestor, Arc<FakeCatalog>) {
        let catalog = Arc::new(
            FakeCatalog::new()
                .with_scope(
                    "inv",
                    vec![
                        entry("inv", "inv-213", "Tangle", "213"),
                        entry("inv", "inv-170", "Shivan Zombie", "170"),
                    ],
                )
                .with_scope("m10", vec![entry("m10", "m10-146", "Lightning Bolt", "146")])
                .with_search_result(
                    "lightning bolt",
                    vec![
                        entry("m10", "m10-146", "Lightning Bolt", "146"),
                        entry("m11", "m11-149", "Lightning Bolt", "149"),
                    ],
                ),
        );
        let cache = Arc::new(ScopeCache::new(
            catalog.clone(),
            DbManager::open_in_memory().expect("cache db"),
        ));
        let resolver = Arc::new(CrossScopeResolver::new(cache, catalog.clone()));
        let ingestor = Ingestor::new(
            Arc::new(ScriptedRecognizer { reads }),
            resolver,
            DbManager::open_in_memory().expect("collection db"),
        );
        (ingestor, catalog)
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("card_collector_ingest_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn test_batch_run_records_resolved_and_reports_unresolved() {
        let dir = temp_dir();
        let first = write_image(&dir, "first.jpg");
        let second = write_image(&dir, "second.jpg");
        let reads = HashMap::from([
            (
                "first.jpg".to_string(),
                vec![RawRead {
                    foil: true,
                    ..RawRead::named("Tangl").with_scope_hint("INV")
                }],
            ),
            (
                "second.jpg".to_string(),
                vec![RawRead::named("Shivan Zombie"), RawRead::named("Nonexistent Card")],
            ),
        ]);
        let (ingestor, catalog) = ingestor(reads);

        let report = ingestor
            .ingest_images(&[first, second, dir.join("missing.jpg")], &mut FirstCandidatePolicy)
            .expect("run");
        let _ = std::fs::remove_dir_all(&dir);

        let added: Vec<&str> = report.added.iter().map(|record| record.name.as_str()).collect();
        assert_eq!(added, vec!["Tangle", "Shivan Zombie"]);
        assert!(report.added[0].foil);
        assert_eq!(report.added[1].condition, "Near Mint");
        assert_eq!(report.unresolved, vec!["Nonexistent Card".to_string()]);
        assert_eq!(report.failed_images.len(), 1);
        assert!(!report.cancelled);
        assert_eq!(catalog.fetch_count("inv"), 1);
        assert_eq!(ingestor.collection.collection_records().expect("list").len(), 2);
    }

    #[test]
    fn test_resolution_failure_is_reported_apart_from_not_found() {
        let dir = temp_dir();
        let image = write_image(&dir, "bolt.jpg");
        let reads = HashMap::from([(
            "bolt.jpg".to_string(),
            vec![RawRead::named("Lightning Bolt"), RawRead::named("Tangle").with_scope_hint("inv")],
        )]);
        let (ingestor, catalog) = ingestor(reads);
        catalog.fail_searches();

        let report = ingestor
            .ingest_images(&[image], &mut FirstCandidatePolicy)
            .expect("run");
        let _ = std::fs::remove_dir_all(&dir);

        assert!(report.unresolved.is_empty());
        assert_eq!(report.failed_reads.len(), 1);
        assert_eq!(report.failed_reads[0].0, "Lightning Bolt");
        assert!(report.failed_reads[0].1.contains("search timed out"));
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.added[0].name, "Tangle");
    }

    #[test]
    fn test_ambiguous_global_result_uses_disambiguator_choice() {
        let dir = temp_dir();
        let image = write_image(&dir, "bolt.png");
        let reads = HashMap::from([(
            "bolt.png".to_string(),
            vec![RawRead::named("Lightning Bolt")],
        )]);
        let (ingestor, _) = ingestor(reads);

        let report = ingestor
            .ingest_images(&[image], &mut FirstCandidatePolicy)
            .expect("run");
        let _ = std::fs::remove_dir_all(&dir);

        assert_eq!(report.added.len(), 1);
        assert_eq!(report.added[0].catalog_id, "m10-146");
    }

    #[test]
    fn test_cancel_stops_remaining_reads() {
        let dir = temp_dir();
        let image = write_image(&dir, "mixed.jpg");
        let reads = HashMap::from([(
            "mixed.jpg".to_string(),
            vec![RawRead::named("Lightning Bolt"), RawRead::named("Tangle").with_scope_hint("inv")],
        )]);
        let (ingestor, _) = ingestor(reads);

        let report = ingestor.ingest_images(&[image], &mut AlwaysCancel).expect("run");
        let _ = std::fs::remove_dir_all(&dir);

        assert!(report.cancelled);
        assert!(report.added.is_empty());
    }
}
