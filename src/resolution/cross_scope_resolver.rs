//! Turns a noisy card read into a catalog entry by widening the search one
//! step at a time: declared set, sets seen earlier in the batch, then an
//! unscoped name search.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use log::{debug, info};

use crate::backends::CatalogService;
use crate::error::PipelineError;
use crate::protocol::{CatalogEntry, MatchCandidate, RawRead, ResolutionResult, ScopeCode};
use crate::resolution::fuzzy_matcher::{self, NameMatch, MATCH_THRESHOLD};
use crate::resolution::scope_cache::ScopeEntrySource;

/// Sets encountered so far in one ingestion batch, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct IngestionSession {
    seen_scopes: Vec<ScopeCode>,
}

impl IngestionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scope(&mut self, scope: &ScopeCode) {
        if !self.seen_scopes.contains(scope) {
            self.seen_scopes.push(scope.clone());
        }
    }

    pub fn seen_scopes(&self) -> &[ScopeCode] {
        &self.seen_scopes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    DeclaredScope,
    BatchScopes,
    GlobalSearch,
}

impl ResolutionStep {
    fn label(self) -> &'static str {
        match self {
            Self::DeclaredScope => "declared set",
            Self::BatchScopes => "batch sets",
            Self::GlobalSearch => "global search",
        }
    }
}

const RESOLUTION_STEPS: [ResolutionStep; 3] = [
    ResolutionStep::DeclaredScope,
    ResolutionStep::BatchScopes,
    ResolutionStep::GlobalSearch,
];

#[derive(Debug, Clone, PartialEq)]
enum StepOutcome {
    Continue,
    Done(ResolutionResult),
}

fn normalize_collector_number(value: &str) -> String {
    let trimmed = value.trim().trim_start_matches('#').to_ascii_lowercase();
    let without_zeros = trimmed.trim_start_matches('0');
    if without_zeros.is_empty() && !trimmed.is_empty() {
        "0".to_string()
    } else {
        without_zeros.to_string()
    }
}

/// Uses the read's set code, then its collector number within that set, to
/// single out one printing among equally named candidates. A collector number
/// without a matching set never decides between sets.
fn narrow_by_printing(read: &RawRead, candidates: &[MatchCandidate]) -> Option<CatalogEntry> {
    let hinted_scope = read.scope_hint.as_deref().and_then(ScopeCode::normalize)?;
    let in_scope: Vec<&MatchCandidate> = candidates
        .iter()
        .filter(|candidate| candidate.entry.scope == hinted_scope)
        .collect();
    match in_scope.len() {
        0 => return None,
        1 => return Some(in_scope[0].entry.clone()),
        _ => {}
    }

    let wanted_number = read
        .collector_number
        .as_deref()
        .map(normalize_collector_number)
        .filter(|number| !number.is_empty())?;
    let mut by_number = in_scope.into_iter().filter(|candidate| {
        normalize_collector_number(&candidate.entry.collector_number) == wanted_number
    });
    match (by_number.next(), by_number.next()) {
        (Some(only), None) => Some(only.entry.clone()),
        _ => None,
    }
}

fn outcome_from_candidates(read: &RawRead, mut candidates: Vec<MatchCandidate>) -> StepOutcome {
    if candidates.is_empty() {
        return StepOutcome::Continue;
    }
    if candidates.len() == 1 {
        return StepOutcome::Done(ResolutionResult::Resolved(candidates.remove(0).entry));
    }
    match narrow_by_printing(read, &candidates) {
        Some(entry) => StepOutcome::Done(ResolutionResult::Resolved(entry)),
        None => StepOutcome::Done(ResolutionResult::Ambiguous(candidates)),
    }
}

fn outcome_from_name_match(read: &RawRead, name_match: NameMatch) -> StepOutcome {
    match name_match {
        NameMatch::NoMatch => StepOutcome::Continue,
        NameMatch::Single(candidate) => {
            StepOutcome::Done(ResolutionResult::Resolved(candidate.entry))
        }
        NameMatch::Tied(candidates) => outcome_from_candidates(read, candidates),
    }
}

/// Scores global search results, keeps those over the threshold, and ranks
/// them highest first with the service's order breaking ties.
fn rank_global_results(name: &str, results: &[CatalogEntry]) -> Vec<MatchCandidate> {
    let mut ranked: Vec<MatchCandidate> = fuzzy_matcher::score_entries(name, results)
        .into_iter()
        .filter(|candidate| candidate.score >= MATCH_THRESHOLD)
        .collect();
    // Stable sort: equal scores keep the catalog's response order.
    ranked.sort_by(|left, right| right.score.total_cmp(&left.score));
    ranked
}

pub struct CrossScopeResolver {
    scopes: Arc<dyn ScopeEntrySource>,
    catalog: Arc<dyn CatalogService>,
    known_scopes: RwLock<Option<Arc<HashSet<ScopeCode>>>>,
}

impl CrossScopeResolver {
    pub fn new(scopes: Arc<dyn ScopeEntrySource>, catalog: Arc<dyn CatalogService>) -> Self {
        Self {
            scopes,
            catalog,
            known_scopes: RwLock::new(None),
        }
    }

    fn known_scopes(&self) -> Result<Arc<HashSet<ScopeCode>>, PipelineError> {
        if let Some(known) = self
            .known_scopes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            return Ok(Arc::clone(known));
        }
        let listed: HashSet<ScopeCode> = self.catalog.list_scopes()?.into_iter().collect();
        debug!("Resolver: catalog lists {} sets", listed.len());
        let listed = Arc::new(listed);
        *self
            .known_scopes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(&listed));
        Ok(listed)
    }

    /// The read's set code if it names a set the catalog knows; misreads are
    /// dropped rather than reported.
    fn declared_scope(&self, read: &RawRead) -> Result<Option<ScopeCode>, PipelineError> {
        let Some(candidate) = read.scope_hint.as_deref().and_then(ScopeCode::normalize) else {
            return Ok(None);
        };
        if self.known_scopes()?.contains(&candidate) {
            Ok(Some(candidate))
        } else {
            debug!(
                "Resolve[{}]: ignoring unknown set code {:?}",
                read.name, read.scope_hint
            );
            Ok(None)
        }
    }

    fn match_in_scope(
        &self,
        read: &RawRead,
        scope: &ScopeCode,
    ) -> Result<StepOutcome, PipelineError> {
        let entries = self.scopes.entries_for_scope(scope)?;
        Ok(outcome_from_name_match(
            read,
            fuzzy_matcher::match_name(&read.name, &entries),
        ))
    }

    fn run_step(
        &self,
        step: ResolutionStep,
        read: &RawRead,
        declared: Option<&ScopeCode>,
        session: &IngestionSession,
    ) -> Result<StepOutcome, PipelineError> {
        match step {
            ResolutionStep::DeclaredScope => match declared {
                Some(scope) => self.match_in_scope(read, scope),
                None => Ok(StepOutcome::Continue),
            },
            ResolutionStep::BatchScopes => {
                for scope in session.seen_scopes() {
                    if Some(scope) == declared {
                        continue;
                    }
                    let outcome = self.match_in_scope(read, scope)?;
                    if outcome != StepOutcome::Continue {
                        return Ok(outcome);
                    }
                }
                Ok(StepOutcome::Continue)
            }
            ResolutionStep::GlobalSearch => {
                let results = self.catalog.search_by_name(read.name.trim())?;
                let ranked = rank_global_results(&read.name, &results);
                Ok(outcome_from_candidates(read, ranked))
            }
        }
    }

    /// Resolves one read. A resolved entry's set is remembered in `session`
    /// for the reads that follow.
    pub fn resolve(
        &self,
        read: &RawRead,
        session: &mut IngestionSession,
    ) -> Result<ResolutionResult, PipelineError> {
        if read.name.trim().is_empty() {
            return Err(PipelineError::MalformedRead(
                "card read has no name".to_string(),
            ));
        }

        let declared = self.declared_scope(read)?;
        for step in RESOLUTION_STEPS {
            if let StepOutcome::Done(result) =
                self.run_step(step, read, declared.as_ref(), session)?
            {
                info!(
                    "Resolve[{}]: {} via {}",
                    read.name,
                    result.label(),
                    step.label()
                );
                if let ResolutionResult::Resolved(entry) = &result {
                    session.record_scope(&entry.scope);
                }
                return Ok(result);
            }
        }

        info!("Resolve[{}]: no candidates in any step", read.name);
        Ok(ResolutionResult::NotFound)
    }
}
