//! Name similarity scoring against a list of catalog entries.

use crate::protocol::{CatalogEntry, MatchCandidate};

/// Minimum similarity for a name to be accepted without a person looking at it.
pub const MATCH_THRESHOLD: f64 = 0.75;
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum NameMatch {
    NoMatch,
    Single(MatchCandidate),
    /// Several entries share the best score; kept in input order.
    Tied(Vec<MatchCandidate>),
}

/// Lowercases, drops punctuation and collapses whitespace.
pub fn normalize_name(value: &str) -> String {
    let mut normalized = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_alphanumeric() {
            normalized.extend(ch.to_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' || ch == '/' {
            normalized.push(' ');
        }
    }
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized edit-distance similarity in `[0, 1]`; symmetric in its arguments.
pub fn similarity(left: &str, right: &str) -> f64 {
    let left = normalize_name(left);
    let right = normalize_name(right);
    if left.is_empty() && right.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&left, &right)
}

pub fn score_entries(candidate_name: &str, entries: &[CatalogEntry]) -> Vec<MatchCandidate> {
    entries
        .iter()
        .map(|entry| MatchCandidate {
            score: similarity(candidate_name, &entry.name),
            entry: entry.clone(),
        })
        .collect()
}

/// Picks the best-scoring entries for `candidate_name`.
pub fn match_name(candidate_name: &str, entries: &[CatalogEntry]) -> NameMatch {
    let normalized_candidate = normalize_name(candidate_name);
    if normalized_candidate.is_empty() {
        return NameMatch::NoMatch;
    }

    let mut best_score = f64::NEG_INFINITY;
    let mut best: Vec<&CatalogEntry> = Vec::new();
    for entry in entries {
        let score =
            strsim::normalized_levenshtein(&normalized_candidate, &normalize_name(&entry.name));
        if score > best_score + SCORE_EPSILON {
            best_score = score;
            best.clear();
            best.push(entry);
        } else if (score - best_score).abs() <= SCORE_EPSILON {
            best.push(entry);
        }
    }

    if best.is_empty() || best_score < MATCH_THRESHOLD {
        return NameMatch::NoMatch;
    }

    let mut candidates: Vec<MatchCandidate> = best
        .into_iter()
        .map(|entry| MatchCandidate {
            entry: entry.clone(),
            score: best_score,
        })
        .collect();
    if candidates.len() == 1 {
        NameMatch::Single(candidates.remove(0))
    } else {
        NameMatch::Tied(candidates)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{match_name, normalize_name, similarity, NameMatch, MATCH_THRESHOLD};
    use crate::protocol::{CatalogEntry, ScopeCode};

    fn entry(id: &str, name: &str) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            name: name.to_string(),
            scope: ScopeCode::normalize("inv").expect("valid scope"),
            collector_number: id.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_normalize_name_ignores_case_whitespace_and_punctuation() {
        assert_eq!(
            normalize_name("  Jace,   the MIND-Sculptor "),
            "jace the mind sculptor"
        );
        assert_eq!(normalize_name("Æther Vial"), "æther vial");
    }

    #[test]
    fn test_similarity_is_symmetric_and_normalized() {
        let pairs = [
            ("Tangl", "Tangle"),
            ("LIGHTNING  bolt", "Lightning Helix"),
            ("Counterspell", "counter spell"),
        ];
        for (left, right) in pairs {
            let forward = similarity(left, right);
            let backward = similarity(right, left);
            assert!((forward - backward).abs() < 1e-12);
            assert!((0.0..=1.0).contains(&forward));
            assert_eq!(forward, similarity(left, right));
        }
        assert_eq!(similarity("Tangle", "  tangle "), 1.0);
    }

    #[test]
    fn test_misread_name_scores_above_threshold() {
        let score = similarity("Tangl", "Tangle");
        assert!((score - 5.0 / 6.0).abs() < 1e-9);
        assert!(score >= MATCH_THRESHOLD);
    }

    #[test]
    fn test_match_name_picks_single_best_entry() {
        let entries = vec![
            entry("1", "Tangle"),
            entry("2", "Tangle Angler"),
            entry("3", "Shivan Zombie"),
        ];
        let NameMatch::Single(candidate) = match_name("Tangl", &entries) else {
            panic!("expected a single match");
        };
        assert_eq!(candidate.entry.id, "1");
    }

    #[test]
    fn test_match_name_below_threshold_is_no_match() {
        let entries = vec![entry("1", "Shivan Zombie"), entry("2", "Tangle")];
        assert_eq!(match_name("Lightning Bolt", &entries), NameMatch::NoMatch);
        assert_eq!(match_name("Tangle", &[]), NameMatch::NoMatch);
        assert_eq!(match_name("  ", &entries), NameMatch::NoMatch);
    }

    #[test]
    fn test_match_name_returns_all_tied_entries_in_input_order() {
        let entries = vec![
            entry("b", "Forest"),
            entry("x", "Island"),
            entry("a", "Forest"),
        ];
        let NameMatch::Tied(candidates) = match_name("forest", &entries) else {
            panic!("expected a tie");
        };
        let ids: Vec<&str> = candidates.iter().map(|c| c.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(candidates.iter().all(|c| c.score == 1.0));
    }
}
