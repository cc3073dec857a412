//! Data carried between recognition, resolution and storage.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_CONDITION: &str = "Near Mint";

/// Immutable identifier of a printed set, stored trimmed and lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeCode(String);

impl ScopeCode {
    /// Normalizes a set code as read off a card or returned by the catalog.
    ///
    /// Returns `None` when nothing code-shaped remains (empty, or containing
    /// characters no set code uses).
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw
            .trim()
            .trim_matches(|ch: char| !ch.is_ascii_alphanumeric())
            .to_ascii_lowercase();
        if trimmed.is_empty() || trimmed.len() > 8 {
            return None;
        }
        if !trimmed.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unverified output of the recognition service for one card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRead {
    pub name: String,
    #[serde(default, alias = "set_code")]
    pub scope_hint: Option<String>,
    #[serde(default)]
    pub collector_number: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub foil: bool,
    #[serde(default)]
    pub condition: Option<String>,
}

impl RawRead {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_scope_hint(mut self, scope_hint: impl Into<String>) -> Self {
        self.scope_hint = Some(scope_hint.into());
        self
    }

    pub fn with_collector_number(mut self, collector_number: impl Into<String>) -> Self {
        self.collector_number = Some(collector_number.into());
        self
    }

    pub fn condition_or_default(&self) -> &str {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|condition| !condition.is_empty())
            .unwrap_or(DEFAULT_CONDITION)
    }
}

/// One authoritative printing as described by the catalog service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub scope: ScopeCode,
    pub collector_number: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl CatalogEntry {
    fn attribute_str(&self, key: &str) -> &str {
        self.attributes
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Single-line printing summary used when asking a person to choose.
    pub fn display_line(&self) -> String {
        let mut rarity = self.attribute_str("rarity").to_string();
        if let Some(first) = rarity.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        format!(
            "{:5} #{:4} - {:35} ({:10}) [{}]",
            self.scope.as_str().to_ascii_uppercase(),
            self.collector_number,
            self.attribute_str("set_name"),
            rarity,
            self.attribute_str("released_at"),
        )
    }
}

/// A catalog entry paired with its name-similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub entry: CatalogEntry,
    pub score: f64,
}

/// Terminal outcome of resolving one raw read.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionResult {
    Resolved(CatalogEntry),
    /// Ranked by score, highest first.
    Ambiguous(Vec<MatchCandidate>),
    NotFound,
}

impl ResolutionResult {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Resolved(_) => "resolved",
            Self::Ambiguous(_) => "ambiguous",
            Self::NotFound => "not_found",
        }
    }
}
