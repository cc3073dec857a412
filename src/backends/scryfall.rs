//! Scryfall catalog adapter.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use crate::backends::CatalogService;
use crate::error::{FailureKind, ServiceError};
use crate::protocol::{CatalogEntry, ScopeCode};
use crate::resolution::rate_limited_client::RateLimitedClient;

pub const DEFAULT_BASE_URL: &str = "https://api.scryfall.com";
const SOURCE_NAME: &str = "Scryfall";
const MAX_LISTING_PAGES: usize = 100;
const ATTRIBUTE_KEYS: &[&str] = &[
    "set_name",
    "rarity",
    "released_at",
    "lang",
    "type_line",
    "mana_cost",
    "foil",
    "nonfoil",
    "finishes",
    "prices",
    "scryfall_uri",
];

/// Catalog adapter backed by `ureq`; every request goes through the shared throttle.
pub struct ScryfallCatalog {
    http_client: ureq::Agent,
    throttle: Arc<RateLimitedClient>,
    base_url: String,
    user_agent: String,
}

impl ScryfallCatalog {
    pub fn new(base_url: &str, user_agent: &str, throttle: Arc<RateLimitedClient>) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(15))
            .timeout_write(Duration::from_secs(15))
            .build();
        debug!(
            "Scryfall: endpoint {} with min request interval {:?}",
            base_url,
            throttle.min_interval()
        );
        Self {
            http_client,
            throttle,
            base_url: Self::endpoint_base(base_url),
            user_agent: user_agent.to_string(),
        }
    }

    fn endpoint_base(endpoint: &str) -> String {
        endpoint.trim().trim_end_matches('/').to_string()
    }

    fn request_url(&self, path: &str, params: &[(&str, &str)]) -> String {
        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        if params.is_empty() {
            return url;
        }

        url.push('?');
        for (index, (key, value)) in params.iter().enumerate() {
            if index > 0 {
                url.push('&');
            }
            url.push_str(key);
            url.push('=');
            url.push_str(urlencoding::encode(value).as_ref());
        }
        url
    }

    fn exact_name_query(name: &str) -> String {
        let cleaned: String = name.chars().filter(|ch| *ch != '"').collect();
        format!("!\"{}\"", cleaned.trim())
    }

    /// Fetches one JSON document. A 404 is Scryfall's "no results" and maps to `None`.
    fn get_json(&self, url: &str) -> Result<Option<Value>, ServiceError> {
        self.throttle.call(|| {
            debug!("Scryfall: GET {}", url);
            let response = match self
                .http_client
                .get(url)
                .set("User-Agent", &self.user_agent)
                .set("Accept", "application/json")
                .call()
            {
                Ok(response) => response,
                Err(ureq::Error::Status(404, _)) => return Ok(None),
                Err(error) => {
                    return Err(ServiceError::new(
                        SOURCE_NAME,
                        FailureKind::from_ureq(&error),
                        format!("Request failed: {error}"),
                    ))
                }
            };
            let body = response.into_string().map_err(|error| {
                ServiceError::new(
                    SOURCE_NAME,
                    FailureKind::from_io(&error),
                    format!("Failed to read response: {error}"),
                )
            })?;
            serde_json::from_str(&body).map(Some).map_err(|error| {
                ServiceError::new(
                    SOURCE_NAME,
                    FailureKind::Hard,
                    format!("Invalid JSON response: {error}"),
                )
            })
        })
    }

    fn parse_entry(card: &Value) -> Option<CatalogEntry> {
        let id = card.get("id")?.as_str()?.to_string();
        let name = card.get("name")?.as_str()?.to_string();
        let scope = ScopeCode::normalize(card.get("set")?.as_str()?)?;
        let collector_number = card
            .get("collector_number")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let attributes: BTreeMap<String, Value> = ATTRIBUTE_KEYS
            .iter()
            .filter_map(|key| {
                card.get(*key)
                    .filter(|value| !value.is_null())
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect();
        Some(CatalogEntry {
            id,
            name,
            scope,
            collector_number,
            attributes,
        })
    }

    /// Entries of one list page plus the next page URL, if any.
    fn parse_list_page(page: &Value) -> Result<(Vec<CatalogEntry>, Option<String>), ServiceError> {
        if page.get("object").and_then(Value::as_str) != Some("list") {
            return Err(ServiceError::new(
                SOURCE_NAME,
                FailureKind::Hard,
                "Expected a list response",
            ));
        }
        let cards = page
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut entries = Vec::with_capacity(cards.len());
        for card in cards {
            match Self::parse_entry(card) {
                Some(entry) => entries.push(entry),
                None => warn!("Scryfall: skipping card without id/name/set"),
            }
        }
        let has_more = page
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let next_page = page
            .get("next_page")
            .and_then(Value::as_str)
            .filter(|_| has_more)
            .map(str::to_string);
        if has_more && next_page.is_none() {
            return Err(ServiceError::new(
                SOURCE_NAME,
                FailureKind::Hard,
                "List response has more pages but no next_page link",
            ));
        }
        Ok((entries, next_page))
    }

    fn parse_scope_list(value: &Value) -> Vec<ScopeCode> {
        value
            .get("data")
            .and_then(Value::as_array)
            .map(|sets| {
                sets.iter()
                    .filter_map(|set| set.get("code").and_then(Value::as_str))
                    .filter_map(ScopeCode::normalize)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Follows pagination to the end; any failing page fails the whole listing.
    /// A 404 on the first page is an empty listing, on a later page a failure.
    fn collect_pages<F>(
        first_url: String,
        mut fetch: F,
    ) -> Result<Vec<CatalogEntry>, ServiceError>
    where
        F: FnMut(&str) -> Result<Option<Value>, ServiceError>,
    {
        let mut entries = Vec::new();
        let mut next_url = Some(first_url);
        let mut pages = 0usize;
        while let Some(url) = next_url.take() {
            pages += 1;
            if pages > MAX_LISTING_PAGES {
                return Err(ServiceError::new(
                    SOURCE_NAME,
                    FailureKind::Hard,
                    format!("Listing exceeded {MAX_LISTING_PAGES} pages"),
                ));
            }
            let Some(page) = fetch(&url)? else {
                if pages == 1 {
                    break;
                }
                return Err(ServiceError::new(
                    SOURCE_NAME,
                    FailureKind::ServerError,
                    format!("Listing page {pages} disappeared: {url}"),
                ));
            };
            let (page_entries, next_page) = Self::parse_list_page(&page)?;
            entries.extend(page_entries);
            next_url = next_page;
        }
        Ok(entries)
    }

    fn search_exact_prints(&self, name: &str) -> Result<Vec<CatalogEntry>, ServiceError> {
        let query = Self::exact_name_query(name);
        let url = self.request_url(
            "cards/search",
            &[
                ("q", query.as_str()),
                ("unique", "prints"),
                ("order", "released"),
                ("dir", "desc"),
            ],
        );
        match self.get_json(&url)? {
            Some(page) => Ok(Self::parse_list_page(&page)?.0),
            None => Ok(Vec::new()),
        }
    }

    fn fuzzy_card_name(&self, name: &str) -> Result<Option<String>, ServiceError> {
        let url = self.request_url("cards/named", &[("fuzzy", name)]);
        Ok(self.get_json(&url)?.and_then(|card| {
            card.get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
        }))
    }
}

impl CatalogService for ScryfallCatalog {
    fn list_scopes(&self) -> Result<Vec<ScopeCode>, ServiceError> {
        let url = self.request_url("sets", &[]);
        Ok(self
            .get_json(&url)?
            .map(|value| Self::parse_scope_list(&value))
            .unwrap_or_default())
    }

    fn list_scope_entries(&self, scope: &ScopeCode) -> Result<Vec<CatalogEntry>, ServiceError> {
        let query = format!("e:{}", scope.as_str());
        let url = self.request_url(
            "cards/search",
            &[
                ("q", query.as_str()),
                ("unique", "prints"),
                ("order", "set"),
                ("include_extras", "true"),
                ("include_variations", "true"),
            ],
        );
        Self::collect_pages(url, |page_url| self.get_json(page_url))
    }

    /// Exact-name printings; when the name is not exact, Scryfall's fuzzy
    /// lookup supplies the canonical name to search for.
    fn search_by_name(&self, name: &str) -> Result<Vec<CatalogEntry>, ServiceError> {
        let exact = self.search_exact_prints(name)?;
        if !exact.is_empty() {
            return Ok(exact);
        }
        match self.fuzzy_card_name(name)? {
            Some(canonical) if canonical != name.trim() => {
                debug!("Scryfall: fuzzy lookup mapped {:?} to {:?}", name, canonical);
                self.search_exact_prints(&canonical)
            }
            _ => Ok(Vec::new()),
        }
    }
}
