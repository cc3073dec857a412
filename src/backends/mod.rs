//! External service abstractions and concrete adapters.

pub mod claude_vision;
pub mod scryfall;
#[cfg(test)]
pub mod test_support;

use std::path::{Path, PathBuf};

use crate::error::ServiceError;
use crate::protocol::{CatalogEntry, RawRead, ScopeCode};

/// Photograph handed to the recognition service.
#[derive(Debug, Clone)]
pub struct CardImage {
    pub path: PathBuf,
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

impl CardImage {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            media_type: media_type_for_path(path),
            bytes,
        })
    }
}

/// Media type by file extension; unknown extensions are sent as JPEG.
pub fn media_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

/// Authoritative card catalog.
pub trait CatalogService: Send + Sync {
    /// Every set code the catalog knows about.
    fn list_scopes(&self) -> Result<Vec<ScopeCode>, ServiceError>;
    /// The complete printing list of one set. Fails as a whole if any part
    /// of the listing cannot be fetched.
    fn list_scope_entries(&self, scope: &ScopeCode) -> Result<Vec<CatalogEntry>, ServiceError>;
    /// Unscoped name search, in the service's own result order.
    fn search_by_name(&self, name: &str) -> Result<Vec<CatalogEntry>, ServiceError>;
}

/// Turns a photograph into best-effort card reads.
pub trait RecognitionService: Send + Sync {
    fn recognize(&self, image: &CardImage) -> Result<Vec<RawRead>, ServiceError>;
}
