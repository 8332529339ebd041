//! Shared types used across all pipeline stages.
//!
//! A [`ContentItem`] is created by the change detector and passed read-only
//! through fetch, transform and write. Its `path` is its identity: two items
//! with the same path are the same item, whatever their kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of source entity a path was discovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Post,
    Page,
    CategoryArchive,
    TagArchive,
    Root,
}

impl ContentKind {
    /// Archive pages aggregate many items and are rebuilt by policy rather
    /// than tracked in the build cache.
    pub fn is_archive(self) -> bool {
        matches!(
            self,
            ContentKind::CategoryArchive | ContentKind::TagArchive | ContentKind::Root
        )
    }

    /// Kind of an essential path (`/`, `/category/`, `/tag/`).
    pub fn of_essential(path: &str) -> ContentKind {
        if path.starts_with("/category/") {
            ContentKind::CategoryArchive
        } else if path.starts_with("/tag/") {
            ContentKind::TagArchive
        } else {
            ContentKind::Root
        }
    }
}

/// One logical unit to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Root-relative path on the source site, e.g. `/2024/03/hello-world/`.
    pub path: String,
    pub kind: ContentKind,
    /// Last modification reported by the content API. Archives have none.
    pub source_modified_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn new(path: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            path: normalize_path(&path.into()),
            kind,
            source_modified_at: None,
        }
    }

    pub fn with_modified(mut self, modified: Option<DateTime<Utc>>) -> Self {
        self.source_modified_at = modified;
        self
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Non-empty path segments, e.g. `["2024", "03", "hello-world"]`.
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }
}

/// Normalize a site path: always starts with `/`, empty becomes `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Strip the `source` prefix from an absolute URL, giving a site path.
///
/// URLs on other hosts are returned unchanged.
pub fn relative_to(url: &str, source: &str) -> String {
    match url.strip_prefix(source) {
        Some(rest) => normalize_path(rest),
        None => url.to_string(),
    }
}
