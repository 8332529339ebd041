//! Persistent build cache for incremental builds.
//!
//! Fetching and transforming every page of a large site takes minutes; the
//! cache lets the next run ask the content API only for what changed since
//! the previous one, and skip rewriting pages whose content is identical.
//!
//! # Design
//!
//! The cache is a JSON file (default `.build-cache.json`) holding one map per
//! bucket (`posts`, `pages`, `assets`) keyed by site path, plus two
//! timestamps:
//!
//! - **`last_build_time`**: set by every successful run. Incremental
//!   discovery asks the API for items modified after this instant.
//! - **`last_full_build_time`**: set only by full builds. Drives the
//!   "rebuild archives at least once a day" policy.
//!
//! Archive pages and the root are never cached: they depend on the
//! membership of many items and are rebuilt by policy instead.
//!
//! ## Lifecycle
//!
//! Loaded once at the start of a run, mutated in memory by the coordinating
//! thread as results come in, and written exactly once by
//! [`BuildCache::finalize`]. The write goes to a temporary sibling file that
//! is then renamed over the real one, so a crash at any point leaves the
//! previous cache intact.
//!
//! ## Versioning
//!
//! The file carries a `version`. Files without one come from the legacy
//! layout (`hash`/`modified`/`processed` entries, `last_full_build`) and are
//! migrated on load. Unknown versions and corrupt files load as empty, which
//! makes the next run a full build.

use crate::api::parse_wp_datetime;
use crate::types::{ContentItem, ContentKind};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Version of the cache file format.
pub const CACHE_VERSION: u32 = 2;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported cache version {0}")]
    UnsupportedVersion(u64),
}

/// One cached item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub content_hash: String,
    /// Source modification time. `None` for assets and for entries whose
    /// legacy timestamp could not be read.
    pub modified_at: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
}

/// Which map an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Posts,
    Pages,
    Assets,
}

impl Bucket {
    /// Bucket for a content item. Archives and the root are not cached.
    pub fn for_kind(kind: ContentKind) -> Option<Bucket> {
        match kind {
            ContentKind::Post => Some(Bucket::Posts),
            ContentKind::Page => Some(Bucket::Pages),
            ContentKind::CategoryArchive | ContentKind::TagArchive | ContentKind::Root => None,
        }
    }

    /// Classify a bare path by its shape, for maintenance commands that
    /// only know paths.
    pub fn for_path(path: &str) -> Bucket {
        if path.contains("/category/") || path.contains("/tag/") {
            Bucket::Pages
        } else if path.matches('/').count() >= 3 && !path.ends_with('/') {
            Bucket::Posts
        } else {
            Bucket::Pages
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Bucket::Posts => "post",
            Bucket::Pages => "page",
            Bucket::Assets => "asset",
        }
    }
}

/// The persisted build cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildCache {
    pub version: u32,
    #[serde(default)]
    pub posts: BTreeMap<String, CacheEntry>,
    #[serde(default)]
    pub pages: BTreeMap<String, CacheEntry>,
    #[serde(default)]
    pub assets: BTreeMap<String, CacheEntry>,
    #[serde(default)]
    pub last_build_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_full_build_time: Option<DateTime<Utc>>,
}

impl Default for BuildCache {
    fn default() -> Self {
        Self::empty()
    }
}

impl BuildCache {
    /// Create an empty cache (used for `--no-incremental` or first build).
    pub fn empty() -> Self {
        Self {
            version: CACHE_VERSION,
            posts: BTreeMap::new(),
            pages: BTreeMap::new(),
            assets: BTreeMap::new(),
            last_build_time: None,
            last_full_build_time: None,
        }
    }

    /// Load from disk. Returns an empty cache if the file doesn't exist or
    /// can't be parsed; the latter is logged as a warning.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no build cache, starting empty");
                return Self::empty();
            }
        };
        match Self::parse(&content) {
            Ok(cache) => cache,
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to load build cache, starting fresh");
                Self::empty()
            }
        }
    }

    /// Parse cache JSON, migrating the legacy layout.
    pub fn parse(content: &str) -> Result<Self, CacheError> {
        let value: Value = serde_json::from_str(content)?;
        match value.get("version").and_then(Value::as_u64) {
            Some(v) if v == CACHE_VERSION as u64 => Ok(serde_json::from_value(value)?),
            Some(v) => Err(CacheError::UnsupportedVersion(v)),
            None => Ok(migrate_legacy(&value)),
        }
    }

    /// Write the whole cache atomically: temp file, then rename.
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp_name);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn bucket(&self, bucket: Bucket) -> &BTreeMap<String, CacheEntry> {
        match bucket {
            Bucket::Posts => &self.posts,
            Bucket::Pages => &self.pages,
            Bucket::Assets => &self.assets,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut BTreeMap<String, CacheEntry> {
        match bucket {
            Bucket::Posts => &mut self.posts,
            Bucket::Pages => &mut self.pages,
            Bucket::Assets => &mut self.assets,
        }
    }

    pub fn get(&self, bucket: Bucket, path: &str) -> Option<&CacheEntry> {
        self.bucket(bucket).get(path)
    }

    /// True when the item is absent from the cache or its hash or
    /// modification time differ. Uncached kinds always count as changed.
    pub fn has_changed(&self, item: &ContentItem, content_hash: &str) -> bool {
        let Some(bucket) = Bucket::for_kind(item.kind) else {
            return true;
        };
        match self.get(bucket, &item.path) {
            Some(entry) => {
                entry.content_hash != content_hash || entry.modified_at != item.source_modified_at
            }
            None => true,
        }
    }

    /// Record a processed item. Returns false for kinds that aren't cached.
    pub fn mark_processed(&mut self, item: &ContentItem, content_hash: &str, now: DateTime<Utc>) -> bool {
        let Some(bucket) = Bucket::for_kind(item.kind) else {
            return false;
        };
        self.bucket_mut(bucket).insert(
            item.path.clone(),
            CacheEntry {
                content_hash: content_hash.to_string(),
                modified_at: item.source_modified_at,
                processed_at: now,
            },
        );
        true
    }

    /// Record a downloaded asset under its site path.
    pub fn mark_asset(&mut self, path: &str, content_hash: &str, now: DateTime<Utc>) {
        self.assets.insert(
            path.to_string(),
            CacheEntry {
                content_hash: content_hash.to_string(),
                modified_at: None,
                processed_at: now,
            },
        );
    }

    /// Archive pages need a rebuild when there was never a full build or
    /// the last one is at least `threshold` old.
    pub fn should_rebuild_archives(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        match self.last_full_build_time {
            Some(last) => now - last >= threshold,
            None => true,
        }
    }

    /// Stamp the build times and persist.
    pub fn finalize(&mut self, path: &Path, is_full_build: bool, now: DateTime<Utc>) -> Result<(), CacheError> {
        self.version = CACHE_VERSION;
        self.last_build_time = Some(now);
        if is_full_build {
            self.last_full_build_time = Some(now);
        }
        self.save(path)
    }

    /// Drop every entry and timestamp.
    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    /// Remove post and page entries whose path is not in `current_paths`.
    pub fn remove_stale_entries(&mut self, current_paths: &HashSet<String>) -> usize {
        let mut removed = 0;
        for bucket in [Bucket::Posts, Bucket::Pages] {
            let map = self.bucket_mut(bucket);
            let before = map.len();
            map.retain(|path, _| current_paths.contains(path));
            removed += before - map.len();
        }
        removed
    }

    /// The `limit` most recently processed posts and pages, newest first.
    pub fn recent(&self, limit: usize) -> Vec<(Bucket, &str, &CacheEntry)> {
        let mut all: Vec<(Bucket, &str, &CacheEntry)> = [Bucket::Posts, Bucket::Pages]
            .into_iter()
            .flat_map(|b| self.bucket(b).iter().map(move |(p, e)| (b, p.as_str(), e)))
            .collect();
        all.sort_by(|a, b| b.2.processed_at.cmp(&a.2.processed_at).then(a.1.cmp(b.1)));
        all.truncate(limit);
        all
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            posts: self.posts.len(),
            pages: self.pages.len(),
            assets: self.assets.len(),
            last_build_time: self.last_build_time,
            last_full_build_time: self.last_full_build_time,
        }
    }
}

/// Read a legacy timestamp: naive ISO 8601 without a zone, or RFC 3339.
fn parse_legacy_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

fn migrate_legacy(value: &Value) -> BuildCache {
    let mut cache = BuildCache::empty();
    let epoch = DateTime::<Utc>::UNIX_EPOCH;

    for (key, bucket) in [("posts", Bucket::Posts), ("pages", Bucket::Pages), ("assets", Bucket::Assets)] {
        let Some(entries) = value.get(key).and_then(Value::as_object) else {
            continue;
        };
        for (path, entry) in entries {
            let hash = entry.get("hash").and_then(Value::as_str).unwrap_or_default();
            let modified = entry
                .get("modified")
                .and_then(Value::as_str)
                .and_then(parse_wp_datetime);
            let processed = entry
                .get("processed")
                .and_then(Value::as_str)
                .and_then(parse_legacy_time)
                .unwrap_or(epoch);
            cache.bucket_mut(bucket).insert(
                path.clone(),
                CacheEntry {
                    content_hash: hash.to_string(),
                    modified_at: modified,
                    processed_at: processed,
                },
            );
        }
    }
    cache.last_build_time = value
        .get("last_build_time")
        .and_then(Value::as_str)
        .and_then(parse_legacy_time);
    cache.last_full_build_time = value
        .get("last_full_build")
        .and_then(Value::as_str)
        .and_then(parse_legacy_time);
    cache
}

/// SHA-256 of arbitrary content, as a hex string.
pub fn hash_content(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Entry counts and timestamps, for `cache stats` and the build summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub posts: usize,
    pub pages: usize,
    pub assets: usize,
    pub last_build_time: Option<DateTime<Utc>>,
    pub last_full_build_time: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn total(&self) -> usize {
        self.posts + self.pages + self.assets
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} posts, {} pages, {} assets ({} total)",
            self.posts,
            self.pages,
            self.assets,
            self.total()
        )
    }
}
