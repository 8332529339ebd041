//! Change detection: which items must be (re)generated this run.
//!
//! ```text
//! Full         posts + pages + non-empty terms + essentials
//! Incremental  posts/pages modified after last_build_time
//!              + (archives and essentials, if anything changed
//!                 or the last full build is older than the threshold)
//! ```
//!
//! Archive pages aggregate many items, so when they are rebuilt the full
//! term listings are read again rather than only the deltas.
//!
//! Any listing error aborts discovery. The media listing is the exception:
//! it only feeds the asset set, so its failure is logged and ignored.

use crate::api::{ApiError, ContentApi, Taxonomy};
use crate::cache::BuildCache;
use crate::config::IncrementalConfig;
use crate::types::{ContentItem, ContentKind};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Paths present in every build that rebuilds archives.
pub const ESSENTIAL_PATHS: &[&str] = &["/", "/category/", "/tag/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Full,
    Incremental,
}

impl BuildMode {
    /// Incremental only when asked for and the cache has seen a build.
    pub fn resolve(incremental: bool, cache: &BuildCache) -> BuildMode {
        if incremental && cache.last_build_time.is_some() {
            BuildMode::Incremental
        } else {
            BuildMode::Full
        }
    }

    pub fn is_full(self) -> bool {
        self == BuildMode::Full
    }
}

/// What discovery found.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Deduplicated by path, sorted by path.
    pub items: Vec<ContentItem>,
    /// Media library URLs, fed straight into the asset set.
    pub media: Vec<String>,
    pub archives_rebuilt: bool,
}

impl Discovery {
    pub fn count(&self, kind: ContentKind) -> usize {
        self.items.iter().filter(|i| i.kind == kind).count()
    }
}

/// First occurrence of a path wins.
#[derive(Default)]
struct ItemSet(BTreeMap<String, ContentItem>);

impl ItemSet {
    fn extend(&mut self, items: impl IntoIterator<Item = ContentItem>) {
        for item in items {
            self.0.entry(item.path.clone()).or_insert(item);
        }
    }

    fn add_archives(&mut self, api: &ContentApi<'_>) -> Result<(), ApiError> {
        self.extend(
            ESSENTIAL_PATHS
                .iter()
                .map(|p| ContentItem::new(*p, ContentKind::of_essential(p))),
        );
        self.extend(api.list_terms(Taxonomy::Categories)?);
        self.extend(api.list_terms(Taxonomy::Tags)?);
        Ok(())
    }
}

pub fn discover(
    api: &ContentApi<'_>,
    mode: BuildMode,
    cache: &BuildCache,
    policy: &IncrementalConfig,
    now: DateTime<Utc>,
) -> Result<Discovery, ApiError> {
    let mut items = ItemSet::default();
    let since = match mode {
        BuildMode::Full => None,
        BuildMode::Incremental => cache.last_build_time,
    };

    let posts = api.list_posts(since)?;
    let pages = api.list_pages(since)?;
    let changed = posts.len() + pages.len();
    items.extend(posts);
    items.extend(pages);

    let archives_rebuilt = match since {
        None => true,
        Some(_) if changed > 0 => true,
        Some(_) => cache.should_rebuild_archives(now, policy.archive_rebuild_after()),
    };
    if archives_rebuilt {
        items.add_archives(api)?;
    }

    let media = match api.list_media() {
        Ok(urls) => urls,
        Err(e) => {
            warn!(error = %e, "media listing failed, continuing without it");
            Vec::new()
        }
    };

    let discovery = Discovery {
        items: items.0.into_values().collect(),
        media,
        archives_rebuilt,
    };
    info!(
        ?mode,
        items = discovery.items.len(),
        changed,
        archives = archives_rebuilt,
        media = discovery.media.len(),
        "discovery complete"
    );
    Ok(discovery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::MockTransport;
    use crate::test_helpers::{FakeSite, SOURCE, listing_url, post_json, publish};
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    fn site() -> FakeSite {
        FakeSite::new()
            .post(1, "/2024/01/one/", "2024-01-01T00:00:00")
            .post(2, "/2024/02/two/", "2024-02-01T00:00:00")
            .post(3, "/2024/03/three/", "2024-03-01T00:00:00")
            .page(10, "/about/", "2024-01-05T00:00:00")
            .category(5, "home-lab", "Home Lab", 3)
            .category(6, "empty", "Empty", 0)
    }

    fn cache_built_at(last: DateTime<Utc>, last_full: DateTime<Utc>) -> BuildCache {
        let mut cache = BuildCache::empty();
        cache.last_build_time = Some(last);
        cache.last_full_build_time = Some(last_full);
        cache
    }

    // =========================================================================
    // Mode
    // =========================================================================

    #[test]
    fn incremental_needs_a_previous_build() {
        let empty = BuildCache::empty();
        assert_eq!(BuildMode::resolve(true, &empty), BuildMode::Full);
        let built = cache_built_at(at(1, 0), at(1, 0));
        assert_eq!(BuildMode::resolve(true, &built), BuildMode::Incremental);
        assert_eq!(BuildMode::resolve(false, &built), BuildMode::Full);
    }

    // =========================================================================
    // Full mode
    // =========================================================================

    #[test]
    fn full_discovery_counts() {
        let mock = MockTransport::new();
        site().serve(&mock);
        let api = ContentApi::new(&mock, SOURCE);
        let found = discover(&api, BuildMode::Full, &BuildCache::empty(), &IncrementalConfig::default(), at(2, 0)).unwrap();

        assert_eq!(found.items.len(), 3 + 1 + 1 + 3);
        assert_eq!(found.count(ContentKind::Post), 3);
        assert_eq!(found.count(ContentKind::Page), 1);
        assert_eq!(found.count(ContentKind::CategoryArchive), 2);
        assert!(found.items.iter().any(|i| i.path == "/tag/"));
        assert!(!found.items.iter().any(|i| i.path == "/category/empty/"));
        assert!(found.archives_rebuilt);
    }

    #[test]
    fn duplicate_paths_collapse() {
        let mock = MockTransport::new();
        site().page(11, "/2024/01/one/", "2024-01-01T00:00:00").serve(&mock);
        let api = ContentApi::new(&mock, SOURCE);
        let found = discover(&api, BuildMode::Full, &BuildCache::empty(), &IncrementalConfig::default(), at(2, 0)).unwrap();
        assert_eq!(found.items.iter().filter(|i| i.path == "/2024/01/one/").count(), 1);
    }

    #[test]
    fn unauthorized_listing_aborts() {
        let mock = MockTransport::new();
        site().serve(&mock);
        mock.respond(&listing_url("pages", &publish()), 401, "application/json", "{}");
        let api = ContentApi::new(&mock, SOURCE);
        let err = discover(&api, BuildMode::Full, &BuildCache::empty(), &IncrementalConfig::default(), at(2, 0));
        assert!(matches!(err, Err(ApiError::Unauthorized { .. })));
    }

    #[test]
    fn media_failure_is_not_fatal() {
        let mock = MockTransport::new();
        site().serve(&mock);
        mock.respond(&listing_url("media", &[]), 500, "text/html", "oops");
        let api = ContentApi::new(&mock, SOURCE);
        let found = discover(&api, BuildMode::Full, &BuildCache::empty(), &IncrementalConfig::default(), at(2, 0)).unwrap();
        assert!(found.media.is_empty());
        assert_eq!(found.items.len(), 8);
    }

    // =========================================================================
    // Incremental mode
    // =========================================================================

    #[test]
    fn changed_post_triggers_archives() {
        let mock = MockTransport::new();
        let site = site();
        site.serve(&mock);
        site.serve_changes(&mock, "2024-06-01T00:00:00Z", vec![post_json(2, "/2024/02/two/", "2024-06-01T09:00:00")]);

        let api = ContentApi::new(&mock, SOURCE);
        let cache = cache_built_at(at(1, 0), at(1, 0));
        let found = discover(&api, BuildMode::Incremental, &cache, &IncrementalConfig::default(), at(1, 10)).unwrap();

        let paths: Vec<&str> = found.items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/2024/02/two/", "/category/", "/category/home-lab/", "/tag/"]);
        assert!(found.archives_rebuilt);
    }

    #[test]
    fn nothing_changed_recently_built_is_empty() {
        let mock = MockTransport::new();
        let site = site();
        site.serve(&mock);
        site.serve_changes(&mock, "2024-06-01T00:00:00Z", vec![]);

        let api = ContentApi::new(&mock, SOURCE);
        let cache = cache_built_at(at(1, 0), at(1, 0));
        let found = discover(&api, BuildMode::Incremental, &cache, &IncrementalConfig::default(), at(1, 10)).unwrap();
        assert!(found.items.is_empty());
        assert!(!found.archives_rebuilt);
        assert_eq!(mock.count_matching("/categories"), 0);
    }

    #[test]
    fn stale_full_build_rebuilds_archives() {
        let mock = MockTransport::new();
        let site = site();
        site.serve(&mock);
        site.serve_changes(&mock, "2024-06-03T00:00:00Z", vec![]);

        let api = ContentApi::new(&mock, SOURCE);
        let cache = cache_built_at(at(3, 0), at(1, 0));
        let found = discover(&api, BuildMode::Incremental, &cache, &IncrementalConfig::default(), at(3, 1)).unwrap();
        assert!(found.archives_rebuilt);
        assert_eq!(found.count(ContentKind::Post), 0);
        assert_eq!(found.items.len(), 4);
    }

    #[test]
    fn incremental_term_listing_error_aborts() {
        let mock = MockTransport::new();
        let site = site();
        site.serve(&mock);
        site.serve_changes(&mock, "2024-06-01T00:00:00Z", vec![post_json(2, "/2024/02/two/", "2024-06-01T09:00:00")]);
        mock.respond(&listing_url("tags", &[]), 503, "text/html", "busy");

        let api = ContentApi::new(&mock, SOURCE);
        let cache = cache_built_at(at(1, 0), at(1, 0));
        let err = discover(&api, BuildMode::Incremental, &cache, &IncrementalConfig::default(), at(1, 10));
        assert!(matches!(err, Err(ApiError::Listing { status: 503, .. })));
    }
}
