//! Client for the WordPress REST API (`/wp-json/wp/v2/...`).
//!
//! Listings are paginated with `per_page=100&page=N` until a short or empty
//! page. Status handling:
//!
//! | Response                       | Result                        |
//! |--------------------------------|-------------------------------|
//! | 401 / 403 on any page          | [`ApiError::Unauthorized`]    |
//! | other non-2xx on page 1        | [`ApiError::Listing`]         |
//! | other non-2xx on a later page  | end of listing                |
//! | transport error                | [`ApiError::Transport`]       |
//!
//! WordPress answers 400 for a page past the last one, which is why only
//! the first page is allowed to fail loudly.

use crate::http::{Transport, TransportError};
use crate::types::{ContentItem, ContentKind, normalize_path};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// Page size for every listing request.
pub const PER_PAGE: usize = 100;

/// How many candidates the related-posts query asks for. One may be the
/// current post, which leaves three to show.
const RELATED_QUERY_SIZE: usize = 4;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication failed for {endpoint} (HTTP {status})")]
    Unauthorized { endpoint: String, status: u16 },
    #[error("Listing {endpoint} failed with HTTP {status}")]
    Listing { endpoint: String, status: u16 },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    Url(String),
}

/// `{ "rendered": "..." }` wrapper used for titles and content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rendered {
    #[serde(default)]
    pub rendered: String,
}

/// A post or page as returned by the listing endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEntry {
    pub id: u64,
    pub link: String,
    #[serde(default)]
    pub title: Rendered,
    #[serde(default)]
    pub modified_gmt: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
}

impl ApiEntry {
    /// Last modification in UTC: `modified_gmt`, else `modified` read as UTC.
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_gmt
            .as_deref()
            .and_then(parse_wp_datetime)
            .or_else(|| self.modified.as_deref().and_then(parse_wp_datetime))
    }
}

/// A category or tag.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiTerm {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub link: String,
    #[serde(default)]
    pub count: u64,
}

/// A related post candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedPost {
    pub title: String,
    pub link: String,
}

/// Which taxonomy a term listing reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Taxonomy {
    Categories,
    Tags,
}

impl Taxonomy {
    fn endpoint(self) -> &'static str {
        match self {
            Taxonomy::Categories => "categories",
            Taxonomy::Tags => "tags",
        }
    }

    fn kind(self) -> ContentKind {
        match self {
            Taxonomy::Categories => ContentKind::CategoryArchive,
            Taxonomy::Tags => ContentKind::TagArchive,
        }
    }
}

/// Source of related posts for the injection pass.
///
/// Behind a trait so transform tests can run without any API.
pub trait RelatedSource: Sync {
    /// Posts sharing the category with the given slug, most recent first.
    fn related(&self, category_slug: &str) -> Result<Vec<RelatedPost>, ApiError>;
}

/// Build an endpoint URL with query parameters.
pub fn endpoint_url(base: &str, endpoint: &str, params: &[(&str, String)]) -> Result<String, ApiError> {
    let raw = format!("{}/wp-json/wp/v2/{}", base.trim_end_matches('/'), endpoint);
    reqwest::Url::parse_with_params(&raw, params.iter().map(|(k, v)| (*k, v.as_str())))
        .map(|u| u.to_string())
        .map_err(|e| ApiError::Url(format!("{raw}: {e}")))
}

/// Parse the API's zone-less `2024-03-01T10:00:00` timestamps as UTC.
pub fn parse_wp_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

/// Site path of an item link: the source prefix removed, or the URL path
/// when the link points at another host.
pub fn link_path(link: &str, source: &str) -> String {
    let source = source.trim_end_matches('/');
    if let Some(rest) = link.strip_prefix(source) {
        if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') {
            return normalize_path(rest);
        }
    }
    match reqwest::Url::parse(link) {
        Ok(url) => normalize_path(url.path()),
        Err(_) => normalize_path(link),
    }
}

/// WordPress REST API client bound to one source site.
pub struct ContentApi<'a> {
    transport: &'a dyn Transport,
    source: String,
    /// Related-post lookups keyed by category slug, shared by all workers.
    related_cache: Mutex<HashMap<String, Vec<RelatedPost>>>,
}

impl<'a> ContentApi<'a> {
    pub fn new(transport: &'a dyn Transport, source: &str) -> Self {
        Self {
            transport,
            source: source.trim_end_matches('/').to_string(),
            related_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fetch every page of a listing.
    pub fn paginate(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Vec<Value>, ApiError> {
        let mut all = Vec::new();
        let mut page = 1usize;
        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            query.extend(params.iter().cloned());
            let url = endpoint_url(&self.source, endpoint, &query)?;
            let response = self.transport.get(&url)?;

            if response.status == 401 || response.status == 403 {
                return Err(ApiError::Unauthorized {
                    endpoint: endpoint.to_string(),
                    status: response.status,
                });
            }
            if !response.is_success() {
                if page == 1 {
                    return Err(ApiError::Listing {
                        endpoint: endpoint.to_string(),
                        status: response.status,
                    });
                }
                debug!(endpoint, page, status = response.status, "listing ended");
                break;
            }

            let batch: Vec<Value> = serde_json::from_slice(&response.body)?;
            let len = batch.len();
            all.extend(batch);
            if len < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    fn list_entries(
        &self,
        endpoint: &str,
        kind: ContentKind,
        modified_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<ContentItem>, ApiError> {
        let mut params = vec![("status", "publish".to_string())];
        if let Some(after) = modified_after {
            params.push((
                "modified_after",
                after.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        let mut items = Vec::new();
        for value in self.paginate(endpoint, &params)? {
            let entry: ApiEntry = serde_json::from_value(value)?;
            let path = link_path(&entry.link, &self.source);
            items.push(ContentItem::new(path, kind).with_modified(entry.modified_at()));
        }
        Ok(items)
    }

    /// Published posts, optionally only those modified after a timestamp.
    pub fn list_posts(&self, modified_after: Option<DateTime<Utc>>) -> Result<Vec<ContentItem>, ApiError> {
        self.list_entries("posts", ContentKind::Post, modified_after)
    }

    /// Published pages, optionally only those modified after a timestamp.
    pub fn list_pages(&self, modified_after: Option<DateTime<Utc>>) -> Result<Vec<ContentItem>, ApiError> {
        self.list_entries("pages", ContentKind::Page, modified_after)
    }

    /// Archive pages of every term with at least one published item.
    pub fn list_terms(&self, taxonomy: Taxonomy) -> Result<Vec<ContentItem>, ApiError> {
        let mut items = Vec::new();
        for value in self.paginate(taxonomy.endpoint(), &[])? {
            let term: ApiTerm = serde_json::from_value(value)?;
            if term.count == 0 {
                continue;
            }
            items.push(ContentItem::new(
                link_path(&term.link, &self.source),
                taxonomy.kind(),
            ));
        }
        Ok(items)
    }

    /// Every media file URL, including all generated size variants.
    pub fn list_media(&self) -> Result<Vec<String>, ApiError> {
        let mut urls = Vec::new();
        for media in self.paginate("media", &[])? {
            if let Some(url) = media.get("source_url").and_then(Value::as_str) {
                urls.push(url.to_string());
            }
            let sizes = media
                .get("media_details")
                .and_then(|d| d.get("sizes"))
                .and_then(Value::as_object);
            if let Some(sizes) = sizes {
                for size in sizes.values() {
                    if let Some(url) = size.get("source_url").and_then(Value::as_str) {
                        urls.push(url.to_string());
                    }
                }
            }
        }
        Ok(urls)
    }

    fn lookup_related(&self, category_slug: &str) -> Result<Vec<RelatedPost>, ApiError> {
        let url = endpoint_url(&self.source, "categories", &[("slug", category_slug.to_string())])?;
        let response = self.transport.get(&url)?;
        if !response.is_success() {
            return Ok(Vec::new());
        }
        let terms: Vec<ApiTerm> = serde_json::from_slice(&response.body)?;
        let Some(term) = terms.first() else {
            return Ok(Vec::new());
        };

        let url = endpoint_url(
            &self.source,
            "posts",
            &[
                ("categories", term.id.to_string()),
                ("per_page", RELATED_QUERY_SIZE.to_string()),
                ("_fields", "id,title,link".to_string()),
            ],
        )?;
        let response = self.transport.get(&url)?;
        if !response.is_success() {
            return Ok(Vec::new());
        }
        let entries: Vec<ApiEntry> = serde_json::from_slice(&response.body)?;
        Ok(entries
            .into_iter()
            .map(|e| RelatedPost {
                title: e.title.rendered,
                link: e.link,
            })
            .collect())
    }
}

impl RelatedSource for ContentApi<'_> {
    fn related(&self, category_slug: &str) -> Result<Vec<RelatedPost>, ApiError> {
        if let Ok(cache) = self.related_cache.lock() {
            if let Some(hit) = cache.get(category_slug) {
                return Ok(hit.clone());
            }
        }
        let posts = self.lookup_related(category_slug)?;
        if let Ok(mut cache) = self.related_cache.lock() {
            cache.insert(category_slug.to_string(), posts.clone());
        }
        Ok(posts)
    }
}
