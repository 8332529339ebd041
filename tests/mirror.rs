//! End-to-end mirror runs against an in-memory WordPress site.
//!
//! Drives the public pipeline API the way the CLI does: config from a
//! `config.toml` plus environment, a transport, an output directory and a
//! cache file in a temp dir. Only the transport is fake.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use wp_mirror::api::{PER_PAGE, endpoint_url};
use wp_mirror::cache::BuildCache;
use wp_mirror::config::{SiteConfig, load_config_with_env};
use wp_mirror::http::{HttpResponse, Transport, TransportError};
use wp_mirror::pipeline::{BuildOptions, generate_at};
use wp_mirror::report::METRICS_FILE;

const SOURCE: &str = "https://blog.example.net";
const TARGET: &str = "https://mirror.example.org";

// ============================================================================
// Fake site
// ============================================================================

/// Serves registered URLs, 404 for everything else, and records every GET.
#[derive(Default)]
struct SiteTransport {
    routes: Mutex<HashMap<String, HttpResponse>>,
    requests: Mutex<Vec<String>>,
}

impl SiteTransport {
    fn route(&self, url: &str, content_type: &str, body: impl Into<Vec<u8>>) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            HttpResponse {
                status: 200,
                content_type: content_type.to_string(),
                body: body.into(),
            },
        );
    }

    fn listing(&self, endpoint: &str, extra: &[(&str, String)], entries: Value) {
        let mut params = vec![("per_page", PER_PAGE.to_string()), ("page", "1".to_string())];
        params.extend(extra.iter().cloned());
        let url = endpoint_url(SOURCE, endpoint, &params).unwrap();
        self.route(&url, "application/json", entries.to_string());
    }

    fn fetched(&self, url: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    fn page_fetches(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| !u.contains("/wp-json/") && !u.ends_with("/robots.txt"))
            .count()
    }

    fn reset_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

impl Transport for SiteTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());
        Ok(self.routes.lock().unwrap().get(url).cloned().unwrap_or(HttpResponse {
            status: 404,
            content_type: "text/html".to_string(),
            body: b"not found".to_vec(),
        }))
    }
}

fn page(title: &str, content: &str) -> String {
    let words = "Notes from the workshop about wiring, soldering and patience. ".repeat(10);
    format!(
        r#"<!DOCTYPE html>
<html lang="en"><head><meta charset="UTF-8"><title>{title}</title>
<meta name="generator" content="WordPress 6.5">
<link rel="canonical" href="{SOURCE}/">
</head>
<body class="single">
<main id="inner-wrap"><article class="post"><header class="entry-header"><h1 class="entry-title">{title}</h1></header>
<div class="entry-content"><p>{words}</p>{content}</div></article></main>
</body></html>
"#
    )
}

fn entry(id: u64, path: &str, modified: &str) -> Value {
    json!({
        "id": id,
        "link": format!("{SOURCE}{path}"),
        "title": { "rendered": format!("Entry {id}") },
        "modified": modified,
        "modified_gmt": modified,
    })
}

fn publish() -> Vec<(&'static str, String)> {
    vec![("status", "publish".to_string())]
}

/// Two posts sharing a photo, one page, one category archive.
fn serve_site(transport: &SiteTransport) {
    let photo = format!("{SOURCE}/wp-content/uploads/2024/04/bench.jpg");
    let shared = format!(
        r#"<p><img src="{photo}" alt="Bench"></p><p><a href="{SOURCE}/about/">About</a></p>"#
    );

    transport.listing(
        "posts",
        &publish(),
        json!([
            entry(1, "/2024/04/first-board/", "2024-04-01T09:00:00"),
            entry(2, "/2024/05/second-board/", "2024-05-01T09:00:00"),
        ]),
    );
    transport.listing("pages", &publish(), json!([entry(9, "/about/", "2024-01-01T00:00:00")]));
    transport.listing(
        "categories",
        &[],
        json!([
            { "id": 4, "name": "Electronics", "slug": "electronics", "link": format!("{SOURCE}/category/electronics/"), "count": 2 },
            { "id": 5, "name": "Empty", "slug": "empty", "link": format!("{SOURCE}/category/empty/"), "count": 0 },
        ]),
    );
    transport.listing("tags", &[], json!([]));
    transport.listing("media", &[], json!([]));

    transport.route(&format!("{SOURCE}/"), "text/html; charset=UTF-8", page("Workshop", ""));
    for path in ["/category/", "/tag/"] {
        transport.route(&format!("{SOURCE}{path}"), "text/html", page("Archive", ""));
    }
    transport.route(&format!("{SOURCE}/2024/04/first-board/"), "text/html", page("First Board", &shared));
    transport.route(&format!("{SOURCE}/2024/05/second-board/"), "text/html", page("Second Board", &shared));
    transport.route(&format!("{SOURCE}/about/"), "text/html", page("About", ""));
    transport.route(&format!("{SOURCE}/category/electronics/"), "text/html", page("Electronics", ""));
    transport.route(&photo, "image/jpeg", b"\xFF\xD8\xFFJPEG".to_vec());
}

// ============================================================================
// Workspace
// ============================================================================

struct Workspace {
    tmp: TempDir,
    out: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("config.toml"),
            format!("source_url = \"{SOURCE}\"\n\n[workers]\nfetch = 2\nassets = 2\n"),
        )
        .unwrap();
        let out = tmp.path().join("public");
        Self { tmp, out }
    }

    fn config(&self) -> SiteConfig {
        load_config_with_env(self.tmp.path(), |name| match name {
            "TARGET_DOMAIN" => Some(format!("{TARGET}/")),
            _ => None,
        })
        .unwrap()
    }

    fn cache_path(&self, config: &SiteConfig) -> PathBuf {
        self.tmp.path().join(&config.cache_file)
    }

    fn options(&self, config: &SiteConfig, incremental: bool) -> BuildOptions {
        BuildOptions {
            incremental,
            cache_path: self.cache_path(config),
            events: None,
        }
    }

    fn read(&self, file: &str) -> String {
        fs::read_to_string(self.out.join(file)).unwrap_or_else(|e| panic!("{file}: {e}"))
    }
}

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()
}

fn exists(dir: &Path, file: &str) -> bool {
    dir.join(file).exists()
}

// ============================================================================
// Full build
// ============================================================================

#[test]
fn full_build_produces_a_servable_tree() {
    let ws = Workspace::new();
    let config = ws.config();
    assert_eq!(config.target(), TARGET);
    let transport = SiteTransport::default();
    serve_site(&transport);

    let report = generate_at(&ws.out, &config, &transport, ws.options(&config, true), at(1)).unwrap();

    // home, two essential archives, 2 posts, 1 page, 1 non-empty category
    assert!(report.full_build);
    assert_eq!(report.discovered, 7);
    assert_eq!(report.written, 7);
    assert!(report.is_balanced());
    assert_eq!(report.total_failures(), 0);

    for file in [
        "index.html",
        "2024/04/first-board/index.html",
        "2024/05/second-board/index.html",
        "about/index.html",
        "category/electronics/index.html",
        "wp-content/uploads/2024/04/bench.jpg",
        "sitemap.xml",
        "robots.txt",
        "_headers",
        "feed/index.xml",
        "search-index.json",
        "js/search.js",
        METRICS_FILE,
    ] {
        assert!(exists(&ws.out, file), "{file} missing");
    }
    assert!(!exists(&ws.out, "category/empty/index.html"));
}

#[test]
fn pages_point_at_the_mirror() {
    let ws = Workspace::new();
    let config = ws.config();
    let transport = SiteTransport::default();
    serve_site(&transport);
    generate_at(&ws.out, &config, &transport, ws.options(&config, false), at(1)).unwrap();

    let post = ws.read("2024/04/first-board/index.html");
    assert!(post.contains(&format!(r#"href="{TARGET}/about/""#)));
    assert!(!post.contains(&format!(r#"href="{SOURCE}/about/""#)));
    assert!(!post.contains("WordPress 6.5"));
    assert_eq!(post.matches(r#"<script src="/js/search.js""#).count(), 1);

    let sitemap = ws.read("sitemap.xml");
    assert!(sitemap.contains(&format!("<loc>{TARGET}/2024/04/first-board/</loc>")));
    assert!(!sitemap.contains(SOURCE));

    assert!(ws.read("robots.txt").contains(&format!("Sitemap: {TARGET}/sitemap.xml")));
}

#[test]
fn shared_asset_is_fetched_once() {
    let ws = Workspace::new();
    let config = ws.config();
    let transport = SiteTransport::default();
    serve_site(&transport);

    let report = generate_at(&ws.out, &config, &transport, ws.options(&config, false), at(1)).unwrap();
    assert_eq!(transport.fetched(&format!("{SOURCE}/wp-content/uploads/2024/04/bench.jpg")), 1);
    assert_eq!(report.assets_downloaded, 1);
    assert_eq!(
        fs::read(ws.out.join("wp-content/uploads/2024/04/bench.jpg")).unwrap(),
        b"\xFF\xD8\xFFJPEG"
    );
}

#[test]
fn feed_and_metrics_describe_the_build() {
    let ws = Workspace::new();
    let config = ws.config();
    let transport = SiteTransport::default();
    serve_site(&transport);

    let report = generate_at(&ws.out, &config, &transport, ws.options(&config, false), at(1)).unwrap();
    assert_eq!(report.artifacts.feed_items, 2);

    let feed = ws.read("feed/index.xml");
    assert!(feed.contains(&format!("{TARGET}/2024/05/second-board/")));
    assert!(!feed.contains("/about/</link>"));

    let metrics: Value = serde_json::from_str(&ws.read(METRICS_FILE)).unwrap();
    assert_eq!(metrics["build_mode"], "full");
    assert_eq!(metrics["urls_discovered"], 7);
    assert_eq!(metrics["feed_items"], 2);
}

// ============================================================================
// Incremental builds
// ============================================================================

#[test]
fn second_run_without_changes_fetches_no_pages() {
    let ws = Workspace::new();
    let config = ws.config();
    let transport = SiteTransport::default();
    serve_site(&transport);
    generate_at(&ws.out, &config, &transport, ws.options(&config, true), at(1)).unwrap();
    let before = ws.read("about/index.html");

    let since = at(1).to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut params = publish();
    params.push(("modified_after", since));
    transport.listing("posts", &params, json!([]));
    transport.listing("pages", &params, json!([]));
    transport.reset_requests();

    let report = generate_at(&ws.out, &config, &transport, ws.options(&config, true), at(1) + chrono::Duration::hours(1)).unwrap();
    assert!(!report.full_build);
    assert_eq!(report.discovered, 0);
    assert_eq!(transport.page_fetches(), 0);
    assert_eq!(ws.read("about/index.html"), before);
    assert!(exists(&ws.out, "sitemap.xml"));

    let cache = BuildCache::load(&ws.cache_path(&config));
    assert_eq!(cache.posts.len(), 2);
    assert_eq!(cache.last_full_build_time, Some(at(1)));
}

#[test]
fn no_incremental_ignores_the_cache() {
    let ws = Workspace::new();
    let config = ws.config();
    let transport = SiteTransport::default();
    serve_site(&transport);
    generate_at(&ws.out, &config, &transport, ws.options(&config, true), at(1)).unwrap();
    transport.reset_requests();

    let report = generate_at(&ws.out, &config, &transport, ws.options(&config, false), at(2)).unwrap();
    assert!(report.full_build);
    assert_eq!(report.discovered, 7);
    assert_eq!(transport.fetched(&format!("{SOURCE}/2024/04/first-board/")), 1);
    assert_eq!(BuildCache::load(&ws.cache_path(&config)).last_full_build_time, Some(at(2)));
}
