//! Site assembler: tree-wide artifacts derived from the finished output.
//!
//! Runs after every page and asset has been written. Each artifact is
//! regenerated on every build, incremental or full, from whatever HTML is
//! on disk at that point.
//!
//! | File                     | Source                                     |
//! |--------------------------|--------------------------------------------|
//! | `_headers`               | config (cache rules, security headers)     |
//! | `_redirects`             | config (www → apex, extra rules)           |
//! | `robots.txt`             | source `robots.txt`, or a default          |
//! | `sitemap.xml`            | every HTML page, `lastmod` from JSON-LD    |
//! | `feed/index.xml`         | `YYYY/MM/slug/` pages, newest first        |
//! | `search-index.json`      | pages with enough text, pretty and `.min`  |
//! | `js/search.js`           | bundled search widget                      |
//! | everything in `static_dir` | copied verbatim into the root, last      |

use crate::config::SiteConfig;
use crate::http::Transport;
use crate::markup::{Parsed, decode_entities, escape_text};
use crate::transform::inject::SEARCH_SCRIPT_SRC;
use crate::transform::{has_type, json_ld_blocks, json_ld_items, perf::GENERATOR, take_chars};
use chrono::{DateTime, NaiveDate, Utc};
use maud::{DOCTYPE, html};
use rayon::prelude::*;
use regex::Regex;
use rss::{ChannelBuilder, GuidBuilder, ItemBuilder};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Pages below this many words stay out of the search index.
const SEARCH_MIN_WORDS: usize = 50;
const SEARCH_DESCRIPTION_CHARS: usize = 200;
const SEARCH_CONTENT_CHARS: usize = 1000;
const FEED_EXCERPT_WORDS: usize = 50;

const SEARCH_JS: &str = include_str!("../static/search.js");

static POST_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}/\d{2}/[^/]+/index\.html$").unwrap());
static ROBOTS_SITEMAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Sitemap:\s*https?://[^\n]+").unwrap());

/// What was produced, for the build report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteArtifacts {
    pub pages: usize,
    pub sitemap_urls: usize,
    pub feed_items: usize,
    pub search_entries: usize,
    pub static_files: usize,
}

/// Write every tree-wide artifact into `output_dir`.
pub fn assemble(output_dir: &Path, config: &SiteConfig, transport: &dyn Transport) -> Result<SiteArtifacts, SiteError> {
    let pages = scan_pages(output_dir)?;

    fs::write(output_dir.join("_headers"), headers_file(config))?;
    fs::write(output_dir.join("_redirects"), redirects_file(config))?;
    fs::write(output_dir.join("robots.txt"), robots_txt(transport, config))?;

    let sitemap = sitemap_xml(&pages, config.target());
    fs::write(output_dir.join("sitemap.xml"), &sitemap.0)?;

    let feed_items = write_feed(output_dir, &pages, config)?;

    let entries = search_index(&pages);
    fs::write(output_dir.join("search-index.json"), serde_json::to_string_pretty(&entries)?)?;
    fs::write(output_dir.join("search-index.min.json"), serde_json::to_string(&entries)?)?;
    write_search_script(output_dir)?;

    let static_files = match &config.static_dir {
        Some(dir) => copy_static_files(dir, output_dir)?,
        None => 0,
    };

    let artifacts = SiteArtifacts {
        pages: pages.len(),
        sitemap_urls: sitemap.1,
        feed_items,
        search_entries: entries.len(),
        static_files,
    };
    info!(
        pages = artifacts.pages,
        sitemap = artifacts.sitemap_urls,
        feed = artifacts.feed_items,
        search = artifacts.search_entries,
        static_files = artifacts.static_files,
        "site artifacts written"
    );
    Ok(artifacts)
}

// =============================================================================
// Page scan
// =============================================================================

/// What the assembler needs from one written HTML file.
#[derive(Debug, Clone, Default)]
pub struct SitePage {
    /// Relative to the output directory, `/`-separated.
    pub file: String,
    /// Root-relative clean URL.
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    /// Visible text without scripts, navigation and footers.
    pub text: String,
    /// Text of the article body, when the page has one.
    pub excerpt_source: Option<String>,
    pub published: Option<DateTime<Utc>>,
    /// Raw `datetime` of the publish time element.
    pub date: Option<String>,
    pub modified: Option<NaiveDate>,
    pub mtime: Option<NaiveDate>,
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub is_redirect: bool,
}

/// `index.html` → `/`, `a/b/index.html` → `/a/b/`, `a/x.html` → `/a/x/`.
pub fn clean_url(file: &str) -> String {
    let stem = file
        .strip_suffix("index.html")
        .map(str::to_string)
        .or_else(|| file.strip_suffix(".html").map(|s| format!("{s}/")))
        .unwrap_or_else(|| file.to_string());
    format!("/{stem}")
}

fn html_files(output_dir: &Path) -> Result<Vec<(String, PathBuf)>, SiteError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(output_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.path().extension().is_none_or(|e| e != "html") {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(output_dir)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((rel, entry.path().to_path_buf()));
    }
    Ok(files)
}

/// Read and summarise every HTML file in the tree.
pub fn scan_pages(output_dir: &Path) -> Result<Vec<SitePage>, SiteError> {
    html_files(output_dir)?
        .par_iter()
        .map(|(rel, path)| -> Result<SitePage, SiteError> {
            let html = fs::read_to_string(path)?;
            let mtime = fs::metadata(path)?
                .modified()
                .ok()
                .map(|t| DateTime::<Utc>::from(t).date_naive());
            let mut page = read_page(rel, &html);
            page.mtime = mtime;
            Ok(page)
        })
        .collect()
}

fn text_of(parsed: &Parsed<'_>, selector: &str) -> Option<String> {
    parsed
        .select_first(selector)
        .map(|i| parsed.text(i))
        .filter(|t| !t.is_empty())
}

fn texts_of(parsed: &Parsed<'_>, selector: &str) -> Vec<String> {
    let mut texts: Vec<String> = parsed
        .select(selector)
        .into_iter()
        .map(|i| parsed.text(i))
        .filter(|t| !t.is_empty())
        .collect();
    texts.dedup();
    texts
}

/// `dateModified` of the page's Article, BlogPosting or WebPage object.
fn structured_modified(parsed: &Parsed<'_>) -> Option<NaiveDate> {
    json_ld_blocks(parsed).iter().find_map(|(_, value)| {
        json_ld_items(value).into_iter().find_map(|item| {
            if !["Article", "BlogPosting", "WebPage"].iter().any(|t| has_type(item, t)) {
                return None;
            }
            let raw = item.get("dateModified")?.as_str()?;
            NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
        })
    })
}

/// Summarise one page. `mtime` is left for the caller.
pub fn read_page(file: &str, html: &str) -> SitePage {
    let parsed = Parsed::parse(html);
    let skipped: Vec<usize> = ["nav", "footer", "header", "aside"]
        .iter()
        .flat_map(|name| parsed.by_name(name).collect::<Vec<_>>())
        .collect();
    let text = parsed
        .select_first("body")
        .map(|b| parsed.text_filtered(b, |i| skipped.contains(&i)))
        .unwrap_or_default();

    let date = parsed
        .select_first("time.published[datetime], time.entry-date[datetime]")
        .and_then(|i| parsed.tag(i).attr("datetime"))
        .map(str::to_string);

    SitePage {
        file: file.to_string(),
        url: clean_url(file),
        title: text_of(&parsed, "h1.entry-title")
            .or_else(|| text_of(&parsed, "title"))
            .unwrap_or_default(),
        description: parsed
            .select_first("meta[name=description]")
            .and_then(|i| parsed.tag(i).attr("content"))
            .map(|d| decode_entities(d.trim()))
            .filter(|d| !d.is_empty()),
        text,
        excerpt_source: text_of(&parsed, ".entry-content"),
        published: date.as_deref().and_then(crate::api::parse_wp_datetime),
        date,
        modified: structured_modified(&parsed),
        mtime: None,
        author: text_of(&parsed, "a.author").or_else(|| text_of(&parsed, ".fn")),
        categories: texts_of(&parsed, "a[href*=/category/]"),
        tags: texts_of(&parsed, "a[href*=/tag/]"),
        is_redirect: parsed.exists("meta[http-equiv=refresh]"),
    }
}

fn first_words(text: &str, n: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= n {
        words.join(" ")
    } else {
        format!("{}...", words[..n].join(" "))
    }
}

// =============================================================================
// Edge configuration
// =============================================================================

pub fn headers_file(config: &SiteConfig) -> String {
    let mut script_src = vec!["'self'", "'unsafe-inline'"];
    let mut connect_src = vec!["'self'"];
    let analytics = config.analytics.plausible_host.as_deref().map(|h| format!("https://{h}"));
    if let Some(host) = analytics.as_deref() {
        script_src.push(host);
        connect_src.push(host);
    }
    if config.comments.repo.is_some() {
        script_src.push("https://utteranc.es");
    }
    let frame_src = [
        "'self'",
        "https://www.youtube-nocookie.com",
        "https://www.youtube.com",
        "https://player.vimeo.com",
        "https://open.spotify.com",
        "https://utteranc.es",
    ];
    let csp = format!(
        "default-src 'self'; script-src {}; style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; font-src 'self' data:; connect-src {}; frame-src {}",
        script_src.join(" "),
        connect_src.join(" "),
        frame_src.join(" "),
    );

    let mut lines = Vec::new();
    for path in ["/*.html", "/"] {
        lines.push(path.to_string());
        lines.push("  Cache-Control: public, max-age=300, must-revalidate".to_string());
        lines.push(String::new());
    }
    for path in ["/wp-content/*", "/wp-includes/*", "/assets/*"] {
        lines.push(path.to_string());
        lines.push("  Cache-Control: public, max-age=31536000, immutable".to_string());
        lines.push(String::new());
    }
    lines.push("/search-index*.json".to_string());
    lines.push("  Cache-Control: public, max-age=3600".to_string());
    lines.push(String::new());
    lines.push("/*".to_string());
    lines.extend(
        [
            "X-Frame-Options: SAMEORIGIN",
            "X-Content-Type-Options: nosniff",
            "X-XSS-Protection: 1; mode=block",
            "Referrer-Policy: strict-origin-when-cross-origin",
            "Strict-Transport-Security: max-age=31536000; includeSubDomains; preload",
            "Permissions-Policy: geolocation=(), microphone=(), camera=(), payment=(), usb=(), magnetometer=(), gyroscope=()",
        ]
        .iter()
        .map(|h| format!("  {h}")),
    );
    lines.push(format!("  Content-Security-Policy: {csp}"));
    lines.join("\n") + "\n"
}

pub fn redirects_file(config: &SiteConfig) -> String {
    let mut lines = Vec::new();
    let host = config.target_host();
    if config.redirects.www_to_apex && !host.is_empty() && !host.starts_with("www.") {
        lines.push(format!("https://www.{host}/* https://{host}/:splat 301"));
    }
    lines.extend(config.redirects.rules.iter().map(|r| r.trim().to_string()).filter(|r| !r.is_empty()));
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

pub fn default_robots(target: &str) -> String {
    format!("User-agent: *\nAllow: /\n\nSitemap: {target}/sitemap.xml\n")
}

/// The source site's `robots.txt` pointed at the mirror, or the default.
pub fn robots_txt(transport: &dyn Transport, config: &SiteConfig) -> String {
    let (source, target) = (config.source(), config.target());
    let url = format!("{source}/robots.txt");
    match transport.get(&url) {
        Ok(r) if r.is_success() && r.content_type.to_ascii_lowercase().contains("text/plain") => {
            let body = r.text().replace(source, target);
            let sitemap = format!("Sitemap: {target}/sitemap.xml");
            let mut body = if ROBOTS_SITEMAP.is_match(&body) {
                ROBOTS_SITEMAP.replace_all(&body, sitemap.as_str()).into_owned()
            } else {
                format!("{}\n\n{sitemap}", body.trim_end())
            };
            if !body.ends_with('\n') {
                body.push('\n');
            }
            body
        }
        Ok(r) => {
            warn!(status = r.status, content_type = %r.content_type, "source robots.txt unusable, writing default");
            default_robots(target)
        }
        Err(e) => {
            warn!(error = %e, "failed to fetch source robots.txt, writing default");
            default_robots(target)
        }
    }
}

// =============================================================================
// Sitemap
// =============================================================================

/// The sitemap document and the number of URLs in it.
pub fn sitemap_xml(pages: &[SitePage], target: &str) -> (String, usize) {
    let mut urls: Vec<(String, Option<NaiveDate>)> = pages
        .iter()
        .filter(|p| !p.is_redirect)
        .map(|p| (format!("{target}{}", p.url), p.modified.or(p.mtime)))
        .collect();
    urls.sort();
    urls.dedup_by(|a, b| a.0 == b.0);

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n");
    for (loc, lastmod) in &urls {
        xml.push_str("  <url>\n");
        xml.push_str(&format!("    <loc>{}</loc>\n", escape_text(loc)));
        if let Some(date) = lastmod {
            xml.push_str(&format!("    <lastmod>{}</lastmod>\n", date.format("%Y-%m-%d")));
        }
        xml.push_str("  </url>\n");
    }
    xml.push_str("</urlset>\n");
    (xml, urls.len())
}

// =============================================================================
// Feed
// =============================================================================

/// Newest-first post pages for the feed.
pub fn feed_pages<'p>(pages: &'p [SitePage], limit: usize) -> Vec<&'p SitePage> {
    let mut posts: Vec<&SitePage> = pages
        .iter()
        .filter(|p| POST_PATH.is_match(&p.file) && !p.is_redirect)
        .collect();
    posts.sort_by(|a, b| b.published.cmp(&a.published).then_with(|| a.file.cmp(&b.file)));
    posts.truncate(limit);
    posts
}

pub fn feed_xml(pages: &[&SitePage], config: &SiteConfig) -> String {
    let target = config.target();
    let fallback_author = Some(config.feed.author.clone()).filter(|a| !a.is_empty());
    let items: Vec<rss::Item> = pages
        .iter()
        .map(|page| {
            let link = format!("{target}{}", page.url);
            let description = page
                .description
                .clone()
                .or_else(|| page.excerpt_source.as_deref().map(|t| first_words(t, FEED_EXCERPT_WORDS)));
            ItemBuilder::default()
                .title(page.title.clone())
                .link(Some(link.clone()))
                .guid(GuidBuilder::default().permalink(true).value(link).build())
                .description(description)
                .pub_date(page.published.map(|d| d.to_rfc2822()))
                .author(page.author.clone().or_else(|| fallback_author.clone()))
                .build()
        })
        .collect();

    let title = if config.feed.title.is_empty() {
        config.target_host().to_string()
    } else {
        config.feed.title.clone()
    };
    let channel = ChannelBuilder::default()
        .title(title)
        .link(target)
        .description(config.feed.description.clone())
        .language(Some("en".to_string()))
        .generator(GENERATOR.to_string())
        .items(items)
        .build();
    channel.to_string()
}

fn feed_redirect_page() -> String {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta http-equiv="refresh" content="0; url=index.xml";
                link rel="canonical" href="index.xml";
                title { "Feed" }
            }
            body {
                p { a href="index.xml" { "RSS feed" } }
            }
        }
    }
    .into_string()
}

fn write_feed(output_dir: &Path, pages: &[SitePage], config: &SiteConfig) -> Result<usize, SiteError> {
    let posts = feed_pages(pages, config.feed.items);
    let dir = output_dir.join("feed");
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("index.xml"), feed_xml(&posts, config))?;
    fs::write(dir.join("index.html"), feed_redirect_page())?;
    Ok(posts.len())
}

// =============================================================================
// Search index
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchEntry {
    pub title: String,
    pub url: String,
    pub description: String,
    pub content: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub date: Option<String>,
}

fn searchable(page: &SitePage) -> bool {
    let title = page.title.to_ascii_lowercase();
    !page.is_redirect
        && !title.is_empty()
        && title != "untitled"
        && !title.contains("page not found")
        && !title.starts_with("404")
        && page.text.split_whitespace().count() >= SEARCH_MIN_WORDS
}

pub fn search_index(pages: &[SitePage]) -> Vec<SearchEntry> {
    pages
        .iter()
        .filter(|p| searchable(p))
        .map(|page| {
            let body = page.excerpt_source.as_deref().unwrap_or(&page.text);
            SearchEntry {
                title: page.title.clone(),
                url: page.url.clone(),
                description: take_chars(page.description.as_deref().unwrap_or(body), SEARCH_DESCRIPTION_CHARS),
                content: take_chars(body, SEARCH_CONTENT_CHARS),
                categories: page.categories.clone(),
                tags: page.tags.clone(),
                date: page.date.clone(),
            }
        })
        .collect()
}

// =============================================================================
// Static files
// =============================================================================

fn write_search_script(output_dir: &Path) -> Result<(), SiteError> {
    let path = output_dir.join(SEARCH_SCRIPT_SRC.trim_start_matches('/'));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, SEARCH_JS)?;
    Ok(())
}

/// Copy every file under `static_dir` into `output_dir`, keeping relative
/// paths. A missing directory copies nothing.
pub fn copy_static_files(static_dir: &Path, output_dir: &Path) -> Result<usize, SiteError> {
    if !static_dir.is_dir() {
        warn!(dir = %static_dir.display(), "static_dir not found, nothing copied");
        return Ok(0);
    }
    let mut copied = 0;
    for entry in WalkDir::new(static_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(static_dir) else {
            continue;
        };
        let dest = output_dir.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &dest)?;
        copied += 1;
    }
    Ok(copied)
}
