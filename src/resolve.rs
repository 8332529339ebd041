//! Asset resolver: dedup, download, guard and persist referenced files.
//!
//! ```text
//! refs from all pages ─▶ plan (dedup by destination path)
//!                           │
//!                           ▼
//!                 wave: parallel download ──▶ stylesheet? ─▶ url() refs
//!                           ▲                                   │
//!                           └──────── plan (same seen set) ◀────┘
//! ```
//!
//! The same file referenced as `https://wp/a.jpg`, `/a.jpg` and
//! `https://wp/a.jpg?ver=2` has one destination and is fetched once per run.
//!
//! ## Content-type guard
//!
//! Protected WordPress installs answer asset requests with a login page.
//! Writing that HTML to `style.css` would silently break the mirror, so:
//!
//! | asset  | accepted content type          |
//! |--------|--------------------------------|
//! | `.css` | `text/css`                     |
//! | `.js`  | `javascript` or `text/plain`   |
//! | other  | anything but `text/html`       |
//!
//! and CSS/JS bodies that start like an HTML document are rejected too.

use crate::cache::hash_content;
use crate::http::Transport;
use crate::transform::urls::{css_urls, relativize_css};
use crate::writer;
use rayon::prelude::*;
use reqwest::Url;
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

/// How many leading bytes are checked for an HTML document.
const HTML_SNIFF_BYTES: usize = 200;

/// Failure reason for work not started before the build deadline.
pub const DEADLINE_EXCEEDED: &str = "build deadline exceeded";

/// Directories whose absolute URLs stylesheets reference for fonts/images.
const STATIC_PREFIXES: &[&str] = &["/wp-content/", "/wp-includes/"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetJob {
    /// Absolute source URL to request.
    pub url: String,
    /// Root-relative destination, query dropped.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetStatus {
    Downloaded { bytes: u64, hash: String },
    /// Destination already on disk (incremental builds).
    Exists,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetOutcome {
    pub url: String,
    pub path: String,
    pub status: AssetStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Stylesheet,
    Script,
    Other,
}

impl AssetKind {
    pub fn of(path: &str) -> AssetKind {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".css") {
            AssetKind::Stylesheet
        } else if lower.ends_with(".js") {
            AssetKind::Script
        } else {
            AssetKind::Other
        }
    }
}

pub struct ResolveOptions<'a> {
    pub source: &'a str,
    pub target: &'a str,
    pub output_dir: &'a Path,
    pub skip_existing: bool,
    pub deadline: Option<Instant>,
}

fn host(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_ascii_lowercase)
}

// =============================================================================
// Planning
// =============================================================================

/// Dedups asset references across the whole run.
pub struct AssetPlanner {
    source: String,
    hosts: [Option<String>; 2],
    seen: HashSet<String>,
}

impl AssetPlanner {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.trim_end_matches('/').to_string(),
            hosts: [host(source), host(target)],
            seen: HashSet::new(),
        }
    }

    /// Destination path of a URL on the source or target host.
    pub fn destination(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let url_host = parsed.host_str()?.to_ascii_lowercase();
        if !self.hosts.iter().flatten().any(|h| *h == url_host) {
            return None;
        }
        let path = parsed.path();
        (path.len() > 1 && !path.ends_with('/')).then(|| path.to_string())
    }

    /// New jobs for URLs whose destination was not planned before.
    pub fn plan<I, S>(&mut self, urls: I) -> Vec<AssetJob>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut jobs = Vec::new();
        for url in urls {
            let url = url.as_ref();
            let Some(path) = self.destination(url) else {
                tracing::debug!(url, "not a mirrorable asset");
                continue;
            };
            if !self.seen.insert(path.clone()) {
                continue;
            }
            let query = Url::parse(url)
                .ok()
                .and_then(|u| u.query().map(|q| format!("?{q}")))
                .unwrap_or_default();
            jobs.push(AssetJob {
                url: format!("{}{path}{query}", self.source),
                path,
            });
        }
        jobs.sort_by(|a, b| a.path.cmp(&b.path));
        jobs
    }

    pub fn planned(&self) -> usize {
        self.seen.len()
    }
}

// =============================================================================
// Guard and stylesheet rewrite
// =============================================================================

fn looks_like_html(body: &[u8]) -> bool {
    let head = &body[..body.len().min(HTML_SNIFF_BYTES)];
    let head = String::from_utf8_lossy(head).trim_start().to_ascii_lowercase();
    head.starts_with("<!doctype") || head.contains("<html")
}

/// Reject payloads that cannot be the asset that was asked for.
pub fn check_payload(kind: AssetKind, content_type: &str, body: &[u8]) -> Result<(), String> {
    let ct = content_type.to_ascii_lowercase();
    let html = ct.contains("text/html");
    match kind {
        AssetKind::Stylesheet if html || looks_like_html(body) => {
            Err("HTML returned instead of CSS".to_string())
        }
        AssetKind::Stylesheet if !ct.contains("text/css") => Err(format!("wrong content type: {content_type}")),
        AssetKind::Script if html || looks_like_html(body) => Err("HTML returned instead of JS".to_string()),
        AssetKind::Script if !ct.contains("javascript") && !ct.contains("text/plain") => {
            Err(format!("wrong content type: {content_type}"))
        }
        AssetKind::Other if html => Err("HTML returned instead of a file".to_string()),
        _ => Ok(()),
    }
}

/// Make a downloaded stylesheet self-hosted: source and target
/// `/wp-content/` and `/wp-includes/` prefixes and `url(<source>...)`
/// become root-relative. Returns the new text and the absolute source URLs
/// it references.
pub fn rewrite_stylesheet(css: &str, stylesheet_url: &str, source: &str, target: &str) -> (String, Vec<String>) {
    let mut out = css.to_string();
    for origin in [source, target] {
        for prefix in STATIC_PREFIXES {
            out = out.replace(&format!("{origin}{prefix}"), prefix);
        }
    }
    if let Some(relative) = relativize_css(&out, source) {
        out = relative;
    }
    let refs = stylesheet_references(&out, stylesheet_url);
    (out, refs)
}

/// Absolute URLs of the `url()` references in `css`, resolved against the
/// stylesheet's own URL.
pub fn stylesheet_references(css: &str, stylesheet_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(stylesheet_url) else {
        return Vec::new();
    };
    css_urls(css)
        .into_iter()
        .filter(|raw| !raw.starts_with("data:") && !raw.starts_with('#'))
        .filter_map(|raw| base.join(raw).ok())
        .map(|mut url| {
            url.set_fragment(None);
            url.to_string()
        })
        .collect()
}

// =============================================================================
// Download
// =============================================================================

/// Fetch and persist one asset. Also returns the URLs a stylesheet references.
pub fn download(transport: &dyn Transport, job: &AssetJob, opts: &ResolveOptions<'_>) -> (AssetOutcome, Vec<String>) {
    let outcome = |status| AssetOutcome {
        url: job.url.clone(),
        path: job.path.clone(),
        status,
    };
    if opts.deadline.is_some_and(|d| Instant::now() >= d) {
        return (outcome(AssetStatus::Failed(DEADLINE_EXCEEDED.into())), Vec::new());
    }
    let dest = match writer::asset_path(opts.output_dir, &job.path) {
        Ok(dest) => dest,
        Err(e) => return (outcome(AssetStatus::Failed(e.to_string())), Vec::new()),
    };
    if opts.skip_existing && dest.exists() {
        return (outcome(AssetStatus::Exists), Vec::new());
    }

    let response = match transport.get(&job.url) {
        Ok(r) if r.is_success() => r,
        Ok(r) => return (outcome(AssetStatus::Failed(format!("HTTP {}", r.status))), Vec::new()),
        Err(e) => return (outcome(AssetStatus::Failed(e.to_string())), Vec::new()),
    };
    let kind = AssetKind::of(&job.path);
    if let Err(reason) = check_payload(kind, &response.content_type, &response.body) {
        tracing::warn!(url = %job.url, %reason, "asset rejected");
        return (outcome(AssetStatus::Failed(reason)), Vec::new());
    }

    let (bytes, refs) = match kind {
        AssetKind::Stylesheet => {
            let (css, refs) = rewrite_stylesheet(&response.text(), &job.url, opts.source, opts.target);
            (css.into_bytes(), refs)
        }
        _ => (response.body, Vec::new()),
    };
    match writer::write_file(&dest, &bytes) {
        Ok(size) => (
            outcome(AssetStatus::Downloaded {
                bytes: size,
                hash: hash_content(&bytes),
            }),
            refs,
        ),
        Err(e) => (outcome(AssetStatus::Failed(e.to_string())), Vec::new()),
    }
}

/// Download every planned job and whatever their stylesheets reference,
/// wave by wave, on `pool`. `on_done` sees each outcome as it completes.
pub fn resolve(
    transport: &dyn Transport,
    pool: &rayon::ThreadPool,
    planner: &mut AssetPlanner,
    initial: Vec<AssetJob>,
    opts: &ResolveOptions<'_>,
    on_done: &(dyn Fn(&AssetOutcome) + Sync),
) -> Vec<AssetOutcome> {
    let mut outcomes = Vec::new();
    let mut wave = initial;
    let mut depth = 0;
    while !wave.is_empty() {
        tracing::debug!(depth, jobs = wave.len(), "asset wave");
        let results: Vec<(AssetOutcome, Vec<String>)> = pool.install(|| {
            wave.par_iter()
                .map(|job| {
                    let result = download(transport, job, opts);
                    on_done(&result.0);
                    result
                })
                .collect()
        });
        let mut follow_ups = Vec::new();
        for (outcome, refs) in results {
            outcomes.push(outcome);
            follow_ups.extend(refs);
        }
        wave = planner.plan(follow_ups);
        depth += 1;
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::MockTransport;
    use crate::test_helpers::{SOURCE, TARGET};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn opts(dir: &Path, skip_existing: bool) -> ResolveOptions<'_> {
        ResolveOptions {
            source: SOURCE,
            target: TARGET,
            output_dir: dir,
            skip_existing,
            deadline: None,
        }
    }

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    fn run(mock: &MockTransport, dir: &Path, urls: &[String], skip_existing: bool) -> Vec<AssetOutcome> {
        let mut planner = AssetPlanner::new(SOURCE, TARGET);
        let jobs = planner.plan(urls);
        let seen = Mutex::new(0usize);
        let outcomes = resolve(mock, &pool(), &mut planner, jobs, &opts(dir, skip_existing), &|_| {
            *seen.lock().unwrap() += 1;
        });
        assert_eq!(*seen.lock().unwrap(), outcomes.len());
        outcomes
    }

    // =========================================================================
    // Planning
    // =========================================================================

    #[test]
    fn same_file_planned_once() {
        let mut planner = AssetPlanner::new(SOURCE, TARGET);
        let jobs = planner.plan([
            format!("{SOURCE}/wp-content/uploads/a.jpg"),
            format!("{SOURCE}/wp-content/uploads/a.jpg?ver=2"),
            format!("{TARGET}/wp-content/uploads/a.jpg"),
        ]);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].path, "/wp-content/uploads/a.jpg");
        assert!(planner.plan([format!("{SOURCE}/wp-content/uploads/a.jpg")]).is_empty());
    }

    #[test]
    fn foreign_hosts_and_directories_are_skipped() {
        let mut planner = AssetPlanner::new(SOURCE, TARGET);
        let jobs = planner.plan([
            "https://cdn.other/a.jpg".to_string(),
            format!("{SOURCE}/"),
            format!("{SOURCE}/dir/"),
        ]);
        assert!(jobs.is_empty());
    }

    #[test]
    fn query_is_kept_for_the_request() {
        let mut planner = AssetPlanner::new(SOURCE, TARGET);
        let jobs = planner.plan([format!("{TARGET}/wp-includes/a.js?ver=6.5")]);
        assert_eq!(jobs[0].url, format!("{SOURCE}/wp-includes/a.js?ver=6.5"));
    }

    // =========================================================================
    // Guard
    // =========================================================================

    #[test]
    fn css_requires_css_type() {
        assert!(check_payload(AssetKind::Stylesheet, "text/css; charset=utf-8", b"a{}").is_ok());
        assert!(check_payload(AssetKind::Stylesheet, "text/html", b"a{}").is_err());
        assert!(check_payload(AssetKind::Stylesheet, "text/css", b"  <!DOCTYPE html><html>").is_err());
        assert!(check_payload(AssetKind::Stylesheet, "application/octet-stream", b"a{}").is_err());
    }

    #[test]
    fn js_accepts_plain_text() {
        assert!(check_payload(AssetKind::Script, "application/javascript", b"x()").is_ok());
        assert!(check_payload(AssetKind::Script, "text/plain", b"x()").is_ok());
        assert!(check_payload(AssetKind::Script, "text/html", b"<html>").is_err());
    }

    #[test]
    fn images_reject_only_html() {
        assert!(check_payload(AssetKind::Other, "image/jpeg", b"\xff\xd8").is_ok());
        assert!(check_payload(AssetKind::Other, "", b"\xff\xd8").is_ok());
        assert!(check_payload(AssetKind::Other, "text/html", b"<html>").is_err());
    }

    // =========================================================================
    // Stylesheets
    // =========================================================================

    #[test]
    fn stylesheet_urls_become_root_relative() {
        let css = format!(
            "@font-face{{src:url('{SOURCE}/wp-content/fonts/inter.woff2')}} .a{{background:url({TARGET}/wp-includes/x.png)}} .b{{background:url(../img/b.png)}}"
        );
        let sheet = format!("{SOURCE}/wp-content/themes/t/css/main.css");
        let (out, refs) = rewrite_stylesheet(&css, &sheet, SOURCE, TARGET);
        assert!(!out.contains(SOURCE));
        assert!(!out.contains(TARGET));
        assert!(out.contains("url('/wp-content/fonts/inter.woff2')"));
        assert!(out.contains("url(../img/b.png)"));
        assert_eq!(
            refs,
            vec![
                format!("{SOURCE}/wp-content/fonts/inter.woff2"),
                format!("{SOURCE}/wp-includes/x.png"),
                format!("{SOURCE}/wp-content/themes/t/img/b.png"),
            ]
        );
    }

    #[test]
    fn data_uris_are_not_references() {
        let refs = stylesheet_references("a{background:url(data:image/png;base64,AA)}", &format!("{SOURCE}/a.css"));
        assert!(refs.is_empty());
    }

    // =========================================================================
    // Download waves
    // =========================================================================

    #[test]
    fn stylesheet_fonts_download_in_second_wave() {
        let tmp = TempDir::new().unwrap();
        let mock = MockTransport::new();
        mock.respond(
            &format!("{SOURCE}/wp-content/themes/t/style.css"),
            200,
            "text/css",
            &format!("@font-face{{src:url({SOURCE}/wp-content/fonts/a.woff2)}}"),
        );
        mock.respond(&format!("{SOURCE}/wp-content/fonts/a.woff2"), 200, "font/woff2", "WOFF");

        let outcomes = run(&mock, tmp.path(), &[format!("{SOURCE}/wp-content/themes/t/style.css")], false);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| matches!(o.status, AssetStatus::Downloaded { .. })));
        let css = fs::read_to_string(tmp.path().join("wp-content/themes/t/style.css")).unwrap();
        assert_eq!(css, "@font-face{src:url(/wp-content/fonts/a.woff2)}");
        assert!(tmp.path().join("wp-content/fonts/a.woff2").exists());
    }

    #[test]
    fn html_stylesheet_is_failed_and_not_written() {
        let tmp = TempDir::new().unwrap();
        let mock = MockTransport::new();
        mock.html(&format!("{SOURCE}/wp-content/a.css"), "<!DOCTYPE html><html>login</html>");
        let outcomes = run(&mock, tmp.path(), &[format!("{SOURCE}/wp-content/a.css")], false);
        assert!(matches!(&outcomes[0].status, AssetStatus::Failed(r) if r.contains("HTML")));
        assert!(!tmp.path().join("wp-content/a.css").exists());
    }

    #[test]
    fn existing_files_are_skipped_without_request() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("wp-content")).unwrap();
        fs::write(tmp.path().join("wp-content/a.png"), "old").unwrap();
        let mock = MockTransport::new();
        let outcomes = run(&mock, tmp.path(), &[format!("{SOURCE}/wp-content/a.png")], true);
        assert_eq!(outcomes[0].status, AssetStatus::Exists);
        assert!(mock.get_requests().is_empty());
    }

    #[test]
    fn missing_asset_is_failed() {
        let tmp = TempDir::new().unwrap();
        let mock = MockTransport::new();
        let outcomes = run(&mock, tmp.path(), &[format!("{SOURCE}/wp-content/gone.png")], false);
        assert_eq!(outcomes[0].status, AssetStatus::Failed("HTTP 404".into()));
    }

    #[test]
    fn deadline_fails_without_request() {
        let tmp = TempDir::new().unwrap();
        let mock = MockTransport::new();
        let mut options = opts(tmp.path(), false);
        options.deadline = Some(Instant::now());
        let job = AssetJob {
            url: format!("{SOURCE}/a.png"),
            path: "/a.png".into(),
        };
        let (outcome, _) = download(&mock, &job, &options);
        assert!(matches!(outcome.status, AssetStatus::Failed(_)));
        assert!(mock.get_requests().is_empty());
    }
}
