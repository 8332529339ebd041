//! Pass 7: loading hints, critical styles and head metadata.
//!
//! ```text
//! <head>
//!   font preloads, analytics hints, stylesheet preloads, critical css   (start)
//!   ...
//!   cache/generator/theme-color meta, favicons, analytics script        (end)
//! </head>
//! ```
//!
//! Inline `<style>` blocks are moved to content-addressed files under
//! `/assets/css/`; identical blocks on different pages share one file.

use super::{Document, ExtractedStyle, TagRewrites, TransformContext, head_end, head_start};
use crate::cache::hash_content;
use crate::config::SiteConfig;
use crate::markup::Parsed;
use maud::html;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Marker content of the generator meta this pass adds.
pub const GENERATOR: &str = "wp-mirror";

const HERO_PATTERNS: &[&str] = &["hero", "banner", "featured-image", "masthead"];
const FEATURED_CONTAINER_PATTERNS: &[&str] = &["entry", "post", "article"];

/// `sizes` for featured thumbnails: near full width on phones, fixed on desktop.
const MOBILE_SIZES: &str = "(max-width: 480px) 95vw, (max-width: 768px) 90vw, 400px";

const CRITICAL_CSS_ID: &str = "critical-css";

/// Element selectors always treated as above the fold.
const BASE_CRITICAL_SELECTORS: &[&str] = &[
    "html", "body", "head", "meta", "link", "h1", "h2", "h3", "p", "a", "img", "header", "nav",
    "main", "article", "section",
];

static CSS_RULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([^{}]+)\{([^{}]+)\}").unwrap());
static CSS_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static CSS_PUNCT_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*([{};:,>])\s*").unwrap());
static PSEUDO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":+[\w-]+(\([^)]*\))?").unwrap());
static ATTRIBUTE_SELECTOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\]]+\]").unwrap());

pub fn annotate(doc: Document, ctx: &mut TransformContext<'_>) -> Document {
    let config = ctx.config;
    let mut extracted = Vec::new();

    let doc = doc.edit(|parsed, edits| {
        let mut tags = TagRewrites::new(parsed);
        let mut at_start = String::new();
        let mut at_end = String::new();

        annotate_images(parsed, &mut tags);

        let critical = if parsed.exists(&format!("style#{CRITICAL_CSS_ID}")) {
            None
        } else {
            critical_css(parsed, config.performance.critical_css_max_bytes)
        };

        let mut stylesheets: Vec<String> = parsed
            .select("link[rel=stylesheet]")
            .into_iter()
            .filter_map(|l| parsed.tag(l).attr("href").map(str::to_string))
            .collect();
        for style in externalizable_styles(parsed, config.performance.inline_style_min_bytes) {
            let css = parsed.inner(style).trim().to_string();
            let path = content_addressed_path(parsed.tag(style).attr("id"), &css);
            edits.replace(
                parsed.outer_range(style),
                html! { link rel="stylesheet" href=(path) media="all"; }.into_string(),
            );
            stylesheets.push(path.clone());
            extracted.push(ExtractedStyle { path, css });
        }

        font_preloads(parsed, config, &mut at_start);
        analytics(parsed, config, &mut tags, &mut at_start, &mut at_end);
        stylesheet_preloads(parsed, &stylesheets, &mut at_start);
        if let Some(css) = critical {
            at_start.push_str(&html! { style id=(CRITICAL_CSS_ID) { (maud::PreEscaped(css)) } }.into_string());
        }

        head_meta(parsed, config, &mut tags, &mut at_end);
        favicons(parsed, &mut at_end);

        tags.flush(edits);
        if let (Some(start), Some(end)) = (head_start(parsed), head_end(parsed)) {
            if !at_start.is_empty() {
                edits.insert(start, at_start);
            }
            if !at_end.is_empty() {
                edits.insert(end, at_end);
            }
        }
    });

    for style in extracted {
        if !ctx.stylesheets.iter().any(|s| s.path == style.path) {
            ctx.stylesheets.push(style);
        }
    }
    doc
}

// =============================================================================
// Images
// =============================================================================

fn class_of(parsed: &Parsed<'_>, idx: usize) -> String {
    parsed.tag(idx).attr("class").unwrap_or("").to_ascii_lowercase()
}

fn is_hero(parsed: &Parsed<'_>, img: usize) -> bool {
    std::iter::once(img)
        .chain(parsed.ancestors(img).take(3))
        .any(|i| {
            let class = class_of(parsed, i);
            HERO_PATTERNS.iter().any(|p| class.contains(p))
        })
}

fn is_featured(parsed: &Parsed<'_>, img: usize) -> bool {
    let class = class_of(parsed, img);
    if class.contains("wp-post-image") || class.contains("post-thumbnail") {
        return true;
    }
    parsed.ancestors(img).take(5).any(|i| {
        let class = class_of(parsed, i);
        FEATURED_CONTAINER_PATTERNS.iter().any(|p| class.contains(p))
    })
}

/// Loading attributes for the image at position `idx`.
fn loading_hints(hero: bool, featured: bool, idx: usize) -> [(&'static str, &'static str); 2] {
    if hero || (featured && idx == 0) {
        [("loading", "eager"), ("fetchpriority", "high")]
    } else if idx < 3 && (featured || idx < 2) {
        [("loading", "eager"), ("decoding", "async")]
    } else {
        [("loading", "lazy"), ("decoding", "async")]
    }
}

fn annotate_images(parsed: &Parsed<'_>, tags: &mut TagRewrites<'_, '_>) {
    let images: Vec<usize> = parsed.by_name("img").collect();
    for (idx, img) in images.into_iter().enumerate() {
        let tag = parsed.tag(img);
        if !tag.has_attr("loading") {
            for (name, value) in loading_hints(is_hero(parsed, img), is_featured(parsed, img), idx) {
                tags.get_mut(img).set_attr(name, value);
            }
        }

        let responsive_thumbnail = tag.has_class("wp-post-image")
            && tag.has_class("attachment-medium_large")
            && tag.attr("srcset").is_some_and(|s| !s.is_empty())
            && tag
                .attr("sizes")
                .is_some_and(|s| s.contains("768px") || s.contains("100vw"));
        if responsive_thumbnail {
            tags.get_mut(img).set_attr("sizes", MOBILE_SIZES);
        }
    }
}

// =============================================================================
// Styles
// =============================================================================

fn externalizable_styles(parsed: &Parsed<'_>, min_bytes: usize) -> Vec<usize> {
    parsed
        .by_name("style")
        .filter(|&i| parsed.tag(i).attr("id") != Some(CRITICAL_CSS_ID))
        .filter(|&i| !parsed.ancestors(i).any(|a| parsed.tag(a).name == "noscript"))
        .filter(|&i| {
            let css = parsed.inner(i).trim();
            !css.is_empty() && css.len() >= min_bytes
        })
        .collect()
}

/// `/assets/css/{id}-{first 8 hex of sha256}.min.css`.
pub fn content_addressed_path(id: Option<&str>, css: &str) -> String {
    let stem: String = id
        .unwrap_or("inline-styles")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    let stem = if stem.is_empty() { "inline-styles".to_string() } else { stem };
    let digest = hash_content(css.as_bytes());
    format!("/assets/css/{stem}-{}.min.css", &digest[..8])
}

/// Selectors of elements likely visible before scrolling.
fn critical_selectors(parsed: &Parsed<'_>) -> HashSet<String> {
    let mut selectors: HashSet<String> = BASE_CRITICAL_SELECTORS.iter().map(|s| s.to_string()).collect();

    let mut elements: Vec<usize> = parsed.select("header, nav");
    if let Some(main) = parsed.select_first("main, article") {
        elements.push(main);
        elements.extend(parsed.elements().filter(|&i| parsed.parent(i) == Some(main)).take(10));
    }

    for idx in elements {
        let tag = parsed.tag(idx);
        selectors.insert(tag.name.clone());
        selectors.extend(tag.classes().map(|c| format!(".{c}")));
        if let Some(id) = tag.attr("id") {
            selectors.insert(format!("#{id}"));
        }
        if let Some(parent) = parsed.parent(idx) {
            selectors.insert(format!("{} {}", parsed.tag(parent).name, tag.name));
        }
    }
    selectors
}

fn is_critical_selector(selector: &str, critical: &HashSet<String>) -> bool {
    let clean = PSEUDO.replace_all(selector, "");
    let clean = ATTRIBUTE_SELECTOR.replace_all(&clean, "");
    clean
        .split(|c: char| c == ',' || c == '>' || c == '+' || c == '~' || c.is_whitespace())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .any(|part| {
            if critical.contains(part) {
                return true;
            }
            if part.starts_with(['.', '#']) {
                return false;
            }
            let element: String = part.chars().filter(char::is_ascii_alphanumeric).collect();
            critical.contains(&element)
        })
}

/// Above-the-fold rules from the page's inline styles, minified and capped.
pub fn critical_css(parsed: &Parsed<'_>, max_bytes: usize) -> Option<String> {
    let critical = critical_selectors(parsed);
    let rules: Vec<String> = parsed
        .by_name("style")
        .flat_map(|style| {
            let css = CSS_COMMENT.replace_all(parsed.inner(style), "").into_owned();
            CSS_RULE
                .captures_iter(&css)
                .filter_map(|caps| {
                    let selector = caps[1].trim();
                    (!selector.starts_with('@') && is_critical_selector(selector, &critical))
                        .then(|| format!("{selector}{{{}}}", caps[2].trim()))
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let mut css = minify_css(&rules.join("\n"));
    if css.len() > max_bytes {
        let mut cut = max_bytes;
        while !css.is_char_boundary(cut) {
            cut -= 1;
        }
        css.truncate(cut);
        match css.rfind('}') {
            Some(last) => css.truncate(last + 1),
            None => css.clear(),
        }
    }
    (!css.is_empty()).then_some(css)
}

pub fn minify_css(css: &str) -> String {
    let css = CSS_COMMENT.replace_all(css, "");
    let collapsed = crate::markup::collapse_whitespace(&css);
    CSS_PUNCT_SPACE.replace_all(&collapsed, "$1").into_owned()
}

// =============================================================================
// Head hints
// =============================================================================

fn has_link(parsed: &Parsed<'_>, rel: &str, href: &str) -> bool {
    parsed
        .by_name("link")
        .any(|l| parsed.tag(l).attr("rel") == Some(rel) && parsed.tag(l).attr("href") == Some(href))
}

fn font_preloads(parsed: &Parsed<'_>, config: &SiteConfig, out: &mut String) {
    for font in &config.performance.font_preloads {
        if !has_link(parsed, "preload", font) {
            out.push_str(
                &html! {
                    link rel="preload" as="font" type="font/woff2" href=(font) crossorigin="anonymous";
                }
                .into_string(),
            );
        }
    }
}

fn stylesheet_preloads(parsed: &Parsed<'_>, hrefs: &[String], out: &mut String) {
    let mut seen = HashSet::new();
    for href in hrefs {
        if !seen.insert(href.as_str()) || has_link(parsed, "preload", href) {
            continue;
        }
        out.push_str(&html! { link rel="preload" as="style" href=(href); }.into_string());
    }
}

fn analytics(
    parsed: &Parsed<'_>,
    config: &SiteConfig,
    tags: &mut TagRewrites<'_, '_>,
    at_start: &mut String,
    at_end: &mut String,
) {
    let Some(host) = config.analytics.plausible_host.as_deref() else {
        return;
    };
    let domain = config.target_host();

    let prefetch = format!("//{host}");
    if !has_link(parsed, "dns-prefetch", &prefetch) {
        at_start.push_str(&html! { link rel="dns-prefetch" href=(prefetch); }.into_string());
    }
    let preconnect = format!("https://{host}");
    if !has_link(parsed, "preconnect", &preconnect) {
        at_start.push_str(&html! { link rel="preconnect" href=(preconnect) crossorigin; }.into_string());
    }

    match parsed.select_first("script[src*=plausible][src*=script.js]") {
        Some(script) => {
            let tag = parsed.tag(script);
            if tag.attr("data-domain") != Some(domain) {
                tags.get_mut(script).set_attr("data-domain", domain);
            }
            if !tag.has_attr("defer") {
                tags.get_mut(script).set_attr("defer", "");
            }
            if tag.has_attr("async") {
                tags.get_mut(script).remove_attr("async");
            }
        }
        None => at_end.push_str(
            &html! {
                script data-domain=(domain) defer src=(format!("https://{host}/js/script.js")) {}
            }
            .into_string(),
        ),
    }
}

fn head_meta(parsed: &Parsed<'_>, config: &SiteConfig, tags: &mut TagRewrites<'_, '_>, out: &mut String) {
    if !parsed.exists("meta[http-equiv=Cache-Control]") {
        out.push_str(&html! { meta http-equiv="Cache-Control" content="max-age=86400"; }.into_string());
    }
    let ours = parsed
        .select("meta[name=generator]")
        .into_iter()
        .any(|m| parsed.tag(m).attr("content") == Some(GENERATOR));
    if !ours {
        out.push_str(&html! { meta name="generator" content=(GENERATOR); }.into_string());
    }

    let color = config.performance.theme_color.as_str();
    match parsed.select_first("meta[name=theme-color]") {
        Some(meta) if parsed.tag(meta).attr("content") != Some(color) => {
            tags.get_mut(meta).set_attr("content", color);
        }
        Some(_) => {}
        None => out.push_str(&html! { meta name="theme-color" content=(color); }.into_string()),
    }
}

fn favicons(parsed: &Parsed<'_>, out: &mut String) {
    if parsed.exists("link[rel*=icon]") {
        return;
    }
    out.push_str(
        &html! {
            link rel="icon" type="image/x-icon" href="/favicon.ico";
            link rel="icon" type="image/png" sizes="32x32" href="/favicon-32x32.png";
            link rel="icon" type="image/png" sizes="16x16" href="/favicon-16x16.png";
            link rel="apple-touch-icon" sizes="180x180" href="/apple-touch-icon.png";
            link rel="manifest" href="/site.webmanifest";
        }
        .into_string(),
    );
}
