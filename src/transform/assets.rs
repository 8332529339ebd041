//! Pass 1: collect asset references and the article text.
//!
//! Runs before anything is rewritten, so asset URLs are still in their
//! source-domain form. Every candidate is canonicalised to an absolute
//! source URL; the resolver later dedups them by destination path.

use super::inject::SEARCH_SCRIPT_SRC;
use super::{Document, TransformContext, is_root_relative, rebase_url};
use crate::markup::Parsed;
use regex::Regex;
use std::sync::LazyLock;

static BACKGROUND_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"background-image:\s*url\(\s*["']?([^"')]+)["']?\s*\)"#).unwrap()
});

static CACHED_BUNDLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:href|src)="([^"]*(?:wpo-minify|wp-content/cache)[^"]*)""#).unwrap()
});

/// Selectors whose contents never count as article text.
const NON_ARTICLE: &[&str] = &[
    "nav",
    "aside",
    "footer",
    "header",
    "section.related-posts",
    "div.comments-area",
    "div.content-freshness-indicator",
    "span.reading-time",
    "button.copy-code-button",
];

/// Containers tried in order when looking for the article body.
const ARTICLE_CONTAINERS: &[&str] = &[
    "article .entry-content",
    ".entry-content",
    "article",
    ".post-content",
    ".content",
    "main",
];

/// Minimum characters for a container's text to count as an article.
const MIN_ARTICLE_CHARS: usize = 100;

/// Paths the mirror writes itself; never fetched from the source.
const OWN_ASSET_PREFIXES: &[&str] = &["/assets/", SEARCH_SCRIPT_SRC];

fn is_own_asset(path: &str) -> bool {
    OWN_ASSET_PREFIXES.iter().any(|p| path.starts_with(p))
}

pub fn extract(doc: Document, ctx: &mut TransformContext<'_>) -> Document {
    let parsed = Parsed::parse(doc.as_str());
    let source = ctx.source().to_string();
    let target = ctx.target().to_string();
    let mut add = |raw: &str| {
        if let Some(url) = canonical_asset_url(raw, &source, &target) {
            ctx.assets.insert(url);
        }
    };

    for i in parsed.elements() {
        let tag = parsed.tag(i);
        match tag.name.as_str() {
            "img" => {
                for attr in ["src", "data-src"] {
                    tag.attr(attr).into_iter().for_each(&mut add);
                }
                if let Some(srcset) = tag.attr("srcset") {
                    srcset_urls(srcset).for_each(&mut add);
                }
            }
            "link" => {
                let rel = tag.attr("rel").unwrap_or("");
                if rel.split_whitespace().any(|r| r == "stylesheet" || r == "preload") {
                    tag.attr("href").into_iter().for_each(&mut add);
                }
            }
            "script" => tag.attr("src").into_iter().for_each(&mut add),
            "source" => {
                tag.attr("src").into_iter().for_each(&mut add);
                if let Some(srcset) = tag.attr("srcset") {
                    srcset_urls(srcset).for_each(&mut add);
                }
            }
            "video" => {
                for attr in ["src", "poster"] {
                    tag.attr(attr).into_iter().for_each(&mut add);
                }
            }
            "audio" => tag.attr("src").into_iter().for_each(&mut add),
            _ => {}
        }
        if let Some(style) = tag.attr("style") {
            for cap in BACKGROUND_IMAGE.captures_iter(style) {
                add(&cap[1]);
            }
        }
    }

    for cap in CACHED_BUNDLE.captures_iter(doc.as_str()) {
        add(&cap[1]);
    }

    ctx.article_text = article_text(&parsed);
    drop(parsed);
    doc
}

/// URLs of a `srcset` value, descriptors dropped.
pub fn srcset_urls(srcset: &str) -> impl Iterator<Item = &str> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
}

/// Absolute source URL for an asset reference, or `None` when it is not
/// something the mirror should download.
pub fn canonical_asset_url(raw: &str, source: &str, target: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    if rebase_url(raw, source, "").is_some() {
        return Some(raw.to_string());
    }
    if let Some(rebased) = rebase_url(raw, target, source) {
        let path = &rebased[source.len()..];
        return (!is_own_asset(path)).then_some(rebased);
    }
    if is_root_relative(raw) && !is_own_asset(raw) {
        return Some(format!("{source}{raw}"));
    }
    None
}

/// Main article text: tags, scripts and page chrome removed, whitespace
/// collapsed. `None` when no container holds a substantial amount of text.
pub fn article_text(parsed: &Parsed<'_>) -> Option<String> {
    let excluded: Vec<usize> = NON_ARTICLE
        .iter()
        .flat_map(|sel| parsed.select(sel))
        .collect();
    for selector in ARTICLE_CONTAINERS {
        let Some(container) = parsed.select_first(selector) else {
            continue;
        };
        let text = parsed.text_filtered(container, |i| excluded.contains(&i));
        if text.chars().count() > MIN_ARTICLE_CHARS {
            return Some(text);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SOURCE, TARGET, test_config};
    use crate::types::{ContentItem, ContentKind};

    fn run(html: &str) -> (Vec<String>, Option<String>) {
        let config = test_config();
        let item = ContentItem::new("/x/", ContentKind::Page);
        let mut ctx = TransformContext::new(&item, &config);
        let out = extract(Document::new(html), &mut ctx);
        assert_eq!(out.as_str(), html);
        (ctx.assets.into_iter().collect(), ctx.article_text)
    }

    #[test]
    fn collects_absolute_and_root_relative() {
        let html = format!(
            r#"<img src="{SOURCE}/wp-content/uploads/a.jpg"><img src="/wp-content/uploads/a.jpg"><img src="https://cdn.other/x.png">"#
        );
        let (assets, _) = run(&html);
        assert_eq!(assets, vec![format!("{SOURCE}/wp-content/uploads/a.jpg")]);
    }

    #[test]
    fn collects_srcset_candidates() {
        let html = format!(
            r#"<img srcset="{SOURCE}/a-300.jpg 300w, /a-768.jpg 768w"><source srcset="/b.webp 1x">"#
        );
        let (assets, _) = run(&html);
        assert!(assets.contains(&format!("{SOURCE}/a-300.jpg")));
        assert!(assets.contains(&format!("{SOURCE}/a-768.jpg")));
        assert!(assets.contains(&format!("{SOURCE}/b.webp")));
    }

    #[test]
    fn collects_styles_scripts_and_media() {
        let html = r#"<link rel="stylesheet" href="/wp-includes/css/a.css"><link rel="canonical" href="/x/">
<script src="/wp-content/plugins/p.js"></script><video src="/v.mp4" poster="/p.jpg"></video><audio src="/s.mp3"></audio>
<div style="background-image: url('/wp-content/uploads/bg.png')"></div>"#;
        let (assets, _) = run(html);
        assert_eq!(assets.len(), 6);
        assert!(!assets.iter().any(|a| a.ends_with("/x/")));
    }

    #[test]
    fn collects_minified_bundles_from_target_domain() {
        let html = format!(r#"<a href="{TARGET}/wp-content/cache/wpo-minify/1/x.min.css">bundle</a>"#);
        let (assets, _) = run(&html);
        assert_eq!(assets, vec![format!("{SOURCE}/wp-content/cache/wpo-minify/1/x.min.css")]);
    }

    #[test]
    fn skips_data_uris_and_own_assets() {
        let html = r#"<img src="data:image/png;base64,AAAA"><link rel="stylesheet" href="/assets/css/x-12345678.min.css"><img src="//cdn.test/a.png"><script src="/js/search.js" data-cfasync="false"></script>"#;
        let (assets, _) = run(html);
        assert!(assets.is_empty());
    }

    #[test]
    fn article_text_skips_chrome() {
        let body = "word ".repeat(30);
        let html = format!(
            r#"<article><div class="entry-content"><p>{body}</p><nav>menu items</nav><script>var x;</script></div></article>"#
        );
        let (_, text) = run(&html);
        let text = text.unwrap();
        assert_eq!(text.split_whitespace().count(), 30);
        assert!(!text.contains("menu"));
    }

    #[test]
    fn article_text_requires_substance() {
        let (_, text) = run("<article><p>Too short.</p></article>");
        assert!(text.is_none());
    }
}
