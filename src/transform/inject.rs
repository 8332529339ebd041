//! Pass 8: auxiliary blocks added to the page.
//!
//! Each block has a marker element, and nothing is added when the marker is
//! already on the page:
//!
//! | block            | marker                              |
//! |------------------|-------------------------------------|
//! | breadcrumbs      | `nav.breadcrumb-navigation`         |
//! | related posts    | `section.related-posts`             |
//! | comments widget  | `section#utterances-comments`       |
//! | freshness        | `div.content-freshness-indicator`   |
//! | reading time     | `span.reading-time`                 |
//! | copy-code button | `div.code-block-wrapper`, `script#copy-code-script` |
//! | search widget    | `script[src="/js/search.js"]`       |

use super::{
    Document, TransformContext, body_classes, body_end, head_end, has_type, json_ld_blocks,
    json_ld_items, rebase_url, script_json, title_case_slug,
};
use crate::api::{RelatedPost, parse_wp_datetime};
use crate::markup::{Edits, Parsed, decode_entities};
use crate::transform::structured::reading_minutes;
use maud::{Markup, PreEscaped, html};
use serde_json::json;

const COPY_CODE_JS: &str = include_str!("../../static/copy-code.js");

/// Where the site assembler writes the search widget.
pub const SEARCH_SCRIPT_SRC: &str = "/js/search.js";

const RELATED_LIMIT: usize = 3;

pub fn inject(doc: Document, ctx: &mut TransformContext<'_>) -> Document {
    let ctx: &TransformContext<'_> = ctx;
    doc.edit(|parsed, edits| {
        let classes = body_classes(parsed);
        breadcrumbs(parsed, ctx, edits);
        related_posts(parsed, ctx, &classes, edits);
        comments(parsed, ctx, &classes, edits);
        freshness(parsed, edits);
        reading_time(parsed, ctx, edits);
        copy_code(parsed, edits);
        search_script(parsed, edits);
    })
}

fn has_any_class(classes: &[String], wanted: &[&str]) -> bool {
    classes.iter().any(|c| wanted.contains(&c.as_str()))
}

// =============================================================================
// Breadcrumbs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    pub name: String,
    pub url: String,
}

impl Crumb {
    fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Trail for the current page, `Home` first.
pub fn breadcrumb_trail(parsed: &Parsed<'_>, ctx: &TransformContext<'_>) -> Vec<Crumb> {
    let target = ctx.target();
    let path = ctx.item.path.as_str();
    let segments = ctx.item.segments();
    let mut trail = vec![Crumb::new("Home", format!("{target}/"))];
    let page_url = format!("{target}{path}");
    let heading = |selector: &str| {
        parsed
            .select_first(selector)
            .map(|h| parsed.text(h))
            .filter(|t| !t.is_empty())
    };

    if let Some(at) = segments.iter().position(|s| *s == "category") {
        if let Some(slug) = segments.get(at + 1) {
            trail.push(Crumb::new(title_case_slug(slug), format!("{target}/category/{slug}/")));
        }
    } else if let Some(at) = segments.iter().position(|s| *s == "tag") {
        trail.push(Crumb::new("Tags", format!("{target}/tag/")));
        if let Some(slug) = segments.get(at + 1) {
            trail.push(Crumb::new(title_case_slug(slug), format!("{target}/tag/{slug}/")));
        }
    } else if segments.len() >= 3 && segments[0].chars().all(|c| c.is_ascii_digit()) {
        if let Some(link) = parsed.select_first("a[rel~=tag][href*=\"/category/\"]") {
            let href = parsed.tag(link).attr("href").unwrap_or_default();
            let url = if href.starts_with("http") {
                href.to_string()
            } else {
                format!("{target}{href}")
            };
            trail.push(Crumb::new(parsed.text(link), url));
        }
        if let Some(title) = heading("h1.entry-title") {
            trail.push(Crumb::new(title, page_url));
        }
    } else if let Some(title) = heading("h1") {
        trail.push(Crumb::new(title, page_url));
    }
    trail
}

pub fn render_breadcrumbs(trail: &[Crumb]) -> Markup {
    let last = trail.len().saturating_sub(1);
    html! {
        nav class="breadcrumb-navigation site-container" aria-label="Breadcrumb" {
            ol class="breadcrumb-list" {
                @for (i, crumb) in trail.iter().enumerate() {
                    li class="breadcrumb-item" {
                        @if i > 0 {
                            span class="breadcrumb-separator" { "/" }
                        }
                        @if i == last {
                            span class="breadcrumb-current" aria-current="page" { (crumb.name) }
                        } @else {
                            a class="breadcrumb-link" href=(crumb.url) { (crumb.name) }
                        }
                    }
                }
            }
        }
    }
}

fn breadcrumb_schema(trail: &[Crumb]) -> Markup {
    let items: Vec<_> = trail
        .iter()
        .enumerate()
        .map(|(i, crumb)| {
            json!({
                "@type": "ListItem",
                "position": i + 1,
                "name": crumb.name,
                "item": crumb.url,
            })
        })
        .collect();
    let schema = json!({
        "@context": "https://schema.org",
        "@type": "BreadcrumbList",
        "itemListElement": items,
    });
    html! { script type="application/ld+json" { (PreEscaped(script_json(&schema))) } }
}

fn breadcrumbs(parsed: &Parsed<'_>, ctx: &TransformContext<'_>, edits: &mut Edits) {
    if ctx.item.is_root() || parsed.exists("nav.breadcrumb-navigation") {
        return;
    }
    let Some(main) = parsed.select_first("main#inner-wrap") else {
        return;
    };
    let trail = breadcrumb_trail(parsed, ctx);
    if trail.len() <= 1 {
        return;
    }
    edits.insert(parsed.inner_range(main).start, render_breadcrumbs(&trail).into_string());
    if let Some(at) = head_end(parsed) {
        edits.insert(at, breadcrumb_schema(&trail).into_string());
    }
}

// =============================================================================
// Related posts
// =============================================================================

/// Slug of the first category the post is filed under.
fn category_slug(parsed: &Parsed<'_>) -> Option<String> {
    parsed
        .select("a[rel~=tag]")
        .into_iter()
        .filter_map(|a| parsed.tag(a).attr("href"))
        .filter_map(|href| href.split_once("/category/"))
        .map(|(_, rest)| rest.trim_matches('/').to_string())
        .find(|slug| !slug.is_empty())
}

pub fn render_related(posts: &[RelatedPost], source: &str, target: &str) -> Markup {
    html! {
        section class="related-posts" {
            h2 { "📚 Related Posts" }
            ul {
                @for post in posts {
                    li {
                        a href=(rebase_url(&post.link, source, target).unwrap_or_else(|| post.link.clone())) {
                            (decode_entities(&post.title))
                        }
                    }
                }
            }
        }
    }
}

fn related_posts(parsed: &Parsed<'_>, ctx: &TransformContext<'_>, classes: &[String], edits: &mut Edits) {
    if !has_any_class(classes, &["single-post", "single"]) || parsed.exists("section.related-posts") {
        return;
    }
    let Some(lookup) = ctx.related else {
        return;
    };
    let Some(slug) = category_slug(parsed) else {
        return;
    };
    let Some(article) = parsed
        .select_first("article .entry-content")
        .and_then(|content| parsed.ancestors(content).find(|&a| parsed.tag(a).name == "article"))
    else {
        return;
    };

    let current = format!("{}{}", ctx.source(), ctx.item.path);
    let posts: Vec<RelatedPost> = match lookup.related(&slug) {
        Ok(posts) => posts
            .into_iter()
            .filter(|p| p.link != current)
            .take(RELATED_LIMIT)
            .collect(),
        Err(e) => {
            tracing::warn!(path = %ctx.item.path, category = %slug, error = %e, "related posts lookup failed");
            return;
        }
    };
    if posts.is_empty() {
        return;
    }

    let markup = render_related(&posts, ctx.source(), ctx.target()).into_string();
    let at = parsed
        .select_within(article, "div#comments")
        .first()
        .map(|&c| parsed.tag(c).start)
        .unwrap_or_else(|| parsed.inner_range(article).end);
    edits.insert(at, markup);
}

// =============================================================================
// Comments
// =============================================================================

fn render_comments(repo: &str, issue_term: &str, theme: &str) -> Markup {
    html! {
        div id="comments" class="comments-area" {
            div class="pb-30" {
                section id="utterances-comments" {
                    script src="https://utteranc.es/client.js" data-repo=(repo) data-issue-term=(issue_term)
                        data-theme=(theme) crossorigin="anonymous" async {}
                }
            }
        }
    }
}

fn comments(parsed: &Parsed<'_>, ctx: &TransformContext<'_>, classes: &[String], edits: &mut Edits) {
    let config = &ctx.config.comments;
    let Some(repo) = config.repo.as_deref() else {
        return;
    };
    if !has_any_class(classes, &["single-post", "single", "page-template", "page"])
        || parsed.exists("section#utterances-comments")
    {
        return;
    }
    let markup = render_comments(repo, &config.issue_term, &config.theme).into_string();

    if let Some(existing) = parsed.select_first("div#comments") {
        edits.replace(parsed.outer_range(existing), markup);
        return;
    }
    let article = parsed.select_first("article");
    let content = parsed.select_first(".entry-content");
    let footer = article
        .filter(|_| content.is_some())
        .and_then(|a| parsed.select_within(a, "footer.entry-footer").first().copied());

    let at = match (footer, content, article) {
        (Some(footer), _, _) => parsed.tag(footer).start,
        (None, Some(content), _) => parsed.outer_range(content).end,
        (None, None, Some(article)) => parsed.outer_range(article).end,
        (None, None, None) => return,
    };
    edits.insert(at, markup);
}

// =============================================================================
// Freshness and reading time
// =============================================================================

/// `datePublished`/`dateModified` of the page's article or web page object.
fn page_dates(parsed: &Parsed<'_>) -> Option<(String, String)> {
    json_ld_blocks(parsed).into_iter().find_map(|(_, value)| {
        json_ld_items(&value)
            .into_iter()
            .filter(|item| has_type(item, "BlogPosting") || has_type(item, "WebPage"))
            .find_map(|item| {
                let published = item.get("datePublished")?.as_str()?;
                let modified = item.get("dateModified")?.as_str()?;
                Some((published.to_string(), modified.to_string()))
            })
    })
}

fn render_freshness(published: &str, modified: &str) -> Option<Markup> {
    let published_at = parse_wp_datetime(published)?;
    let modified_at = parse_wp_datetime(modified)?;
    if published_at.date_naive() == modified_at.date_naive() {
        return None;
    }
    Some(html! {
        div class="content-freshness-indicator" {
            span class="freshness-icon" { "📅" }
            span {
                strong { "Published: " }
                time datetime=(published) { (published_at.format("%B %d, %Y").to_string()) }
                span class="freshness-separator" { "•" }
                strong { "Updated: " }
                time datetime=(modified) { (modified_at.format("%B %d, %Y").to_string()) }
            }
        }
    })
}

fn freshness(parsed: &Parsed<'_>, edits: &mut Edits) {
    if parsed.exists("div.content-freshness-indicator") {
        return;
    }
    let Some(markup) = page_dates(parsed).and_then(|(p, m)| render_freshness(&p, &m)) else {
        return;
    };
    let at = ["header.entry-header", "div.entry-meta", "h1.entry-title"]
        .iter()
        .find_map(|sel| parsed.select_first(sel))
        .map(|i| parsed.outer_range(i).end)
        .or_else(|| parsed.select_first("article").map(|a| parsed.inner_range(a).start));
    if let Some(at) = at {
        edits.insert(at, markup.into_string());
    }
}

/// `1234567` → `1,234,567`.
pub fn with_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn reading_time(parsed: &Parsed<'_>, ctx: &TransformContext<'_>, edits: &mut Edits) {
    if parsed.exists("span.reading-time") {
        return;
    }
    let (Some(words), Some(meta)) = (ctx.word_count(), parsed.select_first("div.entry-meta")) else {
        return;
    };
    let markup = html! {
        span class="reading-time" {
            span { " • " }
            span { "📖" }
            span { (reading_minutes(words)) " min read" }
            span { "(" (with_thousands(words)) " words)" }
        }
    };
    edits.insert(parsed.inner_range(meta).end, markup.into_string());
}

// =============================================================================
// Copy-code buttons
// =============================================================================

fn copy_code(parsed: &Parsed<'_>, edits: &mut Edits) {
    let bare: Vec<usize> = parsed
        .by_name("pre")
        .filter(|&pre| {
            !parsed
                .ancestors(pre)
                .any(|a| parsed.tag(a).name == "pre" || parsed.matches(a, "div.code-block-wrapper"))
        })
        .collect();

    for &pre in &bare {
        edits.insert(
            parsed.tag(pre).start,
            r#"<div class="code-block-wrapper" style="position: relative; margin: 1em 0;">"#,
        );
        edits.insert(
            parsed.outer_range(pre).end,
            html! {
                button class="copy-code-button" type="button" aria-label="Copy code to clipboard" { "📋 Copy" }
            }
            .into_string()
                + "</div>",
        );
    }

    let wrapped = !bare.is_empty() || parsed.exists("div.code-block-wrapper");
    if wrapped
        && !parsed.exists("script#copy-code-script")
        && let Some(at) = body_end(parsed)
    {
        edits.insert(
            at,
            html! { script id="copy-code-script" { (PreEscaped(COPY_CODE_JS)) } }.into_string(),
        );
    }
}

// =============================================================================
// Search widget
// =============================================================================

fn search_script(parsed: &Parsed<'_>, edits: &mut Edits) {
    if parsed.exists(&format!("script[src=\"{SEARCH_SCRIPT_SRC}\"]")) {
        return;
    }
    if let Some(at) = body_end(parsed) {
        edits.insert(
            at,
            html! { script src=(SEARCH_SCRIPT_SRC) data-cfasync="false" {} }.into_string(),
        );
    }
}
