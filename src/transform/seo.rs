//! Pass 6: accessibility and search metadata.
//!
//! Two edit rounds: table headers are restructured first (moving whole
//! rows), then every tag-level fix is applied on the result so a row that
//! moved into a `thead` still gets its images' alt text.

use super::{
    Document, TagRewrites, TransformContext, head_end, is_root_relative, rebase_url, rename,
    take_chars, title_case_slug,
};
use crate::config::SeoConfig;
use crate::markup::{Edits, Parsed, Tag, decode_entities, escape_text};
use crate::types::ContentItem;
use maud::html;
use regex::Regex;
use std::sync::LazyLock;

static ARCHIVE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^-|]+?)(?:\s+Archives)?\s+[-|]").unwrap());

/// Width and height announced for the fallback social image.
const DEFAULT_OG_IMAGE_SIZE: &str = "1024";

pub fn normalize(doc: Document, ctx: &mut TransformContext<'_>) -> Document {
    let ctx: &TransformContext<'_> = ctx;
    doc.edit(add_table_headers).edit(|parsed, edits| {
        let mut tags = TagRewrites::new(parsed);
        let mut head_extra = String::new();

        demote_extra_headings(parsed, &mut tags, edits);
        if ctx.item.is_root() {
            promote_site_title(parsed, &mut tags, edits);
        }
        fill_alt_text(parsed, &mut tags);
        fix_title(parsed, &ctx.config.seo, edits);
        fix_description(parsed, ctx.item, &ctx.config.seo, &mut tags, &mut head_extra);
        absolutize_head_urls(parsed, ctx.source(), ctx.target(), &mut tags);
        add_social_images(parsed, ctx, &tags, &mut head_extra);

        tags.flush(edits);
        if !head_extra.is_empty()
            && let Some(at) = head_end(parsed)
        {
            edits.insert(at, head_extra);
        }
    })
}

// =============================================================================
// Headings and images
// =============================================================================

fn demote_extra_headings(parsed: &Parsed<'_>, tags: &mut TagRewrites<'_, '_>, edits: &mut Edits) {
    let extra: Vec<usize> = parsed.by_name("h1").skip(1).collect();
    for h1 in extra {
        rename(parsed, h1, "h2", tags, edits);
    }
}

fn promote_site_title(parsed: &Parsed<'_>, tags: &mut TagRewrites<'_, '_>, edits: &mut Edits) {
    if parsed.exists("h1") {
        return;
    }
    if let Some(title) = parsed.select_first(".site-title")
        && parsed.outer_range(title).end > parsed.inner_range(title).end
    {
        rename(parsed, title, "h1", tags, edits);
    }
}

fn fill_alt_text(parsed: &Parsed<'_>, tags: &mut TagRewrites<'_, '_>) {
    for img in parsed.by_name("img") {
        let tag = parsed.tag(img);
        if tag.attr("alt").is_some_and(|alt| !alt.trim().is_empty()) {
            continue;
        }
        let alt = alt_from_src(tag.attr("src"));
        tags.get_mut(img).set_attr("alt", &escape_text(&alt));
    }
}

/// Alt text derived from an image file name: `/a/my-photo_2.jpg` → `My Photo 2`.
pub fn alt_from_src(src: Option<&str>) -> String {
    let stem = src
        .and_then(|s| s.split(['?', '#']).next())
        .and_then(|path| path.rsplit('/').next())
        .map(|file| file.rsplit_once('.').map_or(file, |(stem, _)| stem))
        .map(title_case_slug)
        .unwrap_or_default();
    if stem.is_empty() { "Image".to_string() } else { stem }
}

// =============================================================================
// Title and description
// =============================================================================

fn fix_title(parsed: &Parsed<'_>, seo: &SeoConfig, edits: &mut Edits) {
    let Some(title) = parsed.select_first("head title").or_else(|| parsed.select_first("title")) else {
        return;
    };
    if let Some(short) = shorten_title(&parsed.text(title), seo.title_max) {
        edits.replace(parsed.inner_range(title), escape_text(&short));
    }
}

/// Shortened title, or `None` when it already fits. Multi-part titles keep
/// their first and last parts when those fit.
pub fn shorten_title(title: &str, max: usize) -> Option<String> {
    if title.chars().count() <= max {
        return None;
    }
    let parts: Vec<&str> = title.split(" | ").collect();
    if parts.len() > 2 {
        let compact = format!("{} | {}", parts[0], parts[parts.len() - 1]);
        if compact.chars().count() <= max {
            return Some(compact);
        }
    }
    Some(format!("{}...", take_chars(title, max.saturating_sub(3))))
}

/// Description clamped into the configured range, or `None` when unchanged.
///
/// Short descriptions are replaced by the first paragraph when that is long
/// enough on its own, otherwise the paragraph is appended if the result fits.
pub fn adjust_description(description: &str, paragraph: Option<&str>, seo: &SeoConfig) -> Option<String> {
    let len = description.chars().count();
    if len > seo.description_max {
        return Some(clamp_chars(description, seo.description_max));
    }
    if len >= seo.description_min {
        return None;
    }
    let paragraph = paragraph.filter(|p| !p.is_empty())?;
    if paragraph.chars().count() >= seo.description_min {
        return Some(clamp_chars(paragraph, seo.description_max));
    }
    if description.contains(paragraph) {
        return None;
    }
    let combined = if description.is_empty() {
        paragraph.to_string()
    } else {
        format!("{description} {paragraph}")
    };
    (combined.chars().count() <= seo.description_max).then_some(combined)
}

/// `text` cut to at most `max` characters, `...` marking a cut.
fn clamp_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    format!("{}...", take_chars(text, max.saturating_sub(3)))
}

fn first_paragraph(parsed: &Parsed<'_>) -> Option<String> {
    [".entry-content p", "article p", "main p", "p"]
        .iter()
        .flat_map(|sel| parsed.select(sel))
        .map(|p| parsed.text(p))
        .find(|text| !text.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Taxonomy {
    Category,
    Tag,
}

fn taxonomy_of(item: &ContentItem) -> Option<Taxonomy> {
    if item.segments().len() < 2 {
        return None;
    }
    if item.path.contains("/category/") {
        Some(Taxonomy::Category)
    } else if item.path.contains("/tag/") {
        Some(Taxonomy::Tag)
    } else {
        None
    }
}

/// Generated description for a category or tag archive.
fn taxonomy_description(item: &ContentItem, taxonomy: Taxonomy, title: Option<&str>) -> String {
    let name = title
        .and_then(|t| ARCHIVE_NAME.captures(t))
        .map(|caps| caps[1].trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| title_case_slug(item.segments().last().copied().unwrap_or_default()));
    match taxonomy {
        Taxonomy::Tag => format!(
            "Articles tagged with {name}. Explore technical guides, tutorials, and insights about {name}."
        ),
        Taxonomy::Category => format!(
            "Browse all {name} articles. In-depth technical content covering {name} topics, best practices, and real-world solutions."
        ),
    }
}

fn fix_description(
    parsed: &Parsed<'_>,
    item: &ContentItem,
    seo: &SeoConfig,
    tags: &mut TagRewrites<'_, '_>,
    head_extra: &mut String,
) {
    let meta = parsed.select_first("meta[name=description]");
    let current = meta
        .and_then(|m| parsed.tag(m).attr("content"))
        .map(decode_entities);

    let generated = taxonomy_of(item)
        .filter(|_| current.is_none() || current.as_deref() == seo.generic_description.as_deref())
        .map(|taxonomy| {
            let title = parsed.select_first("title").map(|t| parsed.text(t));
            taxonomy_description(item, taxonomy, title.as_deref())
        });

    let Some(base) = generated.clone().or_else(|| current.clone()) else {
        return;
    };
    let paragraph = first_paragraph(parsed);
    let description = adjust_description(&base, paragraph.as_deref(), seo).unwrap_or(base);
    if current.as_deref() == Some(description.as_str()) {
        return;
    }

    let encoded = escape_text(&description);
    match meta {
        Some(m) => tags.get_mut(m).set_attr("content", &encoded),
        None => head_extra.push_str(&html! { meta name="description" content=(description); }.into_string()),
    }
    if generated.is_some() {
        set_or_add_meta(parsed, tags, head_extra, "property", "og:description", &description);
        set_or_add_meta(parsed, tags, head_extra, "name", "twitter:description", &description);
    }
}

fn set_or_add_meta(
    parsed: &Parsed<'_>,
    tags: &mut TagRewrites<'_, '_>,
    head_extra: &mut String,
    key: &str,
    name: &str,
    content: &str,
) {
    match parsed.select_first(&format!("meta[{key}=\"{name}\"]")) {
        Some(m) => tags.get_mut(m).set_attr("content", &escape_text(content)),
        None => {
            let mut tag = Tag::new("meta").with_attr(key, name);
            tag.set_attr("content", &escape_text(content));
            head_extra.push_str(&tag.render());
        }
    }
}

// =============================================================================
// Absolute URLs in head metadata
// =============================================================================

fn absolute_on_target(value: &str, source: &str, target: &str) -> Option<String> {
    if is_root_relative(value) {
        Some(format!("{target}{value}"))
    } else {
        rebase_url(value, source, target)
    }
}

fn absolutize_head_urls(parsed: &Parsed<'_>, source: &str, target: &str, tags: &mut TagRewrites<'_, '_>) {
    for meta in parsed.by_name("meta") {
        let tag = parsed.tag(meta);
        if !(tag.has_attr("property") || tag.has_attr("name")) {
            continue;
        }
        if let Some(fixed) = tag.attr("content").and_then(|c| absolute_on_target(c, source, target)) {
            tags.get_mut(meta).set_attr("content", &fixed);
        }
    }
    for link in parsed.by_name("link") {
        let tag = parsed.tag(link);
        let rel = tag.attr("rel").unwrap_or("");
        let kind = tag.attr("type").unwrap_or("");
        let is_feed = rel == "alternate" && (kind.contains("rss") || kind.contains("atom"));
        if rel != "canonical" && !is_feed {
            continue;
        }
        if let Some(fixed) = tag.attr("href").and_then(|h| absolute_on_target(h, source, target)) {
            tags.get_mut(link).set_attr("href", &fixed);
        }
    }
}

fn add_social_images(
    parsed: &Parsed<'_>,
    ctx: &TransformContext<'_>,
    tags: &TagRewrites<'_, '_>,
    head_extra: &mut String,
) {
    let existing = parsed
        .select_first("meta[property=\"og:image\"]")
        .and_then(|m| tags.attr(m, "content").map(str::to_string));
    let default = ctx.config.seo.default_og_image.as_deref().map(|image| {
        absolute_on_target(image, ctx.source(), ctx.target()).unwrap_or_else(|| image.to_string())
    });

    let og_image = match (existing, default) {
        (Some(image), _) => image,
        (None, Some(image)) => {
            head_extra.push_str(
                &html! {
                    meta property="og:image" content=(image);
                    meta property="og:image:width" content=(DEFAULT_OG_IMAGE_SIZE);
                    meta property="og:image:height" content=(DEFAULT_OG_IMAGE_SIZE);
                }
                .into_string(),
            );
            image
        }
        (None, None) => return,
    };

    if !parsed.exists("meta[name=\"twitter:image\"]") {
        let mut tag = Tag::new("meta").with_attr("name", "twitter:image");
        tag.set_attr("content", &og_image);
        head_extra.push_str(&tag.render());
    }
}

// =============================================================================
// Tables
// =============================================================================

/// Promote an all-`td` first body row into a `thead` when a table has none.
fn add_table_headers(parsed: &Parsed<'_>, edits: &mut Edits) {
    for table in parsed.by_name("table") {
        if !parsed.select_within(table, "thead").is_empty() {
            continue;
        }
        let Some(&tbody) = parsed.select_within(table, "tbody").first() else {
            continue;
        };
        let Some(row) = children(parsed, tbody).find(|&i| parsed.tag(i).name == "tr") else {
            continue;
        };
        let cells: Vec<usize> = children(parsed, row).collect();
        if cells.is_empty() || cells.iter().any(|&c| parsed.tag(c).name != "td") {
            continue;
        }

        let mut head = String::from("<thead><tr>");
        for cell in cells {
            let mut th = parsed.tag(cell).clone();
            th.name = "th".to_string();
            head.push_str(&th.render());
            head.push_str(parsed.inner(cell));
            head.push_str("</th>");
        }
        head.push_str("</tr></thead>");
        edits.insert(parsed.tag(tbody).start, head);
        edits.remove(parsed.outer_range(row));
    }
}

fn children<'p>(parsed: &'p Parsed<'_>, idx: usize) -> impl Iterator<Item = usize> + 'p {
    parsed.elements().filter(move |&i| parsed.parent(i) == Some(idx))
}
