//! Document transformer: raw WordPress HTML in, publishable HTML out.
//!
//! The transformer is an ordered list of passes. Each pass takes the whole
//! [`Document`] and returns a new one; the only state a pass may touch is the
//! per-item [`TransformContext`], which collects the asset references and
//! extracted stylesheets the driver merges afterwards.
//!
//! ```text
//! raw html ─▶ assets ─▶ urls ─▶ structured ─▶ cleanup ─▶ embeds
//!                                                          │
//!        final html ◀─ inject ◀─ perf ◀─ seo ◀─────────────┘
//! ```
//!
//! Order matters: asset extraction must see source-domain URLs before the
//! rewrite pass replaces them, and the structured-data pass needs the
//! article text extracted by the first pass.
//!
//! Every pass checks for its own output before acting, so running the
//! pipeline over its own output changes nothing.

pub mod assets;
pub mod cleanup;
pub mod embeds;
pub mod inject;
pub mod perf;
pub mod seo;
pub mod structured;
pub mod urls;

use crate::api::RelatedSource;
use crate::config::SiteConfig;
use crate::markup::{Edits, Parsed, Tag};
use crate::types::ContentItem;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// HTML text flowing through the passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    html: String,
}

impl Document {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.html
    }

    pub fn into_string(self) -> String {
        self.html
    }

    /// Scan the document, let `f` collect edits, and apply them.
    pub fn edit(self, f: impl FnOnce(&Parsed<'_>, &mut Edits)) -> Document {
        let mut edits = Edits::new();
        {
            let parsed = Parsed::parse(&self.html);
            f(&parsed, &mut edits);
        }
        if edits.is_empty() {
            return self;
        }
        Document {
            html: edits.apply(&self.html),
        }
    }
}

/// A stylesheet moved out of an inline `<style>` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedStyle {
    /// Root-relative path, e.g. `/assets/css/global-styles-1a2b3c4d.min.css`.
    pub path: String,
    pub css: String,
}

/// Per-item state shared by the passes of one transform run.
pub struct TransformContext<'a> {
    pub item: &'a ContentItem,
    pub config: &'a SiteConfig,
    /// Lookup for the related-posts block. `None` skips it.
    pub related: Option<&'a dyn RelatedSource>,
    /// Absolute source-domain URLs of every referenced asset.
    pub assets: BTreeSet<String>,
    pub stylesheets: Vec<ExtractedStyle>,
    /// Main article text, when the page has a substantial one.
    pub article_text: Option<String>,
}

impl<'a> TransformContext<'a> {
    pub fn new(item: &'a ContentItem, config: &'a SiteConfig) -> Self {
        Self {
            item,
            config,
            related: None,
            assets: BTreeSet::new(),
            stylesheets: Vec::new(),
            article_text: None,
        }
    }

    pub fn with_related(mut self, related: &'a dyn RelatedSource) -> Self {
        self.related = Some(related);
        self
    }

    pub fn source(&self) -> &str {
        self.config.source()
    }

    pub fn target(&self) -> &str {
        self.config.target()
    }

    pub fn word_count(&self) -> Option<usize> {
        self.article_text
            .as_deref()
            .map(|t| t.split_whitespace().count())
    }
}

/// Result of transforming one document.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub html: String,
    pub assets: BTreeSet<String>,
    pub stylesheets: Vec<ExtractedStyle>,
}

pub type Pass = fn(Document, &mut TransformContext<'_>) -> Document;

/// The passes, in the order they run.
pub const PASSES: &[(&str, Pass)] = &[
    ("assets", assets::extract),
    ("urls", urls::rewrite),
    ("structured", structured::enrich),
    ("cleanup", cleanup::strip),
    ("embeds", embeds::normalize),
    ("seo", seo::normalize),
    ("perf", perf::annotate),
    ("inject", inject::inject),
];

/// Run every pass over `raw` and serialize the result.
pub fn transform(raw: &str, mut ctx: TransformContext<'_>) -> TransformOutput {
    let mut doc = Document::new(raw);
    for (name, pass) in PASSES {
        tracing::trace!(pass = name, path = %ctx.item.path, "running pass");
        doc = pass(doc, &mut ctx);
    }
    TransformOutput {
        html: doc.into_string(),
        assets: ctx.assets,
        stylesheets: ctx.stylesheets,
    }
}

// =============================================================================
// Helpers shared by the passes
// =============================================================================

/// Pending start-tag changes, applied once so fixes to the same tag combine.
pub struct TagRewrites<'p, 'a> {
    parsed: &'p Parsed<'a>,
    tags: BTreeMap<usize, Tag>,
}

impl<'p, 'a> TagRewrites<'p, 'a> {
    pub fn new(parsed: &'p Parsed<'a>) -> Self {
        Self {
            parsed,
            tags: BTreeMap::new(),
        }
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Tag {
        let parsed = self.parsed;
        self.tags.entry(idx).or_insert_with(|| parsed.tag(idx).clone())
    }

    /// Current attribute value, pending changes included.
    pub fn attr(&self, idx: usize, name: &str) -> Option<&str> {
        self.tags
            .get(&idx)
            .unwrap_or_else(|| self.parsed.tag(idx))
            .attr(name)
    }

    pub fn flush(self, edits: &mut Edits) {
        for (idx, tag) in self.tags {
            let original = self.parsed.tag(idx);
            if &tag != original {
                edits.replace(original.start..original.end, tag.render());
            }
        }
    }
}

/// Rename an element, end tag included.
pub fn rename(parsed: &Parsed<'_>, idx: usize, name: &str, tags: &mut TagRewrites<'_, '_>, edits: &mut Edits) {
    tags.get_mut(idx).name = name.to_string();
    let inner = parsed.inner_range(idx);
    let outer = parsed.outer_range(idx);
    if outer.end > inner.end {
        edits.replace(inner.end..outer.end, format!("</{name}>"));
    }
}

/// Rewrite an absolute source URL onto `to`. `None` when `url` is not on
/// the source host (root-relative and foreign URLs are left alone).
pub fn rebase_url(url: &str, from: &str, to: &str) -> Option<String> {
    let rest = url.strip_prefix(from)?;
    if rest.is_empty() || rest.starts_with(['/', '?', '#']) {
        Some(format!("{to}{rest}"))
    } else {
        None
    }
}

/// Root-relative form of an absolute source URL.
pub fn root_relative(url: &str, source: &str) -> Option<String> {
    rebase_url(url, source, "").map(|r| if r.is_empty() { "/".to_string() } else { r })
}

/// True for `/path` but not `//host/path`.
pub fn is_root_relative(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//")
}

/// Offset just inside `<head ...>`.
pub fn head_start(doc: &Parsed<'_>) -> Option<usize> {
    doc.select_first("head").map(|h| doc.inner_range(h).start)
}

/// Offset of `</head>`.
pub fn head_end(doc: &Parsed<'_>) -> Option<usize> {
    doc.select_first("head").map(|h| doc.inner_range(h).end)
}

/// Offset of `</body>`.
pub fn body_end(doc: &Parsed<'_>) -> Option<usize> {
    doc.select_first("body").map(|b| doc.inner_range(b).end)
}

/// Body classes, lowercased.
pub fn body_classes(doc: &Parsed<'_>) -> Vec<String> {
    doc.select_first("body")
        .map(|b| doc.tag(b).classes().map(|c| c.to_ascii_lowercase()).collect())
        .unwrap_or_default()
}

/// Every parsed JSON-LD block with the byte range of its script body.
pub fn json_ld_blocks(doc: &Parsed<'_>) -> Vec<(std::ops::Range<usize>, Value)> {
    doc.select("script[type=application/ld+json]")
        .into_iter()
        .filter_map(|i| {
            let body = doc.inner(i);
            match serde_json::from_str::<Value>(body.trim()) {
                Ok(value) => Some((doc.inner_range(i), value)),
                Err(e) => {
                    tracing::warn!(error = %e, "invalid JSON-LD block left untouched");
                    None
                }
            }
        })
        .collect()
}

/// The objects of a JSON-LD document: the `@graph` entries, or the root.
pub fn json_ld_items(value: &Value) -> Vec<&Value> {
    match value.get("@graph").and_then(Value::as_array) {
        Some(graph) => graph.iter().collect(),
        None => match value {
            Value::Array(items) => items.iter().collect(),
            _ => vec![value],
        },
    }
}

/// Does a JSON-LD object have the given `@type` (string or array)?
pub fn has_type(item: &Value, wanted: &str) -> bool {
    match item.get("@type") {
        Some(Value::String(t)) => t == wanted,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(wanted)),
        _ => false,
    }
}

/// Compact JSON safe to embed in a `<script>` element.
pub fn script_json(value: &Value) -> String {
    serde_json::to_string(value)
        .unwrap_or_default()
        .replace("</", "<\\/")
}

/// `hello-world` → `Hello World`.
pub fn title_case_slug(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// First `n` characters of `s`.
pub fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
