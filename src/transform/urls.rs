//! Pass 2: point source-domain URLs at the target domain.
//!
//! Only absolute source URLs change. Root-relative URLs stay relative so
//! the same tree works on staging and production hosts. Inside inline
//! `<style>` blocks source URLs become root-relative, since stylesheets are
//! served from the mirror itself.

use super::{Document, TransformContext, rebase_url, root_relative};
use regex::Regex;
use std::sync::LazyLock;

/// Attributes holding URLs, per element.
const URL_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("a", &["href"]),
    ("link", &["href"]),
    ("img", &["src", "srcset"]),
    ("script", &["src"]),
    ("source", &["src", "srcset"]),
    ("iframe", &["src"]),
    ("form", &["action"]),
];

static CSS_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"url\(\s*["']?([^"')]+?)["']?\s*\)"#).unwrap());

pub fn rewrite(doc: Document, ctx: &mut TransformContext<'_>) -> Document {
    let source = ctx.source().to_string();
    let target = ctx.target().to_string();

    doc.edit(|parsed, edits| {
        for i in parsed.elements() {
            let tag = parsed.tag(i);
            let Some((_, attrs)) = URL_ATTRIBUTES.iter().find(|(name, _)| *name == tag.name) else {
                continue;
            };
            let mut updated = tag.clone();
            let mut changed = false;
            for attr in attrs.iter() {
                let Some(value) = tag.attr(attr) else { continue };
                let new_value = if *attr == "srcset" {
                    rewrite_srcset(value, &source, &target)
                } else {
                    rebase_url(value, &source, &target)
                };
                if let Some(new_value) = new_value {
                    updated.set_attr(attr, &new_value);
                    changed = true;
                }
            }
            if changed {
                edits.replace(tag.start..tag.end, updated.render());
            }
        }

        for i in parsed.by_name("style") {
            let css = parsed.inner(i);
            if let Some(rewritten) = relativize_css(css, &source) {
                edits.replace(parsed.inner_range(i), rewritten);
            }
        }
    })
}

/// Rewrite each candidate of a `srcset`. `None` when nothing changed.
pub fn rewrite_srcset(srcset: &str, from: &str, to: &str) -> Option<String> {
    let mut changed = false;
    let candidates: Vec<String> = srcset
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|candidate| {
            let mut parts = candidate.splitn(2, char::is_whitespace);
            let url = parts.next().unwrap_or_default();
            let descriptor = parts.next().map(str::trim);
            let url = match rebase_url(url, from, to) {
                Some(new) => {
                    changed = true;
                    new
                }
                None => url.to_string(),
            };
            match descriptor {
                Some(d) if !d.is_empty() => format!("{url} {d}"),
                _ => url,
            }
        })
        .collect();
    changed.then(|| candidates.join(", "))
}

/// Every `url(...)` reference in a stylesheet, quotes removed.
pub fn css_urls(css: &str) -> Vec<&str> {
    CSS_URL
        .captures_iter(css)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .collect()
}

/// Turn `url(<source>/...)` references into root-relative ones.
/// `None` when the CSS has none.
pub fn relativize_css(css: &str, source: &str) -> Option<String> {
    let mut changed = false;
    let out = CSS_URL.replace_all(css, |caps: &regex::Captures<'_>| match root_relative(&caps[1], source) {
        Some(relative) => {
            changed = true;
            format!("url({relative})")
        }
        None => caps[0].to_string(),
    });
    changed.then(|| out.into_owned())
}
