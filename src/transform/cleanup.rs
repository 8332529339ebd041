//! Pass 4: strip what only makes sense on the live WordPress install.

use super::{Document, TransformContext};
use crate::markup::Parsed;
use regex::Regex;
use std::sync::LazyLock;

static RANK_MATH_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*(?:Search Engine Optimization by Rank Math|/Rank Math WordPress SEO plugin).*?-->")
        .unwrap()
});

static AJAX_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""ajaxurl":"[^"]*admin-ajax\.php""#).unwrap());

/// Host of the theme vendor whose credit links are removed.
const THEME_CREDIT_HOST: &str = "kadencewp.com";

pub fn strip(doc: Document, _ctx: &mut TransformContext<'_>) -> Document {
    let doc = doc.edit(|parsed, edits| {
        for i in removable_elements(parsed) {
            edits.remove(parsed.outer_range(i));
        }
    });

    let html = doc.into_string();
    let html = RANK_MATH_COMMENT.replace_all(&html, "");
    let html = AJAX_URL.replace_all(&html, r##""ajaxurl":"#""##);
    Document::new(html.into_owned())
}

/// Elements to drop, in document order.
fn removable_elements(parsed: &Parsed<'_>) -> Vec<usize> {
    let mut out = Vec::new();
    for i in parsed.elements() {
        let tag = parsed.tag(i);
        let remove = match tag.name.as_str() {
            "script" => tag.attr("src").is_some_and(|src| src.contains("wp-embed")),
            "meta" => {
                tag.attr("name").is_some_and(|n| n.eq_ignore_ascii_case("generator"))
                    && tag
                        .attr("content")
                        .is_some_and(|c| c.to_ascii_lowercase().contains("wordpress"))
            }
            "link" => is_discovery_link(tag.attr("rel").unwrap_or(""), tag.attr("href").unwrap_or("")),
            _ => tag.attr("id") == Some("wpadminbar"),
        };
        if remove {
            out.push(i);
        }
    }

    for link in parsed.select(&format!("a[href*={THEME_CREDIT_HOST}]")) {
        let credit_paragraph = parsed
            .parent(link)
            .filter(|&p| parsed.tag(p).name == "p" && parsed.text(p).contains("WordPress Theme by"));
        out.push(credit_paragraph.unwrap_or(link));
    }
    out.sort_unstable();
    out.dedup();
    out
}

fn is_discovery_link(rel: &str, href: &str) -> bool {
    match rel {
        "https://api.w.org/" | "wlwmanifest" => true,
        "EditURI" => href.contains("xmlrpc.php"),
        _ => false,
    }
}
