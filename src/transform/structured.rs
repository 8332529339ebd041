//! Pass 3: JSON-LD fixes and enrichment.
//!
//! Every string in every `application/ld+json` block gets the same rewrite
//! as the markup: source URLs move to the target, and root-relative paths
//! under URL-valued keys ([`URL_KEYS`]) become absolute on the target. Then
//! `BlogPosting` objects gain the reading metrics derived from the article
//! text. Blocks are re-serialised only when something changed.

use super::{Document, TransformContext, has_type, json_ld_blocks, rebase_url, script_json, take_chars};
use serde_json::{Map, Value, json};

/// Words per minute used for `timeRequired`.
const READING_WPM: f64 = 200.0;

/// Upper bound for a generated `articleBody`.
const ARTICLE_BODY_CHARS: usize = 5000;

/// Keys whose values (and nested arrays of values) are URLs.
pub const URL_KEYS: &[&str] = &[
    "@id",
    "contentUrl",
    "embedUrl",
    "image",
    "item",
    "logo",
    "mainEntityOfPage",
    "sameAs",
    "thumbnailUrl",
    "url",
];

pub fn enrich(doc: Document, ctx: &mut TransformContext<'_>) -> Document {
    let source = ctx.source().to_string();
    let target = ctx.target().to_string();
    let article = ctx.article_text.clone();

    doc.edit(|parsed, edits| {
        for (range, mut value) in json_ld_blocks(parsed) {
            let mut changed = rewrite_strings(&mut value, &source, &target);
            for item in items_mut(&mut value) {
                changed |= fill_author_urls(item, &target);
                if let Some(text) = article.as_deref() {
                    changed |= add_reading_metrics(item, text);
                }
            }
            if changed {
                edits.replace(range, script_json(&value));
            }
        }
    })
}

/// Rewrite every string leaf in place. Returns whether anything changed.
pub fn rewrite_strings(value: &mut Value, source: &str, target: &str) -> bool {
    rewrite_value(value, false, source, target)
}

fn rewrite_value(value: &mut Value, url_valued: bool, source: &str, target: &str) -> bool {
    match value {
        Value::String(s) => {
            let rewritten = if url_valued && s.starts_with('/') && !s.starts_with("//") {
                Some(format!("{target}{s}"))
            } else {
                rebase_url(s, source, target)
            };
            match rewritten {
                Some(new) => {
                    *s = new;
                    true
                }
                None => false,
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, v| rewrite_value(v, url_valued, source, target) | changed),
        Value::Object(map) => map.iter_mut().fold(false, |changed, (key, v)| {
            rewrite_value(v, URL_KEYS.contains(&key.as_str()), source, target) | changed
        }),
        _ => false,
    }
}

fn items_mut(value: &mut Value) -> Vec<&mut Value> {
    if value.get("@graph").is_some_and(Value::is_array) {
        return value["@graph"]
            .as_array_mut()
            .map(|graph| graph.iter_mut().collect())
            .unwrap_or_default();
    }
    match value {
        Value::Array(items) => items.iter_mut().collect(),
        _ => vec![value],
    }
}

/// Site-owner entities and inline publishers without a `url` point at the site.
fn fill_author_urls(item: &mut Value, target: &str) -> bool {
    let mut changed = false;
    let is_owner = (has_type(item, "Person") || has_type(item, "Organization"))
        && item
            .get("@id")
            .and_then(Value::as_str)
            .is_some_and(|id| id.contains("/#person"));
    if is_owner && let Some(obj) = item.as_object_mut() {
        changed |= insert_missing(obj, "url", json!(target));
    }

    if has_type(item, "BlogPosting")
        && let Some(publisher) = item.get_mut("publisher").and_then(Value::as_object_mut)
        && !publisher.contains_key("@id")
    {
        changed |= insert_missing(publisher, "url", json!(target));
    }
    changed
}

fn add_reading_metrics(item: &mut Value, text: &str) -> bool {
    if !has_type(item, "BlogPosting") {
        return false;
    }
    let Some(obj) = item.as_object_mut() else {
        return false;
    };
    let words = text.split_whitespace().count();
    let minutes = reading_minutes(words);
    let mut changed = insert_missing(obj, "wordCount", json!(words));
    changed |= insert_missing(obj, "timeRequired", json!(format!("PT{minutes}M")));
    changed |= insert_missing(obj, "articleBody", json!(take_chars(text, ARTICLE_BODY_CHARS)));
    changed
}

/// Whole minutes to read `words`, at least one.
pub fn reading_minutes(words: usize) -> u64 {
    ((words as f64 / READING_WPM).round() as u64).max(1)
}

fn insert_missing(obj: &mut Map<String, Value>, key: &str, value: Value) -> bool {
    if obj.contains_key(key) {
        return false;
    }
    obj.insert(key.to_string(), value);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SOURCE, TARGET, test_config};
    use crate::types::{ContentItem, ContentKind};

    fn run(html: &str, article: Option<&str>) -> String {
        let config = test_config();
        let item = ContentItem::new("/2024/01/x/", ContentKind::Post);
        let mut ctx = TransformContext::new(&item, &config);
        ctx.article_text = article.map(str::to_string);
        enrich(Document::new(html), &mut ctx).into_string()
    }

    fn ld(value: Value) -> String {
        format!(r#"<script type="application/ld+json">{value}</script>"#)
    }

    fn parse_ld(html: &str) -> Value {
        let start = html.find('>').unwrap() + 1;
        let end = html.rfind("</script>").unwrap();
        serde_json::from_str(&html[start..end]).unwrap()
    }

    #[test]
    fn rewrites_nested_urls() {
        let html = ld(json!({
            "@context": "https://schema.org",
            "@graph": [
                {"@type": "WebPage", "@id": format!("{SOURCE}/x/#webpage"), "image": {"url": "/wp-content/uploads/a.jpg"}},
                {"@type": "WebSite", "url": SOURCE, "sameAs": ["//cdn.test/x", "https://github.com/me"]}
            ]
        }));
        let out = parse_ld(&run(&html, None));
        assert_eq!(out["@graph"][0]["@id"], format!("{TARGET}/x/#webpage"));
        assert_eq!(out["@graph"][0]["image"]["url"], format!("{TARGET}/wp-content/uploads/a.jpg"));
        assert_eq!(out["@graph"][1]["url"], TARGET);
        assert_eq!(out["@graph"][1]["sameAs"][0], "//cdn.test/x");
    }

    #[test]
    fn only_url_keys_gain_the_target_prefix() {
        let html = ld(json!({
            "@type": "BlogPosting",
            "headline": "/etc/hosts explained",
            "description": "/dev/null and friends",
            "image": ["/wp-content/uploads/a.jpg"],
            "mainEntityOfPage": {"@id": "/2024/01/x/"},
            "articleSection": ["/r/homelab"]
        }));
        let out = parse_ld(&run(&html, None));
        assert_eq!(out["headline"], "/etc/hosts explained");
        assert_eq!(out["description"], "/dev/null and friends");
        assert_eq!(out["articleSection"][0], "/r/homelab");
        assert_eq!(out["image"][0], format!("{TARGET}/wp-content/uploads/a.jpg"));
        assert_eq!(out["mainEntityOfPage"]["@id"], format!("{TARGET}/2024/01/x/"));
    }

    #[test]
    fn owner_person_and_publisher_get_urls() {
        let html = ld(json!({"@graph": [
            {"@type": "Person", "@id": "https://site.test/#person", "name": "Me"},
            {"@type": "BlogPosting", "publisher": {"@type": "Organization", "name": "Me"}},
        ]}));
        let out = parse_ld(&run(&html, None));
        assert_eq!(out["@graph"][0]["url"], TARGET);
        assert_eq!(out["@graph"][1]["publisher"]["url"], TARGET);
    }

    #[test]
    fn blog_posting_gains_reading_metrics() {
        let text = "word ".repeat(450);
        let html = ld(json!({"@type": "BlogPosting", "headline": "Hi"}));
        let out = parse_ld(&run(&html, Some(text.trim())));
        assert_eq!(out["wordCount"], 450);
        assert_eq!(out["timeRequired"], "PT2M");
        assert!(out["articleBody"].as_str().unwrap().starts_with("word word"));
    }

    #[test]
    fn existing_metrics_are_kept() {
        let html = ld(json!({"@type": "BlogPosting", "wordCount": 7, "timeRequired": "PT9M", "articleBody": "x"}));
        assert_eq!(run(&html, Some(&"w ".repeat(300))), html);
    }

    #[test]
    fn unchanged_blocks_keep_their_formatting() {
        let html = "<script type=\"application/ld+json\">\n{ \"@type\": \"WebSite\" }\n</script>";
        assert_eq!(run(html, Some(&"w ".repeat(300))), html);
    }

    #[test]
    fn reading_minutes_rounds_with_floor_of_one() {
        assert_eq!(reading_minutes(0), 1);
        assert_eq!(reading_minutes(99), 1);
        assert_eq!(reading_minutes(301), 2);
        assert_eq!(reading_minutes(1000), 5);
    }

    #[test]
    fn second_run_changes_nothing() {
        let html = ld(json!({"@graph": [{"@type": "BlogPosting", "url": "/x/"}]}));
        let text = "word ".repeat(200);
        let once = run(&html, Some(&text));
        assert_eq!(run(&once, Some(&text)), once);
    }
}
