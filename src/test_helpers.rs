//! Shared fixtures for the wp-mirror test suite.
//!
//! Provides a config pointing at two fake hosts, a realistic WordPress post
//! page, builders for content API payloads, and [`FakeSite`], which serves a
//! whole small site through [`MockTransport`].
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let mock = MockTransport::new();
//! let site = FakeSite::new()
//!     .post(1, "/2024/03/hello-world/", "2024-03-01T10:00:00")
//!     .category(3, "home-lab", "Home Lab", 1);
//! site.serve(&mock);
//! ```

use crate::api::{PER_PAGE, endpoint_url};
use crate::config::SiteConfig;
use crate::http::tests::MockTransport;
use serde_json::{Value, json};

/// Source WordPress site.
pub const SOURCE: &str = "https://wp.test";
/// Public domain of the mirror.
pub const TARGET: &str = "https://site.test";

/// Stock config with both hosts set and every optional feature off.
pub fn test_config() -> SiteConfig {
    SiteConfig {
        source_url: SOURCE.to_string(),
        target_domain: TARGET.to_string(),
        ..SiteConfig::default()
    }
}

// =========================================================================
// Pages
// =========================================================================

/// A single post page the way a Kadence-themed WordPress renders it.
pub fn sample_post_html() -> String {
    let body = "Setting up a small lab is mostly about picking hardware that stays quiet. \
                This post walks through the switches, the storage and the hypervisor I ended up with. "
        .repeat(4);
    format!(
        r##"<!DOCTYPE html>
<html lang="en-GB">
<head>
<meta charset="UTF-8">
<title>Hello World - Lab Notes</title>
<!-- Search Engine Optimization by Rank Math - https://rankmath.com/ -->
<meta name="description" content="A tour of the home lab.">
<link rel="canonical" href="{SOURCE}/2024/03/hello-world/">
<meta property="og:url" content="{SOURCE}/2024/03/hello-world/">
<meta property="og:image" content="{SOURCE}/wp-content/uploads/2024/03/hero.jpg">
<script type="application/ld+json">{{"@context":"https://schema.org","@graph":[{{"@type":"BlogPosting","@id":"{SOURCE}/2024/03/hello-world/#article","headline":"Hello World","datePublished":"2024-03-01T10:00:00+00:00","dateModified":"2024-06-15T08:00:00+00:00","author":{{"@id":"{SOURCE}/#person"}},"image":"/wp-content/uploads/2024/03/hero.jpg"}},{{"@type":"Person","@id":"{SOURCE}/#person","name":"Lab Owner"}}]}}</script>
<!-- /Rank Math WordPress SEO plugin -->
<link rel="https://api.w.org/" href="{SOURCE}/wp-json/">
<link rel="EditURI" type="application/rsd+xml" href="{SOURCE}/xmlrpc.php?rsd">
<meta name="generator" content="WordPress 6.5">
<link rel="stylesheet" id="kadence-global-css" href="{SOURCE}/wp-content/themes/kadence/assets/css/global.min.css" media="all">
<style id="kadence-inline-css">
.site-header {{ background: #111; color: #eee; }}
.entry-title {{ font-size: 2.2rem; font-family: "Inter", sans-serif; }}
.entry-content p {{ line-height: 1.7; margin-bottom: 1.2em; }}
</style>
<script>var kadenceConfig = {{"ajaxurl":"{SOURCE}\/wp-admin\/admin-ajax.php","screenReader":{{"expand":"Expand"}}}};</script>
</head>
<body class="post-template-default single single-post postid-1">
<div id="wpadminbar"><ul><li>Edit Post</li></ul></div>
<header class="site-header"><p class="site-title"><a href="{SOURCE}/">Lab Notes</a></p></header>
<main id="inner-wrap" class="wrap">
<article id="post-1" class="post entry">
<div class="post-thumbnail article-post-thumbnail"><img src="{SOURCE}/wp-content/uploads/2024/03/hero.jpg" srcset="{SOURCE}/wp-content/uploads/2024/03/hero-300x200.jpg 300w, {SOURCE}/wp-content/uploads/2024/03/hero.jpg 1024w" class="attachment-medium_large wp-post-image"></div>
<header class="entry-header">
<h1 class="entry-title">Hello World</h1>
<div class="entry-meta"><span class="posted-on"><time class="entry-date published" datetime="2024-03-01T10:00:00+00:00">March 1, 2024</time></span></div>
</header>
<div class="entry-content">
<p>{body}</p>
<p><img src="/wp-content/uploads/2024/03/diagram.png" width="800" height="400"></p>
<figure class="wp-block-embed is-type-video is-provider-youtube"><div class="wp-block-embed__wrapper">
https://youtu.be/dQw4w9WgXcQ
</div></figure>
<pre class="wp-block-code"><code>qm create 100 --memory 4096</code></pre>
<h1>Second heading</h1>
</div>
<footer class="entry-footer"><span class="category-links"><a href="{SOURCE}/category/home-lab/" rel="category tag">Home Lab</a></span> <a href="{SOURCE}/tag/proxmox/" rel="tag">Proxmox</a></footer>
</article>
</main>
<footer class="site-footer"><p>&copy; 2024 Lab Notes - WordPress Theme by <a href="https://www.kadencewp.com/">Kadence WP</a></p></footer>
<script src="{SOURCE}/wp-includes/js/wp-embed.min.js"></script>
<script src="{SOURCE}/wp-content/themes/kadence/assets/js/navigation.min.js"></script>
</body>
</html>
"##
    )
}

/// A minimal page with a title, enough text to count as an article, and an
/// optional extra fragment inside the content.
pub fn simple_page_html(title: &str, extra: &str) -> String {
    let body = "Plain words filling the page so it reads like an article. ".repeat(8);
    format!(
        r#"<!DOCTYPE html>
<html><head><title>{title}</title></head>
<body class="page-template-default page">
<main id="inner-wrap"><article class="page"><header class="entry-header"><h1 class="entry-title">{title}</h1></header>
<div class="entry-content"><p>{body}</p>{extra}</div></article></main>
</body></html>
"#
    )
}

// =========================================================================
// Content API payloads
// =========================================================================

/// A post or page listing entry.
pub fn post_json(id: u64, path: &str, modified: &str) -> Value {
    json!({
        "id": id,
        "link": format!("{SOURCE}{path}"),
        "title": { "rendered": format!("Entry {id}") },
        "modified": modified,
        "modified_gmt": modified,
    })
}

/// A category or tag listing entry.
pub fn term_json(id: u64, slug: &str, name: &str, path: &str, count: u64) -> Value {
    json!({
        "id": id,
        "name": name,
        "slug": slug,
        "link": format!("{SOURCE}{path}"),
        "count": count,
    })
}

/// URL of the first listing page, as the API client builds it.
pub fn listing_url(endpoint: &str, extra: &[(&str, String)]) -> String {
    let mut params = vec![("per_page", PER_PAGE.to_string()), ("page", "1".to_string())];
    params.extend(extra.iter().cloned());
    endpoint_url(SOURCE, endpoint, &params).unwrap()
}

pub fn publish() -> Vec<(&'static str, String)> {
    vec![("status", "publish".to_string())]
}

// =========================================================================
// Fake site
// =========================================================================

/// A small WordPress site: listings plus one HTML document per path.
#[derive(Default, Clone)]
pub struct FakeSite {
    pub posts: Vec<Value>,
    pub pages: Vec<Value>,
    pub categories: Vec<Value>,
    pub tags: Vec<Value>,
    pub media: Vec<Value>,
    /// `(path, html)` for every document the site serves.
    pub documents: Vec<(String, String)>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(mut self, id: u64, path: &str, modified: &str) -> Self {
        self.posts.push(post_json(id, path, modified));
        let title = format!("Entry {id}");
        self.documents.push((path.to_string(), simple_page_html(&title, "")));
        self
    }

    pub fn page(mut self, id: u64, path: &str, modified: &str) -> Self {
        self.pages.push(post_json(id, path, modified));
        let title = format!("Entry {id}");
        self.documents.push((path.to_string(), simple_page_html(&title, "")));
        self
    }

    pub fn category(mut self, id: u64, slug: &str, name: &str, count: u64) -> Self {
        let path = format!("/category/{slug}/");
        self.categories.push(term_json(id, slug, name, &path, count));
        if count > 0 {
            self.documents.push((path, simple_page_html(name, "")));
        }
        self
    }

    pub fn tag(mut self, id: u64, slug: &str, name: &str, count: u64) -> Self {
        let path = format!("/tag/{slug}/");
        self.tags.push(term_json(id, slug, name, &path, count));
        if count > 0 {
            self.documents.push((path, simple_page_html(name, "")));
        }
        self
    }

    /// Replace the HTML served for a path.
    pub fn document(mut self, path: &str, html: &str) -> Self {
        self.documents.retain(|(p, _)| p != path);
        self.documents.push((path.to_string(), html.to_string()));
        self
    }

    /// Register listings, documents and the essential archive pages.
    pub fn serve(&self, mock: &MockTransport) {
        mock.json(&listing_url("posts", &publish()), &Value::Array(self.posts.clone()));
        mock.json(&listing_url("pages", &publish()), &Value::Array(self.pages.clone()));
        mock.json(&listing_url("categories", &[]), &Value::Array(self.categories.clone()));
        mock.json(&listing_url("tags", &[]), &Value::Array(self.tags.clone()));
        mock.json(&listing_url("media", &[]), &Value::Array(self.media.clone()));
        for path in ["/", "/category/", "/tag/"] {
            mock.html(&format!("{SOURCE}{path}"), &simple_page_html("Lab Notes", ""));
        }
        for (path, html) in &self.documents {
            mock.html(&format!("{SOURCE}{path}"), html);
        }
    }

    /// Register the incremental listings: only `changed` posts come back.
    pub fn serve_changes(&self, mock: &MockTransport, since: &str, changed_posts: Vec<Value>) {
        let mut params = publish();
        params.push(("modified_after", since.to_string()));
        mock.json(&listing_url("posts", &params), &Value::Array(changed_posts));
        mock.json(&listing_url("pages", &params), &json!([]));
    }
}
