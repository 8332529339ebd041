//! Mirror configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! overridden by the user's config file, which is in turn overridden by a
//! handful of environment variables (the deploy pipeline sets these, and the
//! auth token is only ever read from the environment).
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! source_url = "https://wordpress.example.com"   # WP_URL
//! target_domain = "https://example.com"          # TARGET_DOMAIN
//! cache_file = ".build-cache.json"
//! # static_dir = "static-files"  # copied into the output root
//!
//! [network]
//! request_timeout_secs = 30     # REQUEST_TIMEOUT
//! user_agent = "StaticSiteGenerator/1.0"
//! # build_deadline_secs = 1800  # BUILD_DEADLINE
//!
//! [workers]
//! fetch = 3                     # FETCH_WORKERS
//! assets = 5                    # ASSET_WORKERS
//!
//! [incremental]
//! archive_rebuild_after_hours = 24
//! # max_failures = 10
//!
//! [seo]
//! title_max = 60
//! description_min = 120
//! description_max = 160
//! # default_og_image = "/wp-content/uploads/social-card.png"
//! # generic_description = "A technical blog about ..."
//!
//! [performance]
//! theme_color = "#0a0a0a"
//! font_preloads = []
//! critical_css_max_bytes = 15000
//! inline_style_min_bytes = 100
//!
//! [analytics]
//! # plausible_host = "plausible.example.com"
//!
//! [comments]
//! # repo = "owner/blog-comments"
//! issue_term = "pathname"
//! theme = "github-dark"
//!
//! [feed]
//! title = ""
//! description = ""
//! author = ""
//! items = 20
//!
//! [redirects]
//! www_to_apex = true
//! rules = []
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Upper bound for any worker pool.
const MAX_WORKERS: usize = 32;

/// Mirror configuration loaded from `config.toml`.
///
/// All fields have defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Base URL of the WordPress install (no trailing slash).
    pub source_url: String,
    /// Public URL the static tree is served from (no trailing slash).
    pub target_domain: String,
    /// Path of the persistent build cache.
    pub cache_file: String,
    /// Files copied verbatim into the output root (favicons, web manifest).
    /// Relative paths resolve against the config directory.
    pub static_dir: Option<PathBuf>,
    pub network: NetworkConfig,
    pub workers: WorkersConfig,
    pub incremental: IncrementalConfig,
    pub seo: SeoConfig,
    pub performance: PerformanceConfig,
    pub analytics: AnalyticsConfig,
    pub comments: CommentsConfig,
    pub feed: FeedConfig,
    pub redirects: RedirectsConfig,
    /// Basic auth token. Only read from `WP_AUTH_TOKEN`, never from TOML.
    #[serde(skip)]
    pub auth_token: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            source_url: "https://wordpress.example.com".to_string(),
            target_domain: "https://example.com".to_string(),
            cache_file: ".build-cache.json".to_string(),
            static_dir: None,
            network: NetworkConfig::default(),
            workers: WorkersConfig::default(),
            incremental: IncrementalConfig::default(),
            seo: SeoConfig::default(),
            performance: PerformanceConfig::default(),
            analytics: AnalyticsConfig::default(),
            comments: CommentsConfig::default(),
            feed: FeedConfig::default(),
            redirects: RedirectsConfig::default(),
            auth_token: None,
        }
    }
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, url) in [
            ("source_url", &self.source_url),
            ("target_domain", &self.target_domain),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "{key} must be an absolute http(s) URL"
                )));
            }
        }
        if self.network.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "network.request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.workers.fetch == 0 || self.workers.assets == 0 {
            return Err(ConfigError::Validation(
                "workers.fetch and workers.assets must be at least 1".into(),
            ));
        }
        if self.seo.description_min > self.seo.description_max {
            return Err(ConfigError::Validation(
                "seo.description_min must not exceed seo.description_max".into(),
            ));
        }
        if self.seo.title_max < 10 || self.seo.description_max < 10 {
            return Err(ConfigError::Validation(
                "seo.title_max and seo.description_max must be at least 10".into(),
            ));
        }
        Ok(())
    }

    /// Source URL without a trailing slash.
    pub fn source(&self) -> &str {
        self.source_url.trim_end_matches('/')
    }

    /// Target domain without a trailing slash.
    pub fn target(&self) -> &str {
        self.target_domain.trim_end_matches('/')
    }

    /// Bare host of the target domain, e.g. `example.com`.
    pub fn target_host(&self) -> &str {
        host_of(self.target())
    }
}

/// Host part of an absolute URL (`https://a.b/c` → `a.b`).
pub fn host_of(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Overall wall-clock budget for a build. Items and assets not started
    /// before the deadline are recorded as failed.
    pub build_deadline_secs: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            user_agent: "StaticSiteGenerator/1.0".to_string(),
            build_deadline_secs: None,
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn build_deadline(&self) -> Option<Duration> {
        self.build_deadline_secs.map(Duration::from_secs)
    }
}

/// Worker pool sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkersConfig {
    /// Concurrent page fetch+transform workers.
    pub fetch: usize,
    /// Concurrent asset downloads.
    pub assets: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { fetch: 3, assets: 5 }
    }
}

/// Resolve the effective thread count for a pool.
///
/// Network-bound pools may exceed the core count, so the only clamp is
/// `1..=MAX_WORKERS`.
pub fn effective_workers(requested: usize) -> usize {
    requested.clamp(1, MAX_WORKERS)
}

/// Incremental build policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IncrementalConfig {
    /// Archives are rebuilt when this many hours have passed since the
    /// last full build, even if nothing changed.
    pub archive_rebuild_after_hours: u64,
    /// When set, a run with more failures than this exits non-zero.
    pub max_failures: Option<usize>,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            archive_rebuild_after_hours: 24,
            max_failures: None,
        }
    }
}

impl IncrementalConfig {
    pub fn archive_rebuild_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.archive_rebuild_after_hours as i64)
    }
}

/// Title/description targets and social-card defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeoConfig {
    pub title_max: usize,
    pub description_min: usize,
    pub description_max: usize,
    /// Site path or URL of the fallback `og:image`.
    pub default_og_image: Option<String>,
    /// Site-wide description the theme puts on every page. Taxonomy archives
    /// carrying exactly this text get a generated one instead.
    pub generic_description: Option<String>,
}

impl Default for SeoConfig {
    fn default() -> Self {
        Self {
            title_max: 60,
            description_min: 120,
            description_max: 160,
            default_og_image: None,
            generic_description: None,
        }
    }
}

/// Head hints and style handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PerformanceConfig {
    pub theme_color: String,
    /// Root-relative `.woff2` paths preloaded on every page.
    pub font_preloads: Vec<String>,
    /// Cap for the inlined above-the-fold stylesheet.
    pub critical_css_max_bytes: usize,
    /// Inline `<style>` blocks at least this large move to external files.
    pub inline_style_min_bytes: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            theme_color: "#0a0a0a".to_string(),
            font_preloads: Vec::new(),
            critical_css_max_bytes: 15_000,
            inline_style_min_bytes: 100,
        }
    }
}

/// Privacy-friendly analytics script injection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyticsConfig {
    /// Host serving `/js/script.js`. Unset disables the script.
    pub plausible_host: Option<String>,
}

/// GitHub-issue backed comments widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommentsConfig {
    /// `owner/repo`. Unset disables the widget.
    pub repo: Option<String>,
    pub issue_term: String,
    pub theme: String,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            repo: None,
            issue_term: "pathname".to_string(),
            theme: "github-dark".to_string(),
        }
    }
}

/// Syndication feed metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    pub title: String,
    pub description: String,
    pub author: String,
    pub items: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            author: String::new(),
            items: 20,
        }
    }
}

/// Edge redirect rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedirectsConfig {
    /// Emit a `www.` → apex 301 rule.
    pub www_to_apex: bool,
    /// Extra lines in `from to status` form.
    pub rules: Vec<String>,
}

impl Default for RedirectsConfig {
    fn default() -> Self {
        Self {
            www_to_apex: true,
            rules: Vec::new(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(SiteConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config must serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = path.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value and deserialize.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    Ok(config)
}

/// Apply environment overrides through `lookup`.
///
/// Numeric variables that fail to parse are a validation error rather than
/// being silently ignored.
pub fn apply_env_overrides(
    config: &mut SiteConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
        raw.trim()
            .parse()
            .map_err(|_| ConfigError::Validation(format!("{name} must be a number, got {raw:?}")))
    }

    if let Some(url) = lookup("WP_URL") {
        config.source_url = url.trim_end_matches('/').to_string();
    }
    if let Some(domain) = lookup("TARGET_DOMAIN") {
        config.target_domain = domain.trim_end_matches('/').to_string();
    }
    if let Some(token) = lookup("WP_AUTH_TOKEN").filter(|t| !t.is_empty()) {
        config.auth_token = Some(token);
    }
    if let Some(raw) = lookup("REQUEST_TIMEOUT") {
        config.network.request_timeout_secs = parse("REQUEST_TIMEOUT", &raw)?;
    }
    if let Some(raw) = lookup("FETCH_WORKERS") {
        config.workers.fetch = parse("FETCH_WORKERS", &raw)?;
    }
    if let Some(raw) = lookup("ASSET_WORKERS") {
        config.workers.assets = parse("ASSET_WORKERS", &raw)?;
    }
    if let Some(raw) = lookup("BUILD_DEADLINE") {
        config.network.build_deadline_secs = Some(parse("BUILD_DEADLINE", &raw)?);
    }
    Ok(())
}

/// Load config from `config.toml` in the given directory plus the process
/// environment.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// applies environment overrides, and validates the result.
pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    load_config_with_env(root, |name| std::env::var(name).ok())
}

/// [`load_config`] with an injectable environment.
pub fn load_config_with_env(
    root: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SiteConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(root)?;
    let mut config = resolve_config(base, overlay)?;
    apply_env_overrides(&mut config, lookup)?;
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# wp-mirror Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Environment variables override this file:
#   WP_URL, TARGET_DOMAIN, WP_AUTH_TOKEN, REQUEST_TIMEOUT,
#   FETCH_WORKERS, ASSET_WORKERS, BUILD_DEADLINE
#
# The auth token is only ever read from WP_AUTH_TOKEN.
# Unknown keys will cause an error.

# WordPress install to mirror.
source_url = "https://wordpress.example.com"

# Public URL of the static site.
target_domain = "https://example.com"

# Persistent incremental build cache.
cache_file = ".build-cache.json"

# Directory copied into the output root on every build: favicon.ico,
# favicon-32x32.png, site.webmanifest and the like. Relative to the
# config directory.
# static_dir = "static-files"

# ---------------------------------------------------------------------------
# Network
# ---------------------------------------------------------------------------
[network]
# Per-request timeout in seconds.
request_timeout_secs = 30

user_agent = "StaticSiteGenerator/1.0"

# Overall build budget in seconds. Work not started in time is reported
# as failed and the tree-wide files are still written.
# build_deadline_secs = 1800

# ---------------------------------------------------------------------------
# Worker pools
# ---------------------------------------------------------------------------
[workers]
# Page fetch + transform workers.
fetch = 3

# Asset download workers.
assets = 5

# ---------------------------------------------------------------------------
# Incremental builds
# ---------------------------------------------------------------------------
[incremental]
# Rebuild the home page and archives after this many hours even when no
# post changed.
archive_rebuild_after_hours = 24

# Exit non-zero when more than this many items/assets fail.
# max_failures = 10

# ---------------------------------------------------------------------------
# SEO
# ---------------------------------------------------------------------------
[seo]
title_max = 60
description_min = 120
description_max = 160

# Fallback social card for pages without og:image.
# default_og_image = "/wp-content/uploads/social-card.png"

# Theme-wide description replaced on tag and category archives.
# generic_description = "A technical blog about ..."

# ---------------------------------------------------------------------------
# Performance
# ---------------------------------------------------------------------------
[performance]
theme_color = "#0a0a0a"

# Fonts preloaded on every page.
font_preloads = []

critical_css_max_bytes = 15000

# Inline <style> blocks of at least this many bytes move to /assets/css/.
inline_style_min_bytes = 100

# ---------------------------------------------------------------------------
# Analytics
# ---------------------------------------------------------------------------
[analytics]
# plausible_host = "plausible.example.com"

# ---------------------------------------------------------------------------
# Comments (utterances)
# ---------------------------------------------------------------------------
[comments]
# repo = "owner/blog-comments"
issue_term = "pathname"
theme = "github-dark"

# ---------------------------------------------------------------------------
# Feed
# ---------------------------------------------------------------------------
[feed]
title = ""
description = ""
author = ""
items = 20

# ---------------------------------------------------------------------------
# Redirects
# ---------------------------------------------------------------------------
[redirects]
www_to_apex = true

# Extra "from to status" lines.
rules = []
"##
}
