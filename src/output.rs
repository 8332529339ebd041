//! CLI output formatting for builds and cache maintenance.
//!
//! # Output Format
//!
//! ## Build progress
//!
//! ```text
//! ==> Full build: 8 items, 2 media files
//! /2024/03/hello/ → written (14.2 KB)
//! /about/ → unchanged
//! /old/ → skipped: not found
//! /broken/ → FAILED: HTTP 500
//!     /wp-content/uploads/a.jpg: downloaded (88.0 KB)
//!     /wp-content/themes/t/style.css: FAILED: HTML returned instead of CSS
//! ==> Site: 9 pages, 8 sitemap URLs, 3 feed items, 7 search entries
//! ```
//!
//! ## Summary
//!
//! ```text
//! Items: 8 discovered, 7 processed (6 written, 1 unchanged), 0 skipped, 1 failed
//! Assets: 12 downloaded, 3 existing, 1 failed
//! Written: 1.4 MB in 3.2s
//! Failures
//!     /broken/: HTTP 500
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function returning `Vec<String>`. Format
//! functions are pure; `main` prints their lines, build progress from a
//! dedicated printer thread.

use crate::cache::{BuildCache, CacheStats};
use crate::discover::BuildMode;
use crate::pipeline::BuildEvent;
use crate::report::{BuildReport, ItemStatus};
use crate::resolve::AssetStatus;
use chrono::{DateTime, Utc};

// ============================================================================
// Helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte size.
fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

// ============================================================================
// Build progress
// ============================================================================

pub fn format_build_event(event: &BuildEvent) -> Vec<String> {
    match event {
        BuildEvent::Started { mode, items, media } => {
            let mode = match mode {
                BuildMode::Full => "Full",
                BuildMode::Incremental => "Incremental",
            };
            vec![format!("==> {mode} build: {items} items, {media} media files")]
        }
        BuildEvent::Item { path, status } => {
            let status = match status {
                ItemStatus::Written { bytes } => format!("written ({})", format_size(*bytes)),
                ItemStatus::Unchanged => "unchanged".to_string(),
                ItemStatus::Skipped(reason) => format!("skipped: {reason}"),
                ItemStatus::Failed(reason) => format!("FAILED: {reason}"),
            };
            vec![format!("{path} \u{2192} {status}")]
        }
        BuildEvent::Asset(outcome) => {
            let status = match &outcome.status {
                AssetStatus::Downloaded { bytes, .. } => format!("downloaded ({})", format_size(*bytes)),
                AssetStatus::Exists => "exists".to_string(),
                AssetStatus::Failed(reason) => format!("FAILED: {reason}"),
            };
            vec![format!("{}{}: {}", indent(1), outcome.path, status)]
        }
        BuildEvent::Assembled(site) => vec![format!(
            "==> Site: {} pages, {} sitemap URLs, {} feed items, {} search entries, {} static files",
            site.pages, site.sitemap_urls, site.feed_items, site.search_entries, site.static_files
        )],
    }
}

pub fn format_build_summary(report: &BuildReport) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Items: {} discovered, {} processed ({} written, {} unchanged), {} skipped, {} failed",
            report.discovered,
            report.processed(),
            report.written,
            report.unchanged,
            report.skipped,
            report.failed
        ),
        format!(
            "Assets: {} downloaded, {} existing, {} failed",
            report.assets_downloaded, report.assets_existing, report.assets_failed
        ),
        format!(
            "Written: {} in {:.1}s",
            format_size(report.bytes_written),
            report.duration.as_secs_f64()
        ),
    ];
    if report.deadline_exceeded {
        lines.push("Build deadline exceeded: output is partial".to_string());
    }
    if !report.failures.is_empty() {
        lines.push("Failures".to_string());
        for (what, reason) in &report.failures {
            lines.push(format!("{}{what}: {reason}", indent(1)));
        }
    }
    lines
}

// ============================================================================
// Cache maintenance
// ============================================================================

pub fn format_cache_stats(stats: &CacheStats) -> Vec<String> {
    vec![
        format!("Cache: {stats}"),
        format!("{}Last build: {}", indent(1), format_time(stats.last_build_time)),
        format!("{}Last full build: {}", indent(1), format_time(stats.last_full_build_time)),
    ]
}

/// Stats plus the most recently processed entries.
pub fn format_cache_inspect(cache: &BuildCache, limit: usize) -> Vec<String> {
    let mut lines = format_cache_stats(&cache.stats());
    let recent = cache.recent(limit);
    if recent.is_empty() {
        return lines;
    }
    lines.push(String::new());
    lines.push("Recently processed".to_string());
    for (bucket, path, entry) in recent {
        let hash: String = entry.content_hash.chars().take(12).collect();
        lines.push(format!("{}{} {path}", indent(1), bucket.label()));
        lines.push(format!(
            "{}Processed: {}",
            indent(2),
            entry.processed_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines.push(format!("{}Modified: {}", indent(2), format_time(entry.modified_at)));
        lines.push(format!("{}Hash: {hash}", indent(2)));
    }
    lines
}
