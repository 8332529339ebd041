//! Build report: what happened to every item and asset in one run.
//!
//! Every discovered item ends in exactly one bucket:
//!
//! ```text
//! discovered = processed (written + unchanged) + skipped + failed
//! ```
//!
//! The report is filled in by the coordinating thread only, then written as
//! `build-metrics.json` after the site artifacts.

use crate::resolve::{AssetOutcome, AssetStatus};
use crate::site::{SiteArtifacts, SiteError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use walkdir::WalkDir;

pub const METRICS_FILE: &str = "build-metrics.json";

/// Final state of one content item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// Transformed and written.
    Written { bytes: u64 },
    /// Same content as the cached build, existing file kept.
    Unchanged,
    /// 404 at the source, or already handled this run.
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub full_build: bool,
    pub discovered: usize,
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub assets_downloaded: usize,
    pub assets_existing: usize,
    pub assets_failed: usize,
    /// Page, stylesheet and asset bytes written this run.
    pub bytes_written: u64,
    /// `(path or url, reason)` for every failure, in the order seen.
    pub failures: Vec<(String, String)>,
    pub deadline_exceeded: bool,
    pub artifacts: SiteArtifacts,
    pub duration: Duration,
}

impl BuildReport {
    pub fn new(full_build: bool, discovered: usize) -> Self {
        Self {
            full_build,
            discovered,
            ..Self::default()
        }
    }

    pub fn processed(&self) -> usize {
        self.written + self.unchanged
    }

    pub fn record_item(&mut self, path: &str, status: &ItemStatus) {
        match status {
            ItemStatus::Written { bytes } => {
                self.written += 1;
                self.bytes_written += bytes;
            }
            ItemStatus::Unchanged => self.unchanged += 1,
            ItemStatus::Skipped(_) => self.skipped += 1,
            ItemStatus::Failed(reason) => {
                self.failed += 1;
                self.failures.push((path.to_string(), reason.clone()));
            }
        }
    }

    pub fn record_asset(&mut self, outcome: &AssetOutcome) {
        match &outcome.status {
            AssetStatus::Downloaded { bytes, .. } => {
                self.assets_downloaded += 1;
                self.bytes_written += bytes;
            }
            AssetStatus::Exists => self.assets_existing += 1,
            AssetStatus::Failed(reason) => {
                self.assets_failed += 1;
                self.failures.push((outcome.url.clone(), reason.clone()));
            }
        }
    }

    /// Item and asset failures together.
    pub fn total_failures(&self) -> usize {
        self.failed + self.assets_failed
    }

    /// Whether the configured failure threshold was crossed.
    pub fn exceeds(&self, max_failures: Option<usize>) -> bool {
        max_failures.is_some_and(|max| self.total_failures() > max)
    }

    /// Every discovered item is accounted for exactly once.
    pub fn is_balanced(&self) -> bool {
        self.processed() + self.skipped + self.failed == self.discovered
    }
}

/// Contents of `build-metrics.json`.
#[derive(Debug, Clone, Serialize)]
pub struct BuildMetrics {
    pub timestamp: String,
    pub build_mode: &'static str,
    pub generation_duration_seconds: f64,
    pub urls_discovered: usize,
    pub urls_processed: usize,
    pub urls_unchanged: usize,
    pub urls_skipped: usize,
    pub urls_failed: usize,
    pub assets_downloaded: usize,
    pub assets_existing: usize,
    pub assets_failed: usize,
    pub errors: usize,
    pub deadline_exceeded: bool,
    pub sitemap_urls: usize,
    pub feed_items: usize,
    pub search_entries: usize,
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
    pub output_directory: String,
}

/// Bytes of every file under `dir`.
pub fn tree_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

pub fn metrics(report: &BuildReport, output_dir: &Path, now: DateTime<Utc>) -> BuildMetrics {
    let total = tree_size(output_dir);
    BuildMetrics {
        timestamp: now.to_rfc3339(),
        build_mode: if report.full_build { "full" } else { "incremental" },
        generation_duration_seconds: (report.duration.as_secs_f64() * 100.0).round() / 100.0,
        urls_discovered: report.discovered,
        urls_processed: report.processed(),
        urls_unchanged: report.unchanged,
        urls_skipped: report.skipped,
        urls_failed: report.failed,
        assets_downloaded: report.assets_downloaded,
        assets_existing: report.assets_existing,
        assets_failed: report.assets_failed,
        errors: report.total_failures(),
        deadline_exceeded: report.deadline_exceeded,
        sitemap_urls: report.artifacts.sitemap_urls,
        feed_items: report.artifacts.feed_items,
        search_entries: report.artifacts.search_entries,
        total_size_bytes: total,
        total_size_mb: (total as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
        output_directory: output_dir.display().to_string(),
    }
}

pub fn write_metrics(report: &BuildReport, output_dir: &Path, now: DateTime<Utc>) -> Result<BuildMetrics, SiteError> {
    let metrics = metrics(report, output_dir, now);
    fs::write(output_dir.join(METRICS_FILE), serde_json::to_string_pretty(&metrics)?)?;
    Ok(metrics)
}
