//! Build driver: one run from change detection to cache finalize.
//!
//! ```text
//! load cache ─▶ discover ─▶ fetch pool: fetch → transform → write (per item)
//!                                   │
//!                    merge on the coordinating thread
//!                    (report, cache marks, asset refs, stylesheets)
//!                                   │
//!                  asset pool: download waves ─▶ barrier
//!                                   │
//!                   site artifacts ─▶ cache finalize ─▶ metrics
//! ```
//!
//! Workers never touch shared state except the [`ProcessedSet`] and the
//! event channel. Everything else comes back as a per-item value and is
//! merged by the thread that called [`generate`].
//!
//! Per-item and per-asset failures are recorded in the [`BuildReport`];
//! only discovery, output directory, site assembly and cache persistence
//! errors end the run.

use crate::api::{ApiError, ContentApi};
use crate::cache::{BuildCache, CacheError, hash_content};
use crate::config::{SiteConfig, effective_workers};
use crate::discover::{BuildMode, discover};
use crate::fetch::{FetchOutcome, ProcessedSet, fetch};
use crate::http::Transport;
use crate::report::{BuildReport, ItemStatus, write_metrics};
use crate::resolve::{
    AssetOutcome, AssetPlanner, AssetStatus, DEADLINE_EXCEEDED, ResolveOptions, resolve, stylesheet_references,
};
use crate::site::{SiteArtifacts, SiteError, assemble};
use crate::transform::{TransformContext, transform};
use crate::types::ContentItem;
use crate::writer::{self, WriteError};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Discovery failed: {0}")]
    Discovery(#[from] ApiError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Output error: {0}")]
    Write(#[from] WriteError),
    #[error("Site assembly failed: {0}")]
    Site(#[from] SiteError),
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Progress sent to the printer thread.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    Started { mode: BuildMode, items: usize, media: usize },
    Item { path: String, status: ItemStatus },
    Asset(AssetOutcome),
    Assembled(SiteArtifacts),
}

pub struct BuildOptions {
    /// Use the cache to build only what changed, when it has a previous build.
    pub incremental: bool,
    pub cache_path: PathBuf,
    pub events: Option<Sender<BuildEvent>>,
}

/// Everything a fetch worker reads. Shared by reference, never mutated
/// except through `processed`.
struct ItemEnv<'a> {
    config: &'a SiteConfig,
    transport: &'a dyn Transport,
    api: &'a ContentApi<'a>,
    cache: &'a BuildCache,
    processed: &'a ProcessedSet,
    output_dir: &'a Path,
    mode: BuildMode,
    deadline: Option<Instant>,
}

/// What one worker hands back for merging.
struct ItemResult {
    item: ContentItem,
    status: ItemStatus,
    hash: Option<String>,
    assets: BTreeSet<String>,
    stylesheets: Vec<(String, String)>,
}

impl ItemResult {
    fn bare(item: &ContentItem, status: ItemStatus) -> Self {
        Self {
            item: item.clone(),
            status,
            hash: None,
            assets: BTreeSet::new(),
            stylesheets: Vec::new(),
        }
    }
}

fn send(events: &Option<Sender<BuildEvent>>, event: BuildEvent) {
    if let Some(tx) = events {
        // Printer may have gone away; output is best-effort.
        tx.send(event).ok();
    }
}

fn process_item(item: &ContentItem, env: &ItemEnv<'_>) -> ItemResult {
    if env.deadline.is_some_and(|d| Instant::now() >= d) {
        return ItemResult::bare(item, ItemStatus::Failed(DEADLINE_EXCEEDED.to_string()));
    }
    if !env.processed.claim(&item.path) {
        return ItemResult::bare(item, ItemStatus::Skipped("already processed".to_string()));
    }

    let outcome = fetch(env.transport, env.config.source(), item);
    let is_html = outcome.is_html();
    let body = match outcome {
        FetchOutcome::Success { body, .. } => body,
        FetchOutcome::NotFound => return ItemResult::bare(item, ItemStatus::Skipped("not found".to_string())),
        FetchOutcome::Error(reason) => return ItemResult::bare(item, ItemStatus::Failed(reason)),
    };

    let hash = hash_content(&body);
    if env.mode == BuildMode::Incremental
        && !env.cache.has_changed(item, &hash)
        && writer::output_path(env.output_dir, &item.path).is_ok_and(|p| p.exists())
    {
        debug!(path = %item.path, "unchanged since last build");
        return ItemResult {
            hash: Some(hash),
            ..ItemResult::bare(item, ItemStatus::Unchanged)
        };
    }

    let (html, assets, stylesheets) = if is_html {
        let ctx = TransformContext::new(item, env.config).with_related(env.api);
        let out = transform(&String::from_utf8_lossy(&body), ctx);
        let styles = out.stylesheets.into_iter().map(|s| (s.path, s.css)).collect();
        (out.html.into_bytes(), out.assets, styles)
    } else {
        (body, BTreeSet::new(), Vec::new())
    };

    let status = match writer::write_page(env.output_dir, &item.path, &html) {
        Ok((_, bytes)) => ItemStatus::Written { bytes },
        Err(e) => ItemStatus::Failed(e.to_string()),
    };
    ItemResult {
        item: item.clone(),
        status,
        hash: Some(hash),
        assets,
        stylesheets,
    }
}

/// Write extracted stylesheets. Content-addressed, so an existing file is
/// already the right one.
fn write_stylesheets(output_dir: &Path, styles: &BTreeMap<String, String>) -> Vec<AssetOutcome> {
    styles
        .iter()
        .map(|(path, css)| {
            let status = match writer::asset_path(output_dir, path) {
                Ok(dest) if dest.exists() => AssetStatus::Exists,
                Ok(dest) => match writer::write_file(&dest, css.as_bytes()) {
                    Ok(bytes) => AssetStatus::Downloaded {
                        bytes,
                        hash: hash_content(css.as_bytes()),
                    },
                    Err(e) => AssetStatus::Failed(e.to_string()),
                },
                Err(e) => AssetStatus::Failed(e.to_string()),
            };
            AssetOutcome {
                url: path.clone(),
                path: path.clone(),
                status,
            }
        })
        .collect()
}

/// Run a build now.
pub fn generate(
    output_dir: &Path,
    config: &SiteConfig,
    transport: &dyn Transport,
    options: BuildOptions,
) -> Result<BuildReport, BuildError> {
    generate_at(output_dir, config, transport, options, Utc::now())
}

/// Run a build as if started at `now`. Cache timestamps use `now`.
pub fn generate_at(
    output_dir: &Path,
    config: &SiteConfig,
    transport: &dyn Transport,
    options: BuildOptions,
    now: DateTime<Utc>,
) -> Result<BuildReport, BuildError> {
    let started = Instant::now();
    let deadline = config.network.build_deadline().map(|d| started + d);
    let events = options.events;

    let mut cache = BuildCache::load(&options.cache_path);
    let mode = BuildMode::resolve(options.incremental, &cache);
    let api = ContentApi::new(transport, config.source());
    let discovery = discover(&api, mode, &cache, &config.incremental, now)?;

    if mode.is_full() {
        writer::clear_output_dir(output_dir)?;
    } else {
        std::fs::create_dir_all(output_dir).map_err(WriteError::from)?;
    }
    send(
        &events,
        BuildEvent::Started {
            mode,
            items: discovery.items.len(),
            media: discovery.media.len(),
        },
    );

    // Fetch, transform and write every item.
    let processed = ProcessedSet::new();
    let env = ItemEnv {
        config,
        transport,
        api: &api,
        cache: &cache,
        processed: &processed,
        output_dir,
        mode,
        deadline,
    };
    let fetch_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(effective_workers(config.workers.fetch))
        .build()?;
    let results: Vec<ItemResult> = fetch_pool.install(|| {
        discovery
            .items
            .par_iter()
            .map(|item| {
                let result = process_item(item, &env);
                send(
                    &events,
                    BuildEvent::Item {
                        path: item.path.clone(),
                        status: result.status.clone(),
                    },
                );
                result
            })
            .collect()
    });

    let mut report = BuildReport::new(mode.is_full(), discovery.items.len());
    let mut asset_refs: BTreeSet<String> = discovery.media.iter().cloned().collect();
    let mut stylesheets: BTreeMap<String, String> = BTreeMap::new();
    for result in results {
        report.record_item(&result.item.path, &result.status);
        if let (ItemStatus::Written { .. } | ItemStatus::Unchanged, Some(hash)) = (&result.status, &result.hash) {
            cache.mark_processed(&result.item, hash, now);
        }
        asset_refs.extend(result.assets);
        for (path, css) in result.stylesheets {
            stylesheets.entry(path).or_insert(css);
        }
    }

    // Extracted stylesheets, then everything they and the pages reference.
    let source = config.source();
    for (path, css) in &stylesheets {
        asset_refs.extend(stylesheet_references(css, &format!("{source}{path}")));
    }
    let mut asset_outcomes = write_stylesheets(output_dir, &stylesheets);
    for outcome in &asset_outcomes {
        send(&events, BuildEvent::Asset(outcome.clone()));
    }

    let mut planner = AssetPlanner::new(source, config.target());
    let jobs = planner.plan(&asset_refs);
    info!(references = asset_refs.len(), unique = jobs.len(), "resolving assets");
    let asset_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(effective_workers(config.workers.assets))
        .build()?;
    let resolve_opts = ResolveOptions {
        source,
        target: config.target(),
        output_dir,
        skip_existing: !mode.is_full(),
        deadline,
    };
    let on_done = |outcome: &AssetOutcome| send(&events, BuildEvent::Asset(outcome.clone()));
    asset_outcomes.extend(resolve(transport, &asset_pool, &mut planner, jobs, &resolve_opts, &on_done));

    for outcome in &asset_outcomes {
        report.record_asset(outcome);
        if let AssetStatus::Downloaded { hash, .. } = &outcome.status {
            cache.mark_asset(&outcome.path, hash, now);
        }
    }

    // Barrier passed: every page and asset is on disk.
    report.artifacts = assemble(output_dir, config, transport)?;
    send(&events, BuildEvent::Assembled(report.artifacts.clone()));

    cache.finalize(&options.cache_path, mode.is_full(), now)?;

    report.deadline_exceeded = report.failures.iter().any(|(_, reason)| reason == DEADLINE_EXCEEDED);
    if report.deadline_exceeded {
        warn!("build deadline exceeded, output is partial");
    }
    report.duration = started.elapsed();
    write_metrics(&report, output_dir, Utc::now())?;

    info!(
        mode = ?mode,
        discovered = report.discovered,
        processed = report.processed(),
        skipped = report.skipped,
        failed = report.failed,
        assets = report.assets_downloaded,
        asset_failures = report.assets_failed,
        "build complete"
    );
    Ok(report)
}
