//! # wp-mirror
//!
//! Mirrors a WordPress site into a self-contained static file tree. The
//! content API says what exists; every page is fetched, rewritten for the
//! public domain, enriched, and written to disk with the assets it needs.
//!
//! # Architecture: One Pipeline, Two Pools
//!
//! ```text
//! 1. Discover   REST listings + build cache  →  items to (re)build
//! 2. Fetch      one GET per item             →  raw HTML        ┐ fetch pool
//! 3. Transform  ordered rewrite passes       →  final HTML      ┘
//! 4. Resolve    deduped asset references     →  files on disk     asset pool
//! 5. Assemble   finished tree                →  sitemap, feed, search index
//! 6. Finalize   build cache, metrics
//! ```
//!
//! Steps 2 and 3 run together on the fetch workers, one item at a time.
//! Step 5 starts only after every page and asset is written, because its
//! artifacts enumerate the finished output tree.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`discover`] | Change detection: full or incremental item set |
//! | [`api`] | WordPress REST client: paginated listings, related posts |
//! | [`http`] | `Transport` trait and the blocking reqwest implementation |
//! | [`fetch`] | Per-item GET classified into success / not found / error |
//! | [`transform`] | The ordered rewrite passes over each document |
//! | [`markup`] | Tag scanner, selectors and byte-range edits the passes use |
//! | [`resolve`] | Asset dedup, download waves, content-type guard |
//! | [`writer`] | Deterministic site path → file mapping |
//! | [`site`] | `_headers`, `_redirects`, robots, sitemap, feed, search index |
//! | [`cache`] | Versioned JSON build cache with atomic saves |
//! | [`report`] | Per-run counts and `build-metrics.json` |
//! | [`pipeline`] | Drives one build end to end |
//! | [`config`] | `config.toml` over stock defaults, env overrides, validation |
//! | [`types`] | `ContentItem` and path helpers shared by every stage |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Partial Success Over All-or-Nothing
//!
//! A 404 or a broken page never stops the run. Each item and asset ends in
//! exactly one of written, unchanged, skipped or failed, and the report says
//! which. Only problems that make the whole result meaningless abort: the
//! content API refusing the credentials, or a listing that cannot be read.
//!
//! ## Fixed-Point Transforms
//!
//! Every pass looks for its own output before acting, so the transformer
//! applied to a mirrored page returns it unchanged. Incremental builds can
//! therefore rewrite any subset of pages without the others drifting.
//!
//! ## Relative Where Possible
//!
//! Source-domain URLs in links move to the target domain, but root-relative
//! URLs stay relative and stylesheets are rewritten to root-relative form.
//! The same tree can be served from a staging host unchanged.
//!
//! ## Cache Written Once
//!
//! The build cache is mutated in memory during a run and persisted in one
//! atomic write at the end. A crash mid-build leaves the previous cache
//! intact, and the next run simply redoes the work.

pub mod api;
pub mod cache;
pub mod config;
pub mod discover;
pub mod fetch;
pub mod http;
pub mod markup;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod resolve;
pub mod site;
pub mod transform;
pub mod types;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_helpers;
