use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use wp_mirror::api::ContentApi;
use wp_mirror::cache::BuildCache;
use wp_mirror::config::{self, SiteConfig};
use wp_mirror::http::HttpTransport;
use wp_mirror::output;
use wp_mirror::pipeline::{self, BuildOptions};

/// Exit status when the configured failure threshold is exceeded.
const EXIT_TOO_MANY_FAILURES: u8 = 2;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "wp-mirror")]
#[command(about = "Mirror a WordPress site into a static file tree")]
#[command(long_about = "\
Mirror a WordPress site into a static file tree

The WordPress REST API decides what exists. Every post, page and non-empty
category/tag archive is fetched, rewritten for the target domain, enriched
(SEO metadata, structured data, breadcrumbs, lazy loading) and written as
<path>/index.html, together with every image, font, script and stylesheet
it references.

Output layout:

  public/
  ├── index.html                   # Home page
  ├── 2024/03/hello-world/index.html
  ├── category/home-lab/index.html
  ├── wp-content/...               # Mirrored assets, source paths kept
  ├── assets/css/...               # Extracted inline styles (content-addressed)
  ├── sitemap.xml  robots.txt  _headers  _redirects
  ├── feed/index.xml
  ├── search-index.json  search-index.min.json  js/search.js
  ├── favicon.ico ...              # Copied from static_dir, if set
  └── build-metrics.json

Incremental builds (the default) use the build cache to fetch only what
changed since the last run; archives are rebuilt when anything changed or
the last full build is older than incremental.archive_rebuild_after_hours.

Configuration comes from <config-dir>/config.toml and the environment:
WP_URL, TARGET_DOMAIN, WP_AUTH_TOKEN, REQUEST_TIMEOUT, FETCH_WORKERS,
ASSET_WORKERS, BUILD_DEADLINE.

Run 'wp-mirror gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Directory holding config.toml; cache_file and static_dir resolve against it
    #[arg(long, default_value = ".", global = true)]
    config_dir: PathBuf,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the static mirror into OUTPUT_DIR
    Generate {
        output_dir: PathBuf,
        /// Ignore the build cache and rebuild everything
        #[arg(long)]
        no_incremental: bool,
    },
    /// Inspect or maintain the build cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry counts and build times
    Stats,
    /// Entry counts plus the most recently processed items
    Inspect {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Delete every entry, forcing the next build to be full
    Clear,
    /// Drop post and page entries the content API no longer lists
    PurgeStale,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "wp_mirror=debug" } else { "wp_mirror=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn cache_path(config_dir: &Path, config: &SiteConfig) -> PathBuf {
    config_dir.join(&config.cache_file)
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Generate {
            output_dir,
            no_incremental,
        } => {
            let mut site_config = config::load_config(&cli.config_dir)?;
            site_config.static_dir = site_config.static_dir.map(|dir| cli.config_dir.join(dir));
            let transport = HttpTransport::new(&site_config)?;
            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    print_lines(output::format_build_event(&event));
                }
            });
            let result = pipeline::generate(
                &output_dir,
                &site_config,
                &transport,
                BuildOptions {
                    incremental: !no_incremental,
                    cache_path: cache_path(&cli.config_dir, &site_config),
                    events: Some(tx),
                },
            );
            printer.join().ok();
            let report = result?;
            print_lines(output::format_build_summary(&report));
            if report.exceeds(site_config.incremental.max_failures) {
                eprintln!(
                    "{} failures exceed incremental.max_failures",
                    report.total_failures()
                );
                return Ok(ExitCode::from(EXIT_TOO_MANY_FAILURES));
            }
        }
        Command::Cache { action } => {
            let site_config = config::load_config(&cli.config_dir)?;
            let path = cache_path(&cli.config_dir, &site_config);
            let mut cache = BuildCache::load(&path);
            match action {
                CacheAction::Stats => print_lines(output::format_cache_stats(&cache.stats())),
                CacheAction::Inspect { limit } => print_lines(output::format_cache_inspect(&cache, limit)),
                CacheAction::Clear => {
                    cache.clear();
                    cache.save(&path)?;
                    println!("Cache cleared: {}", path.display());
                }
                CacheAction::PurgeStale => {
                    let transport = HttpTransport::new(&site_config)?;
                    let api = ContentApi::new(&transport, site_config.source());
                    let current: HashSet<String> = api
                        .list_posts(None)?
                        .into_iter()
                        .chain(api.list_pages(None)?)
                        .map(|item| item.path)
                        .collect();
                    let removed = cache.remove_stale_entries(&current);
                    cache.save(&path)?;
                    println!("Removed {removed} stale entries");
                    print_lines(output::format_cache_stats(&cache.stats()));
                }
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(ExitCode::SUCCESS)
}
