//! Command-line interface definitions.
//!
//! The process is meant to run unattended, so every option can also be given
//! through an environment variable. Values given here override the YAML
//! configuration file (see [`Settings::apply_overrides`](crate::config::Settings::apply_overrides)).

use clap::Parser;
use std::path::PathBuf;

/// Process-level options for the crawler.
///
/// # Examples
///
/// ```sh
/// # Run forever with the built-in defaults
/// newswire_corpus
///
/// # One cycle against a config file, retrying previously failed scrapes
/// newswire_corpus --config ./newswire.yaml --once --requeue-failed
///
/// # Override bounds from the environment
/// MAX_KEYWORDS=5 PER_CATEGORY=10 newswire_corpus
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "NEWSWIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Corpus JSON file (GUID -> item)
    #[arg(long, env = "NEWSWIRE_CORPUS")]
    pub corpus: Option<PathBuf>,

    /// Content-unit JSON output file (unit id -> unit)
    #[arg(short, long, env = "NEWSWIRE_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Base URL of the news site
    #[arg(long, env = "NEWSWIRE_BASE_URL")]
    pub base_url: Option<String>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Move every failed scrape back to Discovered before the first cycle
    #[arg(long)]
    pub requeue_failed: bool,

    /// Seconds between cycles
    #[arg(long, env = "FEED_INTERVAL_SECS")]
    pub feed_interval_secs: Option<u64>,

    /// Retries per network call
    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<usize>,

    /// Per-call timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Keywords expanded per seed article (K_max)
    #[arg(long, env = "MAX_KEYWORDS")]
    pub max_keywords: Option<usize>,

    /// Search hits kept per keyword (N_max)
    #[arg(long, env = "MAX_RESULTS_PER_KEYWORD")]
    pub max_results_per_keyword: Option<usize>,

    /// Content units selected per category (K)
    #[arg(long, env = "PER_CATEGORY")]
    pub per_category: Option<usize>,
}
