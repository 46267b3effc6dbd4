//! # Newswire Corpus
//!
//! A long-running crawler that builds a categorized corpus of Turkish
//! wire-agency articles and turns the newest of them into content units for a
//! downstream synthesis stage.
//!
//! ## Usage
//!
//! ```sh
//! newswire_corpus --config ./newswire.yaml
//! newswire_corpus --once --output ./data/content_units.json
//! ```
//!
//! ## Architecture
//!
//! Every cycle runs the same pipeline:
//! 1. **Polling**: Fetch each configured RSS feed and insert unseen items
//! 2. **Scraping**: Extract body, images, keywords and category from each pending article page
//! 3. **Expansion**: Search the site for the keywords of freshly scraped feed items
//! 4. **Selection**: Group scraped items by category and keep the newest K of each
//! 5. **Output**: Transform the selection and merge new units into the output JSON file
//!
//! The corpus itself lives in a JSON file owned by a single store task and is
//! rewritten after every change.

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod categorize;
mod cli;
mod config;
mod error;
mod expansion;
mod feeds;
mod governor;
mod http;
mod models;
mod normalizer;
mod outputs;
mod pipeline;
mod scrapers;
mod store;
mod transform;
mod utils;

use cli::Cli;
use config::Settings;
use http::Fetcher;
use pipeline::{Pipeline, log_report};
use store::CorpusStore;
use utils::ensure_writable_parent;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "newswire_corpus starting up");

    // Parse CLI and layer it over the config file
    let args = Cli::parse();
    debug!(?args.config, once = args.once, "Parsed CLI arguments");

    let mut settings = Settings::load(args.config.as_deref())?;
    settings.apply_overrides(&args);
    settings.validate()?;
    info!(
        base_url = %settings.base_url,
        feeds = settings.feeds.len(),
        per_category = settings.per_category,
        max_keywords = settings.max_keywords,
        "Configuration ready"
    );

    // Early check: both files must be writable before any network work
    for path in [&settings.corpus_path, &settings.content_units_path] {
        if let Err(e) = ensure_writable_parent(path).await {
            error!(
                path = %path.display(),
                error = %e,
                "Output location is not writable (fix perms or choose a different path)"
            );
            return Err(e.into());
        }
    }

    // ---- Corpus store ----
    let store = CorpusStore::open(&settings.corpus_path).await?.spawn();

    if args.requeue_failed {
        let moved = store.requeue_failed().await?;
        info!(moved, "Requeued failed scrapes");
    }
    info!(items = store.len().await?, path = %settings.corpus_path.display(), "Corpus ready");

    let fetcher = Fetcher::new(&settings)?;
    let pipeline = Pipeline::new(fetcher, store, settings);

    if args.once {
        let start_time = std::time::Instant::now();
        let report = pipeline.run_isolated().await.inspect_err(|e| {
            error!(error = %e, "Cycle failed");
        })?;
        log_report(1, &report, start_time.elapsed());
        return Ok(());
    }

    pipeline.run_forever().await;
    info!("newswire_corpus stopped");
    Ok(())
}
