//! Runtime configuration.
//!
//! Settings come from an optional YAML file; every field has a default so an
//! empty (or absent) file yields a working configuration for the Turkish
//! wire service. Selected fields can be overridden from the environment through
//! [`Cli`](crate::cli::Cli), see [`Settings::apply_overrides`].
//!
//! ```yaml
//! feed_interval_secs: 600
//! max_keywords: 5
//! feeds:
//!   - endpoint: "{base}/{lang}/rss/default?cat={category}"
//!     category: ekonomi
//!     language: tr
//! ```

use crate::cli::Cli;
use crate::models::{CategoryLabel, FeedSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Every tunable of the pipeline. Field defaults are listed next to each field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Scheme + host of the news site; also the only host the scraper accepts.
    pub base_url: String,
    /// Locale prefix used in article paths (`/tr/...`). Default `tr`.
    pub language: String,
    pub user_agent: String,

    /// Seconds between the start of two cycles. Default 900.
    pub feed_interval_secs: u64,
    /// Pause between two feed sources of one cycle. Default 2000.
    pub inter_source_delay_ms: u64,
    pub feeds: Vec<FeedSource>,

    /// Retries after the first attempt of a network call. Default 3.
    pub max_retries: usize,
    /// Unit of the linear backoff. Default 2000.
    pub retry_delay_ms: u64,
    /// Per-call deadline. Default 30.
    pub request_timeout_secs: u64,
    /// Consecutive failed cycles tolerated before the extended cooldown. Default 5.
    pub failure_threshold: u32,
    /// Extended cooldown. Default 1800.
    pub failure_cooldown_secs: u64,
    /// First wait after a crashed cycle; grows with the failure streak. Default 60.
    pub error_cooldown_secs: u64,

    /// Concurrent article fetches in batch mode. Default 3.
    pub scrape_workers: usize,
    /// K_max: keywords expanded per seed article. Default 10.
    pub max_keywords: usize,
    /// N_max: search hits kept per keyword. Default 30.
    pub max_results_per_keyword: usize,
    /// Upper bound on expansion scrapes per cycle. Default 300.
    pub max_frontier: usize,
    /// Related-article links kept per page. Default 5.
    pub related_cap: usize,

    /// K: content units selected per category. Default 20.
    pub per_category: usize,
    /// Feed bodies shorter than this are rejected. Default 200.
    pub min_feed_bytes: usize,
    /// Paragraphs shorter than this are boilerplate. Default 40.
    pub min_paragraph_chars: usize,
    /// Articles with less body text than this are not transformed. Default 200.
    pub min_article_chars: usize,
    /// Category used when nothing else resolves. Default `guncel`.
    pub default_category: String,
    /// Display label to canonical key, e.g. `Kültür Sanat` -> `kultur-sanat`.
    pub categories: Vec<CategoryLabel>,

    pub corpus_path: PathBuf,
    pub content_units_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://www.aa.com.tr".to_string(),
            language: "tr".to_string(),
            user_agent: format!("newswire_corpus/{}", env!("CARGO_PKG_VERSION")),
            feed_interval_secs: 900,
            inter_source_delay_ms: 2000,
            feeds: default_feeds(),
            max_retries: 3,
            retry_delay_ms: 2000,
            request_timeout_secs: 30,
            failure_threshold: 5,
            failure_cooldown_secs: 1800,
            error_cooldown_secs: 60,
            scrape_workers: 3,
            max_keywords: 10,
            max_results_per_keyword: 30,
            max_frontier: 300,
            related_cap: 5,
            per_category: 20,
            min_feed_bytes: 200,
            min_paragraph_chars: 40,
            min_article_chars: 200,
            default_category: "guncel".to_string(),
            categories: default_categories(),
            corpus_path: PathBuf::from("data/corpus.json"),
            content_units_path: PathBuf::from("data/content_units.json"),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when no path is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("No config file given; using defaults");
            return Ok(Self::default());
        };
        let shown = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;
        let settings = Self::from_yaml(&raw).map_err(|source| ConfigError::Yaml {
            path: shown.clone(),
            source,
        })?;
        info!(path = %shown, feeds = settings.feeds.len(), "Loaded configuration");
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Apply CLI flags and environment variables on top of the file values.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(ref base_url) = cli.base_url {
            self.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(ref corpus) = cli.corpus {
            self.corpus_path = corpus.clone();
        }
        if let Some(ref output) = cli.output {
            self.content_units_path = output.clone();
        }
        if let Some(v) = cli.feed_interval_secs {
            self.feed_interval_secs = v;
        }
        if let Some(v) = cli.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = cli.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = cli.max_keywords {
            self.max_keywords = v;
        }
        if let Some(v) = cli.max_results_per_keyword {
            self.max_results_per_keyword = v;
        }
        if let Some(v) = cli.per_category {
            self.per_category = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "base_url is not a URL: {}",
                self.base_url
            )));
        }
        if self.scrape_workers == 0 {
            return Err(ConfigError::Invalid("scrape_workers must be > 0".into()));
        }
        if self.per_category == 0 {
            return Err(ConfigError::Invalid("per_category must be > 0".into()));
        }
        if self.default_category.trim().is_empty() {
            return Err(ConfigError::Invalid("default_category is empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

fn default_feeds() -> Vec<FeedSource> {
    let mut feeds = vec![FeedSource {
        category: None,
        endpoint: "{base}/{lang}/rss/default".to_string(),
        language: "tr".to_string(),
    }];
    for cat in [
        "guncel",
        "politika",
        "ekonomi",
        "dunya",
        "spor",
        "saglik",
        "bilim-teknoloji",
        "kultur-sanat",
        "yasam",
        "analiz",
    ] {
        feeds.push(FeedSource {
            category: Some(cat.to_string()),
            endpoint: "{base}/{lang}/rss/default?cat={category}".to_string(),
            language: "tr".to_string(),
        });
    }
    feeds
}

// "Güncel" and "Gündem" stay distinct keys; the source uses both labels.
fn default_categories() -> Vec<CategoryLabel> {
    [
        ("Gündem", "gundem"),
        ("Güncel", "guncel"),
        ("Politika", "politika"),
        ("Ekonomi", "ekonomi"),
        ("Dünya", "dunya"),
        ("Spor", "spor"),
        ("Sağlık", "saglik"),
        ("Bilim Teknoloji", "bilim-teknoloji"),
        ("Bilim, Teknoloji", "bilim-teknoloji"),
        ("Teknoloji", "bilim-teknoloji"),
        ("Kültür Sanat", "kultur-sanat"),
        ("Kültür", "kultur-sanat"),
        ("Yaşam", "yasam"),
        ("Eğitim", "egitim"),
        ("Analiz", "analiz"),
        ("Türkiye", "turkiye"),
    ]
    .into_iter()
    .map(|(label, key)| CategoryLabel {
        label: label.to_string(),
        key: key.to_string(),
    })
    .collect()
}
