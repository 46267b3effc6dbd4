//! Data models for the corpus and its derived content units.
//!
//! This module defines the core data structures used throughout the application:
//! - [`FeedSource`]: one configured RSS endpoint
//! - [`RawItem`]: a discovered article, the unit of the corpus (keyed by GUID)
//! - [`ScrapedContent`]: what the article scraper extracted from the page
//! - [`ContentUnit`]: the normalized, synthesis-ready record built from a selected item
//!
//! Everything here round-trips through JSON: the corpus file is a map of GUID to
//! [`RawItem`], the output file a map of unit id to [`ContentUnit`].

use crate::error::FailureKind;
use crate::utils::{parse_source_date, short_hash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One configured feed endpoint.
///
/// `endpoint` is a template; `{base}`, `{lang}` and `{category}` are substituted
/// by [`FeedSource::render_url`]. A source without a category is a generic feed:
/// its items carry no category hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    #[serde(default)]
    pub category: Option<String>,
    pub endpoint: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "tr".to_string()
}

impl FeedSource {
    /// Name used in logs and reports.
    pub fn name(&self) -> &str {
        self.category.as_deref().unwrap_or("all")
    }

    pub fn render_url(&self, base_url: &str) -> Result<String, FailureKind> {
        let mut url = self
            .endpoint
            .replace("{base}", base_url.trim_end_matches('/'))
            .replace("{lang}", &self.language);
        if url.contains("{category}") {
            let Some(ref category) = self.category else {
                return Err(FailureKind::Validation(format!(
                    "feed template {} needs a category",
                    self.endpoint
                )));
            };
            url = url.replace("{category}", &urlencoding::encode(category));
        }
        Ok(url)
    }
}

/// A display label as printed by the source, mapped to its canonical key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLabel {
    pub label: String,
    pub key: String,
}

/// The raw, undelimited description text from a feed entry.
///
/// Only [`crate::normalizer`] looks inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptionBlob(String);

impl DescriptionBlob {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Fields recovered from a [`DescriptionBlob`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDescription {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub title: String,
    pub summary: String,
    pub author: Option<String>,
    /// `DD.MM.YYYY`, optionally followed by `HH:MM`.
    pub published_date: Option<String>,
    pub updated_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeState {
    Discovered,
    ScrapeAttempted,
    ScrapeSucceeded,
    ScrapeFailed,
}

/// How an item entered the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemOrigin {
    Feed { source: String },
    Expansion { seed_guid: String, keyword: String },
}

/// A keyword chip from an article page and the search page it links to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeywordToken {
    pub text: String,
    pub search_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedArticle {
    pub title: String,
    pub url: String,
}

/// One result of a keyword search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub url: String,
    pub date_hint: Option<DateTime<Utc>>,
}

/// Everything extracted from one article page. Replaced wholesale on re-scrape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedContent {
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub paragraphs: Vec<String>,
    pub author: Option<String>,
    pub location: Option<String>,
    pub publish_date: Option<String>,
    pub update_date: Option<String>,
    pub main_image: Option<String>,
    pub images: Vec<String>,
    pub tags: Vec<String>,
    pub keywords: Vec<KeywordToken>,
    pub category_full: Option<String>,
    pub related: Vec<RelatedArticle>,
    pub meta: BTreeMap<String, String>,
    pub scraped_at: Option<DateTime<Utc>>,
}

impl ScrapedContent {
    /// Characters of body text, the measure behind `min_article_chars`.
    pub fn body_chars(&self) -> usize {
        self.paragraphs.iter().map(|p| p.chars().count()).sum()
    }
}

/// A discovered article; the corpus maps `guid` to this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: DescriptionBlob,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub category_hint: Option<String>,
    pub image: Option<String>,
    pub scrape_state: ScrapeState,
    #[serde(default)]
    pub scrape_error: Option<String>,
    #[serde(default)]
    pub scrape_attempts: u32,
    #[serde(default)]
    pub last_scrape_at: Option<DateTime<Utc>>,
    pub origin: ItemOrigin,
    #[serde(default)]
    pub scraped: Option<ScrapedContent>,
}

impl RawItem {
    /// A freshly discovered, not yet scraped item.
    pub fn discovered(guid: String, title: String, link: String, origin: ItemOrigin) -> Self {
        Self {
            guid,
            title,
            link,
            description: DescriptionBlob::default(),
            published_at: None,
            collected_at: Utc::now(),
            category_hint: None,
            image: None,
            scrape_state: ScrapeState::Discovered,
            scrape_error: None,
            scrape_attempts: 0,
            last_scrape_at: None,
            origin,
            scraped: None,
        }
    }

    /// Page date, else feed/search date, else collection time.
    pub fn effective_date(&self) -> DateTime<Utc> {
        self.scraped
            .as_ref()
            .and_then(|s| s.publish_date.as_deref())
            .and_then(parse_source_date)
            .or(self.published_at)
            .unwrap_or(self.collected_at)
    }

    pub fn needs_scrape(&self) -> bool {
        matches!(
            self.scrape_state,
            ScrapeState::Discovered | ScrapeState::ScrapeAttempted
        )
    }

    pub fn is_from_feed(&self) -> bool {
        matches!(self.origin, ItemOrigin::Feed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
}

/// A synthesis-ready record derived from one selected, successfully scraped item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub id: String,
    pub guid: String,
    pub title: String,
    pub category: String,
    pub summary: String,
    pub synthesis_text: String,
    pub images: Vec<String>,
    pub keywords: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub source_url: String,
    pub status: UnitStatus,
}

impl ContentUnit {
    /// Stable id: hash of title and GUID.
    pub fn make_id(title: &str, guid: &str) -> String {
        short_hash(&format!("{title}{guid}"))
    }
}
