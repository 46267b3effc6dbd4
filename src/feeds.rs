//! RSS polling: fetch each configured feed, validate it, and insert new items.
//!
//! Sources are polled one after another with a short, jittered pause between
//! them. A failing source is reported and skipped; it never affects the
//! others. Items are handed to the store as soon as their source is parsed.

use crate::config::Settings;
use crate::error::FailureKind;
use crate::http::Fetcher;
use crate::models::{DescriptionBlob, FeedSource, ItemOrigin, RawItem};
use crate::store::{CorpusHandle, StoreError};
use crate::utils::{collapse_whitespace, derive_guid, parse_source_date, truncate_for_log};
use quick_xml::de::from_str;
use rand::Rng;
use scraper::Html;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Option<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    title: Option<String>,
    link: Option<String>,
    guid: Option<EntryGuid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    image: Option<String>,
    enclosure: Option<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct EntryGuid {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
}

/// Items recovered from one feed body.
#[derive(Debug, Default)]
pub struct ParsedFeed {
    pub items: Vec<RawItem>,
    /// Entries dropped for missing a title or link.
    pub invalid: usize,
}

/// Outcome of polling one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceReport {
    pub source: String,
    pub fetched: usize,
    pub new: usize,
    pub duplicate: usize,
    pub invalid: usize,
    /// Set when the source as a whole failed (fetch or validation).
    pub failed: Option<String>,
}

/// Validate and parse a feed body into discovered items.
pub fn parse_feed(body: &str, source: &FeedSource, min_bytes: usize) -> Result<ParsedFeed, FailureKind> {
    if body.len() <= min_bytes {
        return Err(FailureKind::Validation(format!(
            "feed body too small ({} bytes)",
            body.len()
        )));
    }
    let cleaned = scrub_html_entities_for_xml(body);
    let rss: Rss = from_str(&cleaned)?;
    let channel = rss
        .channel
        .ok_or_else(|| FailureKind::Validation("feed has no <channel>".to_string()))?;

    let mut parsed = ParsedFeed::default();
    for entry in channel.items {
        match entry_to_item(entry, source) {
            Ok(item) => parsed.items.push(item),
            Err(e) => {
                warn!(source = source.name(), error = %e, "Skipping feed entry");
                parsed.invalid += 1;
            }
        }
    }
    Ok(parsed)
}

fn entry_to_item(entry: Entry, source: &FeedSource) -> Result<RawItem, FailureKind> {
    let title = entry
        .title
        .as_deref()
        .map(collapse_whitespace)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| FailureKind::Validation("entry without title".to_string()))?;
    let link = entry
        .link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| FailureKind::Validation(format!("entry without link: {title}")))?
        .to_string();

    let guid = derive_guid(entry.guid.as_ref().map(|g| g.value.as_str()), &link);
    let mut item = RawItem::discovered(
        guid,
        title,
        link,
        ItemOrigin::Feed {
            source: source.name().to_string(),
        },
    );
    item.description = DescriptionBlob::new(plain_text(entry.description.as_deref().unwrap_or_default()));
    item.published_at = entry.pub_date.as_deref().and_then(parse_source_date);
    item.category_hint = source.category.clone();
    item.image = entry
        .image
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| entry.enclosure.and_then(|e| e.url));
    Ok(item)
}

/// Description text with any embedded markup removed.
fn plain_text(raw: &str) -> String {
    if !raw.contains('<') {
        return raw.trim().to_string();
    }
    Html::parse_fragment(raw)
        .root_element()
        .text()
        .collect::<String>()
        .trim()
        .to_string()
}

/// Replace HTML-only entities that would make the XML parser fail.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Fetch one source and insert its new items.
///
/// Fetch and validation failures land in the report; only store failures are
/// returned as errors.
#[instrument(level = "info", skip_all, fields(source = source.name()))]
pub async fn poll_source(
    fetcher: &Fetcher,
    store: &CorpusHandle,
    source: &FeedSource,
    settings: &Settings,
) -> Result<SourceReport, StoreError> {
    let mut report = SourceReport {
        source: source.name().to_string(),
        ..SourceReport::default()
    };

    let fetched = async {
        let url = source.render_url(&settings.base_url)?;
        let body = fetcher.get_text(&url).await?;
        parse_feed(&body, source, settings.min_feed_bytes)
    }
    .await;

    let parsed = match fetched {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, kind = e.label(), "Feed source failed");
            report.failed = Some(e.to_string());
            return Ok(report);
        }
    };

    report.fetched = parsed.items.len();
    report.invalid = parsed.invalid;
    let guids: Vec<String> = parsed.items.iter().map(|i| i.guid.clone()).collect();
    let inserted = store.insert_many(parsed.items).await?;
    for (guid, is_new) in guids.iter().zip(inserted) {
        if is_new {
            debug!(%guid, "New item");
            report.new += 1;
        } else {
            report.duplicate += 1;
        }
    }
    info!(
        fetched = report.fetched,
        new = report.new,
        duplicate = report.duplicate,
        invalid = report.invalid,
        "Polled feed"
    );
    Ok(report)
}

/// Poll every configured source in order.
pub async fn poll_all(
    fetcher: &Fetcher,
    store: &CorpusHandle,
    settings: &Settings,
) -> Result<Vec<SourceReport>, StoreError> {
    let mut reports = Vec::with_capacity(settings.feeds.len());
    for (idx, source) in settings.feeds.iter().enumerate() {
        if idx > 0 {
            let pause = inter_source_pause(settings.inter_source_delay_ms);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        let report = poll_source(fetcher, store, source, settings).await?;
        if let Some(reason) = &report.failed {
            debug!(source = %report.source, reason = %truncate_for_log(reason, 200), "Source isolated");
        }
        reports.push(report);
    }
    Ok(reports)
}

/// Configured delay plus up to a quarter of it as jitter.
fn inter_source_pause(delay_ms: u64) -> Duration {
    if delay_ms == 0 {
        return Duration::ZERO;
    }
    let jitter = rand::rng().random_range(0..=delay_ms / 4);
    Duration::from_millis(delay_ms + jitter)
}
