//! Canonical category resolution and per-category top-K selection.

use crate::config::Settings;
use crate::models::{CategoryLabel, RawItem, ScrapeState};
use crate::utils::slugify_category;
use itertools::Itertools;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, instrument};

/// Label -> key lookup built from the configured category table.
///
/// Labels are kept longest first so prefix matching prefers `Kültür Sanat`
/// over `Kültür`.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    labels: Vec<CategoryLabel>,
    keys: HashSet<String>,
}

impl CategoryTable {
    pub fn new(labels: &[CategoryLabel]) -> Self {
        let mut labels = labels.to_vec();
        labels.sort_by_key(|l| std::cmp::Reverse(l.label.chars().count()));
        let keys = labels.iter().map(|l| l.key.clone()).collect();
        Self { labels, keys }
    }

    /// The configured table plus every feed category and the default as keys.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut table = Self::new(&settings.categories);
        table.keys.extend(
            settings
                .feeds
                .iter()
                .filter_map(|f| f.category.clone())
                .chain(std::iter::once(settings.default_category.clone())),
        );
        table
    }

    /// The longest label `text` starts with, and the text after it.
    ///
    /// The label must end on a segment boundary, so `Türkiye'nin` does not
    /// match `Türkiye`.
    pub fn match_prefix<'a>(&'a self, text: &'a str) -> Option<(&'a CategoryLabel, &'a str)> {
        self.labels.iter().find_map(|l| strip_label(text, l).map(|rest| (l, rest)))
    }

    /// Like [`match_prefix`](Self::match_prefix), limited to labels of `key`.
    pub fn match_key_prefix<'a>(&'a self, text: &'a str, key: &str) -> Option<(&'a CategoryLabel, &'a str)> {
        self.labels
            .iter()
            .filter(|l| l.key == key)
            .find_map(|l| strip_label(text, l).map(|rest| (l, rest)))
    }

    /// Canonical key of a display label, if the table knows it.
    ///
    /// Labels compare by slug, so case, punctuation and Turkish letters do not
    /// matter (`SAĞLIK`, `Sağlık` and `saglik` are the same label).
    pub fn key_for_label(&self, label: &str) -> Option<&str> {
        let wanted = slugify_category(label);
        if wanted.is_empty() {
            return None;
        }
        self.labels
            .iter()
            .find(|l| slugify_category(&l.label) == wanted)
            .map(|l| l.key.as_str())
    }

    pub fn is_known_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

/// `text` after `label`, if the label is followed by the end, a comma,
/// whitespace, or the capital letter of a glued segment.
fn strip_label<'a>(text: &'a str, label: &CategoryLabel) -> Option<&'a str> {
    text.strip_prefix(label.label.as_str()).filter(|rest| {
        rest.chars()
            .next()
            .is_none_or(|c| c == ',' || c.is_whitespace() || c.is_uppercase())
    })
}

/// Whether `item` can become a content unit.
pub fn is_eligible(item: &RawItem, min_article_chars: usize) -> bool {
    item.scrape_state == ScrapeState::ScrapeSucceeded
        && item
            .scraped
            .as_ref()
            .is_some_and(|s| s.body_chars() >= min_article_chars)
}

/// Canonical category for `item`.
///
/// Order: the page's own category label, the feed hint, a known key in the
/// URL path right after the locale, then the configured default.
pub fn resolve_category(item: &RawItem, table: &CategoryTable, settings: &Settings) -> String {
    let from_page = item
        .scraped
        .as_ref()
        .and_then(|s| s.category_full.as_deref())
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .and_then(|label| match table.key_for_label(label) {
            Some(key) => Some(key.to_string()),
            None => Some(slugify_category(label)).filter(|slug| !slug.is_empty()),
        });
    if let Some(key) = from_page {
        return key;
    }

    if let Some(hint) = item.category_hint.as_deref().filter(|h| !h.is_empty()) {
        return hint.to_string();
    }

    if let Some(key) = url_category(&item.link, &settings.language)
        .filter(|key| table.is_known_key(key))
    {
        return key;
    }

    settings.default_category.clone()
}

/// The path segment after the locale prefix: `/tr/saglik/...` -> `saglik`.
fn url_category(link: &str, language: &str) -> Option<String> {
    let url = url::Url::parse(link).ok()?;
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    if segments.next()? != language {
        return None;
    }
    segments.next().map(str::to_string)
}

/// Group eligible items by category and keep the newest `per_category` of each.
///
/// # Arguments
///
/// * `items` - Corpus snapshot
/// * `table` - Label lookup used for category resolution
/// * `settings` - `per_category`, `min_article_chars` and the default category
///
/// # Returns
///
/// Category key to selected items, newest first with GUID as tie-break.
/// Categories without eligible items are absent.
#[instrument(level = "info", skip_all, fields(items = items.len()))]
pub fn select<'a>(
    items: &'a [RawItem],
    table: &CategoryTable,
    settings: &Settings,
) -> BTreeMap<String, Vec<&'a RawItem>> {
    let mut grouped: BTreeMap<String, Vec<&'a RawItem>> = BTreeMap::new();
    for item in items
        .iter()
        .filter(|i| is_eligible(i, settings.min_article_chars))
    {
        let category = resolve_category(item, table, settings);
        grouped.entry(category).or_default().push(item);
    }

    for (category, bucket) in grouped.iter_mut() {
        let total = bucket.len();
        let picked: Vec<&RawItem> = bucket
            .iter()
            .copied()
            .sorted_by(|a, b| {
                b.effective_date()
                    .cmp(&a.effective_date())
                    .then_with(|| a.guid.cmp(&b.guid))
            })
            .unique_by(|i| i.guid.clone())
            .take(settings.per_category)
            .collect();
        debug!(%category, total, kept = picked.len(), "Selected category");
        *bucket = picked;
    }

    info!(
        categories = grouped.len(),
        selected = grouped.values().map(Vec::len).sum::<usize>(),
        "Selection complete"
    );
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemOrigin, ScrapedContent};
    use chrono::{DateTime, Duration, Utc};

    fn scraped_item(guid: &str, link: &str, hint: Option<&str>, label: Option<&str>) -> RawItem {
        let mut item = RawItem::discovered(
            guid.into(),
            format!("Haber {guid}"),
            link.into(),
            ItemOrigin::Feed {
                source: hint.unwrap_or("all").into(),
            },
        );
        item.category_hint = hint.map(str::to_string);
        item.scrape_state = ScrapeState::ScrapeSucceeded;
        item.scraped = Some(ScrapedContent {
            url: link.into(),
            paragraphs: vec!["x".repeat(250)],
            category_full: label.map(str::to_string),
            ..ScrapedContent::default()
        });
        item
    }

    #[test]
    fn test_match_prefix_prefers_longest_label() {
        let table = CategoryTable::from_settings(&Settings::default());
        let (label, rest) = table.match_prefix("Kültür SanatSergi").unwrap();
        assert_eq!(label.key, "kultur-sanat");
        assert_eq!(rest, "Sergi");
        assert!(table.match_prefix("Sergi açıldı").is_none());
    }

    #[test]
    fn test_match_key_prefix() {
        let table = CategoryTable::from_settings(&Settings::default());
        let (label, rest) = table.match_key_prefix("Politika, Meclis", "politika").unwrap();
        assert_eq!(label.key, "politika");
        assert_eq!(rest, ", Meclis");
        assert!(table.match_key_prefix("Politika, Meclis", "ekonomi").is_none());
        assert!(table.match_key_prefix("Meclis toplandı", "politika").is_none());
    }

    #[test]
    fn test_label_must_end_on_boundary() {
        let table = CategoryTable::from_settings(&Settings::default());
        assert!(table.match_prefix("Türkiye'nin ihracatı").is_none());
        assert!(table.match_prefix("Sporcular yarıştı").is_none());
        assert_eq!(table.match_prefix("Türkiye").unwrap().1, "");
        assert_eq!(table.match_prefix("Spor Milli takım").unwrap().1, " Milli takım");
        assert_eq!(table.match_prefix("EkonomiPetrol").unwrap().0.key, "ekonomi");
    }

    #[test]
    fn test_resolution_priority() {
        let settings = Settings::default();
        let table = CategoryTable::from_settings(&settings);
        let link = "https://www.aa.com.tr/tr/saglik/asi/123";

        let page = scraped_item("1", link, Some("ekonomi"), Some("Kültür Sanat"));
        assert_eq!(resolve_category(&page, &table, &settings), "kultur-sanat");

        let unknown_label = scraped_item("2", link, None, Some("İş Dünyası"));
        assert_eq!(resolve_category(&unknown_label, &table, &settings), "is-dunyasi");

        let hinted = scraped_item("3", link, Some("ekonomi"), None);
        assert_eq!(resolve_category(&hinted, &table, &settings), "ekonomi");

        let from_path = scraped_item("4", link, None, None);
        assert_eq!(resolve_category(&from_path, &table, &settings), "saglik");

        let unknown_path = scraped_item("5", "https://www.aa.com.tr/tr/bilinmeyen/x/5", None, None);
        assert_eq!(resolve_category(&unknown_path, &table, &settings), "guncel");
    }

    #[test]
    fn test_select_bounds_sorts_and_omits_ineligible() {
        let settings = Settings {
            per_category: 3,
            ..Settings::default()
        };
        let table = CategoryTable::from_settings(&settings);
        let base: DateTime<Utc> = "2025-05-17T00:00:00Z".parse().unwrap();

        let mut items: Vec<RawItem> = (0..6)
            .map(|n| {
                let mut item = scraped_item(&format!("{n}"), "https://x.test/tr/spor/a/1", Some("spor"), None);
                item.published_at = Some(base + Duration::hours(n));
                item
            })
            .collect();
        // Same date as guid 5; the guid breaks the tie.
        let mut tie = scraped_item("4a", "https://x.test/tr/spor/b/2", Some("spor"), None);
        tie.published_at = Some(base + Duration::hours(5));
        items.push(tie);

        let mut short = scraped_item("short", "https://x.test/tr/dunya/c/3", Some("dunya"), None);
        short.scraped.as_mut().unwrap().paragraphs = vec!["kısa".into()];
        items.push(short);

        let mut failed = scraped_item("failed", "https://x.test/tr/dunya/d/4", Some("dunya"), None);
        failed.scrape_state = ScrapeState::ScrapeFailed;
        items.push(failed);

        let selected = select(&items, &table, &settings);
        assert_eq!(selected.keys().collect::<Vec<_>>(), vec!["spor"]);
        let guids: Vec<&str> = selected["spor"].iter().map(|i| i.guid.as_str()).collect();
        assert_eq!(guids, vec!["4a", "5", "4"]);
        assert!(guids.iter().all_unique());
    }
}
