//! Article page scraper.
//!
//! Extraction is driven by per-field tables of [`Strategy`] entries, tried in
//! order; the first non-empty value wins. Changing the site markup means
//! editing a table, not the code that walks it.
//!
//! [`scrape_item`] moves an item through its scrape states in the store, and
//! [`scrape_batch`] runs many of those with bounded concurrency.

use super::filters::{check_article_url, is_article_url};
use crate::config::Settings;
use crate::error::FailureKind;
use crate::http::Fetcher;
use crate::models::{KeywordToken, RawItem, RelatedArticle, ScrapedContent};
use crate::store::{CorpusHandle, ScrapeOutcome, StoreError};
use crate::utils::collapse_whitespace;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

#[derive(Debug, Clone, Copy)]
enum Extract {
    /// Collapsed text content of the element.
    Text,
    /// Value of the named attribute.
    Attr(&'static str),
    /// `author` of a JSON-LD `<script>` block.
    JsonLdAuthor,
}

#[derive(Debug, Clone, Copy)]
struct Strategy {
    name: &'static str,
    selector: &'static str,
    extract: Extract,
}

const fn text(name: &'static str, selector: &'static str) -> Strategy {
    Strategy { name, selector, extract: Extract::Text }
}

const fn attr(name: &'static str, selector: &'static str, attr: &'static str) -> Strategy {
    Strategy { name, selector, extract: Extract::Attr(attr) }
}

const fn meta(name: &'static str, selector: &'static str) -> Strategy {
    attr(name, selector, "content")
}

const TITLE: &[Strategy] = &[
    text("detail-h1", ".detay-spot-category h1"),
    text("h1", "h1"),
    meta("og:title", "meta[property='og:title']"),
    text("title-tag", "title"),
];

const SUMMARY: &[Strategy] = &[
    text("detail-spot", ".detay-spot-category h4"),
    text("spot", "h4.spot, .spot"),
    meta("og:description", "meta[property='og:description']"),
    meta("description", "meta[name='description']"),
];

const AUTHOR: &[Strategy] = &[
    text("byline", ".detay-news-by a, .detay-news-by"),
    Strategy {
        name: "json-ld",
        selector: "script[type='application/ld+json']",
        extract: Extract::JsonLdAuthor,
    },
    meta("meta-author", "meta[name='author']"),
];

const LOCATION: &[Strategy] = &[text("location", ".detay-news-location, .haber-yer")];

const PUBLISH_DATE: &[Strategy] = &[
    meta("published-time", "meta[property='article:published_time']"),
    attr("time-datetime", "time[datetime]", "datetime"),
    text("date-span", ".tarih, span.date"),
];

const UPDATE_DATE: &[Strategy] = &[
    meta("modified-time", "meta[property='article:modified_time']"),
    text("update-span", ".guncelleme-tarih"),
];

const MAIN_IMAGE: &[Strategy] = &[
    meta("og:image", "meta[property='og:image']"),
    attr("detail-image", ".detay-foto img", "src"),
];

const CATEGORY: &[Strategy] = &[
    meta("article-section", "meta[property='article:section']"),
    text("category-link", ".detay-news-category a"),
    text("breadcrumb", ".breadcrumb li:nth-child(2) a"),
];

const PARAGRAPHS: &str = ".detay-icerik p, .detay-icerik-text p, article p";
const IMAGES: &str = ".detay-icerik img[src], article img[src]";
const KEYWORD_LINKS: &str = "a[href*='/search/?s=']";
const RELATED_LINKS: &str = ".detay-haber-ilgili a[href], .ilgili-haberler a[href], .related-news a[href]";
const TAGS: &str = "meta[name='news_keywords'], meta[name='keywords']";
const META: &str = "meta[content]";

static DATELINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-ZÇĞİÖŞÜ][A-ZÇĞİÖŞÜ ]{2,}?)\s*\(AA\)\s*-").unwrap());

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            error!(%css, error = %e, "Invalid selector");
            None
        }
    }
}

impl Strategy {
    fn apply(&self, doc: &Html) -> Option<String> {
        let sel = selector(self.selector)?;
        match self.extract {
            Extract::Text => doc
                .select(&sel)
                .map(|el| collapse_whitespace(&el.text().collect::<String>()))
                .find(|t| !t.is_empty()),
            Extract::Attr(name) => doc
                .select(&sel)
                .filter_map(|el| el.value().attr(name))
                .map(str::trim)
                .find(|v| !v.is_empty())
                .map(str::to_string),
            Extract::JsonLdAuthor => doc
                .select(&sel)
                .filter_map(|el| {
                    serde_json::from_str::<serde_json::Value>(el.text().collect::<String>().trim()).ok()
                })
                .find_map(|json| json_ld_author(&json)),
        }
    }
}

/// Author name(s) from a JSON-LD value; arrays and `@graph` are searched.
fn json_ld_author(json: &serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match json {
        Value::Array(items) => items.iter().find_map(json_ld_author),
        Value::Object(obj) => {
            let from_author = obj.get("author").and_then(|author| {
                let names: Vec<String> = match author {
                    Value::Array(arr) => arr.iter().filter_map(author_name).collect(),
                    other => author_name(other).into_iter().collect(),
                };
                (!names.is_empty()).then(|| names.join(", "))
            });
            from_author.or_else(|| obj.get("@graph").and_then(json_ld_author))
        }
        _ => None,
    }
}

fn author_name(value: &serde_json::Value) -> Option<String> {
    let name = match value {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(obj) => obj.get("name")?.as_str()?,
        _ => return None,
    };
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn first_match(doc: &Html, field: &str, strategies: &[Strategy]) -> Option<String> {
    strategies.iter().find_map(|s| {
        let value = s.apply(doc)?;
        trace!(field, strategy = s.name, "Field extracted");
        Some(value)
    })
}

fn absolutize(page: &Url, href: &str) -> Option<String> {
    page.join(href.trim()).ok().map(|u| u.to_string())
}

/// Parse an article page. Pure; `page_url` resolves relative links.
pub fn parse_article(html: &str, page_url: &Url, settings: &Settings) -> Result<ScrapedContent, FailureKind> {
    let doc = Html::parse_document(html);

    let paragraphs: Vec<String> = selector(PARAGRAPHS)
        .map(|sel| {
            doc.select(&sel)
                .map(|p| collapse_whitespace(&p.text().collect::<String>()))
                .filter(|p| p.chars().count() >= settings.min_paragraph_chars)
                .unique()
                .collect()
        })
        .unwrap_or_default();
    let summary = first_match(&doc, "summary", SUMMARY);
    if paragraphs.is_empty() && summary.is_none() {
        return Err(FailureKind::Parse(format!("no article body at {page_url}")));
    }

    let location = first_match(&doc, "location", LOCATION).or_else(|| {
        paragraphs
            .first()
            .and_then(|p| DATELINE_RE.captures(p))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    });

    let main_image = first_match(&doc, "main_image", MAIN_IMAGE).and_then(|src| absolutize(page_url, &src));
    let images: Vec<String> = main_image
        .iter()
        .cloned()
        .chain(
            selector(IMAGES)
                .into_iter()
                .flat_map(|sel| {
                    doc.select(&sel)
                        .filter_map(|img| img.value().attr("src"))
                        .filter_map(|src| absolutize(page_url, src))
                        .collect::<Vec<_>>()
                }),
        )
        .unique()
        .collect();

    let keywords: Vec<KeywordToken> = selector(KEYWORD_LINKS)
        .map(|sel| {
            doc.select(&sel)
                .filter_map(|a| {
                    let text = collapse_whitespace(&a.text().collect::<String>());
                    let href = a.value().attr("href")?;
                    let search_url = absolutize(page_url, href)?;
                    (!text.is_empty()).then_some(KeywordToken { text, search_url })
                })
                .unique_by(|k| k.text.to_lowercase())
                .collect()
        })
        .unwrap_or_default();

    let tags: Vec<String> = selector(TAGS)
        .and_then(|sel| doc.select(&sel).find_map(|m| m.value().attr("content")))
        .map(|raw| {
            raw.split(',')
                .map(collapse_whitespace)
                .filter(|t| !t.is_empty())
                .unique()
                .collect()
        })
        .unwrap_or_else(|| keywords.iter().map(|k| k.text.clone()).collect());

    let self_url = page_url.as_str();
    let related: Vec<RelatedArticle> = selector(RELATED_LINKS)
        .map(|sel| {
            doc.select(&sel)
                .filter_map(|a| {
                    let url = absolutize(page_url, a.value().attr("href")?)?;
                    let title = Some(collapse_whitespace(&a.text().collect::<String>()))
                        .filter(|t| !t.is_empty())
                        .or_else(|| a.value().attr("title").map(collapse_whitespace))?;
                    Some(RelatedArticle { title, url })
                })
                .filter(|r| r.url != self_url && is_article_url(&r.url, &settings.base_url))
                .unique_by(|r| r.url.clone())
                .take(settings.related_cap)
                .collect()
        })
        .unwrap_or_default();

    let meta: BTreeMap<String, String> = selector(META)
        .map(|sel| {
            doc.select(&sel)
                .filter_map(|m| {
                    let v = m.value();
                    let key = v.attr("property").or_else(|| v.attr("name"))?;
                    Some((key.to_string(), v.attr("content")?.trim().to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ScrapedContent {
        url: page_url.to_string(),
        title: first_match(&doc, "title", TITLE),
        summary,
        paragraphs,
        author: first_match(&doc, "author", AUTHOR),
        location,
        publish_date: first_match(&doc, "publish_date", PUBLISH_DATE),
        update_date: first_match(&doc, "update_date", UPDATE_DATE),
        main_image,
        images,
        tags,
        keywords,
        category_full: first_match(&doc, "category", CATEGORY),
        related,
        meta,
        scraped_at: Some(Utc::now()),
    })
}

/// Fetch and parse one article page.
///
/// The URL is checked against the article URL policy before any request is
/// made, so gallery, video and off-site links never reach the network.
///
/// # Arguments
///
/// * `fetcher` - Shared HTTP client; carries the timeout and retry policy
/// * `url` - Absolute article URL
/// * `settings` - Base URL and paragraph length threshold
///
/// # Returns
///
/// The extracted [`ScrapedContent`], or the [`FailureKind`] of the URL check,
/// the fetch, or the parse.
#[instrument(level = "info", skip_all, fields(%url))]
pub async fn scrape(fetcher: &Fetcher, url: &str, settings: &Settings) -> Result<ScrapedContent, FailureKind> {
    let page_url = check_article_url(url, &settings.base_url)?;
    let html = fetcher.get_text(page_url.as_str()).await?;
    let content = parse_article(&html, &page_url, settings)?;
    info!(
        paragraphs = content.paragraphs.len(),
        chars = content.body_chars(),
        keywords = content.keywords.len(),
        "Parsed article"
    );
    Ok(content)
}

/// Scrape `item` and record the outcome in the store.
///
/// The item is marked attempted (and persisted) before the request. Returns
/// whether the scrape succeeded; only store failures are errors.
pub async fn scrape_item(
    fetcher: &Fetcher,
    store: &CorpusHandle,
    item: &RawItem,
    settings: &Settings,
) -> Result<bool, StoreError> {
    store.mark_attempted(&item.guid).await?;
    match scrape(fetcher, &item.link, settings).await {
        Ok(content) => {
            store
                .record_scrape(&item.guid, ScrapeOutcome::Succeeded(content))
                .await?;
            Ok(true)
        }
        Err(e) => {
            warn!(guid = %item.guid, url = %item.link, kind = e.label(), error = %e, "Scrape failed");
            store
                .record_scrape(&item.guid, ScrapeOutcome::Failed(e.to_string()))
                .await?;
            Ok(false)
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// GUIDs that reached the succeeded state.
    pub succeeded: Vec<String>,
    pub failed: usize,
}

/// Scrape `items` with at most `scrape_workers` requests in flight.
///
/// One item's failure never stops the others. A store failure is returned
/// after the batch has drained.
#[instrument(level = "info", skip_all, fields(count = items.len()))]
pub async fn scrape_batch(
    fetcher: &Fetcher,
    store: &CorpusHandle,
    items: Vec<RawItem>,
    settings: &Settings,
) -> Result<BatchReport, StoreError> {
    let results: Vec<(String, Result<bool, StoreError>)> = stream::iter(items)
        .map(|item| async move {
            let ok = scrape_item(fetcher, store, &item, settings).await;
            (item.guid, ok)
        })
        .buffer_unordered(settings.scrape_workers.max(1))
        .collect()
        .await;

    let mut report = BatchReport::default();
    let mut store_error = None;
    for (guid, result) in results {
        match result {
            Ok(true) => report.succeeded.push(guid),
            Ok(false) => report.failed += 1,
            Err(e) => {
                error!(%guid, error = %e, "Could not record scrape");
                report.failed += 1;
                if store_error.is_none() {
                    store_error = Some(e);
                }
            }
        }
    }
    debug!(succeeded = report.succeeded.len(), failed = report.failed, "Batch drained");
    match store_error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}
