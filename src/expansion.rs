//! Keyword expansion: follow an article's keyword chips into the source's
//! search and pull in articles the feeds did not carry.
//!
//! Depth is one. Only feed items scraped successfully in the current cycle are
//! seeds; items found here are scraped right away but never seed further
//! searches. Per seed at most `max_keywords` chips are queried, and per query
//! at most `max_results_per_keyword` hits are considered (truncated before any
//! filtering). `max_frontier` bounds the new items per cycle.

use crate::config::Settings;
use crate::http::Fetcher;
use crate::models::{ItemOrigin, RawItem, ScrapeState};
use crate::scrapers::article::scrape_item;
use crate::scrapers::filters::is_article_url;
use crate::scrapers::search::search;
use crate::store::{CorpusHandle, StoreError};
use crate::utils::derive_guid;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpansionReport {
    pub seeds: usize,
    pub keywords_queried: usize,
    pub queries_failed: usize,
    pub hits: usize,
    pub skipped_not_article: usize,
    pub skipped_seen: usize,
    pub skipped_known: usize,
    pub inserted: usize,
    pub scraped_ok: usize,
    pub scraped_failed: usize,
    /// The per-cycle frontier cap was reached.
    pub frontier_full: bool,
}

/// Expand from the items named by `seed_guids`.
///
/// Query and scrape failures are logged and counted; only store failures
/// abort the expansion.
///
/// # Arguments
///
/// * `fetcher` - Shared HTTP client used for searches and article pages
/// * `store` - Corpus handle; new items are inserted and scraped through it
/// * `seed_guids` - Items scraped this cycle; anything not a successfully
///   scraped feed item is ignored
/// * `settings` - Keyword, result and frontier bounds
///
/// # Returns
///
/// An [`ExpansionReport`] with per-stage counts, or the first store error.
#[instrument(level = "info", skip_all, fields(seeds = seed_guids.len()))]
pub async fn expand(
    fetcher: &Fetcher,
    store: &CorpusHandle,
    seed_guids: &[String],
    settings: &Settings,
) -> Result<ExpansionReport, StoreError> {
    let mut report = ExpansionReport::default();
    let mut processed: HashSet<String> = HashSet::new();

    'seeds: for seed_guid in seed_guids {
        let Some(seed) = store.get(seed_guid).await? else {
            continue;
        };
        if !seed.is_from_feed() || seed.scrape_state != ScrapeState::ScrapeSucceeded {
            continue;
        }
        report.seeds += 1;
        let keywords = seed.scraped.map(|s| s.keywords).unwrap_or_default();

        for keyword in keywords.into_iter().take(settings.max_keywords) {
            report.keywords_queried += 1;
            let hits = match search(fetcher, settings, &keyword).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(%seed_guid, keyword = %keyword.text, kind = e.label(), error = %e, "Search failed");
                    report.queries_failed += 1;
                    continue;
                }
            };

            for hit in hits.into_iter().take(settings.max_results_per_keyword) {
                report.hits += 1;
                if !is_article_url(&hit.url, &settings.base_url) {
                    report.skipped_not_article += 1;
                    continue;
                }
                if !processed.insert(hit.url.clone()) {
                    report.skipped_seen += 1;
                    continue;
                }
                let guid = derive_guid(None, &hit.url);
                if store.contains_url(&hit.url).await? || store.contains_guid(&guid).await? {
                    report.skipped_known += 1;
                    continue;
                }
                if report.inserted >= settings.max_frontier {
                    report.frontier_full = true;
                    warn!(cap = settings.max_frontier, "Expansion frontier full");
                    break 'seeds;
                }

                let mut item = RawItem::discovered(
                    guid,
                    String::new(),
                    hit.url,
                    ItemOrigin::Expansion {
                        seed_guid: seed_guid.clone(),
                        keyword: keyword.text.clone(),
                    },
                );
                item.published_at = hit.date_hint;
                if !store.insert(item.clone()).await? {
                    report.skipped_known += 1;
                    continue;
                }
                report.inserted += 1;
                debug!(guid = %item.guid, url = %item.link, keyword = %keyword.text, "Expansion item");

                if scrape_item(fetcher, store, &item, settings).await? {
                    report.scraped_ok += 1;
                } else {
                    report.scraped_failed += 1;
                }
            }
        }
    }

    info!(
        seeds = report.seeds,
        queried = report.keywords_queried,
        hits = report.hits,
        inserted = report.inserted,
        scraped_ok = report.scraped_ok,
        scraped_failed = report.scraped_failed,
        "Expansion complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support::{fetcher_for, settings_for};
    use crate::models::{KeywordToken, ScrapedContent};
    use crate::scrapers::article::test_support::article_html;
    use crate::scrapers::search::test_support::{search_json, search_page};
    use crate::store::CorpusStore;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn seed(base: &str, origin: ItemOrigin, keyword_count: usize) -> RawItem {
        let mut item = RawItem::discovered(
            "100".into(),
            "Tohum".into(),
            format!("{base}/tr/gundem/tohum/100"),
            origin,
        );
        item.scrape_state = ScrapeState::ScrapeSucceeded;
        item.scraped = Some(ScrapedContent {
            keywords: (0..keyword_count)
                .map(|n| KeywordToken {
                    text: format!("kelime{n}"),
                    search_url: format!("{base}/tr/search/?s=kelime{n}"),
                })
                .collect(),
            ..ScrapedContent::default()
        });
        item
    }

    #[tokio::test]
    async fn test_expansion_respects_keyword_and_result_bounds() {
        let server = MockServer::start().await;
        let routes: Vec<String> = (1..=50).map(|n| format!("/tr/gundem/haber-{n}/{n}")).collect();
        Mock::given(method("GET"))
            .and(path("/tr/search/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(search_page("tok")))
            .expect(10)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tr/Search/Search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_json(&routes)))
            .expect(10)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/tr/gundem/haber-\d+/\d+$"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(article_html("Genişleme", "Gündem", &["ek"])),
            )
            .expect(30)
            .mount(&server)
            .await;

        let settings = settings_for(&server.uri());
        assert_eq!(settings.max_keywords, 10);
        assert_eq!(settings.max_results_per_keyword, 30);
        let fetcher = fetcher_for(&server.uri());
        let dir = tempfile::tempdir().unwrap();
        let store = CorpusStore::open(dir.path().join("corpus.json")).await.unwrap().spawn();
        let origin = ItemOrigin::Feed { source: "gundem".into() };
        store.insert(seed(&server.uri(), origin, 12)).await.unwrap();

        let report = expand(&fetcher, &store, &["100".to_string()], &settings)
            .await
            .unwrap();
        assert_eq!(report.seeds, 1);
        assert_eq!(report.keywords_queried, 10);
        assert_eq!(report.hits, 300);
        assert_eq!(report.inserted, 30);
        assert_eq!(report.scraped_ok, 30);
        assert_eq!(report.skipped_seen, 270);
        assert_eq!(store.len().await.unwrap(), 31);

        let found = store.get("7").await.unwrap().unwrap();
        assert_eq!(found.title, "Genişleme");
        assert!(matches!(
            found.origin,
            ItemOrigin::Expansion { ref seed_guid, ref keyword } if seed_guid == "100" && keyword == "kelime0"
        ));
        assert!(found.published_at.is_some());
    }

    #[tokio::test]
    async fn test_expansion_items_are_not_seeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(search_page("tok")))
            .expect(0)
            .mount(&server)
            .await;

        let settings = settings_for(&server.uri());
        let fetcher = fetcher_for(&server.uri());
        let dir = tempfile::tempdir().unwrap();
        let store = CorpusStore::open(dir.path().join("corpus.json")).await.unwrap().spawn();
        let origin = ItemOrigin::Expansion {
            seed_guid: "1".into(),
            keyword: "k".into(),
        };
        store.insert(seed(&server.uri(), origin, 3)).await.unwrap();

        let report = expand(&fetcher, &store, &["100".to_string()], &settings)
            .await
            .unwrap();
        assert_eq!(report.seeds, 0);
        assert_eq!(report.keywords_queried, 0);
    }

    #[tokio::test]
    async fn test_known_urls_and_frontier_cap() {
        let server = MockServer::start().await;
        let routes: Vec<String> = (1..=5).map(|n| format!("/tr/gundem/haber-{n}/{n}")).collect();
        Mock::given(method("GET"))
            .and(path("/tr/search/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(search_page("tok")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_json(&routes)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/tr/gundem/haber-\d+/\d+$"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article_html("Ek", "Gündem", &[])))
            .expect(2)
            .mount(&server)
            .await;

        let settings = Settings {
            max_frontier: 2,
            ..settings_for(&server.uri())
        };
        let fetcher = fetcher_for(&server.uri());
        let dir = tempfile::tempdir().unwrap();
        let store = CorpusStore::open(dir.path().join("corpus.json")).await.unwrap().spawn();
        store
            .insert(seed(&server.uri(), ItemOrigin::Feed { source: "gundem".into() }, 1))
            .await
            .unwrap();
        let known = RawItem::discovered(
            "1".into(),
            "Bilinen".into(),
            format!("{}/tr/gundem/haber-1/1", server.uri()),
            ItemOrigin::Feed { source: "gundem".into() },
        );
        store.insert(known).await.unwrap();

        let report = expand(&fetcher, &store, &["100".to_string()], &settings)
            .await
            .unwrap();
        assert_eq!(report.skipped_known, 1);
        assert_eq!(report.inserted, 2);
        assert!(report.frontier_full);
    }
}
