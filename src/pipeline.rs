//! The collection cycle and the long-running loop around it.
//!
//! One cycle: poll feeds, scrape everything still pending, expand from the
//! freshly scraped feed items, select the newest items per category, turn them
//! into content units and merge those into the output file.
//!
//! Each cycle runs in its own task. An error or a panic inside it fails that
//! cycle only; the loop logs it, cools down (longer with every consecutive
//! failure) and tries again.

use crate::categorize::{CategoryTable, select};
use crate::config::Settings;
use crate::expansion::{ExpansionReport, expand};
use crate::feeds::{SourceReport, poll_all};
use crate::governor::FailureStreak;
use crate::http::Fetcher;
use crate::models::RawItem;
use crate::outputs::json::{MergeReport, OutputError, write_content_units};
use crate::scrapers::article::{BatchReport, scrape_batch};
use crate::store::{CorpusHandle, StoreError};
use crate::transform::transform;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("cycle task panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub sources: Vec<SourceReport>,
    pub scraped: BatchReport,
    pub expansion: ExpansionReport,
    pub selected: usize,
    pub transformed: usize,
    pub transform_skipped: usize,
    pub output: MergeReport,
    pub corpus_size: usize,
}

impl CycleReport {
    /// Every configured source failed, which usually means the network is down.
    pub fn all_sources_failed(&self) -> bool {
        !self.sources.is_empty() && self.sources.iter().all(|s| s.failed.is_some())
    }
}

/// Everything a cycle needs, built once in `main` and shared by every cycle.
#[derive(Debug, Clone)]
pub struct Pipeline {
    fetcher: Fetcher,
    store: CorpusHandle,
    settings: Arc<Settings>,
    table: Arc<CategoryTable>,
}

impl Pipeline {
    pub fn new(fetcher: Fetcher, store: CorpusHandle, settings: Settings) -> Self {
        let table = CategoryTable::from_settings(&settings);
        Self {
            fetcher,
            store,
            settings: Arc::new(settings),
            table: Arc::new(table),
        }
    }

    /// Run one full collection cycle.
    #[instrument(level = "info", skip_all)]
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let settings = self.settings.as_ref();
        let mut report = CycleReport {
            sources: poll_all(&self.fetcher, &self.store, settings).await?,
            ..CycleReport::default()
        };

        let pending: Vec<RawItem> = self
            .store
            .snapshot()
            .await?
            .into_iter()
            .filter(RawItem::needs_scrape)
            .collect();
        info!(count = pending.len(), "Scraping pending items");
        report.scraped = scrape_batch(&self.fetcher, &self.store, pending, settings).await?;

        report.expansion = expand(&self.fetcher, &self.store, &report.scraped.succeeded, settings).await?;

        let items = self.store.snapshot().await?;
        report.corpus_size = items.len();
        let selected = select(&items, &self.table, settings);

        let mut units = Vec::new();
        for (category, bucket) in &selected {
            for item in bucket {
                report.selected += 1;
                match transform(item, category, &self.table, settings) {
                    Ok(unit) => units.push(unit),
                    Err(e) => {
                        warn!(guid = %item.guid, %category, error = %e, "Skipping item in transform");
                        report.transform_skipped += 1;
                    }
                }
            }
        }
        report.transformed = units.len();

        report.output = write_content_units(&units, &settings.content_units_path).await?;
        Ok(report)
    }

    /// Run one cycle in its own task so a panic surfaces as an error.
    pub async fn run_isolated(&self) -> Result<CycleReport, CycleError> {
        let this = self.clone();
        match tokio::spawn(async move { this.run_cycle().await }).await {
            Ok(result) => result,
            Err(join) => Err(CycleError::Panicked(join.to_string())),
        }
    }

    /// Run cycles until interrupted.
    ///
    /// A failed cycle waits `error_cooldown_secs` times the failure streak,
    /// capped at `failure_cooldown_secs`, which is also the wait once the
    /// streak is past `failure_threshold`.
    pub async fn run_forever(&self) {
        let settings = self.settings.as_ref();
        let interval = Duration::from_secs(settings.feed_interval_secs);
        let error_cooldown = Duration::from_secs(settings.error_cooldown_secs);
        let failure_cooldown = Duration::from_secs(settings.failure_cooldown_secs);
        let mut streak = FailureStreak::new(settings.failure_threshold);
        let mut cycle: u64 = 0;

        loop {
            cycle += 1;
            let t0 = Instant::now();
            let wait = match self.run_isolated().await {
                Ok(report) if report.all_sources_failed() => {
                    let consecutive = streak.record_failure();
                    warn!(cycle, consecutive, "Every feed source failed");
                    streak.next_wait(interval, failure_cooldown)
                }
                Ok(report) => {
                    streak.record_success();
                    log_report(cycle, &report, t0.elapsed());
                    interval
                }
                Err(e) => {
                    let consecutive = streak.record_failure();
                    error!(cycle, consecutive, error = %e, "Cycle failed");
                    streak.escalating_wait(error_cooldown, failure_cooldown)
                }
            };

            info!(cycle, wait_secs = wait.as_secs(), "Sleeping until next cycle");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!(cycle, "Shutdown requested");
                    break;
                }
            }
        }
    }
}

pub fn log_report(cycle: u64, report: &CycleReport, elapsed: Duration) {
    let new_items: usize = report.sources.iter().map(|s| s.new).sum();
    let failed_sources = report.sources.iter().filter(|s| s.failed.is_some()).count();
    info!(
        cycle,
        elapsed_ms = elapsed.as_millis(),
        new_items,
        failed_sources,
        scraped_ok = report.scraped.succeeded.len(),
        scraped_failed = report.scraped.failed,
        expansion_inserted = report.expansion.inserted,
        selected = report.selected,
        units_added = report.output.added,
        corpus_size = report.corpus_size,
        "Cycle complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::test_support::rss;
    use crate::http::test_support::{fetcher_for, settings_for};
    use crate::models::{FeedSource, ScrapeState};
    use crate::scrapers::article::test_support::article_html;
    use crate::store::CorpusStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn pipeline_for(server: &MockServer, dir: &std::path::Path) -> Pipeline {
        let settings = Settings {
            feeds: vec![FeedSource {
                category: None,
                endpoint: "{base}/{lang}/rss/default".into(),
                language: "tr".into(),
            }],
            corpus_path: dir.join("corpus.json"),
            content_units_path: dir.join("content_units.json"),
            ..settings_for(&server.uri())
        };
        let store = CorpusStore::open(&settings.corpus_path).await.unwrap().spawn();
        Pipeline::new(fetcher_for(&server.uri()), store, settings)
    }

    async fn mount_saglik_article(server: &MockServer) {
        let link = format!("{}/tr/saglik/asi-kampanyasi/123456", server.uri());
        Mock::given(method("GET"))
            .and(path("/tr/rss/default"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(rss(&[("123456", &link, "Aşı kampanyası başladı")])),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tr/saglik/asi-kampanyasi/123456"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(article_html("Aşı kampanyası başladı", "", &[])),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_generic_feed_item_is_categorized_from_url_path() {
        let server = MockServer::start().await;
        mount_saglik_article(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(&server, dir.path()).await;

        let report = pipeline.run_cycle().await.unwrap();
        assert_eq!(report.sources[0].new, 1);
        assert_eq!(report.scraped.succeeded, vec!["123456".to_string()]);
        assert_eq!(report.output.added, 1);

        let written: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("content_units.json")).unwrap(),
        )
        .unwrap();
        let units = written.as_object().unwrap();
        assert_eq!(units.len(), 1);
        let unit = units.values().next().unwrap();
        assert_eq!(unit["category"], "saglik");
        assert_eq!(unit["guid"], "123456");
        assert!(
            unit["synthesis_text"]
                .as_str()
                .unwrap()
                .starts_with("Aşı kampanyası başladı. ")
        );
    }

    #[tokio::test]
    async fn test_repeated_guid_does_not_grow_corpus() {
        let server = MockServer::start().await;
        mount_saglik_article(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(&server, dir.path()).await;

        let first = pipeline.run_cycle().await.unwrap();
        let second = pipeline.run_isolated().await.unwrap();

        assert_eq!(first.corpus_size, 1);
        assert_eq!(second.corpus_size, 1);
        assert_eq!(second.sources[0].new, 0);
        assert_eq!(second.sources[0].duplicate, 1);
        assert!(second.scraped.succeeded.is_empty());
        assert_eq!(second.output.added, 0);
        assert_eq!(second.output.already_present, 1);

        let item = pipeline.store.get("123456").await.unwrap().unwrap();
        assert_eq!(item.scrape_state, ScrapeState::ScrapeSucceeded);
        assert_eq!(item.scrape_attempts, 1);
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(&server, dir.path()).await;

        let report = pipeline.run_isolated().await.unwrap();
        assert!(report.all_sources_failed());
        assert_eq!(report.corpus_size, 0);
        assert_eq!(report.output, MergeReport::default());
    }
}
