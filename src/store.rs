//! Durable corpus of discovered items, keyed by GUID.
//!
//! [`CorpusStore`] is the in-memory map plus its JSON file. It is owned by a
//! single actor task; the rest of the pipeline talks to it through a cloneable
//! [`CorpusHandle`] over an `mpsc` channel. Every mutation is followed by an
//! atomic rewrite of the file, so a crash loses at most the in-flight item and
//! the file on disk is always the last known good state.
//!
//! The corpus is append-only: items are never removed, and an insert whose GUID
//! is already present is a no-op.

use crate::models::{RawItem, ScrapeState, ScrapedContent};
use crate::utils::atomic_write;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("corpus I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corpus serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no item with guid {0}")]
    UnknownGuid(String),
    #[error("corpus writer has stopped")]
    Closed,
}

/// Result of one scrape, applied to the item it belongs to.
#[derive(Debug, Clone)]
pub enum ScrapeOutcome {
    Succeeded(ScrapedContent),
    Failed(String),
}

#[derive(Debug)]
pub struct CorpusStore {
    path: PathBuf,
    items: BTreeMap<String, RawItem>,
    urls: HashSet<String>,
}

impl CorpusStore {
    /// Load the corpus at `path`; a missing file is an empty corpus.
    ///
    /// A file that cannot be parsed is moved aside to
    /// `<path>.corrupt-<timestamp>` and the store starts empty.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let items = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, RawItem>>(&bytes) {
                Ok(items) => items,
                Err(e) => {
                    let aside = quarantine_path(&path);
                    error!(error = %e, aside = %aside.display(), "Corpus file is corrupt; moving it aside");
                    tokio::fs::rename(&path, &aside).await?;
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No corpus file yet; starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        let urls = items.values().map(|i| i.link.clone()).collect();
        info!(count = items.len(), "Loaded corpus");
        Ok(Self { path, items, urls })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, guid: &str) -> Option<&RawItem> {
        self.items.get(guid)
    }

    pub fn contains_guid(&self, guid: &str) -> bool {
        self.items.contains_key(guid)
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn items(&self) -> impl Iterator<Item = &RawItem> {
        self.items.values()
    }

    /// Insert `item` unless its GUID is known. Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, item: RawItem) -> bool {
        if self.items.contains_key(&item.guid) {
            return false;
        }
        self.urls.insert(item.link.clone());
        self.items.insert(item.guid.clone(), item);
        true
    }

    pub fn mark_attempted(&mut self, guid: &str) -> Result<(), StoreError> {
        let item = self
            .items
            .get_mut(guid)
            .ok_or_else(|| StoreError::UnknownGuid(guid.to_string()))?;
        item.scrape_state = ScrapeState::ScrapeAttempted;
        item.scrape_attempts = item.scrape_attempts.saturating_add(1);
        item.last_scrape_at = Some(Utc::now());
        Ok(())
    }

    /// Attach a scrape result. Success replaces any earlier content wholesale.
    pub fn record_scrape(&mut self, guid: &str, outcome: ScrapeOutcome) -> Result<(), StoreError> {
        let item = self
            .items
            .get_mut(guid)
            .ok_or_else(|| StoreError::UnknownGuid(guid.to_string()))?;
        item.last_scrape_at = Some(Utc::now());
        match outcome {
            ScrapeOutcome::Succeeded(content) => {
                if item.image.is_none() {
                    item.image = content.main_image.clone();
                }
                if item.title.trim().is_empty() {
                    item.title = content.title.clone().unwrap_or_default();
                }
                item.scraped = Some(content);
                item.scrape_state = ScrapeState::ScrapeSucceeded;
                item.scrape_error = None;
            }
            ScrapeOutcome::Failed(reason) => {
                item.scrape_state = ScrapeState::ScrapeFailed;
                item.scrape_error = Some(reason);
            }
        }
        Ok(())
    }

    /// Move every failed item back to `Discovered`. Returns how many moved.
    pub fn requeue_failed(&mut self) -> usize {
        let mut moved = 0;
        for item in self.items.values_mut() {
            if item.scrape_state == ScrapeState::ScrapeFailed {
                item.scrape_state = ScrapeState::Discovered;
                moved += 1;
            }
        }
        moved
    }

    pub async fn persist(&self) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&self.items)?;
        atomic_write(&self.path, &bytes).await?;
        debug!(count = self.items.len(), path = %self.path.display(), "Persisted corpus");
        Ok(())
    }

    /// Hand the store to a writer task and return the handle to it.
    pub fn spawn(self) -> CorpusHandle {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_writer(self, rx));
        CorpusHandle { tx }
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S")));
    PathBuf::from(name)
}

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum Command {
    Insert(RawItem, Reply<bool>),
    InsertMany(Vec<RawItem>, Reply<Vec<bool>>),
    MarkAttempted(String, Reply<()>),
    RecordScrape(String, ScrapeOutcome, Reply<()>),
    RequeueFailed(Reply<usize>),
    ContainsUrl(String, oneshot::Sender<bool>),
    ContainsGuid(String, oneshot::Sender<bool>),
    Get(String, oneshot::Sender<Option<RawItem>>),
    Snapshot(oneshot::Sender<Vec<RawItem>>),
    Len(oneshot::Sender<usize>),
}

async fn run_writer(mut store: CorpusStore, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Insert(item, reply) => {
                let inserted = store.insert_if_absent(item);
                let res = if inserted {
                    store.persist().await.map(|_| true)
                } else {
                    Ok(false)
                };
                let _ = reply.send(res);
            }
            Command::InsertMany(items, reply) => {
                let inserted: Vec<bool> = items.into_iter().map(|i| store.insert_if_absent(i)).collect();
                let res = if inserted.contains(&true) {
                    store.persist().await.map(|_| inserted)
                } else {
                    Ok(inserted)
                };
                let _ = reply.send(res);
            }
            Command::MarkAttempted(guid, reply) => {
                let res = match store.mark_attempted(&guid) {
                    Ok(()) => store.persist().await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(res);
            }
            Command::RecordScrape(guid, outcome, reply) => {
                let res = match store.record_scrape(&guid, outcome) {
                    Ok(()) => store.persist().await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(res);
            }
            Command::RequeueFailed(reply) => {
                let moved = store.requeue_failed();
                let res = if moved > 0 {
                    store.persist().await.map(|_| moved)
                } else {
                    Ok(0)
                };
                let _ = reply.send(res);
            }
            Command::ContainsUrl(url, reply) => {
                let _ = reply.send(store.contains_url(&url));
            }
            Command::ContainsGuid(guid, reply) => {
                let _ = reply.send(store.contains_guid(&guid));
            }
            Command::Get(guid, reply) => {
                let _ = reply.send(store.get(&guid).cloned());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(store.items().cloned().collect());
            }
            Command::Len(reply) => {
                let _ = reply.send(store.len());
            }
        }
    }
    warn!("Corpus writer stopping: all handles dropped");
}

/// Cloneable access to the corpus writer task.
#[derive(Clone, Debug)]
pub struct CorpusHandle {
    tx: mpsc::Sender<Command>,
}

impl CorpusHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    /// Insert and persist; `Ok(false)` when the GUID was already present.
    pub async fn insert(&self, item: RawItem) -> Result<bool, StoreError> {
        self.call(|r| Command::Insert(item, r)).await
    }

    /// Insert a batch with a single persist. One flag per item, in order.
    pub async fn insert_many(&self, items: Vec<RawItem>) -> Result<Vec<bool>, StoreError> {
        self.call(|r| Command::InsertMany(items, r)).await
    }

    pub async fn mark_attempted(&self, guid: &str) -> Result<(), StoreError> {
        let guid = guid.to_string();
        self.call(|r| Command::MarkAttempted(guid, r)).await
    }

    pub async fn record_scrape(&self, guid: &str, outcome: ScrapeOutcome) -> Result<(), StoreError> {
        let guid = guid.to_string();
        self.call(|r| Command::RecordScrape(guid, outcome, r)).await
    }

    pub async fn requeue_failed(&self) -> Result<usize, StoreError> {
        self.call(Command::RequeueFailed).await
    }

    pub async fn contains_url(&self, url: &str) -> Result<bool, StoreError> {
        let url = url.to_string();
        self.ask(|r| Command::ContainsUrl(url, r)).await
    }

    pub async fn contains_guid(&self, guid: &str) -> Result<bool, StoreError> {
        let guid = guid.to_string();
        self.ask(|r| Command::ContainsGuid(guid, r)).await
    }

    pub async fn get(&self, guid: &str) -> Result<Option<RawItem>, StoreError> {
        let guid = guid.to_string();
        self.ask(|r| Command::Get(guid, r)).await
    }

    pub async fn snapshot(&self) -> Result<Vec<RawItem>, StoreError> {
        self.ask(Command::Snapshot).await
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.ask(Command::Len).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemOrigin;

    fn item(guid: &str) -> RawItem {
        RawItem::discovered(
            guid.to_string(),
            format!("Haber {guid}"),
            format!("https://www.aa.com.tr/tr/gundem/haber/{guid}"),
            ItemOrigin::Feed {
                source: "gundem".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_per_guid() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CorpusStore::open(dir.path().join("corpus.json")).await.unwrap();
        assert!(store.insert_if_absent(item("1")));
        let mut dup = item("1");
        dup.title = "Farklı başlık".into();
        assert!(!store.insert_if_absent(dup));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("1").unwrap().title, "Haber 1");
        assert!(store.contains_url("https://www.aa.com.tr/tr/gundem/haber/1"));
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        let mut store = CorpusStore::open(&path).await.unwrap();
        store.insert_if_absent(item("1"));
        store.insert_if_absent(item("2"));
        store
            .record_scrape("2", ScrapeOutcome::Failed("404".into()))
            .unwrap();
        store.persist().await.unwrap();

        let reloaded = CorpusStore::open(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("2").unwrap().scrape_state, ScrapeState::ScrapeFailed);
        assert_eq!(reloaded.get("2").unwrap().scrape_error.as_deref(), Some("404"));
        assert!(reloaded.contains_url("https://www.aa.com.tr/tr/gundem/haber/1"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = CorpusStore::open(&path).await.unwrap();
        assert_eq!(store.len(), 0);
        assert!(!path.exists());
        let aside = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(aside);
    }

    #[tokio::test]
    async fn test_record_scrape_replaces_content_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CorpusStore::open(dir.path().join("c.json")).await.unwrap();
        store.insert_if_absent(item("7"));
        store.mark_attempted("7").unwrap();
        assert_eq!(store.get("7").unwrap().scrape_state, ScrapeState::ScrapeAttempted);
        assert_eq!(store.get("7").unwrap().scrape_attempts, 1);

        let content = ScrapedContent {
            url: "u".into(),
            paragraphs: vec!["Birinci paragraf".into()],
            main_image: Some("https://img.test/a.jpg".into()),
            ..ScrapedContent::default()
        };
        store
            .record_scrape("7", ScrapeOutcome::Succeeded(content))
            .unwrap();
        let it = store.get("7").unwrap();
        assert_eq!(it.scrape_state, ScrapeState::ScrapeSucceeded);
        assert_eq!(it.image.as_deref(), Some("https://img.test/a.jpg"));

        assert!(matches!(
            store.record_scrape("missing", ScrapeOutcome::Failed("x".into())),
            Err(StoreError::UnknownGuid(_))
        ));
    }

    #[tokio::test]
    async fn test_requeue_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CorpusStore::open(dir.path().join("c.json")).await.unwrap();
        store.insert_if_absent(item("1"));
        store.insert_if_absent(item("2"));
        store
            .record_scrape("1", ScrapeOutcome::Failed("timeout".into()))
            .unwrap();
        assert_eq!(store.requeue_failed(), 1);
        assert_eq!(store.get("1").unwrap().scrape_state, ScrapeState::Discovered);
        assert_eq!(store.requeue_failed(), 0);
    }

    #[tokio::test]
    async fn test_handle_serializes_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        let handle = CorpusStore::open(&path).await.unwrap().spawn();

        let mut tasks = Vec::new();
        for n in 0..20 {
            let h = handle.clone();
            tasks.push(tokio::spawn(async move {
                // every GUID is inserted twice from different tasks
                h.insert(item(&(n % 10).to_string())).await.unwrap()
            }));
        }
        let mut inserted = 0;
        for t in tasks {
            if t.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 10);
        assert_eq!(handle.len().await.unwrap(), 10);
        assert!(handle.contains_guid("3").await.unwrap());
        assert!(!handle.contains_guid("42").await.unwrap());

        let on_disk: BTreeMap<String, RawItem> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 10);
    }

    #[tokio::test]
    async fn test_insert_many_flags_each_item_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        let handle = CorpusStore::open(&path).await.unwrap().spawn();
        assert!(handle.insert(item("1")).await.unwrap());

        let flags = handle
            .insert_many(vec![item("1"), item("2"), item("3"), item("2")])
            .await
            .unwrap();
        assert_eq!(flags, vec![false, true, true, false]);

        let on_disk: BTreeMap<String, RawItem> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.keys().collect::<Vec<_>>(), vec!["1", "2", "3"]);

        let none_new = handle.insert_many(vec![item("3")]).await.unwrap();
        assert_eq!(none_new, vec![false]);
        assert_eq!(handle.len().await.unwrap(), 3);
    }
}
