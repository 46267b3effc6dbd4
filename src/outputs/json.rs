//! Content-unit output file.
//!
//! The file is a JSON object mapping unit id to [`ContentUnit`]. Downstream
//! consumers may enrich entries in place, so a run only adds ids that are not
//! present yet and carries every existing entry over untouched (as raw JSON
//! values, whatever fields they have gained).
//!
//! ```text
//! data/content_units.json
//! {
//!   "3f1c9a0b2d4e6f81": { "id": "3f1c9a0b2d4e6f81", "category": "saglik", ... },
//!   ...
//! }
//! ```

use crate::models::ContentUnit;
use crate::utils::atomic_write;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{error, info, instrument};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("output serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("output file {0} is not a JSON object")]
    NotAnObject(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub already_present: usize,
    pub total: usize,
}

async fn read_existing(path: &Path) -> Result<Option<Map<String, Value>>, OutputError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Some(Map::new()));
    }
    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(OutputError::NotAnObject(path.display().to_string())),
    }
}

/// Merge `units` into the file at `path`, adding only unknown ids.
///
/// # Arguments
///
/// * `units` - Content units built this cycle
/// * `path` - Output JSON file (unit id -> unit)
///
/// # Returns
///
/// A [`MergeReport`] on success. Fails without touching the file when the
/// existing content is unreadable or not a JSON object.
///
/// # Output
///
/// The file is rewritten atomically, and only when something was added or it
/// did not exist yet.
#[instrument(level = "info", skip_all, fields(path = %path.display(), units = units.len()))]
pub async fn write_content_units(units: &[ContentUnit], path: &Path) -> Result<MergeReport, OutputError> {
    let existing = read_existing(path).await.inspect_err(|e| {
        error!(error = %e, "Refusing to overwrite unreadable output file");
    })?;
    let is_new_file = existing.is_none();
    let mut map = existing.unwrap_or_default();

    let mut report = MergeReport::default();
    for unit in units {
        if map.contains_key(&unit.id) {
            report.already_present += 1;
            continue;
        }
        map.insert(unit.id.clone(), serde_json::to_value(unit)?);
        report.added += 1;
    }
    report.total = map.len();

    if report.added > 0 || is_new_file {
        let json = serde_json::to_vec_pretty(&Value::Object(map))?;
        atomic_write(path, &json).await?;
        info!(added = report.added, total = report.total, "Wrote content units");
    } else {
        info!(total = report.total, "No new content units");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitStatus;
    use chrono::Utc;

    fn unit(id: &str, title: &str) -> ContentUnit {
        ContentUnit {
            id: id.into(),
            guid: format!("g-{id}"),
            title: title.into(),
            category: "gundem".into(),
            summary: "Özet".into(),
            synthesis_text: format!("{title}. Özet"),
            images: vec![],
            keywords: vec!["anahtar".into()],
            published_at: Utc::now(),
            source_url: format!("https://www.aa.com.tr/tr/gundem/x/{id}"),
            status: UnitStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_merge_preserves_enriched_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.json");

        let first = write_content_units(&[unit("a", "Bir")], &path).await.unwrap();
        assert_eq!(first.added, 1);

        // A downstream consumer enriches the entry in place.
        let mut doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        doc["a"]["status"] = Value::from("synthesized");
        doc["a"]["article"] = Value::from("Uzun metin");
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let second = write_content_units(&[unit("a", "Bir (yeni)"), unit("b", "İki")], &path)
            .await
            .unwrap();
        assert_eq!(second.added, 1);
        assert_eq!(second.already_present, 1);
        assert_eq!(second.total, 2);

        let merged: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(merged["a"], doc["a"]);
        assert_eq!(merged["b"]["title"], "İki");
        assert_eq!(merged["b"]["status"], "pending");
    }

    #[tokio::test]
    async fn test_empty_run_still_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("units.json");
        let report = write_content_units(&[], &path).await.unwrap();
        assert_eq!(report, MergeReport::default());
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "{}");
    }

    #[tokio::test]
    async fn test_non_object_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let err = write_content_units(&[unit("a", "Bir")], &path).await.unwrap_err();
        assert!(matches!(err, OutputError::NotAnObject(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1, 2, 3]");
    }
}
