//! Utility functions for identifiers, dates, text cleanup and file system operations.
//!
//! This module provides helper functions used throughout the application:
//! - GUID derivation (numeric article id, else content hash)
//! - Date parsing for the formats the source mixes (RFC 2822, RFC 3339, `DD.MM.YYYY`)
//! - Turkish-aware slugs for category keys
//! - String truncation for logging
//! - Atomic file replacement and output directory validation

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Offset the source prints its local dates in (Europe/Istanbul, no DST).
const SOURCE_UTC_OFFSET_SECS: i32 = 3 * 3600;

static LOCAL_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{2}\.\d{2}\.\d{4}(?:\s+\d{2}:\d{2})?").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// First 16 hex chars of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// The last path segment of `s` when it is purely numeric.
///
/// `s` may be an absolute URL, a path, or a bare identifier.
pub fn numeric_tail(s: &str) -> Option<String> {
    let s = s.trim();
    let path = match url::Url::parse(s) {
        Ok(u) => u.path().to_string(),
        Err(_) => s.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let last = path.split('/').filter(|seg| !seg.is_empty()).last()?;
    last.chars()
        .all(|c| c.is_ascii_digit())
        .then(|| last.to_string())
}

/// Stable corpus key for an article.
///
/// Prefers the numeric id in the source-provided identifier, then the numeric
/// id in the link, then a hash of whichever identifier is available.
pub fn derive_guid(source_id: Option<&str>, link: &str) -> String {
    let source_id = source_id.map(str::trim).filter(|s| !s.is_empty());
    source_id
        .and_then(numeric_tail)
        .or_else(|| numeric_tail(link))
        .unwrap_or_else(|| short_hash(source_id.unwrap_or(link.trim())))
}

/// Parse any date format the source emits into UTC.
///
/// Local `DD.MM.YYYY[ HH:MM]` dates are interpreted at UTC+3. Longer strings
/// (e.g. `17.05.2025 - Güncelleme : 18.05.2025`) use their first date.
pub fn parse_source_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let local = LOCAL_DATE_RE.find(raw)?.as_str();
    let offset = FixedOffset::east_opt(SOURCE_UTC_OFFSET_SECS)?;
    let naive = NaiveDateTime::parse_from_str(local, "%d.%m.%Y %H:%M")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(local, "%d.%m.%Y")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Collapse runs of whitespace (including NBSP) into single spaces and trim.
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RE
        .replace_all(&s.replace('\u{a0}', " "), " ")
        .trim()
        .to_string()
}

/// ASCII slug of a (Turkish) label: `Kültür Sanat` -> `kultur-sanat`.
pub fn slugify_category(label: &str) -> String {
    let folded: String = label
        .chars()
        .map(|c| match c {
            'ç' | 'Ç' => 'c',
            'ğ' | 'Ğ' => 'g',
            'ı' | 'I' | 'İ' | 'î' | 'Î' => 'i',
            'ö' | 'Ö' => 'o',
            'ş' | 'Ş' => 's',
            'ü' | 'Ü' | 'û' | 'Û' => 'u',
            'â' | 'Â' => 'a',
            other => other.to_ascii_lowercase(),
        })
        .collect();
    folded
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a char boundary) with an
/// ellipsis and the number of dropped bytes appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Replace `path` with `bytes` so readers never observe a partial file.
///
/// Writes `<path>.tmp` in the same directory, syncs it, then renames it over
/// the target.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), bytes = bytes.len()))]
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    debug!("Replaced file atomically");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Ensure the directory that will hold `file` exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a probe file.
#[instrument(level = "info", skip_all, fields(path = %file.display()))]
pub async fn ensure_writable_parent(file: &Path) -> io::Result<()> {
    let dir = match file.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).await?;
    let probe_path = dir.join("..__probe_write__");
    fs::File::create(&probe_path).await?;
    let _ = fs::remove_file(&probe_path).await;
    info!(dir = %dir.display(), "Output directory is writable");
    Ok(())
}
