//! Which URLs are worth scraping.
//!
//! Only pages on the configured host whose path looks like
//! `/{lang}/{category}/{slug}/{id}` are articles. Galleries, live pages,
//! search, static info pages, RSS and video pages share the host but not the
//! shape, and are rejected before any request is made.

use crate::error::FailureKind;
use url::Url;

/// Path segments that mark a page as something other than an article.
const NON_ARTICLE_SEGMENTS: &[&str] = &[
    "galeri",
    "foto-galeri",
    "video-galeri",
    "videogaleri",
    "fotogaleri",
    "video",
    "canli",
    "canli-yayin",
    "search",
    "arama",
    "p",
    "info",
    "rss",
    "abonelik",
    "iletisim",
    "kunye",
    "hakkimizda",
];

/// Minimum path depth of an article: language, category, slug.
const MIN_ARTICLE_SEGMENTS: usize = 3;

/// Parse `url` and check that it is an article page on `base_url`'s host.
pub fn check_article_url(url: &str, base_url: &str) -> Result<Url, FailureKind> {
    let base = Url::parse(base_url)?;
    let parsed = Url::parse(url.trim())?;

    if parsed.host_str() != base.host_str() || parsed.port_or_known_default() != base.port_or_known_default() {
        return Err(FailureKind::Validation(format!("foreign host: {url}")));
    }

    let segments: Vec<String> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).map(str::to_lowercase).collect())
        .unwrap_or_default();
    if let Some(seg) = segments
        .iter()
        .find(|seg| NON_ARTICLE_SEGMENTS.contains(&seg.as_str()))
    {
        return Err(FailureKind::Validation(format!("non-article page ({seg}): {url}")));
    }
    if segments.len() < MIN_ARTICLE_SEGMENTS {
        return Err(FailureKind::Validation(format!("not an article path: {url}")));
    }
    Ok(parsed)
}

pub fn is_article_url(url: &str, base_url: &str) -> bool {
    check_article_url(url, base_url).is_ok()
}
