//! Keyword search against the source's own search endpoint.
//!
//! The endpoint is protected by an anti-forgery token: the keyword's search
//! page is fetched first to read `__RequestVerificationToken` (and to set the
//! matching cookie), then the form is POSTed as an AJAX call. The answer is
//! JSON with one entry per document.

use crate::config::Settings;
use crate::error::FailureKind;
use crate::http::Fetcher;
use crate::models::{KeywordToken, SearchHit};
use crate::utils::parse_source_date;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

/// Results requested per query; the crawler truncates further.
const PAGE_SIZE: usize = 50;
/// Type id of plain news documents.
const NEWS_TYPE_ID: &str = "1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResponse {
    #[serde(default)]
    documents: Vec<SearchDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchDocument {
    route: Option<String>,
    create_date_string: Option<String>,
}

/// Search page for `keyword`, the page the token is read from.
pub fn search_page_url(settings: &Settings, keyword: &str) -> String {
    format!(
        "{}/{}/search/?s={}",
        settings.base_url.trim_end_matches('/'),
        settings.language,
        urlencoding::encode(keyword)
    )
}

fn search_endpoint(settings: &Settings) -> String {
    format!(
        "{}/{}/Search/Search",
        settings.base_url.trim_end_matches('/'),
        settings.language
    )
}

/// Read the anti-forgery token from a search page.
pub fn extract_token(html: &str) -> Result<String, FailureKind> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("input[name='__RequestVerificationToken']")
        .map_err(|e| FailureKind::Parse(format!("token selector: {e}")))?;
    doc.select(&sel)
        .filter_map(|input| input.value().attr("value"))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FailureKind::Parse("search page has no verification token".to_string()))
}

fn into_hits(response: SearchResponse, base: &Url) -> Vec<SearchHit> {
    response
        .documents
        .into_iter()
        .filter_map(|doc| {
            let route = doc.route?;
            let url = base.join(route.trim()).ok()?;
            Some(SearchHit {
                url: url.to_string(),
                date_hint: doc.create_date_string.as_deref().and_then(parse_source_date),
            })
        })
        .collect()
}

/// Run one keyword query and return its hits in the order the source ranks them.
#[instrument(level = "info", skip_all, fields(keyword = %token.text))]
pub async fn search(
    fetcher: &Fetcher,
    settings: &Settings,
    token: &KeywordToken,
) -> Result<Vec<SearchHit>, FailureKind> {
    let page_url = if token.search_url.is_empty() {
        search_page_url(settings, &token.text)
    } else {
        token.search_url.clone()
    };
    let page = fetcher.get_text(&page_url).await?;
    let verification = extract_token(&page)?;

    let form = [
        ("PageSize", PAGE_SIZE.to_string()),
        ("Keywords", token.text.clone()),
        ("CategoryId", String::new()),
        ("TypeId", NEWS_TYPE_ID.to_string()),
        ("Page", "1".to_string()),
        ("__RequestVerificationToken", verification),
    ];
    let response: SearchResponse = fetcher
        .post_form_json(&search_endpoint(settings), &form, Some(&page_url))
        .await?;

    let base = Url::parse(&settings.base_url)?;
    let hits = into_hits(response, &base);
    debug!(hits = hits.len(), "Search answered");
    Ok(hits)
}

#[cfg(test)]
pub(crate) mod test_support {
    /// A search page carrying `token` in its hidden input.
    pub fn search_page(token: &str) -> String {
        format!(
            "<html><body><form><input name=\"__RequestVerificationToken\" type=\"hidden\" value=\"{token}\"></form></body></html>"
        )
    }

    /// A search answer listing `routes`.
    pub fn search_json(routes: &[String]) -> serde_json::Value {
        let docs: Vec<serde_json::Value> = routes
            .iter()
            .map(|r| serde_json::json!({"Route": r, "CreateDateString": "17.05.2025 14:30"}))
            .collect();
        serde_json::json!({ "Documents": docs, "TotalCount": docs.len() })
    }
}
