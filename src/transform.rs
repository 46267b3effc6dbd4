//! Turn selected corpus items into synthesis-ready [`ContentUnit`]s.
//!
//! The summary comes from whichever of the page summary and the feed
//! description is richer once cleaned. Cleaning removes the `Author | date`
//! footer, the category label the description starts with, and any copies of
//! the title at the front, so the synthesis text carries the title exactly once.

use crate::categorize::{CategoryTable, is_eligible};
use crate::config::Settings;
use crate::error::FailureKind;
use crate::models::{ContentUnit, RawItem, UnitStatus};
use crate::normalizer::{parse, strip_footer};
use crate::utils::collapse_whitespace;
use itertools::Itertools;

/// Case-insensitive comparison key for one char.
///
/// All four Turkish i's compare equal: `BAŞLADI` must match `başladı`.
fn fold(c: char) -> char {
    match c {
        'I' | 'ı' | 'İ' | 'i' => 'i',
        other => other.to_lowercase().next().unwrap_or(other),
    }
}

/// `text` without a case-insensitive `prefix`, if it starts with one.
fn strip_prefix_folded<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut chars = text.char_indices();
    for p in prefix.chars() {
        let (_, c) = chars.next()?;
        if fold(c) != fold(p) {
            return None;
        }
    }
    let end = chars.next().map_or(text.len(), |(i, _)| i);
    Some(&text[end..])
}

fn is_leading_junk(c: char) -> bool {
    c.is_whitespace() || matches!(c, '.' | ':' | ';' | ',' | '-' | '–' | '!' | '?' | '…')
}

/// Footer-free `text` with every leading copy of `title` removed.
pub fn clean_text(title: &str, text: &str, category: &str, table: &CategoryTable) -> String {
    let title = collapse_whitespace(title);
    let mut body = strip_footer(text, Some(category), table);
    if title.is_empty() {
        return body;
    }
    while let Some(rest) = strip_prefix_folded(&body, &title) {
        body = rest.trim_start_matches(is_leading_junk).to_string();
    }
    body
}

/// `title` followed by `body` as one paragraph.
pub fn synthesis_text(title: &str, body: &str) -> String {
    let title = collapse_whitespace(title);
    if body.is_empty() {
        return title;
    }
    if title.ends_with(['.', '!', '?', '…']) {
        format!("{title} {body}")
    } else {
        format!("{title}. {body}")
    }
}

/// Build the content unit for `item` under `category`.
///
/// The title is the feed title, else the page title, else the title recovered
/// from the description. Ineligible items and items with no title at all are
/// rejected with a validation failure.
pub fn transform(
    item: &RawItem,
    category: &str,
    table: &CategoryTable,
    settings: &Settings,
) -> Result<ContentUnit, FailureKind> {
    if !is_eligible(item, settings.min_article_chars) {
        return Err(FailureKind::Validation(format!(
            "item {} is not scraped or too short",
            item.guid
        )));
    }
    let scraped = item
        .scraped
        .as_ref()
        .ok_or_else(|| FailureKind::Validation(format!("item {} has no content", item.guid)))?;

    let title = Some(collapse_whitespace(&item.title))
        .filter(|t| !t.is_empty())
        .or_else(|| scraped.title.as_deref().map(collapse_whitespace))
        .filter(|t| !t.is_empty())
        .or_else(|| Some(parse(&item.description, table).title))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| FailureKind::Validation(format!("item {} has no title", item.guid)))?;

    let from_page = clean_text(&title, scraped.summary.as_deref().unwrap_or_default(), category, table);
    let from_feed = clean_text(&title, item.description.as_str(), category, table);
    let summary = if from_feed.chars().count() > from_page.chars().count() {
        from_feed
    } else {
        from_page
    };

    let images = item
        .image
        .iter()
        .chain(scraped.images.iter())
        .cloned()
        .unique()
        .collect();
    let keywords = if scraped.keywords.is_empty() {
        scraped.tags.clone()
    } else {
        scraped.keywords.iter().map(|k| k.text.clone()).collect()
    };

    Ok(ContentUnit {
        id: ContentUnit::make_id(&title, &item.guid),
        guid: item.guid.clone(),
        synthesis_text: synthesis_text(&title, &summary),
        title,
        category: category.to_string(),
        summary,
        images,
        keywords: keywords.into_iter().unique().collect(),
        published_at: item.effective_date(),
        source_url: item.link.clone(),
        status: UnitStatus::Pending,
    })
}
