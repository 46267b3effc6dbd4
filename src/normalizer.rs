//! Parsing of the source's undelimited description blobs.
//!
//! A feed description concatenates, with no separators:
//!
//! ```text
//! <category>[<subcategory>]<title><summary><Author Name> | DD.MM.YYYY [- Güncelleme : DD.MM.YYYY]
//! ```
//!
//! Parsing runs right to left (dates, author, category, title/summary). Each
//! strip shrinks the ambiguous remainder for the next step; the category
//! prefix match in particular only works once the footer is gone.

use crate::categorize::CategoryTable;
use crate::models::{CategoryLabel, DescriptionBlob, ParsedDescription};
use crate::utils::collapse_whitespace;
use once_cell::sync::Lazy;
use regex::Regex;

/// Remainders up to this many chars are all title.
const TITLE_MAX_CHARS: usize = 150;
/// Earliest char offset at which a sentence end may close the title.
const TITLE_MIN_CHARS: usize = 50;

static FOOTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\s*\|\s*(?P<published>\d{1,2}\.\d{1,2}\.\d{4}(?:\s+\d{1,2}:\d{2})?)(?:\s*-\s*G[üu]ncelleme\s*:\s*(?P<updated>\d{1,2}\.\d{1,2}\.\d{4}(?:\s+\d{1,2}:\d{2})?))?\s*$",
    )
    .unwrap()
});

// At most four capitalized words; words may be glued to what precedes them.
static AUTHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[A-ZÇĞİÖŞÜÂÎÛ][a-zçğıöşüâîû]+\s*){1,4}$").unwrap()
});

static NAME_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-ZÇĞİÖŞÜÂÎÛ][a-zçğıöşüâîû]+").unwrap());

/// Split a description blob into its parts.
pub fn parse(blob: &DescriptionBlob, table: &CategoryTable) -> ParsedDescription {
    let mut parsed = ParsedDescription::default();
    let mut rest = collapse_whitespace(blob.as_str());

    if let Some(caps) = FOOTER_RE.captures(&rest) {
        parsed.published_date = caps.name("published").map(|m| m.as_str().to_string());
        parsed.updated_date = caps.name("updated").map(|m| m.as_str().to_string());
        let start = caps.get(0).map_or(rest.len(), |m| m.start());
        rest.truncate(start);

        let (remaining, author) = split_author(&rest);
        parsed.author = author;
        rest = remaining;
    }

    if let Some(labels) = split_labels(&rest, table, None) {
        parsed.category = Some(labels.category.key.clone());
        parsed.subcategory = labels.subcategory.map(|s| s.key.clone());
        rest = labels.rest.to_string();
    }

    let (title, summary) = split_title_summary(&rest);
    parsed.title = title;
    parsed.summary = summary;
    parsed
}

/// Remove the `Author | date` footer(s) and, when a footer was present, the
/// leading category label and subcategory.
///
/// A label of `category_key` is preferred, but any known label is removed:
/// the description's label need not be the category the item resolved to.
/// Applying this twice gives the same result as applying it once.
pub fn strip_footer(text: &str, category_key: Option<&str>, table: &CategoryTable) -> String {
    let mut out = collapse_whitespace(text);
    let mut found = false;
    while let Some(m) = FOOTER_RE.find(&out) {
        out.truncate(m.start());
        out = split_author(&out).0;
        found = true;
    }
    if found {
        if let Some(labels) = split_labels(&out, table, category_key) {
            out = labels.rest.to_string();
        }
    }
    collapse_whitespace(&out)
}

struct LeadingLabels<'a> {
    category: &'a CategoryLabel,
    subcategory: Option<&'a CategoryLabel>,
    rest: &'a str,
}

/// The category label `text` starts with, an optional subcategory, and the rest.
///
/// The subcategory follows either a comma or, glued, the category itself.
fn split_labels<'a>(
    text: &'a str,
    table: &'a CategoryTable,
    preferred_key: Option<&str>,
) -> Option<LeadingLabels<'a>> {
    let text = text.trim_start();
    let (category, after) = preferred_key
        .and_then(|key| table.match_key_prefix(text, key))
        .or_else(|| table.match_prefix(text))?;
    let candidate = match after.trim_start().strip_prefix(',') {
        Some(stripped) => stripped.trim_start(),
        None => after,
    };
    Some(match table.match_prefix(candidate) {
        Some((sub, rest)) => LeadingLabels {
            category,
            subcategory: Some(sub),
            rest,
        },
        None => LeadingLabels {
            category,
            subcategory: None,
            rest: candidate,
        },
    })
}

/// Split a trailing capitalized-name run off `text`.
///
/// Nothing is split when the name would be all of `text`.
fn split_author(text: &str) -> (String, Option<String>) {
    let Some(m) = AUTHOR_RE.find(text) else {
        return (text.to_string(), None);
    };
    let before = text[..m.start()].trim_end();
    if before.is_empty() {
        return (text.to_string(), None);
    }
    let author = NAME_WORD_RE
        .find_iter(m.as_str())
        .map(|w| w.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    (before.to_string(), Some(author))
}

/// Title/summary split of the undelimited remainder.
fn split_title_summary(text: &str) -> (String, String) {
    let text = text.trim();
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    if chars.len() <= TITLE_MAX_CHARS {
        return (text.to_string(), String::new());
    }

    for i in TITLE_MIN_CHARS..=TITLE_MAX_CHARS {
        let (byte, c) = chars[i];
        let next_is_digit = chars.get(i + 1).is_some_and(|&(_, n)| n.is_ascii_digit());
        let is_end = match c {
            '.' => !next_is_digit,
            ':' | '?' => true,
            _ => false,
        };
        if is_end {
            let after = byte + c.len_utf8();
            let title_end = if c == '?' { after } else { byte };
            return (
                text[..title_end].trim().to_string(),
                text[after..].trim().to_string(),
            );
        }
    }

    let limit = chars[TITLE_MAX_CHARS].0;
    let cut = text[..limit]
        .rfind(char::is_whitespace)
        .filter(|&c| c > 0)
        .unwrap_or(limit);
    (
        text[..cut].trim().to_string(),
        text[cut..].trim().to_string(),
    )
}
