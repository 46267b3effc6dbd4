//! Scraping of the wire agency's own pages.
//!
//! | Concern | Module | Notes |
//! |---------|--------|-------|
//! | Article pages | [`article`] | Table-driven field extraction, bounded-concurrency batches |
//! | Keyword search | [`search`] | Token page + AJAX form POST, JSON answer |
//! | URL shapes | [`filters`] | Same-host check, non-article page rejection |
//!
//! All requests go through [`crate::http::Fetcher`], so every call carries the
//! governor's timeout and retry policy. Parsing is kept in plain functions over
//! the fetched text, which is what the tests exercise against fixtures.

pub mod article;
pub mod filters;
pub mod search;
