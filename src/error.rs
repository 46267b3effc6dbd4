//! Failure taxonomy for every network and parsing boundary.
//!
//! Callers match on [`FailureKind`] instead of inspecting error strings: the
//! [`Governor`](crate::governor::Governor) uses [`FailureKind::is_transient`] to
//! decide whether a call is worth retrying, and the pipeline uses the kind to
//! pick a log level.

use std::time::Duration;
use thiserror::Error;

/// Typed failure returned by fetch, parse and validation steps.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FailureKind {
    /// The call did not complete before its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure (DNS, refused connection, reset, TLS, body read).
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Malformed feed, HTML or JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// Input rejected before or after fetching (empty title, foreign host, ...).
    #[error("validation error: {0}")]
    Validation(String),
}

impl FailureKind {
    /// Whether retrying the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FailureKind::Timeout(_) | FailureKind::Connection(_) => true,
            FailureKind::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            FailureKind::Parse(_) | FailureKind::Validation(_) => false,
        }
    }

    /// Short label used as a structured log field.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Timeout(_) => "timeout",
            FailureKind::Connection(_) => "connection",
            FailureKind::HttpStatus { .. } => "http_status",
            FailureKind::Parse(_) => "parse",
            FailureKind::Validation(_) => "validation",
        }
    }
}

impl From<reqwest::Error> for FailureKind {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return FailureKind::HttpStatus {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if e.is_timeout() {
            return FailureKind::Timeout(Duration::ZERO);
        }
        if e.is_decode() {
            return FailureKind::Parse(e.to_string());
        }
        FailureKind::Connection(e.to_string())
    }
}

impl From<serde_json::Error> for FailureKind {
    fn from(e: serde_json::Error) -> Self {
        FailureKind::Parse(e.to_string())
    }
}

impl From<quick_xml::DeError> for FailureKind {
    fn from(e: quick_xml::DeError) -> Self {
        FailureKind::Parse(e.to_string())
    }
}

impl From<url::ParseError> for FailureKind {
    fn from(e: url::ParseError) -> Self {
        FailureKind::Validation(format!("invalid URL: {e}"))
    }
}
