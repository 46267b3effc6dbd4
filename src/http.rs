//! The single network boundary.
//!
//! [`Fetcher`] owns the `reqwest` client (with a cookie store, which the search
//! endpoint's verification token depends on) and routes every request through
//! the [`Governor`]. Non-2xx responses become [`FailureKind::HttpStatus`]; body
//! decoding follows the `Content-Type` charset and defaults to UTF-8.

use crate::config::Settings;
use crate::error::FailureKind;
use crate::governor::Governor;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde::de::DeserializeOwned;
use std::time::Instant;
use tracing::{debug, instrument};

#[derive(Clone, Debug)]
pub struct Fetcher {
    client: Client,
    governor: Governor,
}

impl Fetcher {
    pub fn new(settings: &Settings) -> Result<Self, FailureKind> {
        let governor = Governor::from_settings(settings);
        let mut headers = HeaderMap::new();
        let ua = HeaderValue::from_str(&settings.user_agent)
            .map_err(|e| FailureKind::Validation(format!("user_agent: {e}")))?;
        headers.insert(USER_AGENT, ua);
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(governor.per_call_timeout())
            .build()
            .map_err(|e| FailureKind::Connection(format!("building HTTP client: {e}")))?;
        Ok(Self { client, governor })
    }

    /// GET `url` and return the decoded body.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String, FailureKind> {
        let t0 = Instant::now();
        let body = self
            .governor
            .execute(url, || get_once(&self.client, url))
            .await?;
        debug!(bytes = body.len(), elapsed_ms = t0.elapsed().as_millis(), "GET ok");
        Ok(body)
    }

    /// POST a urlencoded form as an AJAX request and decode the JSON answer.
    #[instrument(level = "debug", skip(self, form))]
    pub async fn post_form_json<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, String)],
        referer: Option<&str>,
    ) -> Result<T, FailureKind> {
        let body = self
            .governor
            .execute(url, || post_once(&self.client, url, form, referer))
            .await?;
        Ok(serde_json::from_str(&body)?)
    }
}

async fn get_once(client: &Client, url: &str) -> Result<String, FailureKind> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FailureKind::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(resp.text().await?)
}

async fn post_once(
    client: &Client,
    url: &str,
    form: &[(&str, String)],
    referer: Option<&str>,
) -> Result<String, FailureKind> {
    let mut req = client
        .post(url)
        .header("X-Requested-With", "XMLHttpRequest")
        .form(form);
    if let Some(referer) = referer {
        req = req.header(REFERER, referer);
    }
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FailureKind::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(resp.text().await?)
}
