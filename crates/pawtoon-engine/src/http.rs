use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pawtoon_contracts::error::truncate_text;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn http_client(timeout: Duration) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

pub(crate) fn response_json_or_error(vendor: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{vendor} response body read failed"))?;
    if !status.is_success() {
        bail!("{vendor} request failed ({code}): {}", truncate_text(&body, 512));
    }
    serde_json::from_str(&body).with_context(|| format!("{vendor} returned invalid JSON payload"))
}

pub(crate) fn trim_api_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
