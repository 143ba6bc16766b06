//! HTTP utilities for GCP REST API calls

use crate::inventory::error::{sanitize_for_log, ApiError};
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const ERROR_INFO_TYPE: &str = "type.googleapis.com/google.rpc.ErrorInfo";

/// Decode a Google API error body.
///
/// The most specific reason wins: `ErrorInfo.reason` from `details`, then
/// the legacy `errors[].reason`, then the canonical `status`.
pub fn parse_gcp_error(status: u16, body: &str) -> ApiError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = &parsed["error"];

    let detail_reason = error["details"].as_array().and_then(|details| {
        details
            .iter()
            .find(|d| d["@type"].as_str() == Some(ERROR_INFO_TYPE))
            .and_then(|d| d["reason"].as_str())
    });
    let legacy_reason = error["errors"]
        .as_array()
        .and_then(|errors| errors.first())
        .and_then(|e| e["reason"].as_str());

    let code = detail_reason
        .or(legacy_reason)
        .or_else(|| error["status"].as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| status.to_string());

    let message = error["message"]
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| sanitize_for_log(body));

    ApiError::new("GCP", status, code, message)
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("vcensus/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::debug!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(parse_gcp_error(status.as_u16(), &body).into());
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}
