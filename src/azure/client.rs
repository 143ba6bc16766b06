//! Azure Resource Manager client
//!
//! Bearer-token GETs against ARM with `nextLink` pagination and ARM error
//! decoding. Retries are left to the engine's call gate.

use super::auth::AzureCredentials;
use crate::inventory::error::{sanitize_for_log, ApiError};
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const ARM_ENDPOINT: &str = "https://management.azure.com";

/// Guard against a server that keeps returning the same `nextLink`
const MAX_PAGES: usize = 1000;

/// Decode an ARM error body: `{"error": {"code": ..., "message": ...}}`
pub fn parse_arm_error(status: u16, body: &str) -> ApiError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = &parsed["error"];
    let code = error["code"]
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| status.to_string());
    let message = error["message"]
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| sanitize_for_log(body));
    ApiError::new("Azure", status, code, message)
}

#[derive(Clone)]
pub struct AzureClient {
    pub credentials: AzureCredentials,
    http: Client,
    endpoint: String,
}

impl AzureClient {
    pub fn new(credentials: AzureCredentials, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("vcensus/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            credentials,
            http,
            endpoint: ARM_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Build an ARM URL: `{endpoint}{path}?api-version={version}`
    pub fn arm_url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, api_version)
    }

    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let token = self.credentials.get_token().await?;
        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::debug!("ARM error: {} - {}", status, sanitize_for_log(&body));
            return Err(parse_arm_error(status.as_u16(), &body).into());
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }

    /// Follow `nextLink` and collect every `value` entry
    pub async fn get_all(&self, url: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());
        let mut pages = 0;

        while let Some(page_url) = next.take() {
            let page = self.get_json(&page_url).await?;
            if let Some(arr) = page.get("value").and_then(|v| v.as_array()) {
                items.extend(arr.iter().cloned());
            }

            pages += 1;
            next = page
                .get("nextLink")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty() && *s != page_url)
                .map(|s| s.to_string());
            if pages >= MAX_PAGES && next.is_some() {
                tracing::warn!("Stopped paging {} after {} pages", url, pages);
                break;
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arm_error() {
        let body = r#"{"error":{"code":"AuthorizationFailed","message":"The client does not have authorization"}}"#;
        let err = parse_arm_error(403, body);
        assert_eq!(err.code, "AuthorizationFailed");
        assert_eq!(err.provider, "Azure");

        let bare = parse_arm_error(503, "");
        assert_eq!(bare.code, "503");
    }

    #[test]
    fn test_arm_url() {
        let client = AzureClient::new(AzureCredentials::from_token("t"), Duration::from_secs(5))
            .unwrap()
            .with_endpoint("http://127.0.0.1:1/");
        assert_eq!(
            client.arm_url("/subscriptions", "2022-12-01"),
            "http://127.0.0.1:1/subscriptions?api-version=2022-12-01"
        );
    }
}
