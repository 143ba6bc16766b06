//! AWS HTTP client
//!
//! Signed requests for the three wire protocols the inventory needs:
//! Query (EC2, STS; form body, XML response), JSON (ECS, Organizations)
//! and REST (Lambda). Credentials and region are passed per call.

use super::credentials::AwsCredentials;
use super::signing::{form_body, SigV4Signer};
use crate::inventory::error::{sanitize_for_log, ApiError};
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Region for global services and region discovery
pub const HOME_REGION: &str = "us-east-1";

/// Decode an AWS error response.
///
/// Query services answer with `<Error><Code>..</Code><Message>..</Message>`,
/// JSON services with `{"__type": "...#Code", "message": ...}`, and REST
/// services put the code in the `x-amzn-ErrorType` header.
pub fn parse_aws_error(status: u16, body: &str, error_type: Option<&str>) -> ApiError {
    let header_code = error_type
        .and_then(|t| t.split(':').next())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string());

    let (code, message) = if body.trim_start().starts_with('<') {
        (xml_text(body, "Code"), xml_text(body, "Message"))
    } else if let Ok(value) = serde_json::from_str::<Value>(body) {
        let code = ["__type", "code", "Code"]
            .iter()
            .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
            .map(|s| s.rsplit('#').next().unwrap_or(s).to_string());
        let message = ["message", "Message", "errorMessage"]
            .iter()
            .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
            .map(|s| s.to_string());
        (code, message)
    } else {
        (None, None)
    };

    ApiError::new(
        "AWS",
        status,
        header_code.or(code).unwrap_or_else(|| status.to_string()),
        message.unwrap_or_else(|| sanitize_for_log(body)),
    )
}

/// Text of the first `<tag>` element
pub fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim().to_string())
}

/// Deserialize a Query protocol response body
pub fn from_xml<T: DeserializeOwned>(body: &str) -> Result<T> {
    quick_xml::de::from_str(body).context("Failed to parse AWS XML response")
}

#[derive(Clone)]
pub struct AwsClient {
    http: Client,
    /// Replaces every service endpoint, for local testing
    endpoint: Option<String>,
}

impl AwsClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("vcensus/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { http, endpoint: None })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    /// `https://{service}.{region}.amazonaws.com`
    pub fn service_url(&self, service: &str, region: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.{}.amazonaws.com", service, region),
        }
    }

    // ========================================================================
    // Protocols
    // ========================================================================

    /// Query protocol: signed form POST, raw XML back
    pub async fn query(
        &self,
        creds: &AwsCredentials,
        service: &str,
        region: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<String> {
        let url = format!("{}/", self.service_url(service, region));
        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        );
        self.send(creds, service, region, Method::POST, &url, headers, form_body(params))
            .await
    }

    /// JSON protocol: `X-Amz-Target` dispatch
    pub async fn json(
        &self,
        creds: &AwsCredentials,
        service: &str,
        region: &str,
        target: &str,
        body: &Value,
    ) -> Result<Value> {
        let url = format!("{}/", self.service_url(service, region));
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/x-amz-json-1.1".to_string());
        headers.insert("x-amz-target".to_string(), target.to_string());

        let text = self
            .send(creds, service, region, Method::POST, &url, headers, body.to_string())
            .await?;
        serde_json::from_str(&text).context("Failed to parse response JSON")
    }

    /// JSON protocol listing: follow `token_key` and collect `items_key`
    #[allow(clippy::too_many_arguments)]
    pub async fn json_all(
        &self,
        creds: &AwsCredentials,
        service: &str,
        region: &str,
        target: &str,
        mut body: Value,
        items_key: &str,
        token_key: &str,
    ) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            let page = self.json(creds, service, region, target, &body).await?;
            if let Some(arr) = page.get(items_key).and_then(|v| v.as_array()) {
                items.extend(arr.iter().cloned());
            }

            let next = page
                .get(token_key)
                .and_then(|v| v.as_str())
                .filter(|t| !t.is_empty() && body.get(token_key).and_then(|v| v.as_str()) != Some(t))
                .map(|t| t.to_string());
            match (next, body.as_object_mut()) {
                (Some(token), Some(fields)) => {
                    fields.insert(token_key.to_string(), Value::String(token));
                }
                _ => break,
            }
        }
        Ok(items)
    }

    /// REST protocol GET, JSON back. `path` includes any query string.
    pub async fn rest_get(&self, creds: &AwsCredentials, service: &str, region: &str, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.service_url(service, region), path);
        let text = self
            .send(creds, service, region, Method::GET, &url, BTreeMap::new(), String::new())
            .await?;
        serde_json::from_str(&text).context("Failed to parse response JSON")
    }

    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        creds: &AwsCredentials,
        service: &str,
        region: &str,
        method: Method,
        url: &str,
        mut headers: BTreeMap<String, String>,
        body: String,
    ) -> Result<String> {
        let parsed = url::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => anyhow::bail!("URL has no host: {}", url),
        };
        headers.insert("host".to_string(), host);

        let signed = SigV4Signer::new(creds, region, service).sign(method.as_str(), url, &headers, &body, Utc::now())?;

        tracing::debug!("{} {} ({})", method, url, service);
        let mut request = self.http.request(method, url);
        for (name, value) in signed.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await.context("Failed to send request")?;
        let status = response.status();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let text = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::debug!("AWS {} error: {} - {}", service, status, sanitize_for_log(&text));
            return Err(parse_aws_error(status.as_u16(), &text, error_type.as_deref()).into());
        }

        Ok(text)
    }
}

/// Common Query protocol parameters
pub fn query_params(action: &str, version: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("Action".to_string(), action.to_string());
    params.insert("Version".to_string(), version.to_string());
    params
}
