//! Azure Authentication
//!
//! Bearer tokens for Azure Resource Manager, from a service principal
//! (client-credentials grant) or from the Azure CLI's cached login.

use crate::inventory::error::{sanitize_for_log, SetupError};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Scope requested for management-plane tokens
pub const ARM_SCOPE: &str = "https://management.azure.com/.default";

const ARM_RESOURCE: &str = "https://management.azure.com/";
const LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";

/// Refresh tokens this long before they expire
const TOKEN_EXPIRY_BUFFER_SECS: i64 = 60;

/// TTL assumed when the token source does not report one
const DEFAULT_TOKEN_TTL_SECS: i64 = 30 * 60;

#[derive(Clone)]
enum TokenSource {
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    /// `az account get-access-token`
    Cli,
    Static(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    /// Epoch seconds; only reported by newer CLI versions
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn new(token: String, expires_at: Option<DateTime<Utc>>) -> Self {
        let expires_at = expires_at.unwrap_or_else(|| Utc::now() + Duration::seconds(DEFAULT_TOKEN_TTL_SECS));
        Self { token, expires_at }
    }

    fn is_valid(&self) -> bool {
        Utc::now() + Duration::seconds(TOKEN_EXPIRY_BUFFER_SECS) < self.expires_at
    }
}

/// Azure credentials holder with token caching
#[derive(Clone)]
pub struct AzureCredentials {
    source: TokenSource,
    http: reqwest::Client,
    login_endpoint: String,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

impl AzureCredentials {
    fn with_source(source: TokenSource) -> Self {
        Self {
            source,
            http: reqwest::Client::new(),
            login_endpoint: LOGIN_ENDPOINT.to_string(),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Service principal from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
    /// `AZURE_CLIENT_SECRET`, falling back to the Azure CLI login
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        match (var("AZURE_TENANT_ID"), var("AZURE_CLIENT_ID"), var("AZURE_CLIENT_SECRET")) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => {
                tracing::info!("Using Azure service principal {}", client_id);
                Self::service_principal(tenant_id, client_id, client_secret)
            }
            _ => {
                tracing::info!("Using Azure CLI credentials");
                Self::with_source(TokenSource::Cli)
            }
        }
    }

    pub fn service_principal(tenant_id: String, client_id: String, client_secret: String) -> Self {
        Self::with_source(TokenSource::ClientSecret {
            tenant_id,
            client_id,
            client_secret,
        })
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self::with_source(TokenSource::Static(token.into()))
    }

    /// Point the client-credentials flow at a different login host
    pub fn with_login_endpoint(mut self, endpoint: &str) -> Self {
        self.login_endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Get an access token, reusing the cached one while it is valid
    pub async fn get_token(&self) -> Result<String> {
        if let TokenSource::Static(token) = &self.source {
            return Ok(token.clone());
        }

        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.is_valid()) {
                return Ok(cached.token.clone());
            }
        }

        let fresh = match &self.source {
            TokenSource::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            } => self.client_credentials_token(tenant_id, client_id, client_secret).await?,
            TokenSource::Cli => cli_token().await?,
            TokenSource::Static(token) => CachedToken::new(token.clone(), None),
        };

        let token = fresh.token.clone();
        *self.token_cache.write().await = Some(fresh);
        tracing::debug!("New Azure token cached");
        Ok(token)
    }

    async fn client_credentials_token(
        &self,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<CachedToken> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.login_endpoint, tenant_id);
        tracing::debug!("POST {}", url);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", ARM_SCOPE),
        ];

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .context("Failed to send token request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SetupError::NoCredentials {
                provider: "Azure",
                reason: format!(
                    "token request failed ({}): {}",
                    status,
                    sanitize_for_log(&body)
                ),
            }
            .into());
        }

        let parsed: TokenResponse = response.json().await.context("Failed to parse token response")?;
        let expires_at = parsed.expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
        Ok(CachedToken::new(parsed.access_token, expires_at))
    }
}

async fn cli_token() -> Result<CachedToken> {
    let output = tokio::process::Command::new("az")
        .args([
            "account",
            "get-access-token",
            "--resource",
            ARM_RESOURCE,
            "--output",
            "json",
        ])
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => anyhow::Error::new(SetupError::ToolUnavailable("az".into())),
            _ => anyhow::Error::new(e).context("Failed to run az"),
        })?;

    if !output.status.success() {
        return Err(SetupError::NoCredentials {
            provider: "Azure",
            reason: format!(
                "az account get-access-token failed: {}. Run 'az login'",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
        .into());
    }

    parse_cli_token(&output.stdout)
}

fn parse_cli_token(stdout: &[u8]) -> Result<CachedToken> {
    let parsed: CliToken = serde_json::from_slice(stdout).context("Failed to parse az token output")?;
    let expires_at = parsed.expires_on.and_then(|secs| DateTime::from_timestamp(secs, 0));
    Ok(CachedToken::new(parsed.access_token, expires_at))
}
