//! Configuration Management
//!
//! Optional JSON file with scan tuning defaults. Every field may be left
//! out; command line flags take precedence over file values.

use crate::aws::provider::DEFAULT_ROLE_NAME;
use crate::inventory::enumerator::DEFAULT_MAX_SCOPE_DEPTH;
use crate::inventory::retry::RetryPolicy;
use crate::inventory::scan::{ScanOptions, DEFAULT_MAX_CONCURRENCY};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Bound on concurrent provider calls
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Attempts per call, including the first
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub initial_backoff_ms: Option<u64>,
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
    #[serde(default)]
    pub max_scope_depth: Option<usize>,
    /// Role assumed in AWS member accounts
    #[serde(default)]
    pub aws_role_name: Option<String>,
    /// Region allow-list
    #[serde(default)]
    pub regions: Option<Vec<String>>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vcensus").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::warn!("Could not read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse file contents; a malformed file counts as empty
    pub fn parse(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed config file: {}", e);
            Self::default()
        })
    }

    /// Get effective concurrency (CLI > config > default)
    pub fn effective_concurrency(&self, cli: Option<usize>) -> usize {
        cli.or(self.max_concurrency)
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
            .max(1)
    }

    /// Get effective AWS role name (CLI > config > default)
    pub fn effective_role_name(&self, cli: Option<&str>) -> String {
        cli.map(|s| s.to_string())
            .or_else(|| self.aws_role_name.clone())
            .unwrap_or_else(|| DEFAULT_ROLE_NAME.to_string())
    }

    /// Get effective region allow-list (CLI > config > every region)
    pub fn effective_regions(&self, cli: &[String]) -> Option<Vec<String>> {
        if !cli.is_empty() {
            return Some(cli.to_vec());
        }
        self.regions.clone().filter(|r| !r.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let default = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(default.max_attempts).max(1),
            initial_backoff: self
                .initial_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(default.initial_backoff),
            max_backoff: self
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(default.max_backoff),
        }
    }

    pub fn scan_options(&self, concurrency: Option<usize>, regions: &[String]) -> ScanOptions {
        ScanOptions {
            max_concurrency: self.effective_concurrency(concurrency),
            retry: self.retry_policy(),
            max_scope_depth: self.max_scope_depth.unwrap_or(DEFAULT_MAX_SCOPE_DEPTH),
            regions: self.effective_regions(regions),
        }
    }
}
