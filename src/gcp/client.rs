//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication
//! and HTTP functionality.

use super::auth::GcpCredentials;
use super::http::GcpHttpClient;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

const COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com";
const RESOURCE_MANAGER_ENDPOINT: &str = "https://cloudresourcemanager.googleapis.com";

/// Per-zone warning code meaning the zone simply has nothing to list
const NO_RESULTS_ON_PAGE: &str = "NO_RESULTS_ON_PAGE";

/// Items of an aggregated list, plus the locations the API could not read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedList {
    pub items: Vec<Value>,
    pub unreachable: Vec<String>,
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    compute_endpoint: String,
    resource_manager_endpoint: String,
}

impl GcpClient {
    pub fn new(credentials: GcpCredentials, timeout: Duration) -> Result<Self> {
        Ok(Self {
            credentials,
            http: GcpHttpClient::new(timeout)?,
            compute_endpoint: COMPUTE_ENDPOINT.to_string(),
            resource_manager_endpoint: RESOURCE_MANAGER_ENDPOINT.to_string(),
        })
    }

    /// Send every API call to one base URL (used against mock servers)
    pub fn with_endpoint(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.compute_endpoint = base.to_string();
        self.resource_manager_endpoint = base.to_string();
        self
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.credentials.get_token().await?;
        self.http.get(url, &token).await
    }

    /// Fetch every page of a list call, collecting the array under `items_key`
    pub async fn get_all(&self, url: &str, items_key: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        for page in self.pages(url).await? {
            if let Some(arr) = page.get(items_key).and_then(|v| v.as_array()) {
                items.extend(arr.iter().cloned());
            }
        }
        Ok(items)
    }

    /// Fetch every page of an aggregated list call and flatten the per-zone maps.
    ///
    /// With `returnPartialSuccess=true` a page can skip zones; those are
    /// returned in `unreachable` rather than dropped.
    pub async fn get_aggregated(&self, url: &str) -> Result<AggregatedList> {
        let mut items = Vec::new();
        let mut unreachable = BTreeSet::new();
        for page in self.pages(url).await? {
            items.extend(flatten_aggregated_response(&page));
            unreachable.extend(unreachable_locations(&page));
        }
        Ok(AggregatedList {
            items,
            unreachable: unreachable.into_iter().collect(),
        })
    }

    async fn pages(&self, url: &str) -> Result<Vec<Value>> {
        let mut pages = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut page_url = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
            if let Some(token) = &page_token {
                page_url.query_pairs_mut().append_pair("pageToken", token);
            }

            let page = self.get(page_url.as_str()).await?;
            page_token = page
                .get("nextPageToken")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());
            pages.push(page);

            if page_token.is_none() {
                break;
            }
        }

        Ok(pages)
    }

    // =========================================================================
    // Compute Engine API helpers
    // =========================================================================

    /// Build Compute Engine API URL
    pub fn compute_url(&self, project: &str, path: &str) -> String {
        format!(
            "{}/compute/v1/projects/{}/{}",
            self.compute_endpoint,
            urlencoding::encode(project),
            path
        )
    }

    /// Build zonal Compute Engine API URL
    pub fn compute_zonal_url(&self, project: &str, zone: &str, resource: &str) -> String {
        self.compute_url(project, &format!("zones/{}/{}", urlencoding::encode(zone), resource))
    }

    /// Build aggregated Compute Engine API URL (all zones)
    pub fn compute_aggregated_url(&self, project: &str, resource: &str) -> String {
        self.compute_url(project, &format!("aggregated/{}", resource))
    }

    // =========================================================================
    // Resource Manager API helpers
    // =========================================================================

    /// Resource Manager v1 (flat project listing)
    pub fn resourcemanager_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.resource_manager_endpoint, path)
    }

    /// Resource Manager v3 (folder hierarchy)
    pub fn resourcemanager_v3_url(&self, path: &str) -> String {
        format!("{}/v3/{}", self.resource_manager_endpoint, path)
    }
}

/// Get the region from a zone name
pub fn zone_to_region(zone: &str) -> String {
    let parts: Vec<&str> = zone.rsplitn(2, '-').collect();
    if parts.len() == 2 {
        parts[1].to_string()
    } else {
        zone.to_string()
    }
}

/// Last path segment of a resource URL
pub fn short_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Flatten an aggregated list response (`items` keyed by `zones/<zone>`)
/// into a single list, skipping per-zone warnings
pub fn flatten_aggregated_response(response: &Value) -> Vec<Value> {
    let Some(items) = response.get("items").and_then(|v| v.as_object()) else {
        return Vec::new();
    };

    let mut all_items = Vec::new();
    for (_zone_key, zone_data) in items {
        if let Some(obj) = zone_data.as_object() {
            for (key, value) in obj {
                if key == "warning" {
                    continue;
                }
                if let Some(arr) = value.as_array() {
                    all_items.extend(arr.iter().cloned());
                }
            }
        }
    }
    all_items
}

/// Locations an aggregated response skipped: the top-level `unreachables`
/// list, and zones whose warning is anything but an empty page
pub fn unreachable_locations(response: &Value) -> Vec<String> {
    let mut locations: Vec<String> = response
        .get("unreachables")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
        .unwrap_or_default();

    if let Some(items) = response.get("items").and_then(|v| v.as_object()) {
        for (zone_key, zone_data) in items {
            let code = zone_data.pointer("/warning/code").and_then(|v| v.as_str());
            if code.is_some_and(|c| c != NO_RESULTS_ON_PAGE) {
                locations.push(zone_key.clone());
            }
        }
    }
    locations
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zone_to_region() {
        assert_eq!(zone_to_region("us-central1-a"), "us-central1");
        assert_eq!(zone_to_region("europe-west4-b"), "europe-west4");
        assert_eq!(zone_to_region("global"), "global");
    }

    #[test]
    fn test_short_name() {
        assert_eq!(
            short_name("https://www.googleapis.com/compute/v1/projects/p/zones/us-east1-b/machineTypes/e2-medium"),
            "e2-medium"
        );
        assert_eq!(short_name("e2-medium"), "e2-medium");
    }

    #[test]
    fn test_flatten_skips_warnings() {
        let response = json!({
            "items": {
                "zones/us-central1-a": {"instances": [{"name": "a"}, {"name": "b"}]},
                "zones/us-east1-b": {"warning": {"code": "NO_RESULTS_ON_PAGE"}},
                "zones/europe-west1-c": {"instances": [{"name": "c"}]}
            }
        });
        let items = flatten_aggregated_response(&response);
        assert_eq!(items.len(), 3);
        assert!(flatten_aggregated_response(&json!({})).is_empty());
        assert!(unreachable_locations(&response).is_empty());
    }

    #[test]
    fn test_unreachable_locations() {
        let response = json!({
            "items": {
                "zones/us-central1-a": {"instances": [{"name": "a"}]},
                "zones/us-east1-b": {"warning": {"code": "NO_RESULTS_ON_PAGE"}},
                "zones/asia-east1-a": {"warning": {"code": "UNREACHABLE", "message": "zone unavailable"}}
            },
            "unreachables": ["zones/europe-west9-c"]
        });
        assert_eq!(
            unreachable_locations(&response),
            vec!["zones/europe-west9-c".to_string(), "zones/asia-east1-a".to_string()]
        );
        assert_eq!(flatten_aggregated_response(&response).len(), 1);
    }

    #[test]
    fn test_url_builders() {
        let client = GcpClient::new(GcpCredentials::from_token("t"), Duration::from_secs(5))
            .unwrap()
            .with_endpoint("http://localhost:9/");
        assert_eq!(
            client.compute_zonal_url("proj-a", "us-central1-a", "machineTypes/n1-standard-4"),
            "http://localhost:9/compute/v1/projects/proj-a/zones/us-central1-a/machineTypes/n1-standard-4"
        );
        assert_eq!(client.resourcemanager_v3_url("folders"), "http://localhost:9/v3/folders");
    }
}
