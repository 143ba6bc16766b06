//! Integration tests for the GCP provider using wiremock
//!
//! A mock Compute Engine and Resource Manager serve the calls a scan makes;
//! the tests check pagination, aggregated flattening, machine type lookups
//! and error decoding end to end.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vcensus::gcp::auth::GcpCredentials;
use vcensus::gcp::client::GcpClient;
use vcensus::gcp::GcpProvider;
use vcensus::inventory::retry::RetryPolicy;
use vcensus::inventory::{run_scan, ScanOptions, Scope, ScopeRequest, ScopeStatus};
use wiremock::matchers::{bearer_token, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INSTANCES_PATH: &str = "/compute/v1/projects/proj-a/aggregated/instances";

fn client(server: &MockServer) -> GcpClient {
    GcpClient::new(GcpCredentials::from_token("test-token"), Duration::from_secs(5))
        .expect("client should build")
        .with_endpoint(&server.uri())
}

fn options() -> ScanOptions {
    ScanOptions {
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
        ..ScanOptions::default()
    }
}

/// Tests for the low-level client
mod client_tests {
    use super::*;

    /// Test aggregated pages are followed and zone maps flattened
    #[tokio::test]
    async fn test_aggregated_pagination() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(INSTANCES_PATH))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": {
                    "zones/europe-west1-b": {
                        "instances": [{"name": "vm-3", "zone": "zones/europe-west1-b", "machineType": "zones/europe-west1-b/machineTypes/e2-small", "status": "RUNNING"}]
                    }
                }
            })))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(INSTANCES_PATH))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": {
                    "zones/us-central1-a": {
                        "instances": [
                            {"name": "vm-1", "status": "RUNNING"},
                            {"name": "vm-2", "status": "RUNNING"}
                        ]
                    },
                    "zones/us-east1-b": {
                        "warning": {"code": "NO_RESULTS_ON_PAGE", "message": "There are no results"}
                    }
                },
                "nextPageToken": "page-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let list = client
            .get_aggregated(&client.compute_aggregated_url("proj-a", "instances"))
            .await
            .expect("listing should succeed");

        let mut names: Vec<&str> = list.items.iter().filter_map(|i| i["name"].as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["vm-1", "vm-2", "vm-3"]);
        assert!(list.unreachable.is_empty());
    }

    /// Test Google error bodies are decoded into the most specific reason
    #[tokio::test]
    async fn test_error_reason_is_decoded() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(INSTANCES_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {
                    "code": 403,
                    "message": "Compute Engine API has not been used in project 123 before or it is disabled.",
                    "status": "PERMISSION_DENIED",
                    "details": [{
                        "@type": "type.googleapis.com/google.rpc.ErrorInfo",
                        "reason": "SERVICE_DISABLED"
                    }]
                }
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client
            .get(&client.compute_aggregated_url("proj-a", "instances"))
            .await
            .expect_err("403 should fail");

        let api = err
            .downcast_ref::<vcensus::inventory::ApiError>()
            .expect("should be an ApiError");
        assert_eq!(api.status, 403);
        assert_eq!(api.code, "SERVICE_DISABLED");
    }
}

/// Tests driving a whole scan through the provider
mod scan_tests {
    use super::*;

    /// Test one project: running VMs counted, machine type looked up once
    #[tokio::test]
    async fn test_project_scan() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(INSTANCES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": {
                    "zones/us-central1-a": {
                        "instances": [
                            {"name": "web-1", "zone": "https://compute.googleapis.com/compute/v1/projects/proj-a/zones/us-central1-a", "machineType": "https://compute.googleapis.com/compute/v1/projects/proj-a/zones/us-central1-a/machineTypes/n1-standard-4", "status": "RUNNING"},
                            {"name": "web-2", "zone": "https://compute.googleapis.com/compute/v1/projects/proj-a/zones/us-central1-a", "machineType": "https://compute.googleapis.com/compute/v1/projects/proj-a/zones/us-central1-a/machineTypes/n1-standard-4", "status": "RUNNING"},
                            {"name": "batch", "zone": "https://compute.googleapis.com/compute/v1/projects/proj-a/zones/us-central1-a", "machineType": "https://compute.googleapis.com/compute/v1/projects/proj-a/zones/us-central1-a/machineTypes/n2-custom-6-8192", "status": "RUNNING"}
                        ]
                    }
                }
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/projects/proj-a/zones/us-central1-a/machineTypes/n1-standard-4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "n1-standard-4", "guestCpus": 4})))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(GcpProvider::new(client(&server)));
        let report = run_scan(
            provider,
            ScopeRequest::Roots(vec![Scope::terminal("proj-a")]),
            &options(),
            CancellationToken::new(),
        )
        .await;

        let row = &report.rows[0];
        assert_eq!(row.status, ScopeStatus::Ok);
        assert_eq!(row.tally.instances(), 3);
        // 2 × 4 looked up, 6 parsed from the custom type name
        assert_eq!(row.tally.vcpus(), 14);
    }

    /// Test an unreachable zone leaves the project partial instead of ok
    #[tokio::test]
    async fn test_unreachable_zone_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(INSTANCES_PATH))
            .and(query_param("returnPartialSuccess", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": {
                    "zones/us-central1-a": {
                        "instances": [
                            {"name": "web-1", "zone": "https://compute.googleapis.com/compute/v1/projects/proj-a/zones/us-central1-a", "machineType": "https://compute.googleapis.com/compute/v1/projects/proj-a/zones/us-central1-a/machineTypes/custom-4-16384", "status": "RUNNING"}
                        ]
                    },
                    "zones/europe-west1-b": {
                        "warning": {"code": "UNREACHABLE", "message": "The zone is unreachable"}
                    }
                },
                "unreachables": ["zones/asia-east1-a"]
            })))
            .mount(&server)
            .await;

        let provider = Arc::new(GcpProvider::new(client(&server)));
        let report = run_scan(
            provider,
            ScopeRequest::Roots(vec![Scope::terminal("proj-a")]),
            &options(),
            CancellationToken::new(),
        )
        .await;

        let row = &report.rows[0];
        assert!(matches!(row.status, ScopeStatus::PartiallyFailed(_)), "got {:?}", row.status);
        assert_eq!(row.tally.vcpus(), 4);
        assert_eq!(row.diagnostics.len(), 1);
        assert!(row.diagnostics[0].detail.contains("could not be reached"), "{}", row.diagnostics[0].detail);
        assert!(row.diagnostics[0].detail.contains("(and 1 more)"), "{}", row.diagnostics[0].detail);
    }

    /// Test a disabled Compute API marks the project failed with its kind
    #[tokio::test]
    async fn test_disabled_api_is_classified() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(INSTANCES_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {
                    "code": 403,
                    "message": "Compute Engine API has not been used in project proj-a before or it is disabled.",
                    "errors": [{"reason": "accessNotConfigured"}]
                }
            })))
            .mount(&server)
            .await;

        let provider = Arc::new(GcpProvider::new(client(&server)));
        let report = run_scan(
            provider,
            ScopeRequest::Roots(vec![Scope::terminal("proj-a")]),
            &options(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(report.rows[0].status, ScopeStatus::Failed("API disabled".into()));
        assert_eq!(report.total().tally.vcpus(), 0);
    }

    /// Test organization → folder → project discovery
    #[tokio::test]
    async fn test_hierarchy_discovery() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/folders"))
            .and(query_param("parent", "organizations/123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "folders": [
                    {"name": "folders/456", "displayName": "Engineering", "state": "ACTIVE"},
                    {"name": "folders/789", "displayName": "Old", "state": "DELETE_REQUESTED"}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v3/folders"))
            .and(query_param("parent", "folders/456"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v3/projects"))
            .and(query_param("parent", "folders/456"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "projects": [{"projectId": "proj-a", "displayName": "A", "state": "ACTIVE"}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v3/projects"))
            .and(query_param("parent", "organizations/123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "projects": [{"projectId": "proj-gone", "state": "DELETE_REQUESTED"}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(INSTANCES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": {}})))
            .mount(&server)
            .await;

        let provider = Arc::new(GcpProvider::new(client(&server)));
        let report = run_scan(
            provider,
            ScopeRequest::Roots(vec![Scope::organization("123")]),
            &options(),
            CancellationToken::new(),
        )
        .await;

        let ids: Vec<&str> = report.rows.iter().map(|r| r.scope.id.as_str()).collect();
        assert_eq!(ids, vec!["proj-a"]);
        assert_eq!(report.total().status, ScopeStatus::Ok);

        let org = &report.tree.children[0];
        assert_eq!(org.children.len(), 1);
        assert_eq!(org.children[0].result.scope.name.as_deref(), Some("Engineering"));
    }
}
