//! Integration tests for the AWS provider using wiremock
//!
//! Every service endpoint points at one mock server. Query protocol calls
//! are told apart by their form body, JSON protocol calls by `X-Amz-Target`.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vcensus::aws::client::AwsClient;
use vcensus::aws::{AwsCredentials, AwsProvider};
use vcensus::inventory::model::ResourceClass;
use vcensus::inventory::retry::RetryPolicy;
use vcensus::inventory::{run_scan, ScanOptions, Scope, ScopeRequest, ScopeStatus};
use wiremock::matchers::{body_partial_json, body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CALLER: &str = "111122223333";
const ECS_TARGET: &str = "AmazonEC2ContainerServiceV20141113";

fn client(server: &MockServer) -> AwsClient {
    AwsClient::new(Duration::from_secs(5))
        .expect("client should build")
        .with_endpoint(&server.uri())
}

fn credentials() -> AwsCredentials {
    AwsCredentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY", None)
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

fn xml(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/xml")
}

async fn mount_query(server: &MockServer, action: &str, body: &str) {
    Mock::given(method("POST"))
        .and(body_string_contains(format!("Action={}", action)))
        .respond_with(xml(body))
        .mount(server)
        .await;
}

async fn mount_caller_identity(server: &MockServer) {
    mount_query(
        server,
        "GetCallerIdentity",
        &format!(
            r#"<GetCallerIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <GetCallerIdentityResult>
    <Arn>arn:aws:iam::{0}:user/audit</Arn>
    <UserId>AIDAEXAMPLE</UserId>
    <Account>{0}</Account>
  </GetCallerIdentityResult>
  <ResponseMetadata><RequestId>01234567-89ab-cdef-0123-456789abcdef</RequestId></ResponseMetadata>
</GetCallerIdentityResponse>"#,
            CALLER
        ),
    )
    .await;
}

fn instance(id: &str, instance_type: &str) -> String {
    format!(
        "<item><instanceId>{}</instanceId><instanceState><code>16</code><name>running</name></instanceState><instanceType>{}</instanceType><placement><availabilityZone>eu-west-1a</availabilityZone></placement></item>",
        id, instance_type
    )
}

fn instances_page(items: &[String], next_token: Option<&str>) -> String {
    format!(
        r#"<DescribeInstancesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
  <requestId>req</requestId>
  <reservationSet><item><reservationId>r-1</reservationId><instancesSet>{}</instancesSet></item></reservationSet>
  {}
</DescribeInstancesResponse>"#,
        items.concat(),
        next_token
            .map(|t| format!("<nextToken>{}</nextToken>", t))
            .unwrap_or_default()
    )
}

fn instance_type(name: &str, cores: u32, threads: u32) -> String {
    format!(
        r#"<DescribeInstanceTypesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
  <instanceTypeSet><item>
    <instanceType>{}</instanceType>
    <vCpuInfo><defaultVCpus>{}</defaultVCpus><defaultCores>{}</defaultCores><defaultThreadsPerCore>{}</defaultThreadsPerCore></vCpuInfo>
  </item></instanceTypeSet>
</DescribeInstanceTypesResponse>"#,
        name,
        cores * threads,
        cores,
        threads
    )
}

/// Tests for the signed client
mod client_tests {
    use super::*;

    /// Test JSON protocol listings stop when the token repeats
    #[tokio::test]
    async fn test_json_all_stops_on_repeated_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-amz-target", format!("{}.ListClusters", ECS_TARGET).as_str()))
            .and(header("content-type", "application/x-amz-json-1.1"))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clusterArns": ["arn:aws:ecs:eu-west-1:111122223333:cluster/web"],
                "nextToken": "same"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let items = client(&server)
            .json_all(
                &credentials(),
                "ecs",
                "eu-west-1",
                &format!("{}.ListClusters", ECS_TARGET),
                json!({}),
                "clusterArns",
                "nextToken",
            )
            .await
            .expect("listing should succeed");

        assert_eq!(items.len(), 2);
    }

    /// Test Query protocol errors are decoded from the XML body
    #[tokio::test]
    async fn test_query_error_is_decoded() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_raw(
                r#"<Response><Errors><Error><Code>UnauthorizedOperation</Code><Message>You are not authorized to perform this operation.</Message></Error></Errors><RequestID>req</RequestID></Response>"#,
                "text/xml",
            ))
            .mount(&server)
            .await;

        let err = vcensus::aws::ec2::describe_regions(&client(&server), &credentials())
            .await
            .expect_err("403 should fail");

        let api = err
            .downcast_ref::<vcensus::inventory::ApiError>()
            .expect("should be an ApiError");
        assert_eq!(api.status, 403);
        assert_eq!(api.code, "UnauthorizedOperation");
    }

    /// Test an unknown instance type is a miss, not an error
    #[tokio::test]
    async fn test_invalid_instance_type_is_a_miss() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_string_contains("Action=DescribeInstanceTypes"))
            .respond_with(ResponseTemplate::new(400).set_body_raw(
                r#"<Response><Errors><Error><Code>InvalidInstanceType</Code><Message>The following supplied instance types do not exist: [x9.huge]</Message></Error></Errors></Response>"#,
                "text/xml",
            ))
            .mount(&server)
            .await;

        let vcpus = vcensus::aws::ec2::instance_type_vcpus(&client(&server), &credentials(), "eu-west-1", "x9.huge")
            .await
            .expect("lookup should not fail");
        assert_eq!(vcpus, None);
    }
}

/// Tests driving a whole scan through the provider
mod scan_tests {
    use super::*;

    /// Test the caller's own account: EC2 pages, Fargate tasks and Lambda
    #[tokio::test]
    async fn test_account_scan() {
        let server = MockServer::start().await;
        mount_caller_identity(&server).await;

        mount_query(
            &server,
            "DescribeRegions",
            r#"<DescribeRegionsResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
  <requestId>req</requestId>
  <regionInfo><item><regionName>eu-west-1</regionName><regionEndpoint>ec2.eu-west-1.amazonaws.com</regionEndpoint></item></regionInfo>
</DescribeRegionsResponse>"#,
        )
        .await;

        // Second page first, so it wins over the unconditional first-page mock
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DescribeInstances"))
            .and(body_string_contains("NextToken=page-2"))
            .respond_with(xml(&instances_page(&[instance("i-2", "m5.xlarge"), instance("i-3", "t3.micro")], None)))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        mount_query(&server, "DescribeInstances", &instances_page(&[instance("i-1", "m5.xlarge")], Some("page-2"))).await;

        Mock::given(method("POST"))
            .and(body_string_contains("InstanceType.1=m5.xlarge"))
            .respond_with(xml(&instance_type("m5.xlarge", 2, 2)))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("InstanceType.1=t3.micro"))
            .respond_with(xml(&instance_type("t3.micro", 1, 2)))
            .with_priority(1)
            .mount(&server)
            .await;

        let web = "arn:aws:ecs:eu-west-1:111122223333:cluster/web";
        let idle = "arn:aws:ecs:eu-west-1:111122223333:cluster/idle";
        Mock::given(method("POST"))
            .and(header("x-amz-target", format!("{}.ListClusters", ECS_TARGET).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"clusterArns": [web, idle]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", format!("{}.ListTasks", ECS_TARGET).as_str()))
            .and(body_partial_json(json!({"cluster": web, "launchType": "FARGATE"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"taskArns": ["t-1", "t-2", "t-3"]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", format!("{}.ListTasks", ECS_TARGET).as_str()))
            .and(body_partial_json(json!({"cluster": idle})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"taskArns": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", format!("{}.DescribeTasks", ECS_TARGET).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tasks": [
                    {"taskArn": "t-1", "cpu": "512", "lastStatus": "RUNNING"},
                    {"taskArn": "t-2", "cpu": "512", "lastStatus": "RUNNING"},
                    {"taskArn": "t-3", "cpu": "1024", "lastStatus": "RUNNING"}
                ],
                "failures": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/2015-03-31/functions/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Functions": [{"FunctionName": "resize", "FunctionArn": "arn:aws:lambda:eu-west-1:111122223333:function:resize"}],
                "NextMarker": null
            })))
            .mount(&server)
            .await;

        let provider = Arc::new(AwsProvider::new(client(&server), credentials(), "OrganizationAccountAccessRole"));
        let report = run_scan(
            provider,
            ScopeRequest::Roots(vec![Scope::terminal(CALLER)]),
            &options(),
            CancellationToken::new(),
        )
        .await;

        let row = &report.rows[0];
        assert_eq!(row.status, ScopeStatus::Ok);

        let vms = row.tally.class(ResourceClass::Vm);
        assert_eq!((vms.count, vms.vcpus), (3, 10));
        let tasks = row.tally.class(ResourceClass::ContainerTask);
        assert_eq!((tasks.count, tasks.cpu_units, tasks.vcpus), (3, 2048, 2));
        assert_eq!(row.tally.container_clusters, 2);
        assert_eq!(row.tally.class(ResourceClass::ServerlessFunction).count, 1);
        assert_eq!(row.tally.vcpus(), 12);
    }

    /// Test a member account whose role cannot be assumed
    #[tokio::test]
    async fn test_assume_role_denied() {
        let server = MockServer::start().await;
        mount_caller_identity(&server).await;

        Mock::given(method("POST"))
            .and(body_string_contains("Action=AssumeRole"))
            .and(body_string_contains("444455556666"))
            .respond_with(ResponseTemplate::new(403).set_body_raw(
                r#"<ErrorResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/"><Error><Type>Sender</Type><Code>AccessDenied</Code><Message>not authorized to perform: sts:AssumeRole</Message></Error></ErrorResponse>"#,
                "text/xml",
            ))
            .mount(&server)
            .await;

        let provider = Arc::new(AwsProvider::new(client(&server), credentials(), "OrganizationAccountAccessRole"));
        let report = run_scan(
            provider,
            ScopeRequest::Roots(vec![Scope::terminal("444455556666")]),
            &options(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(report.rows[0].status, ScopeStatus::Failed("permission denied".into()));
        assert!(report.total().status.is_failed());
    }
}
