//! ECS: running Fargate tasks
//!
//! Tasks are listed per cluster and then described in batches; the task
//! `cpu` field is in CPU units.

use super::client::AwsClient;
use super::credentials::AwsCredentials;
use crate::inventory::model::{Capacity, InstanceState, ResourceClass, ResourceDescriptor};
use crate::inventory::provider::{ContainerInventory, TaskGroup};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

const SERVICE: &str = "ecs";
const TARGET_PREFIX: &str = "AmazonEC2ContainerServiceV20141113";

/// Maximum task ids per `DescribeTasks` call
pub const DESCRIBE_TASKS_LIMIT: usize = 100;

fn target(action: &str) -> String {
    format!("{}.{}", TARGET_PREFIX, action)
}

fn strings(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect()
}

pub async fn list_clusters(client: &AwsClient, creds: &AwsCredentials, region: &str) -> Result<Vec<String>> {
    let arns = client
        .json_all(
            creds,
            SERVICE,
            region,
            &target("ListClusters"),
            json!({ "maxResults": 100 }),
            "clusterArns",
            "nextToken",
        )
        .await?;
    Ok(strings(arns))
}

/// Running Fargate task ARNs of one cluster
pub async fn list_tasks(
    client: &AwsClient,
    creds: &AwsCredentials,
    region: &str,
    cluster: &str,
) -> Result<Vec<String>> {
    let arns = client
        .json_all(
            creds,
            SERVICE,
            region,
            &target("ListTasks"),
            json!({
                "cluster": cluster,
                "desiredStatus": "RUNNING",
                "launchType": "FARGATE",
                "maxResults": 100
            }),
            "taskArns",
            "nextToken",
        )
        .await?;
    Ok(strings(arns))
}

/// Every cluster in the region, with its running task ids
pub async fn list_container_tasks(
    client: &AwsClient,
    creds: &AwsCredentials,
    region: &str,
) -> Result<ContainerInventory> {
    let clusters = list_clusters(client, creds, region).await?;
    let mut inventory = ContainerInventory {
        clusters: clusters.len() as u64,
        groups: Vec::new(),
    };

    for cluster in clusters {
        let task_ids = list_tasks(client, creds, region, &cluster).await?;
        if !task_ids.is_empty() {
            inventory.groups.push(TaskGroup { cluster, task_ids });
        }
    }
    Ok(inventory)
}

#[derive(Debug, Deserialize)]
struct DescribeTasksResponse {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    failures: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_arn: String,
    /// CPU units as a string, e.g. `"512"`
    pub cpu: Option<String>,
    pub last_status: Option<String>,
    pub availability_zone: Option<String>,
}

pub fn task_state(last_status: Option<&str>) -> InstanceState {
    match last_status {
        Some("RUNNING") => InstanceState::Running,
        // Not yet, or no longer, consuming capacity
        Some(
            "PROVISIONING" | "PENDING" | "ACTIVATING" | "DEACTIVATING" | "STOPPING" | "DEPROVISIONING"
            | "STOPPED" | "DELETED",
        ) => InstanceState::Stopped,
        _ => InstanceState::Unknown,
    }
}

impl Task {
    /// A task without a readable `cpu` is counted with no capacity and
    /// flagged unresolved
    pub fn into_descriptor(self, account_id: &str, region: &str) -> ResourceDescriptor {
        let units = self.cpu.as_deref().and_then(|c| c.trim().parse::<u32>().ok());
        if units.is_none() {
            tracing::debug!("Task {} has no usable cpu value ({:?})", self.task_arn, self.cpu);
        }
        let mut descriptor = ResourceDescriptor::new(
            self.task_arn,
            account_id,
            ResourceClass::ContainerTask,
            Capacity::CpuUnits(units.unwrap_or(0)),
            region,
            task_state(self.last_status.as_deref()),
        );
        descriptor.unresolved = units.is_none();
        match self.availability_zone {
            Some(zone) => descriptor.with_zone(zone),
            None => descriptor,
        }
    }
}

/// Describe at most [`DESCRIBE_TASKS_LIMIT`] tasks of one cluster
pub async fn describe_tasks(
    client: &AwsClient,
    creds: &AwsCredentials,
    account_id: &str,
    region: &str,
    cluster: &str,
    task_ids: &[String],
) -> Result<Vec<ResourceDescriptor>> {
    let response = client
        .json(
            creds,
            SERVICE,
            region,
            &target("DescribeTasks"),
            &json!({ "cluster": cluster, "tasks": task_ids }),
        )
        .await?;
    let response: DescribeTasksResponse =
        serde_json::from_value(response).context("Failed to parse DescribeTasks response")?;

    if !response.failures.is_empty() {
        // Tasks that stopped between listing and describing
        tracing::debug!("{}: {} tasks could not be described", cluster, response.failures.len());
    }

    Ok(response
        .tasks
        .into_iter()
        .map(|t| t.into_descriptor(account_id, region))
        .collect())
}
