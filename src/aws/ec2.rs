//! EC2: regions, running instances and instance type sizes

use super::client::{from_xml, query_params, AwsClient, HOME_REGION};
use super::credentials::AwsCredentials;
use crate::inventory::error::ApiError;
use crate::inventory::model::{Capacity, InstanceState, ResourceClass, ResourceDescriptor, SkuKey};
use anyhow::Result;
use serde::Deserialize;

const SERVICE: &str = "ec2";
const API_VERSION: &str = "2016-11-15";
const MAX_RESULTS: u32 = 1000;

/// EC2 wraps every list in `<xxxSet><item>...</item></xxxSet>`
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ItemSet<T> {
    #[serde(default, rename = "item")]
    pub items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

// ============================================================================
// Regions
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeRegionsResponse {
    #[serde(default)]
    region_info: ItemSet<RegionItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegionItem {
    region_name: String,
}

/// Regions enabled for the account
pub async fn describe_regions(client: &AwsClient, creds: &AwsCredentials) -> Result<Vec<String>> {
    let params = query_params("DescribeRegions", API_VERSION);
    let body = client.query(creds, SERVICE, HOME_REGION, &params).await?;
    let response: DescribeRegionsResponse = from_xml(&body)?;
    Ok(response
        .region_info
        .items
        .into_iter()
        .map(|r| r.region_name)
        .collect())
}

// ============================================================================
// Instances
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    reservation_set: ItemSet<Reservation>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reservation {
    #[serde(default)]
    instances_set: ItemSet<Instance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub instance_id: String,
    pub instance_type: String,
    pub instance_state: InstanceStateItem,
    pub placement: Option<Placement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceStateItem {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub availability_zone: Option<String>,
}

pub fn instance_state(name: &str) -> InstanceState {
    match name {
        "running" => InstanceState::Running,
        "pending" | "stopping" | "stopped" | "shutting-down" => InstanceState::Stopped,
        "terminated" => InstanceState::Terminated,
        _ => InstanceState::Unknown,
    }
}

impl Instance {
    pub fn into_descriptor(self, account_id: &str, region: &str) -> ResourceDescriptor {
        let descriptor = ResourceDescriptor::new(
            self.instance_id,
            account_id,
            ResourceClass::Vm,
            Capacity::Sku(SkuKey::new(self.instance_type, Some(region.to_string()))),
            region,
            instance_state(&self.instance_state.name),
        );
        match self.placement.and_then(|p| p.availability_zone) {
            Some(zone) => descriptor.with_zone(zone),
            None => descriptor,
        }
    }
}

fn parse_instances_page(body: &str) -> Result<(Vec<Instance>, Option<String>)> {
    let response: DescribeInstancesResponse = from_xml(body)?;
    let instances = response
        .reservation_set
        .items
        .into_iter()
        .flat_map(|r| r.instances_set.items)
        .collect();
    Ok((instances, response.next_token.filter(|t| !t.is_empty())))
}

/// Running instances in one region
pub async fn describe_instances(
    client: &AwsClient,
    creds: &AwsCredentials,
    account_id: &str,
    region: &str,
) -> Result<Vec<ResourceDescriptor>> {
    let mut descriptors = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let mut params = query_params("DescribeInstances", API_VERSION);
        params.insert("Filter.1.Name".to_string(), "instance-state-name".to_string());
        params.insert("Filter.1.Value.1".to_string(), "running".to_string());
        params.insert("MaxResults".to_string(), MAX_RESULTS.to_string());
        if let Some(token) = &next_token {
            params.insert("NextToken".to_string(), token.clone());
        }

        let body = client.query(creds, SERVICE, region, &params).await?;
        let (instances, token) = parse_instances_page(&body)?;
        descriptors.extend(instances.into_iter().map(|i| i.into_descriptor(account_id, region)));

        match token {
            Some(token) if Some(&token) != next_token.as_ref() => next_token = Some(token),
            _ => break,
        }
    }

    tracing::debug!("{} {}: {} instances", account_id, region, descriptors.len());
    Ok(descriptors)
}

// ============================================================================
// Instance types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeInstanceTypesResponse {
    #[serde(default)]
    instance_type_set: ItemSet<InstanceTypeItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceTypeItem {
    v_cpu_info: Option<VCpuInfo>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VCpuInfo {
    pub default_v_cpus: Option<u32>,
    pub default_cores: Option<u32>,
    pub default_threads_per_core: Option<u32>,
}

impl VCpuInfo {
    /// Cores × threads per core; `defaultVCpus` only when the type reports no
    /// core layout. A layout that overflows is a miss.
    pub fn vcpus(&self) -> Option<u32> {
        match (self.default_cores, self.default_threads_per_core) {
            (Some(cores), Some(threads)) => cores.checked_mul(threads),
            _ => self.default_v_cpus,
        }
    }
}

fn parse_instance_type_vcpus(body: &str) -> Result<Option<u32>> {
    let response: DescribeInstanceTypesResponse = from_xml(body)?;
    Ok(response
        .instance_type_set
        .items
        .first()
        .and_then(|t| t.v_cpu_info)
        .and_then(|info| info.vcpus()))
}

/// vCPUs of one instance type; `None` if the region does not offer it
pub async fn instance_type_vcpus(
    client: &AwsClient,
    creds: &AwsCredentials,
    region: &str,
    instance_type: &str,
) -> Result<Option<u32>> {
    let mut params = query_params("DescribeInstanceTypes", API_VERSION);
    params.insert("InstanceType.1".to_string(), instance_type.to_string());

    match client.query(creds, SERVICE, region, &params).await {
        Ok(body) => parse_instance_type_vcpus(&body),
        Err(e) => match e.downcast_ref::<ApiError>() {
            Some(api) if api.code == "InvalidInstanceType" => Ok(None),
            _ => Err(e),
        },
    }
}
