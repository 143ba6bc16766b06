//! Azure Compute
//!
//! Virtual machines, uniform scale set instances and the resource SKU
//! catalog. VM sizes are keyed lowercase because ARM is inconsistent about
//! their casing between the VM and SKU APIs.

use super::client::AzureClient;
use crate::inventory::model::{Capacity, InstanceState, ResourceClass, ResourceDescriptor, SkuKey};
use crate::inventory::provider::{Listing, SkuCatalog};
use anyhow::Result;
use serde_json::Value;

const COMPUTE_API_VERSION: &str = "2024-03-01";
const SKUS_API_VERSION: &str = "2021-07-01";

/// Map the `PowerState/*` status of an instance view
pub fn power_state(instance_view: Option<&Value>) -> InstanceState {
    let code = instance_view
        .and_then(|view| view.get("statuses"))
        .and_then(|s| s.as_array())
        .and_then(|statuses| {
            statuses
                .iter()
                .filter_map(|s| s.get("code").and_then(|c| c.as_str()))
                .find(|c| c.starts_with("PowerState/"))
        });

    match code.map(|c| c.trim_start_matches("PowerState/")) {
        Some("running") => InstanceState::Running,
        Some("stopped" | "stopping" | "deallocated" | "deallocating") => InstanceState::Stopped,
        _ => InstanceState::Unknown,
    }
}

pub fn size_key(size: &str) -> SkuKey {
    SkuKey::global(size.to_ascii_lowercase())
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(|v| v.as_str()).unwrap_or("")
}

/// A standalone or flexible-orchestration VM
pub fn vm_descriptor(subscription: &str, vm: &Value) -> ResourceDescriptor {
    // Flexible scale set members show up here with a back-reference
    let class = if vm.pointer("/properties/virtualMachineScaleSet/id").is_some() {
        ResourceClass::ScaleSetMember
    } else {
        ResourceClass::Vm
    };

    ResourceDescriptor::new(
        str_at(vm, "/id"),
        subscription,
        class,
        Capacity::Sku(size_key(str_at(vm, "/properties/hardwareProfile/vmSize"))),
        str_at(vm, "/location"),
        power_state(vm.pointer("/properties/instanceView")),
    )
}

/// An instance of a uniform scale set
pub fn scale_set_member_descriptor(subscription: &str, member: &Value) -> ResourceDescriptor {
    ResourceDescriptor::new(
        str_at(member, "/id"),
        subscription,
        ResourceClass::ScaleSetMember,
        Capacity::Sku(size_key(str_at(member, "/sku/name"))),
        str_at(member, "/location"),
        power_state(member.pointer("/properties/instanceView")),
    )
}

/// VMs in a subscription, with run-time status
pub async fn list_vms(client: &AzureClient, subscription: &str) -> Result<Vec<ResourceDescriptor>> {
    let url = format!(
        "{}&statusOnly=true",
        client.arm_url(
            &format!("/subscriptions/{}/providers/Microsoft.Compute/virtualMachines", subscription),
            COMPUTE_API_VERSION,
        )
    );
    let vms = client.get_all(&url).await?;
    Ok(vms.iter().map(|vm| vm_descriptor(subscription, vm)).collect())
}

/// Instances of every uniform scale set in a subscription.
///
/// A scale set whose instances cannot be listed becomes a gap; the others
/// are still counted.
pub async fn list_scale_set_members(client: &AzureClient, subscription: &str) -> Result<Listing> {
    let url = client.arm_url(
        &format!("/subscriptions/{}/providers/Microsoft.Compute/virtualMachineScaleSets", subscription),
        COMPUTE_API_VERSION,
    );
    let scale_sets = client.get_all(&url).await?;

    let mut members = Listing::default();
    for scale_set in &scale_sets {
        // Flexible members are already returned by the VM listing
        if str_at(scale_set, "/properties/orchestrationMode").eq_ignore_ascii_case("Flexible") {
            continue;
        }
        let id = str_at(scale_set, "/id");
        if id.is_empty() {
            continue;
        }

        let url = format!(
            "{}&$expand=instanceView",
            client.arm_url(&format!("{}/virtualMachines", id), COMPUTE_API_VERSION)
        );
        match client.get_all(&url).await {
            Ok(instances) => {
                tracing::debug!("{}: {} scale set instances", id, instances.len());
                members
                    .descriptors
                    .extend(instances.iter().map(|m| scale_set_member_descriptor(subscription, m)));
            }
            Err(e) => members.gap(format!("scale set {}", id), e),
        }
    }
    Ok(members)
}

/// vCPU count per VM size, from the `vCPUs` capability
pub fn parse_sku_catalog(skus: &[Value]) -> SkuCatalog {
    let mut catalog = SkuCatalog::new();
    for sku in skus {
        if str_at(sku, "/resourceType") != "virtualMachines" {
            continue;
        }
        let name = str_at(sku, "/name");
        let vcpus = sku
            .get("capabilities")
            .and_then(|c| c.as_array())
            .and_then(|caps| {
                caps.iter()
                    .find(|c| c.get("name").and_then(|n| n.as_str()) == Some("vCPUs"))
            })
            .and_then(|c| c.get("value").and_then(|v| v.as_str()))
            .and_then(|v| v.parse::<u32>().ok());

        match vcpus {
            Some(vcpus) if !name.is_empty() => {
                catalog.entry(size_key(name)).or_insert(vcpus);
            }
            _ => tracing::debug!("Skipping SKU {:?} without a vCPU capability", name),
        }
    }
    catalog
}

pub async fn fetch_sku_catalog(client: &AzureClient, subscription: &str) -> Result<SkuCatalog> {
    let url = client.arm_url(
        &format!("/subscriptions/{}/providers/Microsoft.Compute/skus", subscription),
        SKUS_API_VERSION,
    );
    let skus = client.get_all(&url).await?;
    Ok(parse_sku_catalog(&skus))
}
