//! Compute Engine
//!
//! Instance listing (aggregated across zones) and machine type lookups.

use super::client::{short_name, zone_to_region, GcpClient};
use crate::inventory::error::ApiError;
use crate::inventory::model::{Capacity, InstanceState, ResourceClass, ResourceDescriptor, SkuKey};
use crate::inventory::provider::Listing;
use anyhow::Result;
use serde_json::Value;

/// Compute Engine instance summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub status: String,
}

impl From<&Value> for Instance {
    fn from(value: &Value) -> Self {
        let field = |key: &str| value.get(key).and_then(|v| v.as_str()).unwrap_or("");
        Self {
            name: field("name").to_string(),
            zone: short_name(field("zone")).to_string(),
            machine_type: short_name(field("machineType")).to_string(),
            status: field("status").to_string(),
        }
    }
}

impl Instance {
    pub fn state(&self) -> InstanceState {
        match self.status.as_str() {
            "RUNNING" => InstanceState::Running,
            // TERMINATED is Compute Engine's name for a stopped VM
            "STOPPING" | "STOPPED" | "SUSPENDING" | "SUSPENDED" | "TERMINATED" => InstanceState::Stopped,
            _ => InstanceState::Unknown,
        }
    }

    pub fn into_descriptor(self, project: &str) -> ResourceDescriptor {
        let state = self.state();
        let key = SkuKey::new(&self.machine_type, Some(self.zone.clone()));
        ResourceDescriptor::new(
            self.name,
            project,
            ResourceClass::Vm,
            Capacity::Sku(key),
            zone_to_region(&self.zone),
            state,
        )
        .with_zone(self.zone)
    }
}

/// List running instances across every zone of a project.
///
/// Zones the API reports as unreachable become gaps in the listing.
pub async fn list_instances(client: &GcpClient, project: &str) -> Result<Listing> {
    let url = format!(
        "{}?filter={}&returnPartialSuccess=true",
        client.compute_aggregated_url(project, "instances"),
        urlencoding::encode("status = RUNNING")
    );
    let aggregated = client.get_aggregated(&url).await?;

    let mut listing = Listing::from(
        aggregated
            .items
            .iter()
            .map(|item| Instance::from(item).into_descriptor(project))
            .collect::<Vec<_>>(),
    );
    for location in aggregated.unreachable {
        let error = ApiError::new("GCP", 503, "UNREACHABLE", format!("{} could not be reached", location));
        listing.gap(location, error.into());
    }
    Ok(listing)
}

/// vCPUs encoded in a custom machine type name, e.g. `n2-custom-8-32768`
pub fn custom_machine_vcpus(machine_type: &str) -> Option<u32> {
    let mut parts = machine_type.split('-');
    parts.find(|p| *p == "custom")?;
    parts.next()?.parse().ok()
}

/// Look up the guest CPU count of a machine type in a zone.
///
/// Returns `Ok(None)` when the type does not exist there.
pub async fn machine_type_vcpus(
    client: &GcpClient,
    project: &str,
    zone: &str,
    machine_type: &str,
) -> Result<Option<u32>> {
    if let Some(vcpus) = custom_machine_vcpus(machine_type) {
        return Ok(Some(vcpus));
    }

    let url = client.compute_zonal_url(
        project,
        zone,
        &format!("machineTypes/{}", urlencoding::encode(machine_type)),
    );
    match client.get(&url).await {
        Ok(value) => Ok(value
            .get("guestCpus")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())),
        Err(e) if e.downcast_ref::<ApiError>().is_some_and(|api| api.status == 404) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instance_from_value() {
        let instance = Instance::from(&json!({
            "name": "web-1",
            "zone": "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a",
            "machineType": "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a/machineTypes/n1-standard-4",
            "status": "RUNNING"
        }));
        assert_eq!(instance.zone, "us-central1-a");
        assert_eq!(instance.machine_type, "n1-standard-4");

        let d = instance.into_descriptor("proj-a");
        assert_eq!(d.region, "us-central1");
        assert_eq!(d.state, InstanceState::Running);
        assert_eq!(d.sku_key(), Some(&SkuKey::new("n1-standard-4", Some("us-central1-a".into()))));
    }

    #[test]
    fn test_state_mapping() {
        let mut instance = Instance::from(&json!({"status": "TERMINATED"}));
        assert_eq!(instance.state(), InstanceState::Stopped);
        instance.status = "PROVISIONING".into();
        assert_eq!(instance.state(), InstanceState::Unknown);
    }

    #[test]
    fn test_custom_machine_vcpus() {
        assert_eq!(custom_machine_vcpus("custom-4-16384"), Some(4));
        assert_eq!(custom_machine_vcpus("n2-custom-8-32768"), Some(8));
        assert_eq!(custom_machine_vcpus("n2d-custom-16-65536-ext"), Some(16));
        assert_eq!(custom_machine_vcpus("n1-standard-4"), None);
    }
}
