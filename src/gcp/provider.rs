//! GCP inventory provider
//!
//! Organization → folders → projects. Instances are listed per project with
//! one aggregated call, so the project is collected as a single `global`
//! region and descriptors carry their real region for filtering.

use super::client::GcpClient;
use super::{compute, projects};
use crate::inventory::model::{Scope, SkuKey};
use crate::inventory::provider::{Listing, Provider, SkuMode, GLOBAL_REGION};
use anyhow::Result;
use async_trait::async_trait;

pub struct GcpProvider {
    client: GcpClient,
}

impl GcpProvider {
    pub fn new(client: GcpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Provider for GcpProvider {
    /// ADC tokens are not project-bound
    type Credential = ();

    fn name(&self) -> &'static str {
        "GCP"
    }

    fn sku_mode(&self) -> SkuMode {
        SkuMode::Lazy
    }

    async fn list_child_folders(&self, scope: &Scope) -> Result<Vec<Scope>> {
        if scope.is_terminal() {
            return Ok(Vec::new());
        }
        let folders = projects::list_child_folders(&self.client, &projects::parent_name(scope)).await?;
        Ok(folders
            .into_iter()
            .map(|f| Scope::folder(f.id).with_name(f.display_name))
            .collect())
    }

    async fn list_terminal_children(&self, scope: &Scope) -> Result<Vec<Scope>> {
        if scope.is_terminal() {
            return Ok(Vec::new());
        }
        let children = projects::list_child_projects(&self.client, &projects::parent_name(scope)).await?;
        Ok(children.iter().map(projects::Project::to_scope).collect())
    }

    async fn list_visible_terminals(&self) -> Result<Vec<Scope>> {
        let visible = projects::list_projects(&self.client).await?;
        Ok(visible.iter().map(projects::Project::to_scope).collect())
    }

    async fn credential_for(&self, _scope: &Scope) -> Result<()> {
        Ok(())
    }

    async fn list_regions(&self, _cred: &(), _scope: &Scope) -> Result<Vec<String>> {
        Ok(vec![GLOBAL_REGION.to_string()])
    }

    async fn list_instances(&self, _cred: &(), scope: &Scope, _region: &str) -> Result<Listing> {
        let listing = compute::list_instances(&self.client, &scope.id).await?;
        tracing::debug!(
            "{}: {} instances returned, {} zones unreachable",
            scope.id,
            listing.descriptors.len(),
            listing.gaps.len()
        );
        Ok(listing)
    }

    async fn lookup_sku(&self, _cred: &(), scope: &Scope, key: &SkuKey) -> Result<Option<u32>> {
        let Some(zone) = key.locality.as_deref() else {
            return Ok(compute::custom_machine_vcpus(&key.type_key));
        };
        compute::machine_type_vcpus(&self.client, &scope.id, zone, &key.type_key).await
    }
}
