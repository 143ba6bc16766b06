//! Azure inventory provider
//!
//! Management groups → subscriptions. Each subscription is collected as one
//! `global` region; descriptors carry their location for filtering.

use super::client::AzureClient;
use super::management::{self, GroupChild};
use super::compute;
use crate::inventory::model::Scope;
use crate::inventory::provider::{Listing, Provider, SkuCatalog, SkuMode, GLOBAL_REGION};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct AzureProvider {
    client: AzureClient,
    /// One `$expand=children` call answers both hierarchy questions
    children: Mutex<HashMap<String, Arc<Vec<GroupChild>>>>,
}

impl AzureProvider {
    pub fn new(client: AzureClient) -> Self {
        Self {
            client,
            children: Mutex::new(HashMap::new()),
        }
    }

    async fn group_children(&self, scope: &Scope) -> Result<Arc<Vec<GroupChild>>> {
        if let Some(cached) = self.children.lock().await.get(&scope.id) {
            return Ok(cached.clone());
        }
        let children = Arc::new(management::list_group_children(&self.client, &scope.id).await?);
        self.children
            .lock()
            .await
            .insert(scope.id.clone(), children.clone());
        Ok(children)
    }
}

#[async_trait]
impl Provider for AzureProvider {
    type Credential = ();

    fn name(&self) -> &'static str {
        "Azure"
    }

    fn sku_mode(&self) -> SkuMode {
        SkuMode::Bulk
    }

    async fn list_child_folders(&self, scope: &Scope) -> Result<Vec<Scope>> {
        if scope.is_terminal() {
            return Ok(Vec::new());
        }
        let children = self.group_children(scope).await?;
        Ok(children
            .iter()
            .filter_map(|c| match c {
                GroupChild::Group(s) => Some(s.clone()),
                GroupChild::Subscription(_) => None,
            })
            .collect())
    }

    async fn list_terminal_children(&self, scope: &Scope) -> Result<Vec<Scope>> {
        if scope.is_terminal() {
            return Ok(Vec::new());
        }
        let children = self.group_children(scope).await?;
        Ok(children
            .iter()
            .filter_map(|c| match c {
                GroupChild::Subscription(s) => Some(s.clone()),
                GroupChild::Group(_) => None,
            })
            .collect())
    }

    async fn list_visible_terminals(&self) -> Result<Vec<Scope>> {
        let subscriptions = management::list_subscriptions(&self.client).await?;
        Ok(subscriptions
            .into_iter()
            .map(|s| Scope::terminal(s.subscription_id).with_name(s.display_name))
            .collect())
    }

    async fn credential_for(&self, _scope: &Scope) -> Result<()> {
        Ok(())
    }

    async fn list_regions(&self, _cred: &(), _scope: &Scope) -> Result<Vec<String>> {
        Ok(vec![GLOBAL_REGION.to_string()])
    }

    /// VMs and scale set instances; one half failing leaves a gap, not an error
    async fn list_instances(&self, _cred: &(), scope: &Scope, _region: &str) -> Result<Listing> {
        let (vms, members) = tokio::join!(
            compute::list_vms(&self.client, &scope.id),
            compute::list_scale_set_members(&self.client, &scope.id),
        );

        let mut listing = Listing::default();
        match (vms, members) {
            (Err(e), Err(_)) => return Err(e),
            (Ok(vms), Ok(members)) => {
                tracing::debug!("{}: {} VMs, {} scale set instances", scope.id, vms.len(), members.descriptors.len());
                listing.descriptors = vms;
                listing.append(members);
            }
            (Ok(vms), Err(e)) => {
                listing.descriptors = vms;
                listing.gap("scale sets", e);
            }
            (Err(e), Ok(members)) => {
                listing.append(members);
                listing.gap("virtual machines", e);
            }
        }
        Ok(listing)
    }

    async fn fetch_sku_catalog(&self, _cred: &(), scope: &Scope) -> Result<SkuCatalog> {
        compute::fetch_sku_catalog(&self.client, &scope.id).await
    }
}
