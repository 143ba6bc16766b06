//! AWS inventory provider
//!
//! Organization root → OUs → accounts. Member accounts are scanned through
//! an assumed role; the caller's own account uses the base credentials.

use super::client::{AwsClient, HOME_REGION};
use super::credentials::AwsCredentials;
use super::{ec2, ecs, lambda, organizations, sts};
use crate::inventory::classify::classify;
use crate::inventory::model::{FailureKind, ResourceDescriptor, Scope, SkuKey};
use crate::inventory::provider::{ContainerInventory, Listing, Provider, SkuMode};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::OnceCell;

/// Role created by AWS Organizations in every member account
pub const DEFAULT_ROLE_NAME: &str = "OrganizationAccountAccessRole";

pub struct AwsProvider {
    client: AwsClient,
    base: AwsCredentials,
    role_name: String,
    caller_account: OnceCell<String>,
}

impl AwsProvider {
    pub fn new(client: AwsClient, base: AwsCredentials, role_name: impl Into<String>) -> Self {
        Self {
            client,
            base,
            role_name: role_name.into(),
            caller_account: OnceCell::new(),
        }
    }

    /// Account id of the base credentials
    pub async fn caller_account(&self) -> Result<&str> {
        let account = self
            .caller_account
            .get_or_try_init(|| async {
                let identity = sts::get_caller_identity(&self.client, &self.base).await?;
                tracing::info!("Authenticated as {} in {}", identity.arn, identity.account);
                Ok::<_, anyhow::Error>(identity.account)
            })
            .await?;
        Ok(account.as_str())
    }

    /// Roots of the caller's organization
    pub async fn organization_roots(&self) -> Result<Vec<Scope>> {
        organizations::list_roots(&self.client, &self.base).await
    }
}

#[async_trait]
impl Provider for AwsProvider {
    type Credential = AwsCredentials;

    fn name(&self) -> &'static str {
        "AWS"
    }

    fn sku_mode(&self) -> SkuMode {
        SkuMode::Lazy
    }

    fn task_batch_limit(&self) -> usize {
        ecs::DESCRIBE_TASKS_LIMIT
    }

    async fn list_child_folders(&self, scope: &Scope) -> Result<Vec<Scope>> {
        if scope.is_terminal() {
            return Ok(Vec::new());
        }
        organizations::list_organizational_units(&self.client, &self.base, &scope.id).await
    }

    async fn list_terminal_children(&self, scope: &Scope) -> Result<Vec<Scope>> {
        if scope.is_terminal() {
            return Ok(Vec::new());
        }
        let accounts = organizations::list_accounts_for_parent(&self.client, &self.base, &scope.id).await?;
        Ok(accounts.iter().map(|a| a.to_scope()).collect())
    }

    /// Every organization account, or just the caller's own account when the
    /// caller cannot read the organization
    async fn list_visible_terminals(&self) -> Result<Vec<Scope>> {
        match organizations::list_accounts(&self.client, &self.base).await {
            Ok(accounts) => Ok(accounts.iter().map(|a| a.to_scope()).collect()),
            Err(e) if classify(&e) == FailureKind::PermissionDenied => {
                tracing::warn!("Cannot list organization accounts ({:#}); scanning the caller's account only", e);
                Ok(vec![Scope::terminal(self.caller_account().await?)])
            }
            Err(e) => Err(e),
        }
    }

    async fn credential_for(&self, scope: &Scope) -> Result<AwsCredentials> {
        if scope.id == self.caller_account().await? {
            return Ok(self.base.clone());
        }
        sts::assume_role(&self.client, &self.base, &scope.id, &self.role_name).await
    }

    async fn list_regions(&self, cred: &AwsCredentials, _scope: &Scope) -> Result<Vec<String>> {
        ec2::describe_regions(&self.client, cred).await
    }

    async fn list_instances(&self, cred: &AwsCredentials, scope: &Scope, region: &str) -> Result<Listing> {
        Ok(ec2::describe_instances(&self.client, cred, &scope.id, region).await?.into())
    }

    async fn list_container_tasks(
        &self,
        cred: &AwsCredentials,
        _scope: &Scope,
        region: &str,
    ) -> Result<Option<ContainerInventory>> {
        Ok(Some(ecs::list_container_tasks(&self.client, cred, region).await?))
    }

    async fn describe_tasks(
        &self,
        cred: &AwsCredentials,
        scope: &Scope,
        region: &str,
        cluster: &str,
        task_ids: &[String],
    ) -> Result<Vec<ResourceDescriptor>> {
        ecs::describe_tasks(&self.client, cred, &scope.id, region, cluster, task_ids).await
    }

    async fn list_functions(
        &self,
        cred: &AwsCredentials,
        scope: &Scope,
        region: &str,
    ) -> Result<Option<Vec<ResourceDescriptor>>> {
        Ok(Some(lambda::list_functions(&self.client, cred, &scope.id, region).await?))
    }

    async fn lookup_sku(&self, cred: &AwsCredentials, _scope: &Scope, key: &SkuKey) -> Result<Option<u32>> {
        let region = key.locality.as_deref().unwrap_or(HOME_REGION);
        ec2::instance_type_vcpus(&self.client, cred, region, &key.type_key).await
    }
}
