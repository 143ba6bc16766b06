//! Provider seam
//!
//! The engine only ever talks to a cloud through this trait. Each method is
//! a single logical query; the engine wraps every call in the shared
//! [`CallGate`](super::retry::CallGate), so implementations should not retry
//! or throttle on their own.

use super::model::{ResourceDescriptor, Scope, SkuKey};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Region name used by providers whose compute listing is not per-region
pub const GLOBAL_REGION: &str = "global";

/// Default maximum number of task ids per describe call
pub const DEFAULT_TASK_BATCH_LIMIT: usize = 100;

/// How machine types are mapped to vCPUs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkuMode {
    /// One catalog fetched per run
    Bulk,
    /// One lookup per distinct key
    Lazy,
}

pub type SkuCatalog = HashMap<SkuKey, u32>;

/// Running container tasks of one cluster, not yet described
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskGroup {
    pub cluster: String,
    pub task_ids: Vec<String>,
}

/// Container listing result for one region
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInventory {
    /// Clusters seen, including ones with no running tasks
    pub clusters: u64,
    pub groups: Vec<TaskGroup>,
}

/// Descriptors from a listing that may have skipped part of its range,
/// such as an unreachable zone or a scale set that refused access
#[derive(Debug, Default)]
pub struct Listing {
    pub descriptors: Vec<ResourceDescriptor>,
    /// What was skipped, and why
    pub gaps: Vec<(String, anyhow::Error)>,
}

impl Listing {
    pub fn gap(&mut self, what: impl Into<String>, error: anyhow::Error) {
        self.gaps.push((what.into(), error));
    }

    pub fn append(&mut self, other: Listing) {
        self.descriptors.extend(other.descriptors);
        self.gaps.extend(other.gaps);
    }
}

impl From<Vec<ResourceDescriptor>> for Listing {
    fn from(descriptors: Vec<ResourceDescriptor>) -> Self {
        Self {
            descriptors,
            gaps: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Scope-bound credential, obtained per terminal scope
    type Credential: Clone + Send + Sync + 'static;

    /// Short provider name for logs and reports
    fn name(&self) -> &'static str;

    fn sku_mode(&self) -> SkuMode;

    fn task_batch_limit(&self) -> usize {
        DEFAULT_TASK_BATCH_LIMIT
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Direct child folders of a non-terminal scope
    async fn list_child_folders(&self, scope: &Scope) -> Result<Vec<Scope>>;

    /// Direct terminal children of a non-terminal scope
    async fn list_terminal_children(&self, scope: &Scope) -> Result<Vec<Scope>>;

    /// Every terminal scope the caller can see
    async fn list_visible_terminals(&self) -> Result<Vec<Scope>>;

    // ========================================================================
    // Collection
    // ========================================================================

    async fn credential_for(&self, scope: &Scope) -> Result<Self::Credential>;

    async fn list_regions(&self, cred: &Self::Credential, scope: &Scope) -> Result<Vec<String>>;

    /// Running and stopped instances; an `Err` means nothing could be listed
    async fn list_instances(&self, cred: &Self::Credential, scope: &Scope, region: &str) -> Result<Listing>;

    /// `None` when the provider has no container service
    async fn list_container_tasks(
        &self,
        _cred: &Self::Credential,
        _scope: &Scope,
        _region: &str,
    ) -> Result<Option<ContainerInventory>> {
        Ok(None)
    }

    /// Describe at most [`task_batch_limit`](Provider::task_batch_limit) tasks
    async fn describe_tasks(
        &self,
        _cred: &Self::Credential,
        _scope: &Scope,
        _region: &str,
        _cluster: &str,
        _task_ids: &[String],
    ) -> Result<Vec<ResourceDescriptor>> {
        Ok(Vec::new())
    }

    /// `None` when the provider has no function service
    async fn list_functions(
        &self,
        _cred: &Self::Credential,
        _scope: &Scope,
        _region: &str,
    ) -> Result<Option<Vec<ResourceDescriptor>>> {
        Ok(None)
    }

    // ========================================================================
    // SKU resolution
    // ========================================================================

    /// Full catalog, used in [`SkuMode::Bulk`]
    async fn fetch_sku_catalog(&self, _cred: &Self::Credential, _scope: &Scope) -> Result<SkuCatalog> {
        Ok(SkuCatalog::new())
    }

    /// Single key lookup, used in [`SkuMode::Lazy`]. `Ok(None)` is a miss.
    async fn lookup_sku(
        &self,
        _cred: &Self::Credential,
        _scope: &Scope,
        _key: &SkuKey,
    ) -> Result<Option<u32>> {
        Ok(None)
    }
}
