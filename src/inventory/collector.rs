//! Resource Collector
//!
//! Produces the raw descriptors of one terminal scope. The collector obtains
//! a credential bound to that scope, lists its regions, collects every region
//! concurrently, and resolves each distinct machine type exactly once before
//! assigning vCPUs. Failures are classified and recorded on the report rather
//! than propagated.

use super::classify::classify;
use super::model::{Capacity, Diagnostic, FailureKind, InstanceState, ResourceDescriptor, Scope, ScopeStatus, SkuKey};
use super::provider::{Listing, Provider, SkuMode, GLOBAL_REGION};
use super::resolver::SkuResolver;
use super::retry::CallGate;
use anyhow::Result;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Raw collection result for one terminal scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalReport {
    pub scope: Scope,
    pub descriptors: Vec<ResourceDescriptor>,
    pub container_clusters: u64,
    pub status: ScopeStatus,
    pub diagnostics: Vec<Diagnostic>,
    pub warnings: Vec<String>,
}

impl TerminalReport {
    /// A scope that could not be collected at all
    pub fn failed(scope: Scope, kind: FailureKind, detail: impl Into<String>) -> Self {
        let diagnostic = Diagnostic::new(&scope.id, kind, detail);
        Self {
            scope,
            descriptors: Vec::new(),
            container_clusters: 0,
            status: ScopeStatus::Failed(kind.label().to_string()),
            diagnostics: vec![diagnostic],
            warnings: Vec::new(),
        }
    }
}

/// Split task ids into describe-sized batches
pub fn chunk_ids(ids: &[String], limit: usize) -> std::slice::Chunks<'_, String> {
    ids.chunks(limit.max(1))
}

#[derive(Default)]
struct RegionOutcome {
    descriptors: Vec<ResourceDescriptor>,
    container_clusters: u64,
    succeeded: usize,
    failures: Vec<Diagnostic>,
}

impl RegionOutcome {
    /// A listing with gaps still counts as a success; each gap is a failure
    fn absorb(&mut self, scope: &Scope, region: &str, what: &str, result: Result<Listing>) {
        match result {
            Ok(listing) => {
                self.succeeded += 1;
                self.descriptors.extend(listing.descriptors);
                for (skipped, e) in listing.gaps {
                    self.failures.push(failure(scope, &format!("{} ({} in {})", skipped, what, region), &e));
                }
            }
            Err(e) => self.failures.push(failure(scope, &format!("{} in {}", what, region), &e)),
        }
    }

    fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn is_failed(&self) -> bool {
        self.succeeded == 0 && !self.failures.is_empty()
    }
}

pub struct Collector<P: Provider> {
    provider: Arc<P>,
    gate: CallGate,
    resolver: Arc<SkuResolver>,
    regions: Option<Arc<Vec<String>>>,
}

impl<P: Provider> Clone for Collector<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            gate: self.gate.clone(),
            resolver: self.resolver.clone(),
            regions: self.regions.clone(),
        }
    }
}

impl<P: Provider> Collector<P> {
    pub fn new(provider: Arc<P>, gate: CallGate, resolver: Arc<SkuResolver>, regions: Option<Vec<String>>) -> Self {
        Self {
            provider,
            gate,
            resolver,
            regions: regions.filter(|r| !r.is_empty()).map(Arc::new),
        }
    }

    fn region_allowed(&self, region: &str) -> bool {
        match &self.regions {
            Some(allowed) => allowed.iter().any(|r| r == region),
            None => true,
        }
    }

    /// Collect one terminal scope
    pub async fn collect(&self, scope: &Scope) -> TerminalReport {
        let provider = self.provider.as_ref();

        let cred = match self
            .gate
            .call(&format!("credential for {}", scope.id), || provider.credential_for(scope))
            .await
        {
            Ok(cred) => cred,
            Err(e) => return scope_failure(scope, "obtain credential", &e),
        };

        let regions = match self
            .gate
            .call(&format!("list regions of {}", scope.id), || provider.list_regions(&cred, scope))
            .await
        {
            Ok(regions) => regions,
            Err(e) => return scope_failure(scope, "list regions", &e),
        };

        let regions: Vec<String> = regions
            .into_iter()
            .filter(|r| r == GLOBAL_REGION || self.region_allowed(r))
            .collect();
        tracing::debug!("Collecting {} in {} regions", scope.id, regions.len());

        let outcomes = join_all(regions.iter().map(|r| self.collect_region(&cred, scope, r))).await;

        let mut descriptors = Vec::new();
        let mut container_clusters = 0;
        let mut failures = Vec::new();
        let failed_regions = outcomes.iter().filter(|o| o.is_failed()).count();
        let incomplete_regions = outcomes.iter().filter(|o| !o.is_complete()).count();
        for outcome in outcomes {
            descriptors.extend(outcome.descriptors);
            container_clusters += outcome.container_clusters;
            failures.extend(outcome.failures);
        }

        descriptors.retain(|d| self.region_allowed(&d.region));
        for d in descriptors.iter().filter(|d| d.state == InstanceState::Unknown) {
            tracing::warn!("{} in {} reported an unknown state, not counted", d.id, scope.id);
        }

        let (warnings, resolution_failures) = self.assign_vcpus(&cred, scope, &mut descriptors).await;

        let mut reasons = Vec::new();
        let status = if !regions.is_empty() && failed_regions == regions.len() {
            let kinds: BTreeSet<&str> = failures.iter().map(|d| d.kind.label()).collect();
            let reason = match kinds.into_iter().collect::<Vec<_>>().as_slice() {
                [single] => single.to_string(),
                _ => format!("all {} regions failed", regions.len()),
            };
            ScopeStatus::Failed(reason)
        } else {
            if incomplete_regions > 0 {
                reasons.push(format!("{} of {} regions incomplete", incomplete_regions, regions.len()));
            }
            if !resolution_failures.is_empty() {
                reasons.push(format!("{} machine types could not be resolved", resolution_failures.len()));
            }
            if reasons.is_empty() {
                ScopeStatus::Ok
            } else {
                ScopeStatus::PartiallyFailed(reasons.join("; "))
            }
        };

        let mut diagnostics = collapse_by_kind(&scope.id, failures);
        diagnostics.extend(resolution_failures);

        tracing::info!(
            "Collected {}: {} descriptors, {} ({} warnings)",
            scope.id,
            descriptors.len(),
            status.label(),
            warnings.len()
        );

        TerminalReport {
            scope: scope.clone(),
            descriptors,
            container_clusters,
            status,
            diagnostics,
            warnings,
        }
    }

    async fn collect_region(&self, cred: &P::Credential, scope: &Scope, region: &str) -> RegionOutcome {
        let provider = self.provider.as_ref();
        let mut outcome = RegionOutcome::default();

        let list_instances = format!("list instances in {}/{}", scope.id, region);
        let list_functions = format!("list functions in {}/{}", scope.id, region);
        let (instances, containers, functions) = tokio::join!(
            self.gate
                .call(&list_instances, || provider.list_instances(cred, scope, region)),
            self.collect_containers(cred, scope, region),
            self.gate
                .call(&list_functions, || provider.list_functions(cred, scope, region)),
        );

        outcome.absorb(scope, region, "instances", instances);
        match containers {
            Ok(Some((clusters, tasks))) => {
                outcome.container_clusters += clusters;
                outcome.absorb(scope, region, "container tasks", Ok(tasks));
            }
            Ok(None) => {}
            Err(e) => outcome.absorb(scope, region, "container tasks", Err(e)),
        }
        match functions {
            Ok(Some(functions)) => outcome.absorb(scope, region, "functions", Ok(functions.into())),
            Ok(None) => {}
            Err(e) => outcome.absorb(scope, region, "functions", Err(e)),
        }
        outcome
    }

    async fn collect_containers(
        &self,
        cred: &P::Credential,
        scope: &Scope,
        region: &str,
    ) -> Result<Option<(u64, Listing)>> {
        let provider = self.provider.as_ref();
        let listed = self
            .gate
            .call(&format!("list container tasks in {}/{}", scope.id, region), || {
                provider.list_container_tasks(cred, scope, region)
            })
            .await?;
        let Some(inventory) = listed else {
            return Ok(None);
        };

        let limit = provider.task_batch_limit();
        let batches = inventory.groups.iter().flat_map(|group| {
            chunk_ids(&group.task_ids, limit).map(move |batch| (group.cluster.as_str(), batch))
        });

        // A failed batch only loses its own tasks
        let described = join_all(batches.map(|(cluster, batch)| async move {
            let what = format!("describe {} tasks in {}", batch.len(), cluster);
            let result = self
                .gate
                .call(&what, || provider.describe_tasks(cred, scope, region, cluster, batch))
                .await;
            (what, result)
        }))
        .await;

        let mut tasks = Listing::default();
        for (what, result) in described {
            match result {
                Ok(descriptors) => tasks.descriptors.extend(descriptors),
                Err(e) => tasks.gap(what, e),
            }
        }
        Ok(Some((inventory.clusters, tasks)))
    }

    /// Resolve each distinct key once and fill in `vcpus`.
    ///
    /// Returns unresolved-type warnings and diagnostics for failed lookups.
    async fn assign_vcpus(
        &self,
        cred: &P::Credential,
        scope: &Scope,
        descriptors: &mut [ResourceDescriptor],
    ) -> (Vec<String>, Vec<Diagnostic>) {
        let keys: BTreeSet<SkuKey> = descriptors
            .iter()
            .filter(|d| d.is_running())
            .filter_map(|d| d.sku_key().cloned())
            .collect();

        let lookups = join_all(keys.iter().map(|key| async move { (key, self.resolve(cred, scope, key).await) })).await;

        let mut resolved: HashMap<&SkuKey, u32> = HashMap::new();
        let mut warnings = Vec::new();
        let mut failures = Vec::new();
        for (key, result) in lookups {
            match result {
                Ok(Some(vcpus)) => {
                    resolved.insert(key, vcpus);
                }
                Ok(None) => {
                    tracing::warn!("Unresolved machine type {} in {}", key, scope.id);
                    warnings.push(format!("{}: unresolved type {}", scope.id, key));
                }
                Err(e) => failures.push(failure(scope, &format!("resolve {}", key), &e)),
            }
        }

        for d in descriptors.iter_mut().filter(|d| d.is_running()) {
            if let Capacity::Sku(key) = &d.capacity {
                match resolved.get(key) {
                    Some(vcpus) => d.vcpus = *vcpus,
                    None => d.unresolved = true,
                }
            }
        }

        (warnings, failures)
    }

    async fn resolve(&self, cred: &P::Credential, scope: &Scope, key: &SkuKey) -> Result<Option<u32>> {
        let provider = self.provider.as_ref();
        match self.resolver.mode() {
            SkuMode::Lazy => {
                self.resolver
                    .resolve_lazy(key, || async {
                        let what = format!("look up machine type {}", key);
                        self.gate.call(&what, || provider.lookup_sku(cred, scope, key)).await
                    })
                    .await
            }
            SkuMode::Bulk => {
                self.resolver
                    .resolve_bulk(key, || async {
                        self.gate
                            .call("fetch SKU catalog", || provider.fetch_sku_catalog(cred, scope))
                            .await
                    })
                    .await
            }
        }
    }
}

fn failure(scope: &Scope, what: &str, error: &anyhow::Error) -> Diagnostic {
    let kind = classify(error);
    if kind.is_expected() {
        tracing::info!("{}: {} skipped ({})", scope.id, what, kind.label());
    } else {
        tracing::warn!("{}: failed to {}: {:#}", scope.id, what, error);
    }
    Diagnostic::new(&scope.id, kind, format!("{}: {:#}", what, error))
}

fn scope_failure(scope: &Scope, what: &str, error: &anyhow::Error) -> TerminalReport {
    let diagnostic = failure(scope, what, error);
    TerminalReport::failed(scope.clone(), diagnostic.kind, diagnostic.detail)
}

/// One diagnostic per failure kind, keeping the first detail
fn collapse_by_kind(scope_id: &str, failures: Vec<Diagnostic>) -> Vec<Diagnostic> {
    let mut grouped: BTreeMap<&'static str, (FailureKind, String, usize)> = BTreeMap::new();
    for d in failures {
        grouped
            .entry(d.kind.label())
            .and_modify(|(_, _, count)| *count += 1)
            .or_insert((d.kind, d.detail, 1));
    }
    grouped
        .into_values()
        .map(|(kind, detail, count)| {
            let detail = if count > 1 {
                format!("{} (and {} more)", detail, count - 1)
            } else {
                detail
            };
            Diagnostic::new(scope_id, kind, detail)
        })
        .collect()
}
