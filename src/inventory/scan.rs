//! Scan orchestration
//!
//! One run: discover the scope tree, collect every terminal scope
//! concurrently behind the shared call gate, then fold the results.

use super::aggregate::{fold_tree, terminal_result, FoldedNode};
use super::collector::{Collector, TerminalReport};
use super::enumerator::{discover, discover_visible, DEFAULT_MAX_SCOPE_DEPTH};
use super::model::{FailureKind, Scope, ScopeResult};
use super::provider::Provider;
use super::resolver::SkuResolver;
use super::retry::{CallGate, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Default bound on concurrent provider calls
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Which scopes to scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeRequest {
    /// Every terminal scope the credentials can see
    Visible,
    /// Explicit roots; folders are walked, terminals taken as-is
    Roots(Vec<Scope>),
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    pub max_scope_depth: usize,
    /// Region allow-list; `None` scans every region
    pub regions: Option<Vec<String>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            max_scope_depth: DEFAULT_MAX_SCOPE_DEPTH,
            regions: None,
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub provider: &'static str,
    pub run_id: Uuid,
    /// Folded tree, rooted at the synthetic run root
    pub tree: FoldedNode,
    /// Terminal results in discovery order
    pub rows: Vec<ScopeResult>,
    /// Underlying SKU fetches issued
    pub sku_lookups: usize,
    pub cancelled: bool,
}

impl ScanReport {
    /// Grand total over every terminal scope
    pub fn total(&self) -> &ScopeResult {
        &self.tree.result
    }
}

/// Run a full scan against one provider
pub async fn run_scan<P: Provider>(
    provider: Arc<P>,
    request: ScopeRequest,
    options: &ScanOptions,
    cancel: CancellationToken,
) -> ScanReport {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("scan", provider = provider.name(), run_id = %run_id);

    async move {
        tracing::info!("Starting {} scan", provider.name());
        let gate = CallGate::new(options.max_concurrency, options.retry.clone(), cancel.clone());

        let tree = match request {
            ScopeRequest::Visible => discover_visible(provider.as_ref(), &gate).await,
            ScopeRequest::Roots(roots) => {
                discover(provider.as_ref(), &gate, roots, options.max_scope_depth).await
            }
        };

        let terminals: Vec<Scope> = tree.terminals().into_iter().cloned().collect();
        tracing::info!("Discovered {} terminal scopes", terminals.len());

        let resolver = Arc::new(SkuResolver::new(provider.sku_mode()));
        let collector = Collector::new(provider.clone(), gate, resolver.clone(), options.regions.clone());

        let mut tasks = JoinSet::new();
        for (index, scope) in terminals.iter().cloned().enumerate() {
            let collector = collector.clone();
            tasks.spawn(async move { (index, collector.collect(&scope).await) });
        }

        let mut reports: Vec<Option<TerminalReport>> = vec![None; terminals.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => reports[index] = Some(report),
                Err(e) => tracing::error!("Collection task failed: {}", e),
            }
        }

        let rows: Vec<ScopeResult> = terminals
            .iter()
            .zip(reports)
            .map(|(scope, report)| {
                let report = report.unwrap_or_else(|| {
                    TerminalReport::failed(scope.clone(), FailureKind::Unknown, "collection task failed")
                });
                terminal_result(&report)
            })
            .collect();

        let by_id: HashMap<String, ScopeResult> =
            rows.iter().map(|r| (r.scope.id.clone(), r.clone())).collect();
        let folded = fold_tree(&tree, &by_id);

        let cancelled = cancel.is_cancelled();
        tracing::info!(
            "Scan finished: {} scopes, {} instances, {} vCPUs{}",
            rows.len(),
            folded.result.tally.instances(),
            folded.result.tally.vcpus(),
            if cancelled { " (cancelled)" } else { "" }
        );

        ScanReport {
            provider: provider.name(),
            run_id,
            tree: folded,
            rows,
            sku_lookups: resolver.lookup_count(),
            cancelled,
        }
    }
    .instrument(span)
    .await
}
