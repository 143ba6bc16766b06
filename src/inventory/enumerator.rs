//! Scope Enumerator
//!
//! Discovers the scope tree below one or more requested roots. The walk is
//! depth-first pre-order: a node's child folders are fully resolved (sibling
//! branches concurrently) before its own terminal children are attached.
//! A depth cap and an ancestor check stop malformed hierarchies; both are
//! recorded as discovery failures on the node where they were detected.

use super::classify::classify;
use super::error::DiscoveryError;
use super::model::{Diagnostic, FailureKind, Scope, ScopeKind};
use super::provider::Provider;
use super::retry::CallGate;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashSet;

/// Default depth cap for folder nesting
pub const DEFAULT_MAX_SCOPE_DEPTH: usize = 12;

/// Id of the synthetic node holding every requested root
pub const RUN_ROOT_ID: &str = "*";

/// A discovered scope and its subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeNode {
    pub scope: Scope,
    pub children: Vec<ScopeNode>,
    /// Failures while listing this node's children
    pub discovery_errors: Vec<Diagnostic>,
}

impl ScopeNode {
    pub fn leaf(scope: Scope) -> Self {
        Self {
            scope,
            children: Vec::new(),
            discovery_errors: Vec::new(),
        }
    }

    /// Synthetic root above the requested scopes
    pub fn root(children: Vec<ScopeNode>) -> Self {
        Self {
            scope: Scope::new(RUN_ROOT_ID, ScopeKind::Organization).with_name("all requested scopes"),
            children,
            discovery_errors: Vec::new(),
        }
    }

    pub fn with_error(mut self, diagnostic: Diagnostic) -> Self {
        self.discovery_errors.push(diagnostic);
        self
    }

    /// Terminal scopes in pre-order
    pub fn terminals(&self) -> Vec<&Scope> {
        let mut out = Vec::new();
        self.collect_terminals(&mut out);
        out
    }

    fn collect_terminals<'a>(&'a self, out: &mut Vec<&'a Scope>) {
        if self.scope.is_terminal() {
            out.push(&self.scope);
        }
        for child in &self.children {
            child.collect_terminals(out);
        }
    }

    /// Drop repeated terminal scopes, keeping the first occurrence in pre-order
    pub fn dedupe_terminals(&mut self) -> usize {
        let mut seen = HashSet::new();
        self.dedupe_with(&mut seen)
    }

    fn dedupe_with(&mut self, seen: &mut HashSet<String>) -> usize {
        let mut removed = 0;
        self.children.retain_mut(|child| {
            if child.scope.is_terminal() {
                let first = seen.insert(child.scope.id.clone());
                if !first {
                    removed += 1;
                }
                first
            } else {
                removed += child.dedupe_with(seen);
                true
            }
        });
        removed
    }
}

/// Walk the hierarchy below each requested root
pub async fn discover<P: Provider>(
    provider: &P,
    gate: &CallGate,
    roots: Vec<Scope>,
    max_depth: usize,
) -> ScopeNode {
    let branches = roots
        .into_iter()
        .map(|root| visit(provider, gate, root, Vec::new(), max_depth));
    let mut tree = ScopeNode::root(join_all(branches).await);

    let removed = tree.dedupe_terminals();
    if removed > 0 {
        tracing::info!("Dropped {} terminal scopes reached through overlapping roots", removed);
    }
    tree
}

/// Flat listing of every terminal scope the caller can see
pub async fn discover_visible<P: Provider>(provider: &P, gate: &CallGate) -> ScopeNode {
    let listed = gate
        .call("list visible scopes", || provider.list_visible_terminals())
        .await;

    match listed {
        Ok(scopes) => {
            tracing::info!("Found {} visible {} scopes", scopes.len(), provider.name());
            ScopeNode::root(dedupe_by_id(scopes).into_iter().map(ScopeNode::leaf).collect())
        }
        Err(e) => {
            tracing::error!("Failed to list visible scopes: {:#}", e);
            let kind = classify(&e);
            ScopeNode::root(Vec::new()).with_error(Diagnostic::new(RUN_ROOT_ID, kind, format!("{:#}", e)))
        }
    }
}

fn visit<'a, P: Provider>(
    provider: &'a P,
    gate: &'a CallGate,
    scope: Scope,
    ancestors: Vec<String>,
    max_depth: usize,
) -> BoxFuture<'a, ScopeNode> {
    async move {
        if ancestors.contains(&scope.id) {
            let err = DiscoveryError::Cycle(scope.id.clone());
            tracing::error!("{}", err);
            let diagnostic = Diagnostic::new(&scope.id, FailureKind::Unknown, err.to_string());
            return ScopeNode::leaf(scope).with_error(diagnostic);
        }

        if scope.is_terminal() {
            return ScopeNode::leaf(scope);
        }

        if ancestors.len() >= max_depth {
            let err = DiscoveryError::DepthExceeded {
                scope_id: scope.id.clone(),
                limit: max_depth,
            };
            tracing::error!("{}", err);
            let diagnostic = Diagnostic::new(&scope.id, FailureKind::Unknown, err.to_string());
            return ScopeNode::leaf(scope).with_error(diagnostic);
        }

        let mut node = ScopeNode::leaf(scope.clone());

        let folders = gate
            .call(&format!("list folders under {}", scope.id), || {
                provider.list_child_folders(&scope)
            })
            .await
            .unwrap_or_else(|e| {
                node.discovery_errors.push(discovery_failure(&scope, "folders", &e));
                Vec::new()
            });

        let mut lineage = ancestors;
        lineage.push(scope.id.clone());

        let branches = dedupe_by_id(folders)
            .into_iter()
            .map(|folder| visit(provider, gate, folder, lineage.clone(), max_depth));
        node.children = join_all(branches).await;

        let terminals = gate
            .call(&format!("list terminal scopes under {}", scope.id), || {
                provider.list_terminal_children(&scope)
            })
            .await
            .unwrap_or_else(|e| {
                node.discovery_errors.push(discovery_failure(&scope, "terminal scopes", &e));
                Vec::new()
            });

        node.children
            .extend(dedupe_by_id(terminals).into_iter().map(ScopeNode::leaf));

        tracing::debug!(
            "Discovered {} children under {} ({} errors)",
            node.children.len(),
            scope.id,
            node.discovery_errors.len()
        );
        node
    }
    .boxed()
}

fn discovery_failure(scope: &Scope, what: &str, error: &anyhow::Error) -> Diagnostic {
    let kind = classify(error);
    tracing::warn!("Failed to list {} under {}: {:#}", what, scope.id, error);
    Diagnostic::new(&scope.id, kind, format!("{:#}", error))
}

fn dedupe_by_id(scopes: Vec<Scope>) -> Vec<Scope> {
    let mut seen = HashSet::new();
    scopes
        .into_iter()
        .filter(|s| seen.insert(s.id.clone()))
        .collect()
}
