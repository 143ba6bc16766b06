//! Aggregator
//!
//! Folds terminal results up the scope tree. The fold is post-order and
//! purely functional: each non-terminal result is built from its children's
//! results and nothing else, so totals do not depend on the order in which
//! scopes finished collecting.

use super::collector::TerminalReport;
use super::enumerator::ScopeNode;
use super::model::{FailureKind, ScopeResult, ScopeStatus, Tally};
use std::collections::HashMap;
use std::ops::AddAssign;

/// Completion counts behind a scope's status.
///
/// One unit per terminal descendant, plus one per node whose own discovery
/// failed. A subtree with no units is neutral to its parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Health {
    pub ok: usize,
    pub failed: usize,
    pub total: usize,
}

impl Health {
    /// One terminal scope
    pub fn of_terminal(status: &ScopeStatus) -> Self {
        Self {
            ok: usize::from(status.is_ok()),
            failed: usize::from(status.is_failed()),
            total: 1,
        }
    }

    /// A failed discovery on a non-terminal node
    pub fn discovery_failure() -> Self {
        Self {
            ok: 0,
            failed: 1,
            total: 1,
        }
    }

    pub fn status(&self) -> ScopeStatus {
        if self.ok == self.total {
            ScopeStatus::Ok
        } else if self.failed == self.total {
            ScopeStatus::Failed(format!("all {} scopes failed", self.total))
        } else {
            ScopeStatus::PartiallyFailed(format!("{} of {} scopes incomplete", self.total - self.ok, self.total))
        }
    }
}

impl AddAssign for Health {
    fn add_assign(&mut self, other: Self) {
        self.ok += other.ok;
        self.failed += other.failed;
        self.total += other.total;
    }
}

/// A folded scope and its folded children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldedNode {
    pub result: ScopeResult,
    pub health: Health,
    pub children: Vec<FoldedNode>,
}

impl FoldedNode {
    /// Non-terminal nodes in pre-order, with their depth below the root
    pub fn branches(&self) -> Vec<(usize, &ScopeResult)> {
        let mut out = Vec::new();
        self.collect_branches(0, &mut out);
        out
    }

    fn collect_branches<'a>(&'a self, depth: usize, out: &mut Vec<(usize, &'a ScopeResult)>) {
        if self.result.scope.is_terminal() {
            return;
        }
        out.push((depth, &self.result));
        for child in &self.children {
            child.collect_branches(depth + 1, out);
        }
    }
}

/// Turn a terminal report into its scope result
pub fn terminal_result(report: &TerminalReport) -> ScopeResult {
    let mut tally = Tally::from_descriptors(&report.descriptors);
    tally.container_clusters = report.container_clusters;
    ScopeResult {
        scope: report.scope.clone(),
        tally,
        status: report.status.clone(),
        diagnostics: report.diagnostics.clone(),
        warnings: report.warnings.clone(),
    }
}

/// Fold the whole tree; `terminals` maps terminal scope id to its result
pub fn fold_tree(node: &ScopeNode, terminals: &HashMap<String, ScopeResult>) -> FoldedNode {
    if node.scope.is_terminal() {
        let result = terminals.get(&node.scope.id).cloned().unwrap_or_else(|| {
            let mut missing = ScopeResult::empty(node.scope.clone());
            missing.status = ScopeStatus::Failed(FailureKind::Unknown.label().to_string());
            missing
        });
        return FoldedNode {
            health: Health::of_terminal(&result.status),
            result,
            children: Vec::new(),
        };
    }

    let children: Vec<FoldedNode> = node.children.iter().map(|c| fold_tree(c, terminals)).collect();

    let tally = children.iter().map(|c| &c.result.tally).sum();
    let health = combine(
        &children.iter().map(|c| c.health).collect::<Vec<_>>(),
        !node.discovery_errors.is_empty(),
    );

    let mut diagnostics = node.discovery_errors.clone();
    let mut warnings = Vec::new();
    for child in &children {
        diagnostics.extend(child.result.diagnostics.iter().cloned());
        warnings.extend(child.result.warnings.iter().cloned());
    }

    FoldedNode {
        result: ScopeResult {
            scope: node.scope.clone(),
            tally,
            status: health.status(),
            diagnostics,
            warnings,
        },
        health,
        children,
    }
}

/// Fold the tree and return only the root result
pub fn fold(node: &ScopeNode, terminals: &HashMap<String, ScopeResult>) -> ScopeResult {
    fold_tree(node, terminals).result
}

/// Health of a non-terminal scope from its children's health.
///
/// A discovery failure on the node itself counts as one more failed unit.
pub fn combine(children: &[Health], discovery_failed: bool) -> Health {
    let mut health = Health::default();
    for child in children {
        health += *child;
    }
    if discovery_failed {
        health += Health::discovery_failure();
    }
    health
}
