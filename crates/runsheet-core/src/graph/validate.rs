//! Predecessor-graph validation for one sibling scope.
//!
//! # Overview
//!
//! Each sibling may name one predecessor in the same scope. Those links form
//! a directed graph that must stay a forest: no cycles, no self-loops, and no
//! chain longer than the configured depth bound.
//!
//! # Algorithm
//!
//! For every node (in `(order, id)` order, so reports are deterministic),
//! walk backward along predecessor links, keeping the path of this walk.
//! A walk stops when it reaches:
//!
//! - a node without a predecessor: the chain ends, no cycle on this path;
//! - a node already settled by an earlier walk: its depth is known;
//! - a node already on this walk's path: a cycle, reported as the path from
//!   that node back to itself (first and last element equal).
//!
//! Every node is settled with its depth (number of links to its chain root)
//! once its walk finishes, so each node is walked at most once and the whole
//! pass is O(N) time, comfortably within O(N · depth). Cycles take precedence
//! over depth violations; a depth violation is only reported for scopes that
//! are acyclic.
//!
//! The validator never mutates its input. It runs on staged state before a
//! commit and again on persisted state after it.

#![allow(clippy::module_name_repetitions)]

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::model::{NodeId, SiblingNode};
use crate::resolve::ScopeHandle;

/// Default bound on predecessor chain length, in links.
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 50;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A predecessor cycle, as the path of ids walked backward from the first
/// repeated node to itself. For `A.pred = C, C.pred = A` the path is
/// `[A, C, A]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub path: Vec<NodeId>,
}

impl CycleReport {
    /// Number of distinct nodes in the cycle.
    #[must_use]
    pub fn cycle_len(&self) -> usize {
        self.path.len().saturating_sub(1)
    }

    /// Returns `true` if a node names itself as predecessor.
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.cycle_len() == 1
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_self_loop() {
            if let Some(node) = self.path.first() {
                return write!(f, "self-loop on '{node}' (node precedes itself)");
            }
        }
        let joined = self
            .path
            .iter()
            .map(NodeId::as_str)
            .collect::<Vec<_>>()
            .join(" → ");
        write!(f, "cycle of {} nodes: {joined}", self.cycle_len())
    }
}

/// Why a scope's predecessor graph is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GraphViolation {
    /// Predecessor links form a loop.
    Cycle(CycleReport),
    /// A chain is longer than the depth bound. `start` is the deepest node.
    ChainTooDeep {
        start: NodeId,
        depth: usize,
        limit: usize,
    },
    /// A predecessor id names no node of this scope.
    DanglingPredecessor { node: NodeId, predecessor: NodeId },
    /// A node's `(parent, level)` differs from the scope being validated.
    ForeignNode { node: NodeId },
    /// The same node id appears twice in the input.
    DuplicateNode { node: NodeId },
}

impl fmt::Display for GraphViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cycle(report) => write!(f, "{report}"),
            Self::ChainTooDeep {
                start,
                depth,
                limit,
            } => write!(
                f,
                "predecessor chain ending at '{start}' has {depth} links (limit {limit})"
            ),
            Self::DanglingPredecessor { node, predecessor } => write!(
                f,
                "'{node}' names predecessor '{predecessor}' which is not in this scope"
            ),
            Self::ForeignNode { node } => write!(f, "'{node}' belongs to a different scope"),
            Self::DuplicateNode { node } => write!(f, "'{node}' appears more than once"),
        }
    }
}

/// Outcome of [`DependencyGraphValidator::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "violation", rename_all = "snake_case")]
pub enum ValidationResult {
    Valid,
    Invalid(GraphViolation),
}

impl ValidationResult {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Convert into a `Result`, keeping the violation as the error.
    ///
    /// # Errors
    ///
    /// Returns the [`GraphViolation`] when invalid.
    pub fn into_result(self) -> Result<(), GraphViolation> {
        match self {
            Self::Valid => Ok(()),
            Self::Invalid(violation) => Err(violation),
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Cycle and depth checker for one scope's predecessor links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyGraphValidator {
    max_depth: usize,
}

impl Default for DependencyGraphValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHAIN_DEPTH)
    }
}

impl DependencyGraphValidator {
    #[must_use]
    pub const fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Validate the full, authoritative node set of `scope`.
    ///
    /// Structural problems (foreign or duplicated nodes, dangling
    /// predecessors) are reported first, then cycles, then depth.
    #[must_use]
    pub fn validate(&self, scope: &ScopeHandle, nodes: &[SiblingNode]) -> ValidationResult {
        match self.check(scope, nodes) {
            Ok(()) => ValidationResult::Valid,
            Err(violation) => {
                tracing::debug!(scope = %scope, %violation, "predecessor graph rejected");
                ValidationResult::Invalid(violation)
            }
        }
    }

    fn check(&self, scope: &ScopeHandle, nodes: &[SiblingNode]) -> Result<(), GraphViolation> {
        let mut index: HashMap<&NodeId, &SiblingNode> = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if !node.belongs_to(scope.parent(), scope.level()) {
                return Err(GraphViolation::ForeignNode {
                    node: node.id.clone(),
                });
            }
            if index.insert(&node.id, node).is_some() {
                return Err(GraphViolation::DuplicateNode {
                    node: node.id.clone(),
                });
            }
        }

        let mut ordered: Vec<&SiblingNode> = nodes.iter().collect();
        ordered.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

        for node in &ordered {
            if let Some(pred) = &node.predecessor {
                if !index.contains_key(pred) {
                    return Err(GraphViolation::DanglingPredecessor {
                        node: node.id.clone(),
                        predecessor: pred.clone(),
                    });
                }
            }
        }

        // Depth of every node proven to sit on an acyclic chain.
        let mut settled: HashMap<&NodeId, usize> = HashMap::with_capacity(nodes.len());
        let mut too_deep: Option<GraphViolation> = None;

        for start in &ordered {
            if settled.contains_key(&start.id) {
                continue;
            }

            let mut path: Vec<&NodeId> = vec![&start.id];
            let mut on_path: HashSet<&NodeId> = HashSet::from([&start.id]);
            let mut cursor: &SiblingNode = start;

            let root_depth = loop {
                let Some(pred) = cursor.predecessor.as_ref() else {
                    break 0;
                };
                if let Some(depth) = settled.get(pred) {
                    break depth + 1;
                }
                if on_path.contains(pred) {
                    let first = path.iter().position(|id| *id == pred).unwrap_or(0);
                    let mut cycle: Vec<NodeId> =
                        path[first..].iter().map(|id| (*id).clone()).collect();
                    cycle.push(pred.clone());
                    return Err(GraphViolation::Cycle(CycleReport { path: cycle }));
                }
                // Dangling links were rejected above.
                let Some(next) = index.get(pred) else {
                    break 0;
                };
                path.push(pred);
                on_path.insert(pred);
                cursor = *next;
            };

            // path[last] sits at root_depth; each earlier entry is one link deeper.
            let last = path.len() - 1;
            for (pos, id) in path.iter().enumerate() {
                let depth = root_depth + (last - pos);
                settled.insert(*id, depth);
                if depth > self.max_depth && too_deep.is_none() {
                    too_deep = Some(GraphViolation::ChainTooDeep {
                        start: (*id).clone(),
                        depth,
                        limit: self.max_depth,
                    });
                }
            }
        }

        too_deep.map_or(Ok(()), Err)
    }

    /// Length in links of the longest predecessor chain, for acyclic scopes.
    ///
    /// Returns `None` if the graph is invalid for any reason other than depth.
    #[must_use]
    pub fn longest_chain(scope: &ScopeHandle, nodes: &[SiblingNode]) -> Option<usize> {
        let unbounded = Self::new(usize::MAX);
        if unbounded.check(scope, nodes).is_err() {
            return None;
        }
        let index: HashMap<&NodeId, &SiblingNode> = nodes.iter().map(|n| (&n.id, n)).collect();
        let mut memo: HashMap<&NodeId, usize> = HashMap::with_capacity(nodes.len());
        let mut longest = 0;
        for node in nodes {
            let mut stack: Vec<&SiblingNode> = vec![node];
            while let Some(top) = stack.last().copied() {
                if memo.contains_key(&top.id) {
                    stack.pop();
                    continue;
                }
                match top.predecessor.as_ref() {
                    None => {
                        memo.insert(&top.id, 0);
                        stack.pop();
                    }
                    Some(pred) => match memo.get(pred).copied() {
                        Some(depth) => {
                            memo.insert(&top.id, depth + 1);
                            stack.pop();
                        }
                        None => match index.get(pred) {
                            Some(next) => stack.push(*next),
                            None => {
                                memo.insert(&top.id, 0);
                                stack.pop();
                            }
                        },
                    },
                }
            }
            longest = longest.max(memo.get(&node.id).copied().unwrap_or(0));
        }
        Some(longest)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
