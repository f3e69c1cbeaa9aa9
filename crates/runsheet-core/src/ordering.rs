//! Sibling order validation and normalization.
//!
//! Within one scope, orders must be unique and form exactly `1..N`. This
//! module checks those rules independently of predecessor links
//! and rewrites any sibling set into its canonical `1..N` form.
//!
//! Typed [`Order`] values are positive by construction, so positivity is
//! checked on raw proposals via [`validate_proposed_orders`] before they are
//! turned into typed nodes.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{NodeId, Order, SiblingNode};
use crate::resolve::ScopeHandle;

/// Nodes that share one order value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderCollision {
    pub order: i64,
    pub nodes: Vec<NodeId>,
}

/// Why a sibling ordering is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum OrderingViolation {
    /// Proposed orders that are zero or negative.
    NonPositive { nodes: Vec<NodeId> },
    /// Proposed orders that do not fit the order type.
    OutOfRange { nodes: Vec<NodeId> },
    /// Orders claimed by more than one node, ascending by order.
    Duplicates { collisions: Vec<OrderCollision> },
    /// Orders are unique but do not cover `1..=expected`.
    Gaps { expected: usize, missing: Vec<u32> },
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter().map(NodeId::as_str).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for OrderingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositive { nodes } => {
                write!(f, "non-positive order for: {}", join_ids(nodes))
            }
            Self::OutOfRange { nodes } => write!(f, "order out of range for: {}", join_ids(nodes)),
            Self::Duplicates { collisions } => {
                let parts: Vec<String> = collisions
                    .iter()
                    .map(|c| format!("order {} used by {}", c.order, join_ids(&c.nodes)))
                    .collect();
                write!(f, "duplicate order: {}", parts.join("; "))
            }
            Self::Gaps { expected, missing } => {
                let missing: Vec<String> = missing.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "orders do not cover 1..={expected}; missing {}",
                    missing.join(", ")
                )
            }
        }
    }
}

/// Outcome of an ordering check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "violation", rename_all = "snake_case")]
pub enum OrderingResult {
    Valid,
    Invalid(OrderingViolation),
}

impl OrderingResult {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Convert into a `Result`, keeping the violation as the error.
    ///
    /// # Errors
    ///
    /// Returns the [`OrderingViolation`] when invalid.
    pub fn into_result(self) -> Result<(), OrderingViolation> {
        match self {
            Self::Valid => Ok(()),
            Self::Invalid(violation) => Err(violation),
        }
    }
}

impl From<Result<(), OrderingViolation>> for OrderingResult {
    fn from(value: Result<(), OrderingViolation>) -> Self {
        match value {
            Ok(()) => Self::Valid,
            Err(violation) => Self::Invalid(violation),
        }
    }
}

fn check_entries<'a>(
    entries: impl IntoIterator<Item = (&'a NodeId, i64)>,
    require_contiguous: bool,
) -> Result<(), OrderingViolation> {
    let mut by_order: BTreeMap<i64, Vec<NodeId>> = BTreeMap::new();
    let mut non_positive = Vec::new();
    let mut out_of_range = Vec::new();
    let mut count = 0_usize;

    for (id, raw) in entries {
        count += 1;
        if raw <= 0 {
            non_positive.push(id.clone());
        } else if u32::try_from(raw).is_err() {
            out_of_range.push(id.clone());
        }
        by_order.entry(raw).or_default().push(id.clone());
    }

    if !non_positive.is_empty() {
        non_positive.sort();
        return Err(OrderingViolation::NonPositive {
            nodes: non_positive,
        });
    }
    if !out_of_range.is_empty() {
        out_of_range.sort();
        return Err(OrderingViolation::OutOfRange {
            nodes: out_of_range,
        });
    }

    let collisions: Vec<OrderCollision> = by_order
        .iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(order, ids)| {
            let mut nodes = ids.clone();
            nodes.sort();
            OrderCollision {
                order: *order,
                nodes,
            }
        })
        .collect();
    if !collisions.is_empty() {
        return Err(OrderingViolation::Duplicates { collisions });
    }

    if require_contiguous {
        let missing: Vec<u32> = (1..=count)
            .filter_map(|expected| u32::try_from(expected).ok())
            .filter(|expected| !by_order.contains_key(&i64::from(*expected)))
            .collect();
        if !missing.is_empty() {
            return Err(OrderingViolation::Gaps {
                expected: count,
                missing,
            });
        }
    }

    Ok(())
}

/// Check uniqueness and contiguity of a candidate sibling set.
#[must_use]
pub fn validate_ordering(scope: &ScopeHandle, nodes: &[SiblingNode]) -> OrderingResult {
    let result = check_entries(
        nodes.iter().map(|n| (&n.id, i64::from(n.order.get()))),
        true,
    );
    if let Err(violation) = &result {
        tracing::debug!(scope = %scope, %violation, "ordering rejected");
    }
    result.into()
}

/// Check raw proposed orders: positivity, range, and that no two proposals
/// target the same order. Contiguity is not required of a partial proposal.
#[must_use]
pub fn validate_proposed_orders(
    scope: &ScopeHandle,
    proposals: &BTreeMap<NodeId, i64>,
) -> OrderingResult {
    let result = check_entries(proposals.iter().map(|(id, raw)| (id, *raw)), false);
    if let Err(violation) = &result {
        tracing::debug!(scope = %scope, %violation, "proposed orders rejected");
    }
    result.into()
}

/// Rewrite a sibling set to orders `1..N`.
///
/// Nodes are sorted by current order with ties broken by id, then numbered
/// in that sequence. The result is sorted by its new order. Relative rank is
/// preserved for every pair of nodes with distinct orders, and
/// `normalize(normalize(x)) == normalize(x)`.
#[must_use]
pub fn normalize(scope: &ScopeHandle, nodes: &[SiblingNode]) -> Vec<SiblingNode> {
    let mut sorted = nodes.to_vec();
    sorted.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

    let mut renumbered = 0_usize;
    for (index, node) in sorted.iter_mut().enumerate() {
        if let Ok(order) = Order::from_index(index) {
            if node.order != order {
                node.order = order;
                renumbered += 1;
            }
        }
    }
    if renumbered > 0 {
        tracing::trace!(scope = %scope, renumbered, "normalized sibling orders");
    }
    sorted
}

/// Returns `true` if `nodes` already hold unique orders `1..N`.
#[must_use]
pub fn is_normalized(nodes: &[SiblingNode]) -> bool {
    check_entries(
        nodes.iter().map(|n| (&n.id, i64::from(n.order.get()))),
        true,
    )
    .is_ok()
}
