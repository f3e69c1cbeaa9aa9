//! Change records emitted after a committed reorder.
//!
//! The engine does not persist audit history itself. It hands one
//! [`ChangeRecord`] per commit to an [`AuditSink`]; the coordinator catches
//! sink errors and panics and logs them, so a broken sink can never undo or
//! fail a commit that already happened.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{NodeId, Order, SiblingNode};
use crate::resolve::ScopeHandle;

/// Before/after values of one row touched by a commit. Rows inserted by an
/// install have no previous order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDelta {
    pub id: NodeId,
    pub order_before: Option<Order>,
    pub order_after: Order,
    pub predecessor_before: Option<NodeId>,
    pub predecessor_after: Option<NodeId>,
}

impl NodeDelta {
    #[must_use]
    pub fn order_changed(&self) -> bool {
        self.order_before != Some(self.order_after)
    }

    #[must_use]
    pub fn predecessor_changed(&self) -> bool {
        self.predecessor_before != self.predecessor_after
    }
}

/// Summary of one committed mutation of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub scope: ScopeHandle,
    /// Persisted state before the commit, sorted by order.
    pub before: Vec<SiblingNode>,
    /// Persisted state after the commit, sorted by order.
    pub after: Vec<SiblingNode>,
    /// Rows whose order or predecessor changed, sorted by id.
    pub changed: Vec<NodeDelta>,
    pub before_digest: String,
    pub after_digest: String,
    pub committed_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Returns `true` if the commit changed no row.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Receiver of committed change records.
pub trait AuditSink: Send + Sync {
    /// Record one committed change.
    ///
    /// # Errors
    ///
    /// Errors are logged by the caller and otherwise ignored.
    fn record(&self, record: &ChangeRecord) -> anyhow::Result<()>;
}

impl<F> AuditSink for F
where
    F: Fn(&ChangeRecord) -> anyhow::Result<()> + Send + Sync,
{
    fn record(&self, record: &ChangeRecord) -> anyhow::Result<()> {
        self(record)
    }
}

/// Default sink: emits each record as an `info!` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &ChangeRecord) -> anyhow::Result<()> {
        tracing::info!(
            target: "runsheet::audit",
            scope = %record.scope,
            changed = record.changed.len(),
            before = %record.before_digest,
            after = %record.after_digest,
            committed_at = %record.committed_at.to_rfc3339(),
            "scope change committed"
        );
        Ok(())
    }
}
