//! Transactional reorder pipeline.
//!
//! # Overview
//!
//! Every mutation of a scope runs through the same state machine:
//!
//! ```text
//! Staged → PreValidated → Committing → PostValidated → Committed
//!    └──────────┴─────────────┴──────────────┴──────→ Aborted
//! ```
//!
//! - **Staged**: the scope lock is held, the scope is re-resolved and
//!   loaded, and the proposal is overlaid on it in memory.
//! - **PreValidated**: proposed orders are checked (positive, in range, no
//!   two nodes on one order), gaps are closed by normalization, and the
//!   predecessor graph is validated. Nothing has been written yet.
//! - **Committing**: changed rows are written in one storage transaction.
//! - **PostValidated**: the scope is re-read and checked again, strictly.
//!   A failure here means storage accepted a state that breaks the ordering
//!   invariants; it is reported as [`ReorderError::FatalConsistency`] and
//!   never retried.
//! - **Committed**: the lock is released and a [`ChangeRecord`] goes to the
//!   audit sink.
//!
//! Any failure before Committing leaves the persisted scope byte-identical.
//! The commit itself is conditional on the scope still matching the digest
//! it was staged from; if another writer slipped in, the pipeline restages
//! once from the fresh rows and reports a [`ValidationError`] if the
//! proposal no longer fits.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::audit::{AuditSink, ChangeRecord, NodeDelta, TracingAuditSink};
use crate::config::{self, EngineConfig};
use crate::error::ErrorCode;
use crate::graph::{CycleReport, DependencyGraphValidator, GraphViolation, ValidationResult};
use crate::lock::{LockError, ScopeLock};
use crate::model::{Level, NodeId, Order, ParentId, SiblingNode};
use crate::ordering::{
    self, OrderCollision, OrderingResult, OrderingViolation, validate_ordering,
    validate_proposed_orders,
};
use crate::resolve::{self, ResolveError, ScopeHandle};
use crate::store::{NodeChange, ParentRecord, ScopeStore, SqliteStore, StoreConflict, scope_digest};

/// Stage/commit rounds before a moving scope is reported as changed.
const STAGE_ATTEMPTS: u32 = 2;

// ---------------------------------------------------------------------------
// Requests and phases
// ---------------------------------------------------------------------------

/// Proposed changes to one scope.
///
/// `orders` maps node ids to raw proposed orders (validated for positivity
/// and range in the pipeline). `predecessors` maps node ids to their new
/// predecessor, `None` clearing the link. Nodes not mentioned keep their
/// current values. An empty request is a repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorderRequest {
    pub orders: BTreeMap<NodeId, i64>,
    pub predecessors: BTreeMap<NodeId, Option<NodeId>>,
}

impl ReorderRequest {
    #[must_use]
    pub const fn from_orders(orders: BTreeMap<NodeId, i64>) -> Self {
        Self {
            orders,
            predecessors: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_order(mut self, node: NodeId, order: i64) -> Self {
        self.orders.insert(node, order);
        self
    }

    #[must_use]
    pub fn with_predecessor(mut self, node: NodeId, predecessor: Option<NodeId>) -> Self {
        self.predecessors.insert(node, predecessor);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.predecessors.is_empty()
    }
}

/// Pipeline states of one reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderPhase {
    Staged,
    PreValidated,
    Committing,
    PostValidated,
    Committed,
    Aborted,
}

impl ReorderPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Staged => "staged",
            Self::PreValidated => "pre_validated",
            Self::Committing => "committing",
            Self::PostValidated => "post_validated",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ReorderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter().map(NodeId::as_str).collect::<Vec<_>>().join(", ")
}

fn describe_collisions(collisions: &[OrderCollision]) -> String {
    collisions
        .iter()
        .map(|c| format!("order {} claimed by {}", c.order, join_ids(&c.nodes)))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A proposal or candidate state that breaks an ordering invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("duplicate order: {}", describe_collisions(collisions))]
    DuplicateOrder { collisions: Vec<OrderCollision> },

    #[error("order must be positive for: {}", join_ids(nodes))]
    NonPositiveOrder { nodes: Vec<NodeId> },

    #[error("order out of range for: {}", join_ids(nodes))]
    OrderOutOfRange { nodes: Vec<NodeId> },

    #[error("predecessor {0}")]
    CycleDetected(CycleReport),

    #[error("predecessor chain ending at '{start}' has {depth} links (limit {limit})")]
    ChainTooDeep {
        start: NodeId,
        depth: usize,
        limit: usize,
    },

    #[error("orders do not cover 1..={expected}; missing {missing:?}")]
    Gaps { expected: usize, missing: Vec<u32> },

    #[error("not in this scope: {}", join_ids(nodes))]
    UnknownNode { nodes: Vec<NodeId> },

    #[error("'{node}' names predecessor '{predecessor}' which is not in this scope")]
    DanglingPredecessor { node: NodeId, predecessor: NodeId },

    #[error("'{node}' belongs to a different scope")]
    ForeignNode { node: NodeId },

    #[error("'{node}' appears more than once")]
    DuplicateNode { node: NodeId },

    #[error("scope already holds {existing} nodes")]
    ScopeNotEmpty { existing: usize },

    #[error("scope changed while staged (expected {expected}, found {actual})")]
    ScopeChanged { expected: String, actual: String },
}

impl ValidationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateOrder { .. } => ErrorCode::DuplicateOrder,
            Self::NonPositiveOrder { .. } => ErrorCode::NonPositiveOrder,
            Self::OrderOutOfRange { .. } => ErrorCode::OrderOutOfRange,
            Self::CycleDetected(_) => ErrorCode::CycleDetected,
            Self::ChainTooDeep { .. } => ErrorCode::ChainTooDeep,
            Self::Gaps { .. } => ErrorCode::OrderGap,
            Self::UnknownNode { .. } => ErrorCode::UnknownNode,
            Self::DanglingPredecessor { .. } => ErrorCode::DanglingPredecessor,
            Self::ForeignNode { .. } => ErrorCode::ForeignNode,
            Self::DuplicateNode { .. } => ErrorCode::DuplicateNode,
            Self::ScopeNotEmpty { .. } => ErrorCode::ScopeNotEmpty,
            Self::ScopeChanged { .. } => ErrorCode::ScopeChanged,
        }
    }
}

impl From<GraphViolation> for ValidationError {
    fn from(violation: GraphViolation) -> Self {
        match violation {
            GraphViolation::Cycle(report) => Self::CycleDetected(report),
            GraphViolation::ChainTooDeep {
                start,
                depth,
                limit,
            } => Self::ChainTooDeep {
                start,
                depth,
                limit,
            },
            GraphViolation::DanglingPredecessor { node, predecessor } => {
                Self::DanglingPredecessor { node, predecessor }
            }
            GraphViolation::ForeignNode { node } => Self::ForeignNode { node },
            GraphViolation::DuplicateNode { node } => Self::DuplicateNode { node },
        }
    }
}

impl From<OrderingViolation> for ValidationError {
    fn from(violation: OrderingViolation) -> Self {
        match violation {
            OrderingViolation::NonPositive { nodes } => Self::NonPositiveOrder { nodes },
            OrderingViolation::OutOfRange { nodes } => Self::OrderOutOfRange { nodes },
            OrderingViolation::Duplicates { collisions } => Self::DuplicateOrder { collisions },
            OrderingViolation::Gaps { expected, missing } => Self::Gaps { expected, missing },
        }
    }
}

/// What a post-commit check found wrong with persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyViolation {
    Ordering { violation: OrderingViolation },
    Graph { violation: GraphViolation },
    /// Persisted rows differ from the state that was validated and written.
    Diverged { expected: String, actual: String },
    /// The scope could not be read back after commit.
    Unreadable { message: String },
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordering { violation } => write!(f, "{violation}"),
            Self::Graph { violation } => write!(f, "{violation}"),
            Self::Diverged { expected, actual } => {
                write!(f, "persisted digest {actual} differs from staged {expected}")
            }
            Self::Unreadable { message } => write!(f, "re-read failed: {message}"),
        }
    }
}

/// Error returned by coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum ReorderError {
    #[error("no {level} container '{parent}'")]
    NotFound { parent: ParentId, level: Level },

    #[error("scope {scope} has no recorded master origin")]
    NoOrigin { scope: String },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("scope {scope} is locked by another writer (waited {waited:?})")]
    Contention { scope: ScopeHandle, waited: Duration },

    #[error("scope {scope} is inconsistent after commit: {violation}")]
    FatalConsistency {
        scope: ScopeHandle,
        violation: ConsistencyViolation,
    },

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl ReorderError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } | Self::NoOrigin { .. } => ErrorCode::ScopeNotFound,
            Self::Validation(err) => err.code(),
            Self::Contention { .. } => ErrorCode::LockContention,
            Self::FatalConsistency { .. } => ErrorCode::FatalConsistency,
            Self::Storage(_) => ErrorCode::StorageFailure,
        }
    }

    /// Coarse category for transport layers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } | Self::NoOrigin { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::Contention { .. } => "contention",
            Self::FatalConsistency { .. } => "fatal_consistency",
            Self::Storage(_) => "storage",
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

impl From<ResolveError> for ReorderError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound { parent, level } => Self::NotFound { parent, level },
            ResolveError::NoOrigin { scope } => Self::NoOrigin { scope },
            ResolveError::Storage(err) => Self::Storage(err),
        }
    }
}

pub type ReorderResult = Result<ChangeRecord, ReorderError>;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Read-only health report of a persisted scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeReport {
    pub scope: ScopeHandle,
    pub nodes: usize,
    pub digest: String,
    pub ordering: OrderingResult,
    pub graph: ValidationResult,
    /// Longest predecessor chain in links; absent when the graph is invalid.
    pub longest_chain: Option<usize>,
}

impl ScopeReport {
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.ordering.is_valid() && self.graph.is_valid()
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Entry point for every read and write of sibling scopes.
pub struct ReorderCoordinator<S: ScopeStore> {
    store: S,
    config: EngineConfig,
    validator: DependencyGraphValidator,
    audit: Box<dyn AuditSink>,
}

impl<S: ScopeStore> fmt::Debug for ReorderCoordinator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReorderCoordinator")
            .field("config", &self.config)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl ReorderCoordinator<SqliteStore> {
    /// Open the project store under `project_root` with `config`.
    ///
    /// A relative lock directory is resolved against `project_root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_project(project_root: &Path, config: EngineConfig) -> anyhow::Result<Self> {
        let store = SqliteStore::open(&config::store_path(project_root))?;
        Ok(Self::new(store, config.anchored_at(project_root)))
    }
}

impl<S: ScopeStore> ReorderCoordinator<S> {
    /// Wrap `store` with `config` as given.
    ///
    /// A relative `locking.lock_dir` is used as is, so it resolves against
    /// the process working directory. Processes sharing one store must
    /// agree on the lock directory; pass an absolute path or use
    /// [`EngineConfig::anchored_at`].
    #[must_use]
    pub fn new(store: S, config: EngineConfig) -> Self {
        let validator = DependencyGraphValidator::new(config.ordering.max_chain_depth);
        Self {
            store,
            config,
            validator,
            audit: Box::new(TracingAuditSink),
        }
    }

    #[must_use]
    pub fn with_audit_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.audit = Box::new(sink);
        self
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn validator(&self) -> &DependencyGraphValidator {
        &self.validator
    }

    /// Resolve `(parent, level)` to a scope handle.
    ///
    /// # Errors
    ///
    /// [`ReorderError::NotFound`] if no such container exists at `level`.
    pub fn resolve_scope(
        &self,
        parent: &ParentId,
        level: Level,
    ) -> Result<ScopeHandle, ReorderError> {
        Ok(resolve::resolve_scope(&self.store, parent, level)?)
    }

    /// Master scope an instance scope was created from.
    ///
    /// # Errors
    ///
    /// [`ReorderError::NoOrigin`] for master scopes and instances without a
    /// recorded origin; [`ReorderError::NotFound`] if the master is gone.
    pub fn resolve_origin(&self, scope: &ScopeHandle) -> Result<ScopeHandle, ReorderError> {
        Ok(resolve::resolve_origin(&self.store, scope)?)
    }

    /// Committed sibling set of `scope`, sorted by order. Takes no lock.
    ///
    /// # Errors
    ///
    /// Returns [`ReorderError::Storage`] on read failures.
    pub fn list_scope(&self, scope: &ScopeHandle) -> Result<Vec<SiblingNode>, ReorderError> {
        Ok(self.store.load_scope(scope)?)
    }

    /// Run both validators on the committed state of `scope` without
    /// changing it.
    ///
    /// # Errors
    ///
    /// Returns [`ReorderError::Storage`] on read failures.
    pub fn check(&self, scope: &ScopeHandle) -> Result<ScopeReport, ReorderError> {
        let nodes = self.store.load_scope(scope)?;
        let graph = self.validator.validate(scope, &nodes);
        let longest_chain = if graph.is_valid() {
            DependencyGraphValidator::longest_chain(scope, &nodes)
        } else {
            None
        };
        Ok(ScopeReport {
            scope: scope.clone(),
            nodes: nodes.len(),
            digest: scope_digest(&nodes),
            ordering: validate_ordering(scope, &nodes),
            graph,
            longest_chain,
        })
    }

    /// Reassign orders of some siblings of `scope`.
    ///
    /// # Errors
    ///
    /// See [`ReorderCoordinator::apply`].
    pub fn reorder(&self, scope: &ScopeHandle, orders: &BTreeMap<NodeId, i64>) -> ReorderResult {
        self.apply(scope, &ReorderRequest::from_orders(orders.clone()))
    }

    /// Normalize `scope` to orders `1..N` without other changes.
    ///
    /// # Errors
    ///
    /// See [`ReorderCoordinator::apply`].
    pub fn repair(&self, scope: &ScopeHandle) -> ReorderResult {
        self.apply(scope, &ReorderRequest::default())
    }

    /// Apply order and predecessor changes to `scope` atomically.
    ///
    /// # Errors
    ///
    /// - [`ReorderError::Contention`] if the scope lock is not acquired in
    ///   time; nothing is read or written.
    /// - [`ReorderError::NotFound`] if the container disappeared.
    /// - [`ReorderError::Validation`] if the proposal breaks an invariant;
    ///   nothing is written. This includes a proposal that stops fitting
    ///   after another writer changed the scope between staging and commit.
    /// - [`ReorderError::Storage`] if the write fails; the transaction is
    ///   rolled back.
    /// - [`ReorderError::FatalConsistency`] if the committed state fails the
    ///   post-commit check.
    pub fn apply(&self, scope: &ScopeHandle, request: &ReorderRequest) -> ReorderResult {
        let span = tracing::debug_span!("reorder", scope = %scope);
        let _entered = span.enter();
        let started = Instant::now();

        let lock = self.acquire(scope)?;
        let mut attempt = 1;
        let (before, candidate) = loop {
            let before = self.load_locked(scope)?;

            enter(scope, ReorderPhase::Staged);
            let staged = stage(scope, &before, request)
                .map_err(|err| abort(scope, ReorderPhase::Staged, err))?;

            let candidate = self
                .pre_validate(scope, &staged)
                .map_err(|err| abort(scope, ReorderPhase::PreValidated, err))?;
            enter(scope, ReorderPhase::PreValidated);

            let changes = diff(&before, &candidate);
            enter(scope, ReorderPhase::Committing);
            let Err(err) = self
                .store
                .commit_changes(scope, &scope_digest(&before), &changes)
            else {
                break (before, candidate);
            };

            match stale_digests(&err) {
                Some(_) if attempt < STAGE_ATTEMPTS => {
                    tracing::warn!(scope = %scope, attempt, "scope changed after staging, restaging");
                    attempt += 1;
                }
                Some((expected, actual)) => {
                    let err = ValidationError::ScopeChanged { expected, actual };
                    return Err(abort(scope, ReorderPhase::Committing, err.into()));
                }
                None => {
                    let context = format!("commit {} changes to {scope}", changes.len());
                    let err = ReorderError::Storage(err.context(context));
                    return Err(abort(scope, ReorderPhase::Committing, err));
                }
            }
        };

        let after = self.post_validate(scope, &candidate)?;
        enter(scope, ReorderPhase::PostValidated);
        lock.release();

        let record = change_record(scope, before, after);
        enter(scope, ReorderPhase::Committed);
        tracing::info!(
            scope = %scope,
            changed = record.changed.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "reorder committed"
        );
        self.emit(&record);
        Ok(record)
    }

    /// Persist a freshly copied sibling set into an empty scope.
    ///
    /// Used by plan instantiation. The nodes are validated strictly (no
    /// gaps tolerated) and inserted in one transaction.
    ///
    /// # Errors
    ///
    /// [`ValidationError::ScopeNotEmpty`] if the scope already holds nodes,
    /// any other [`ValidationError`] for invalid input, and the lock, storage
    /// and consistency errors of [`ReorderCoordinator::apply`].
    pub fn install_scope(&self, scope: &ScopeHandle, nodes: Vec<SiblingNode>) -> ReorderResult {
        self.install(scope, None, nodes)
    }

    /// Register the container `record` and install `nodes` as its scope.
    ///
    /// The container row and the sibling rows are written in one
    /// transaction: if the nodes are rejected, the container is not
    /// created either.
    ///
    /// # Errors
    ///
    /// As [`ReorderCoordinator::install_scope`]; a container that already
    /// exists fails the insert with [`ReorderError::Storage`].
    pub fn install_new_scope(&self, record: &ParentRecord, nodes: Vec<SiblingNode>) -> ReorderResult {
        let scope = ScopeHandle::new(record.id.clone(), record.level, record.kind);
        self.install(&scope, Some(record), nodes)
    }

    fn install(
        &self,
        scope: &ScopeHandle,
        register: Option<&ParentRecord>,
        nodes: Vec<SiblingNode>,
    ) -> ReorderResult {
        let span = tracing::debug_span!("install", scope = %scope);
        let _entered = span.enter();

        let lock = self.acquire(scope)?;
        let existing = if register.is_some() {
            Vec::new()
        } else {
            self.load_locked(scope)?
        };
        enter(scope, ReorderPhase::Staged);
        if !existing.is_empty() {
            let err = ValidationError::ScopeNotEmpty {
                existing: existing.len(),
            };
            return Err(abort(scope, ReorderPhase::Staged, err.into()));
        }

        let mut candidate = nodes;
        candidate.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        self.strict_check(scope, &candidate)
            .map_err(|err| abort(scope, ReorderPhase::PreValidated, err.into()))?;
        enter(scope, ReorderPhase::PreValidated);

        enter(scope, ReorderPhase::Committing);
        if let Err(err) = self.store.insert_scope(scope, register, &candidate) {
            let populated = match err.downcast_ref::<StoreConflict>() {
                Some(StoreConflict::NotEmpty { existing, .. }) => Some(*existing),
                _ => None,
            };
            let err = if let Some(existing) = populated {
                ReorderError::from(ValidationError::ScopeNotEmpty { existing })
            } else {
                let context = format!("install {} nodes into {scope}", candidate.len());
                ReorderError::Storage(err.context(context))
            };
            return Err(abort(scope, ReorderPhase::Committing, err));
        }

        let after = self.post_validate(scope, &candidate)?;
        enter(scope, ReorderPhase::PostValidated);
        lock.release();

        let record = change_record(scope, existing, after);
        enter(scope, ReorderPhase::Committed);
        tracing::info!(scope = %scope, nodes = record.after.len(), "scope installed");
        self.emit(&record);
        Ok(record)
    }

    // -- pipeline steps ------------------------------------------------------

    fn acquire(&self, scope: &ScopeHandle) -> Result<ScopeLock, ReorderError> {
        ScopeLock::acquire(&self.config.locking.lock_dir, scope, self.config.lock_timeout()).map_err(
            |err| match err {
                LockError::Timeout { waited, .. } => {
                    tracing::warn!(scope = %scope, ?waited, "scope lock contention");
                    ReorderError::Contention {
                        scope: scope.clone(),
                        waited,
                    }
                }
                LockError::IoError(io) => {
                    ReorderError::Storage(anyhow::Error::new(io).context("acquire scope lock"))
                }
            },
        )
    }

    /// Re-resolve the container under the lock and load its committed rows.
    fn load_locked(&self, scope: &ScopeHandle) -> Result<Vec<SiblingNode>, ReorderError> {
        if self.store.find_parent(scope.parent(), scope.level())?.is_none() {
            return Err(ReorderError::NotFound {
                parent: scope.parent().clone(),
                level: scope.level(),
            });
        }
        Ok(self.store.load_scope(scope)?)
    }

    fn pre_validate(
        &self,
        scope: &ScopeHandle,
        staged: &[SiblingNode],
    ) -> Result<Vec<SiblingNode>, ReorderError> {
        let candidate = ordering::normalize(scope, staged);
        self.validator
            .validate(scope, &candidate)
            .into_result()
            .map_err(ValidationError::from)?;
        Ok(candidate)
    }

    fn strict_check(&self, scope: &ScopeHandle, nodes: &[SiblingNode]) -> Result<(), ValidationError> {
        self.validator.validate(scope, nodes).into_result()?;
        validate_ordering(scope, nodes).into_result()?;
        Ok(())
    }

    fn post_validate(
        &self,
        scope: &ScopeHandle,
        expected: &[SiblingNode],
    ) -> Result<Vec<SiblingNode>, ReorderError> {
        let fatal = |violation: ConsistencyViolation| {
            tracing::error!(
                scope = %scope,
                phase = %ReorderPhase::PostValidated,
                %violation,
                "persisted scope failed post-commit validation"
            );
            ReorderError::FatalConsistency {
                scope: scope.clone(),
                violation,
            }
        };

        let after = self.store.load_scope(scope).map_err(|err| {
            fatal(ConsistencyViolation::Unreadable {
                message: format!("{err:#}"),
            })
        })?;

        if let Err(violation) = validate_ordering(scope, &after).into_result() {
            return Err(fatal(ConsistencyViolation::Ordering { violation }));
        }
        if let Err(violation) = self.validator.validate(scope, &after).into_result() {
            return Err(fatal(ConsistencyViolation::Graph { violation }));
        }

        let expected_digest = scope_digest(expected);
        let actual_digest = scope_digest(&after);
        if expected_digest != actual_digest {
            return Err(fatal(ConsistencyViolation::Diverged {
                expected: expected_digest,
                actual: actual_digest,
            }));
        }
        Ok(after)
    }

    fn emit(&self, record: &ChangeRecord) {
        match catch_unwind(AssertUnwindSafe(|| self.audit.record(record))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(scope = %record.scope, error = %format!("{err:#}"), "audit sink failed");
            }
            Err(_) => {
                tracing::warn!(scope = %record.scope, "audit sink panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Staged and found digests of a commit the store refused as stale.
fn stale_digests(err: &anyhow::Error) -> Option<(String, String)> {
    match err.downcast_ref::<StoreConflict>() {
        Some(StoreConflict::Stale {
            expected, actual, ..
        }) => Some((expected.clone(), actual.clone())),
        _ => None,
    }
}

fn enter(scope: &ScopeHandle, phase: ReorderPhase) {
    tracing::debug!(scope = %scope, %phase, "reorder phase");
}

fn abort(scope: &ScopeHandle, phase: ReorderPhase, err: ReorderError) -> ReorderError {
    tracing::warn!(
        scope = %scope,
        failed_in = %phase,
        code = err.code().code(),
        error = %err,
        "reorder aborted"
    );
    enter(scope, ReorderPhase::Aborted);
    err
}

/// Overlay `request` on the loaded scope.
///
/// Rejects ids that are not in the scope and any proposal that would put
/// two nodes on one order, whether both were proposed or one kept its
/// current order. Gaps are left for normalization.
fn stage(
    scope: &ScopeHandle,
    before: &[SiblingNode],
    request: &ReorderRequest,
) -> Result<Vec<SiblingNode>, ReorderError> {
    let known: BTreeSet<&NodeId> = before.iter().map(|n| &n.id).collect();
    let unknown: Vec<NodeId> = request
        .orders
        .keys()
        .chain(request.predecessors.keys())
        .filter(|id| !known.contains(id))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if !unknown.is_empty() {
        return Err(ValidationError::UnknownNode { nodes: unknown }.into());
    }

    validate_proposed_orders(scope, &request.orders)
        .into_result()
        .map_err(ValidationError::from)?;

    let mut staged = before.to_vec();
    for node in &mut staged {
        if let Some(raw) = request.orders.get(&node.id) {
            node.order = Order::from_raw(*raw).map_err(|_| ValidationError::OrderOutOfRange {
                nodes: vec![node.id.clone()],
            })?;
        }
        if let Some(predecessor) = request.predecessors.get(&node.id) {
            node.predecessor.clone_from(predecessor);
        }
    }

    match validate_ordering(scope, &staged) {
        OrderingResult::Valid | OrderingResult::Invalid(OrderingViolation::Gaps { .. }) => {
            Ok(staged)
        }
        OrderingResult::Invalid(violation) => Err(ValidationError::from(violation).into()),
    }
}

/// Rows of `candidate` whose order or predecessor differ from `before`.
fn diff(before: &[SiblingNode], candidate: &[SiblingNode]) -> Vec<NodeChange> {
    let previous: HashMap<&NodeId, &SiblingNode> = before.iter().map(|n| (&n.id, n)).collect();
    let mut changes: Vec<NodeChange> = candidate
        .iter()
        .filter(|node| {
            previous
                .get(&node.id)
                .is_none_or(|old| old.order != node.order || old.predecessor != node.predecessor)
        })
        .map(|node| NodeChange {
            id: node.id.clone(),
            order: node.order,
            predecessor: node.predecessor.clone(),
        })
        .collect();
    changes.sort_by(|a, b| a.id.cmp(&b.id));
    changes
}

fn change_record(
    scope: &ScopeHandle,
    before: Vec<SiblingNode>,
    after: Vec<SiblingNode>,
) -> ChangeRecord {
    let previous: HashMap<&NodeId, &SiblingNode> = before.iter().map(|n| (&n.id, n)).collect();
    let mut changed: Vec<NodeDelta> = after
        .iter()
        .filter_map(|node| match previous.get(&node.id) {
            Some(old) if old.order == node.order && old.predecessor == node.predecessor => None,
            Some(old) => Some(NodeDelta {
                id: node.id.clone(),
                order_before: Some(old.order),
                order_after: node.order,
                predecessor_before: old.predecessor.clone(),
                predecessor_after: node.predecessor.clone(),
            }),
            None => Some(NodeDelta {
                id: node.id.clone(),
                order_before: None,
                order_after: node.order,
                predecessor_before: None,
                predecessor_after: node.predecessor.clone(),
            }),
        })
        .collect();
    changed.sort_by(|a, b| a.id.cmp(&b.id));

    ChangeRecord {
        scope: scope.clone(),
        before_digest: scope_digest(&before),
        after_digest: scope_digest(&after),
        before,
        after,
        changed,
        committed_at: Utc::now(),
    }
}
