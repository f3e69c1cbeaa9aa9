//! Storage seam for sibling scopes.
//!
//! [`ScopeStore`] is the narrow interface the coordinator needs: look up a
//! container, load one scope, and write a batch of changes atomically.
//! [`SqliteStore`] is the production backend. Tests substitute wrappers that
//! misbehave on purpose to exercise post-commit validation.

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, TransactionBehavior};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::db::{self, query};
use crate::model::{Level, NodeId, Order, ParentId, SiblingNode};
use crate::resolve::ScopeHandle;

pub use crate::db::query::ParentRecord;

/// New values for one changed sibling row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChange {
    pub id: NodeId,
    pub order: Order,
    pub predecessor: Option<NodeId>,
}

/// A write was refused because the scope no longer matches what the caller
/// staged against.
///
/// Stores return this wrapped in `anyhow::Error`; the coordinator recovers
/// it with `downcast_ref` and turns it into a validation outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreConflict {
    #[error("scope {scope} changed after it was staged (expected {expected}, found {actual})")]
    Stale {
        scope: String,
        expected: String,
        actual: String,
    },
    #[error("scope {scope} already holds {existing} nodes")]
    NotEmpty { scope: String, existing: usize },
}

/// Persistence operations used by the resolver and the coordinator.
///
/// Implementations must make [`ScopeStore::commit_changes`] and
/// [`ScopeStore::insert_scope`] all-or-nothing: either every row is visible
/// afterwards or none is. Both re-check the scope inside their write
/// transaction and refuse with [`StoreConflict`] when it moved.
pub trait ScopeStore: Send + Sync {
    /// Look up a container at exactly `level`.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures; a missing container is
    /// `Ok(None)`.
    fn find_parent(&self, parent: &ParentId, level: Level) -> Result<Option<ParentRecord>>;

    /// Load the committed sibling set of a scope, sorted by order then id.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failures or malformed rows.
    fn load_scope(&self, scope: &ScopeHandle) -> Result<Vec<SiblingNode>>;

    /// Atomically apply order/predecessor changes to rows of one scope.
    ///
    /// `expected_digest` is the [`scope_digest`] of the sibling set the
    /// changes were staged from. The write happens only if the scope still
    /// has that digest when the transaction starts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreConflict::Stale`] if the scope moved, or any storage
    /// error; nothing is persisted in either case.
    fn commit_changes(
        &self,
        scope: &ScopeHandle,
        expected_digest: &str,
        changes: &[NodeChange],
    ) -> Result<()>;

    /// Atomically insert a complete sibling set into an empty scope.
    ///
    /// With `register`, the container row is created in the same
    /// transaction, so a refused insert leaves no container behind.
    ///
    /// # Errors
    ///
    /// Returns [`StoreConflict::NotEmpty`] if the scope already has rows, or
    /// any storage error; nothing is persisted in either case.
    fn insert_scope(
        &self,
        scope: &ScopeHandle,
        register: Option<&ParentRecord>,
        nodes: &[SiblingNode],
    ) -> Result<()>;
}

fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// SQLite-backed [`ScopeStore`].
///
/// One connection guarded by a mutex; cross-process writers are serialized
/// by SQLite itself (`BEGIN IMMEDIATE`) and, for reorders, by the scope lock.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the store database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = db::open_store_db(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(db::open_in_memory_db()?),
            path: None,
        })
    }

    /// Path of the backing database file, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Register a container. Container lifecycle belongs to plan authoring
    /// and instantiation, so this is exposed on the concrete store only.
    ///
    /// # Errors
    ///
    /// Returns an error if the container already exists or is malformed.
    pub fn register_parent(&self, record: &ParentRecord) -> Result<()> {
        self.with_conn(|conn| query::insert_parent(conn, record, now_us()))
    }

    /// List every container registered at `level`, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_parents(&self, level: Level) -> Result<Vec<ParentRecord>> {
        self.with_conn(|conn| query::list_parents(conn, level))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("store connection mutex poisoned"))?;
        f(&mut guard)
    }
}

impl ScopeStore for SqliteStore {
    fn find_parent(&self, parent: &ParentId, level: Level) -> Result<Option<ParentRecord>> {
        self.with_conn(|conn| query::get_parent(conn, parent, level))
    }

    fn load_scope(&self, scope: &ScopeHandle) -> Result<Vec<SiblingNode>> {
        self.with_conn(|conn| query::list_scope_nodes(conn, scope.parent(), scope.level()))
    }

    fn commit_changes(
        &self,
        scope: &ScopeHandle,
        expected_digest: &str,
        changes: &[NodeChange],
    ) -> Result<()> {
        self.with_conn(|conn| {
            let now = now_us();
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("begin reorder transaction")?;
            let current = query::list_scope_nodes(&tx, scope.parent(), scope.level())?;
            let actual = scope_digest(&current);
            if actual != expected_digest {
                return Err(StoreConflict::Stale {
                    scope: scope.to_string(),
                    expected: expected_digest.to_owned(),
                    actual,
                }
                .into());
            }
            query::apply_node_changes(&tx, scope.parent(), scope.level(), changes, now)?;
            query::touch_last_commit(&tx, now)?;
            tx.commit().context("commit reorder transaction")
        })
    }

    fn insert_scope(
        &self,
        scope: &ScopeHandle,
        register: Option<&ParentRecord>,
        nodes: &[SiblingNode],
    ) -> Result<()> {
        self.with_conn(|conn| {
            let now = now_us();
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("begin install transaction")?;
            if let Some(record) = register {
                query::insert_parent(&tx, record, now)?;
            }
            let existing = query::count_scope_nodes(&tx, scope.parent(), scope.level())?;
            if existing > 0 {
                return Err(StoreConflict::NotEmpty {
                    scope: scope.to_string(),
                    existing,
                }
                .into());
            }
            query::insert_nodes(&tx, nodes, now)
                .with_context(|| format!("install scope {scope}"))?;
            query::touch_last_commit(&tx, now)?;
            tx.commit().context("commit install transaction")
        })
    }
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// Content digest of a sibling set, independent of input order.
///
/// Two scopes have the same digest exactly when they hold the same rows
/// with the same field values. Used to prove a failed reorder left the
/// persisted scope untouched and to stamp audit records.
#[must_use]
pub fn scope_digest(nodes: &[SiblingNode]) -> String {
    let mut sorted: Vec<&SiblingNode> = nodes.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut canonical = String::new();
    for node in sorted {
        let _ = writeln!(
            canonical,
            "{}\t{}\t{}\t{}\t{}\t{}",
            node.id,
            node.parent,
            node.level,
            node.order,
            node.predecessor.as_ref().map_or("-", NodeId::as_str),
            node.instantiated_from.as_ref().map_or("-", NodeId::as_str),
        );
    }
    format!("blake3:{}", blake3::hash(canonical.as_bytes()).to_hex())
}
