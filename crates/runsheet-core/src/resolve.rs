//! Scope resolution: turning `(parent id, level)` into a [`ScopeHandle`].
//!
//! A scope is the set of siblings that share one container at one level.
//! Every other component takes a `ScopeHandle` rather than a bare parent id,
//! and a handle can only be obtained here, so a master id can never be used
//! to address instance rows (or the reverse).
//!
//! # Level isolation
//!
//! - [`resolve_scope`] looks the container up at exactly the requested
//!   level and fails with [`ResolveError::NotFound`] otherwise. It never
//!   falls back to the other level.
//! - [`resolve_origin`] crosses from an instance scope to its master only
//!   through the container's recorded `instantiated_from` reference.

use serde::Serialize;
use std::fmt;

use crate::model::{ContainerKind, Level, ParentId};
use crate::store::ScopeStore;

/// Handle binding queries and mutations to one `(parent, level)` partition.
///
/// Equality includes the level: the handles for `(X, Master)` and
/// `(X, Instance)` are never equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ScopeHandle {
    parent: ParentId,
    level: Level,
    kind: ContainerKind,
}

impl ScopeHandle {
    pub(crate) const fn new(parent: ParentId, level: Level, kind: ContainerKind) -> Self {
        Self {
            parent,
            level,
            kind,
        }
    }

    #[must_use]
    pub const fn parent(&self) -> &ParentId {
        &self.parent
    }

    #[must_use]
    pub const fn level(&self) -> Level {
        self.level
    }

    /// Container type whose children this scope orders.
    #[must_use]
    pub const fn kind(&self) -> ContainerKind {
        self.kind
    }
}

impl fmt::Display for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.level, self.kind, self.parent)
    }
}

/// Errors from scope resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No container with this id exists at this level.
    #[error("no {level} container '{parent}'")]
    NotFound { parent: ParentId, level: Level },

    /// The scope has no recorded master origin to follow.
    #[error("scope {scope} has no recorded master origin")]
    NoOrigin { scope: String },

    /// An underlying storage error.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Resolve the scope of `parent` at exactly `level`.
///
/// # Errors
///
/// Returns [`ResolveError::NotFound`] if the container does not exist at
/// that level (even when it exists at the other one), or
/// [`ResolveError::Storage`] for storage failures.
pub fn resolve_scope<S: ScopeStore + ?Sized>(
    store: &S,
    parent: &ParentId,
    level: Level,
) -> Result<ScopeHandle, ResolveError> {
    let record = store
        .find_parent(parent, level)?
        .ok_or_else(|| ResolveError::NotFound {
            parent: parent.clone(),
            level,
        })?;

    tracing::trace!(parent = %parent, level = %level, kind = %record.kind, "resolved scope");
    Ok(ScopeHandle::new(record.id, record.level, record.kind))
}

/// Follow an instance scope's `instantiated_from` reference to the master
/// scope it was created from.
///
/// # Errors
///
/// Returns [`ResolveError::NoOrigin`] for master scopes and for instances
/// without a recorded origin, [`ResolveError::NotFound`] if the instance
/// container or its master no longer exists, or [`ResolveError::Storage`].
pub fn resolve_origin<S: ScopeStore + ?Sized>(
    store: &S,
    scope: &ScopeHandle,
) -> Result<ScopeHandle, ResolveError> {
    if scope.level() != Level::Instance {
        return Err(ResolveError::NoOrigin {
            scope: scope.to_string(),
        });
    }

    let record = store
        .find_parent(scope.parent(), Level::Instance)?
        .ok_or_else(|| ResolveError::NotFound {
            parent: scope.parent().clone(),
            level: Level::Instance,
        })?;

    let origin = record.instantiated_from.ok_or_else(|| ResolveError::NoOrigin {
        scope: scope.to_string(),
    })?;

    resolve_scope(store, &origin, Level::Master)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ParentRecord, SqliteStore};

    fn pid(raw: &str) -> ParentId {
        ParentId::new(raw).expect("parent id")
    }

    fn register(store: &SqliteStore, id: &str, level: Level, origin: Option<&str>) {
        store
            .register_parent(&ParentRecord {
                id: pid(id),
                level,
                kind: ContainerKind::Plan,
                instantiated_from: origin.map(pid),
            })
            .expect("register parent");
    }

    #[test]
    fn resolves_only_at_requested_level() {
        let store = SqliteStore::open_in_memory().expect("store");
        register(&store, "plan-1", Level::Master, None);

        let scope = resolve_scope(&store, &pid("plan-1"), Level::Master).expect("master scope");
        assert_eq!(scope.level(), Level::Master);
        assert_eq!(scope.kind(), ContainerKind::Plan);

        let err = resolve_scope(&store, &pid("plan-1"), Level::Instance).expect_err("no fallback");
        assert!(matches!(err, ResolveError::NotFound { level: Level::Instance, .. }));
    }

    #[test]
    fn same_raw_id_yields_distinct_handles_per_level() {
        let store = SqliteStore::open_in_memory().expect("store");
        register(&store, "plan-1", Level::Master, None);
        register(&store, "plan-1", Level::Instance, None);

        let master = resolve_scope(&store, &pid("plan-1"), Level::Master).expect("master");
        let instance = resolve_scope(&store, &pid("plan-1"), Level::Instance).expect("instance");
        assert_ne!(master, instance);
        assert_eq!(master.parent(), instance.parent());
        assert_eq!(master.to_string(), "master:plan/plan-1");
    }

    #[test]
    fn origin_follows_explicit_reference_not_id_equality() {
        let store = SqliteStore::open_in_memory().expect("store");
        register(&store, "plan-7", Level::Master, None);
        // Same raw id as a master row, but instantiated from a different master.
        register(&store, "plan-1", Level::Master, None);
        register(&store, "plan-1", Level::Instance, Some("plan-7"));

        let instance = resolve_scope(&store, &pid("plan-1"), Level::Instance).expect("instance");
        let origin = resolve_origin(&store, &instance).expect("origin");
        assert_eq!(origin.parent(), &pid("plan-7"));
        assert_eq!(origin.level(), Level::Master);
    }

    #[test]
    fn origin_is_undefined_for_masters_and_unrecorded_instances() {
        let store = SqliteStore::open_in_memory().expect("store");
        register(&store, "plan-1", Level::Master, None);
        register(&store, "plan-2", Level::Instance, None);

        let master = resolve_scope(&store, &pid("plan-1"), Level::Master).expect("master");
        assert!(matches!(
            resolve_origin(&store, &master),
            Err(ResolveError::NoOrigin { .. })
        ));

        let orphan = resolve_scope(&store, &pid("plan-2"), Level::Instance).expect("instance");
        assert!(matches!(
            resolve_origin(&store, &orphan),
            Err(ResolveError::NoOrigin { .. })
        ));
    }
}
