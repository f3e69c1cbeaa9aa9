//! runsheet-core library.
//!
//! Keeps sibling nodes of a master/instance plan hierarchy in a strict,
//! gap-free order, rejects predecessor cycles and over-deep chains, and
//! applies bulk reorders atomically.
//!
//! # Conventions
//!
//! - **Errors**: domain errors are `thiserror` enums with stable
//!   [`error::ErrorCode`]s; plumbing uses `anyhow::Result`.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
//! - **Scopes**: every read and write takes a [`resolve::ScopeHandle`],
//!   obtained only through [`resolve::resolve_scope`].

#![forbid(unsafe_code)]

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod graph;
pub mod lock;
pub mod model;
pub mod ordering;
pub mod resolve;
pub mod store;

pub use audit::{AuditSink, ChangeRecord, NodeDelta, TracingAuditSink};
pub use config::{EngineConfig, load_engine_config};
pub use coordinator::{
    ConsistencyViolation, ReorderCoordinator, ReorderError, ReorderPhase, ReorderRequest,
    ReorderResult, ScopeReport, ValidationError,
};
pub use error::ErrorCode;
pub use graph::{DependencyGraphValidator, GraphViolation, ValidationResult};
pub use model::{ContainerKind, Level, NodeId, Order, ParentId, SiblingNode};
pub use ordering::{OrderingResult, OrderingViolation};
pub use resolve::{ResolveError, ScopeHandle, resolve_origin, resolve_scope};
pub use store::{ParentRecord, ScopeStore, SqliteStore, StoreConflict, scope_digest};
