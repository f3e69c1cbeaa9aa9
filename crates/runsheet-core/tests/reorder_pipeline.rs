//! End-to-end tests of the reorder pipeline against a file-backed store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use runsheet_core::audit::ChangeRecord;
use runsheet_core::config::EngineConfig;
use runsheet_core::coordinator::{ReorderCoordinator, ReorderError, ReorderRequest, ValidationError};
use runsheet_core::db;
use runsheet_core::error::ErrorCode;
use runsheet_core::model::{ContainerKind, Level, NodeId, Order, ParentId, SiblingNode};
use runsheet_core::ordering::{OrderingResult, OrderingViolation};
use runsheet_core::resolve::ScopeHandle;
use runsheet_core::store::{ParentRecord, ScopeStore, SqliteStore, scope_digest};
use tempfile::TempDir;

const PARENT: &str = "seq-1";

struct Fixture {
    dir: TempDir,
    coordinator: ReorderCoordinator<SqliteStore>,
    scope: ScopeHandle,
}

impl Fixture {
    fn digest(&self) -> String {
        scope_digest(&self.coordinator.list_scope(&self.scope).expect("list scope"))
    }

    fn orders(&self) -> Vec<(String, u32)> {
        self.coordinator
            .list_scope(&self.scope)
            .expect("list scope")
            .into_iter()
            .map(|n| (n.id.to_string(), n.order.get()))
            .collect()
    }

    fn node(&self, raw: &str) -> SiblingNode {
        self.coordinator
            .list_scope(&self.scope)
            .expect("list scope")
            .into_iter()
            .find(|n| n.id.as_str() == raw)
            .expect("node present")
    }

    fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("runsheet.db")
    }
}

fn id(raw: &str) -> NodeId {
    NodeId::new(raw).expect("node id")
}

fn pid(raw: &str) -> ParentId {
    ParentId::new(raw).expect("parent id")
}

fn sibling(raw: &str, level: Level, order: u32, predecessor: Option<&str>) -> SiblingNode {
    SiblingNode::new(id(raw), pid(PARENT), level, Order::try_from(order).expect("order"))
        .with_predecessor(predecessor.map(id))
}

fn register(store: &SqliteStore, parent: &str, level: Level, origin: Option<&str>) {
    store
        .register_parent(&ParentRecord {
            id: pid(parent),
            level,
            kind: ContainerKind::Sequence,
            instantiated_from: origin.map(pid),
        })
        .expect("register parent");
}

fn fixture_with(config: EngineConfig, nodes: &[(&str, Option<&str>)]) -> Fixture {
    let dir = TempDir::new().expect("create temp dir");
    let store = SqliteStore::open(&dir.path().join("runsheet.db")).expect("open store");
    register(&store, PARENT, Level::Master, None);

    let config = config.with_lock_dir(dir.path().join("locks"));
    let coordinator = ReorderCoordinator::new(store, config);
    let scope = coordinator
        .resolve_scope(&pid(PARENT), Level::Master)
        .expect("resolve scope");

    let siblings = nodes
        .iter()
        .enumerate()
        .map(|(index, (raw, pred))| {
            let order = u32::try_from(index + 1).expect("order");
            sibling(raw, Level::Master, order, *pred)
        })
        .collect();
    coordinator
        .install_scope(&scope, siblings)
        .expect("install fixture scope");

    Fixture {
        dir,
        coordinator,
        scope,
    }
}

fn fixture(nodes: &[(&str, Option<&str>)]) -> Fixture {
    fixture_with(EngineConfig::default(), nodes)
}

fn proposal(entries: &[(&str, i64)]) -> BTreeMap<NodeId, i64> {
    entries.iter().map(|(raw, order)| (id(raw), *order)).collect()
}

fn validation(err: ReorderError) -> ValidationError {
    match err {
        ReorderError::Validation(inner) => inner,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Committed reorders
// ---------------------------------------------------------------------------

#[test]
fn swapping_two_nodes_commits_and_is_visible() {
    let fx = fixture(&[("A", None), ("B", None)]);

    let record = fx
        .coordinator
        .reorder(&fx.scope, &proposal(&[("A", 2), ("B", 1)]))
        .expect("reorder commits");

    assert_eq!(fx.orders(), vec![("B".into(), 1), ("A".into(), 2)]);
    assert_eq!(record.changed.len(), 2);
    assert_ne!(record.before_digest, record.after_digest);
    assert_eq!(record.after_digest, fx.digest());
}

#[test]
fn partial_proposal_gaps_are_closed_by_rank() {
    let fx = fixture(&[("A", None), ("B", None), ("C", None)]);

    fx.coordinator
        .reorder(&fx.scope, &proposal(&[("A", 10)]))
        .expect("reorder commits");

    assert_eq!(
        fx.orders(),
        vec![("B".into(), 1), ("C".into(), 2), ("A".into(), 3)]
    );
}

#[test]
fn predecessor_edits_share_the_pipeline() {
    let fx = fixture(&[("A", None), ("B", Some("A")), ("C", None)]);

    let request = ReorderRequest::default()
        .with_predecessor(id("C"), Some(id("B")))
        .with_order(id("C"), 3);
    let record = fx.coordinator.apply(&fx.scope, &request).expect("link commits");

    assert_eq!(fx.node("C").predecessor, Some(id("B")));
    assert_eq!(record.changed.len(), 1);
    assert!(record.changed[0].predecessor_changed());
    assert!(!record.changed[0].order_changed());

    let cleared = ReorderRequest::default().with_predecessor(id("B"), None);
    fx.coordinator.apply(&fx.scope, &cleared).expect("unlink commits");
    assert_eq!(fx.node("B").predecessor, None);
}

#[test]
fn audit_sink_receives_every_commit() {
    let seen: Arc<Mutex<Vec<ChangeRecord>>> = Arc::default();
    let sink_seen = Arc::clone(&seen);

    let fx = fixture(&[("A", None), ("B", None)]);
    let coordinator = ReorderCoordinator::new(
        SqliteStore::open(&fx.db_path()).expect("reopen store"),
        fx.coordinator.config().clone(),
    )
    .with_audit_sink(move |record: &ChangeRecord| -> anyhow::Result<()> {
        sink_seen.lock().expect("lock").push(record.clone());
        Ok(())
    });

    coordinator
        .reorder(&fx.scope, &proposal(&[("A", 2), ("B", 1)]))
        .expect("reorder commits");

    let records = seen.lock().expect("lock");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].scope, fx.scope);
    assert_eq!(records[0].after.len(), 2);
}

// ---------------------------------------------------------------------------
// Rejected proposals leave the scope untouched
// ---------------------------------------------------------------------------

#[test]
fn duplicate_targets_are_rejected_without_writes() {
    let fx = fixture(&[("A", None), ("B", None), ("C", None)]);
    let before = fx.digest();

    let err = fx
        .coordinator
        .reorder(&fx.scope, &proposal(&[("A", 1), ("B", 1)]))
        .expect_err("duplicate targets");
    assert_eq!(err.code(), ErrorCode::DuplicateOrder);
    assert_eq!(err.kind(), "validation");
    assert_eq!(fx.digest(), before);
}

#[test]
fn collision_with_an_unchanged_node_is_a_duplicate() {
    let fx = fixture(&[("A", None), ("B", None), ("C", None)]);
    let before = fx.digest();

    let err = fx
        .coordinator
        .reorder(&fx.scope, &proposal(&[("A", 3)]))
        .expect_err("A collides with C");
    let ValidationError::DuplicateOrder { collisions } = validation(err) else {
        panic!("expected duplicate order");
    };
    assert_eq!(collisions[0].order, 3);
    assert_eq!(collisions[0].nodes, vec![id("A"), id("C")]);
    assert_eq!(fx.digest(), before);
}

#[test]
fn non_positive_orders_are_rejected() {
    let fx = fixture(&[("A", None), ("B", None)]);
    let before = fx.digest();

    let err = fx
        .coordinator
        .reorder(&fx.scope, &proposal(&[("A", 0), ("B", -2)]))
        .expect_err("non-positive");
    assert_eq!(
        validation(err),
        ValidationError::NonPositiveOrder {
            nodes: vec![id("A"), id("B")]
        }
    );
    assert_eq!(fx.digest(), before);
}

#[test]
fn unknown_nodes_are_rejected() {
    let fx = fixture(&[("A", None)]);

    let request = ReorderRequest::default()
        .with_order(id("ghost"), 1)
        .with_predecessor(id("phantom"), None);
    let err = fx.coordinator.apply(&fx.scope, &request).expect_err("unknown");
    assert_eq!(
        validation(err),
        ValidationError::UnknownNode {
            nodes: vec![id("ghost"), id("phantom")]
        }
    );
}

#[test]
fn predecessor_cycle_is_rejected_with_path() {
    let fx = fixture(&[("A", None), ("B", Some("A")), ("C", Some("B"))]);
    let before = fx.digest();

    let request = ReorderRequest::default().with_predecessor(id("A"), Some(id("C")));
    let err = fx.coordinator.apply(&fx.scope, &request).expect_err("cycle");
    let ValidationError::CycleDetected(report) = validation(err) else {
        panic!("expected a cycle");
    };
    assert_eq!(report.path, vec![id("A"), id("C"), id("B"), id("A")]);
    assert_eq!(fx.digest(), before);
}

#[test]
fn dangling_predecessor_is_rejected() {
    let fx = fixture(&[("A", None), ("B", None)]);
    let before = fx.digest();

    let request = ReorderRequest::default().with_predecessor(id("B"), Some(id("gone")));
    let err = fx.coordinator.apply(&fx.scope, &request).expect_err("dangling");
    assert_eq!(
        validation(err),
        ValidationError::DanglingPredecessor {
            node: id("B"),
            predecessor: id("gone")
        }
    );
    assert_eq!(fx.digest(), before);
}

#[test]
fn chain_past_configured_depth_is_rejected() {
    let config = EngineConfig::default().with_max_chain_depth(2);
    let fx = fixture_with(config, &[("A", None), ("B", Some("A")), ("C", Some("B")), ("D", None)]);
    let before = fx.digest();

    let request = ReorderRequest::default().with_predecessor(id("D"), Some(id("C")));
    let err = fx.coordinator.apply(&fx.scope, &request).expect_err("too deep");
    assert_eq!(err.code(), ErrorCode::ChainTooDeep);
    assert!(matches!(
        validation(err),
        ValidationError::ChainTooDeep { depth: 3, limit: 2, .. }
    ));
    assert_eq!(fx.digest(), before);
}

// ---------------------------------------------------------------------------
// Repair and check
// ---------------------------------------------------------------------------

#[test]
fn repair_closes_gaps_written_out_of_band() {
    let fx = fixture(&[("A", None), ("B", None), ("C", None)]);
    let conn = db::open_store_db(&fx.db_path()).expect("raw connection");
    conn.execute(
        "UPDATE sibling_nodes SET ord = 7 WHERE node_id = 'B' AND level = 'master'",
        [],
    )
    .expect("punch gap");
    drop(conn);

    let report = fx.coordinator.check(&fx.scope).expect("check");
    assert!(!report.is_healthy());
    assert!(matches!(
        report.ordering,
        OrderingResult::Invalid(OrderingViolation::Gaps { expected: 3, .. })
    ));

    let record = fx.coordinator.repair(&fx.scope).expect("repair");
    assert_eq!(
        fx.orders(),
        vec![("A".into(), 1), ("C".into(), 2), ("B".into(), 3)]
    );
    assert_eq!(record.changed.len(), 2);
    assert!(fx.coordinator.check(&fx.scope).expect("check").is_healthy());
}

#[test]
fn repair_of_a_normalized_scope_changes_nothing() {
    let fx = fixture(&[("A", None), ("B", Some("A"))]);
    let before = fx.digest();

    let record = fx.coordinator.repair(&fx.scope).expect("repair");
    assert!(record.is_noop());
    assert_eq!(record.before_digest, record.after_digest);
    assert_eq!(fx.digest(), before);

    let report = fx.coordinator.check(&fx.scope).expect("check");
    assert_eq!(report.nodes, 2);
    assert_eq!(report.longest_chain, Some(1));
}

// ---------------------------------------------------------------------------
// Level isolation and resolution
// ---------------------------------------------------------------------------

#[test]
fn master_and_instance_scopes_never_mix() {
    let fx = fixture(&[("A", None), ("B", None)]);
    register(fx.coordinator.store(), PARENT, Level::Instance, Some(PARENT));

    let instance = fx
        .coordinator
        .resolve_scope(&pid(PARENT), Level::Instance)
        .expect("instance scope");
    assert_ne!(instance, fx.scope);

    fx.coordinator
        .install_scope(
            &instance,
            vec![
                sibling("A", Level::Instance, 1, None),
                sibling("B", Level::Instance, 2, None),
            ],
        )
        .expect("install instance copy");
    let instance_before = scope_digest(&fx.coordinator.list_scope(&instance).expect("list"));

    fx.coordinator
        .reorder(&fx.scope, &proposal(&[("A", 2), ("B", 1)]))
        .expect("reorder master");

    let instance_after = fx.coordinator.list_scope(&instance).expect("list");
    assert_eq!(scope_digest(&instance_after), instance_before);
    assert!(instance_after.iter().all(|n| n.level == Level::Instance));

    let origin = fx.coordinator.resolve_origin(&instance).expect("origin");
    assert_eq!(origin, fx.scope);
}

#[test]
fn unknown_parent_is_not_found_at_either_level() {
    let fx = fixture(&[("A", None)]);
    for level in [Level::Master, Level::Instance] {
        let err = fx
            .coordinator
            .resolve_scope(&pid("seq-missing"), level)
            .expect_err("missing parent");
        assert!(matches!(err, ReorderError::NotFound { .. }));
        assert_eq!(err.code(), ErrorCode::ScopeNotFound);
    }

    let err = fx
        .coordinator
        .resolve_scope(&pid(PARENT), Level::Instance)
        .expect_err("no instance registered");
    assert!(matches!(err, ReorderError::NotFound { level: Level::Instance, .. }));
}

#[test]
fn deleted_parent_is_not_found_under_the_lock() {
    let fx = fixture(&[("A", None), ("B", None)]);
    let conn = db::open_store_db(&fx.db_path()).expect("raw connection");
    conn.execute(
        "DELETE FROM parents WHERE parent_id = ?1 AND level = 'master'",
        [PARENT],
    )
    .expect("delete parent");
    drop(conn);

    let err = fx
        .coordinator
        .reorder(&fx.scope, &proposal(&[("A", 2), ("B", 1)]))
        .expect_err("parent gone");
    assert!(matches!(err, ReorderError::NotFound { .. }));
}

// ---------------------------------------------------------------------------
// Install
// ---------------------------------------------------------------------------

#[test]
fn install_refuses_a_populated_scope() {
    let fx = fixture(&[("A", None)]);
    let before = fx.digest();

    let err = fx
        .coordinator
        .install_scope(&fx.scope, vec![sibling("Z", Level::Master, 1, None)])
        .expect_err("scope not empty");
    assert_eq!(validation(err), ValidationError::ScopeNotEmpty { existing: 1 });
    assert_eq!(fx.digest(), before);
}

#[test]
fn install_validates_strictly() {
    let dir = TempDir::new().expect("create temp dir");
    let store = SqliteStore::open(&dir.path().join("runsheet.db")).expect("open store");
    register(&store, PARENT, Level::Instance, None);
    let coordinator = ReorderCoordinator::new(
        store,
        EngineConfig::default().with_lock_dir(dir.path().join("locks")),
    );
    let scope = coordinator
        .resolve_scope(&pid(PARENT), Level::Instance)
        .expect("scope");

    let gapped = vec![
        sibling("A", Level::Instance, 1, None),
        sibling("B", Level::Instance, 3, None),
    ];
    assert_eq!(
        coordinator.install_scope(&scope, gapped).expect_err("gap").code(),
        ErrorCode::OrderGap
    );

    let foreign = vec![sibling("A", Level::Master, 1, None)];
    assert_eq!(
        coordinator.install_scope(&scope, foreign).expect_err("foreign").code(),
        ErrorCode::ForeignNode
    );

    let looped = vec![
        sibling("A", Level::Instance, 1, Some("B")),
        sibling("B", Level::Instance, 2, Some("A")),
    ];
    assert_eq!(
        coordinator.install_scope(&scope, looped).expect_err("cycle").code(),
        ErrorCode::CycleDetected
    );

    assert!(coordinator.store().load_scope(&scope).expect("load").is_empty());

    let record = coordinator
        .install_scope(
            &scope,
            vec![
                sibling("B", Level::Instance, 2, Some("A")),
                sibling("A", Level::Instance, 1, None),
            ],
        )
        .expect("valid install");
    assert_eq!(record.changed.len(), 2);
    assert!(record.changed.iter().all(|d| d.order_before.is_none()));
}

#[test]
fn rejected_new_scope_leaves_no_container() {
    let dir = TempDir::new().expect("create temp dir");
    let store = SqliteStore::open(&dir.path().join("runsheet.db")).expect("open store");
    let coordinator = ReorderCoordinator::new(
        store,
        EngineConfig::default().with_lock_dir(dir.path().join("locks")),
    );
    let record = ParentRecord {
        id: pid(PARENT),
        level: Level::Instance,
        kind: ContainerKind::Sequence,
        instantiated_from: None,
    };

    let looped = vec![
        sibling("A", Level::Instance, 1, Some("B")),
        sibling("B", Level::Instance, 2, Some("A")),
    ];
    let err = coordinator
        .install_new_scope(&record, looped)
        .expect_err("cycle");
    assert_eq!(err.code(), ErrorCode::CycleDetected);
    assert!(matches!(
        coordinator.resolve_scope(&pid(PARENT), Level::Instance),
        Err(ReorderError::NotFound { .. })
    ));

    let installed = coordinator
        .install_new_scope(
            &record,
            vec![
                sibling("A", Level::Instance, 1, None),
                sibling("B", Level::Instance, 2, Some("A")),
            ],
        )
        .expect("valid install");
    let scope = coordinator
        .resolve_scope(&pid(PARENT), Level::Instance)
        .expect("registered with its nodes");
    assert_eq!(installed.scope, scope);
    assert_eq!(coordinator.list_scope(&scope).expect("list").len(), 2);
}

#[test]
fn open_project_anchors_relative_lock_dir() {
    let dir = TempDir::new().expect("create temp dir");
    let config = EngineConfig::default();
    assert!(config.locking.lock_dir.is_relative());

    let coordinator =
        ReorderCoordinator::open_project(dir.path(), config).expect("open project");
    assert_eq!(
        coordinator.config().locking.lock_dir,
        dir.path().join(".runsheet/locks")
    );

    let record = ParentRecord {
        id: pid(PARENT),
        level: Level::Master,
        kind: ContainerKind::Sequence,
        instantiated_from: None,
    };
    coordinator
        .install_new_scope(&record, vec![sibling("A", Level::Master, 1, None)])
        .expect("install");
    let lock_files = std::fs::read_dir(dir.path().join(".runsheet/locks"))
        .expect("lock dir under the project root")
        .count();
    assert_eq!(lock_files, 1);
}

#[test]
fn store_survives_reopen() {
    let fx = fixture(&[("A", None), ("B", None)]);
    fx.coordinator
        .reorder(&fx.scope, &proposal(&[("A", 2), ("B", 1)]))
        .expect("reorder");
    let expected = fx.digest();

    let reopened = SqliteStore::open(&fx.db_path()).expect("reopen");
    assert_eq!(
        scope_digest(&reopened.load_scope(&fx.scope).expect("load")),
        expected
    );
    assert!(Path::new(&fx.db_path()).exists());
}
