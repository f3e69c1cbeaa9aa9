//! `SQLite` query helpers for containers and sibling rows.
//!
//! Every scope query filters on both `parent_id` and `level`; there is no
//! helper that looks children up by parent id alone.
//!
//! Functions take a `&Connection` (a `Transaction` derefs to one) and return
//! `anyhow::Result<T>` with typed model values, never raw rows.

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};
use serde::Serialize;
use std::str::FromStr;

use crate::model::{ContainerKind, Level, NodeId, Order, ParentId, SiblingNode};
use crate::store::NodeChange;

/// A container row from the `parents` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentRecord {
    pub id: ParentId,
    pub level: Level,
    pub kind: ContainerKind,
    /// Master container this instance was created from, if recorded.
    pub instantiated_from: Option<ParentId>,
}

fn parse_text<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn parse_optional<T>(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|value| parse_text(idx, &value)).transpose()
}

fn row_to_parent(row: &Row<'_>) -> rusqlite::Result<ParentRecord> {
    Ok(ParentRecord {
        id: parse_text(0, &row.get::<_, String>(0)?)?,
        level: parse_text(1, &row.get::<_, String>(1)?)?,
        kind: parse_text(2, &row.get::<_, String>(2)?)?,
        instantiated_from: parse_optional(3, row.get(3)?)?,
    })
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<SiblingNode> {
    let raw_order: i64 = row.get(3)?;
    let order = Order::from_raw(raw_order).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, Box::new(err))
    })?;

    Ok(SiblingNode {
        id: parse_text(0, &row.get::<_, String>(0)?)?,
        parent: parse_text(1, &row.get::<_, String>(1)?)?,
        level: parse_text(2, &row.get::<_, String>(2)?)?,
        order,
        predecessor: parse_optional(4, row.get(4)?)?,
        instantiated_from: parse_optional(5, row.get(5)?)?,
    })
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

/// Fetch one container at exactly the given level.
///
/// # Errors
///
/// Returns an error if the query fails or the row holds unparseable values.
pub fn get_parent(conn: &Connection, parent: &ParentId, level: Level) -> Result<Option<ParentRecord>> {
    conn.query_row(
        "SELECT parent_id, level, kind, instantiated_from
         FROM parents
         WHERE parent_id = ?1 AND level = ?2",
        params![parent.as_str(), level.as_str()],
        row_to_parent,
    )
    .optional()
    .with_context(|| format!("get_parent {level}/{parent}"))
}

/// Insert a container row.
///
/// # Errors
///
/// Returns an error if the row already exists or violates schema checks
/// (for example a master row carrying `instantiated_from`).
pub fn insert_parent(conn: &Connection, record: &ParentRecord, now_us: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO parents (parent_id, level, kind, instantiated_from, created_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.id.as_str(),
            record.level.as_str(),
            record.kind.as_str(),
            record.instantiated_from.as_ref().map(ParentId::as_str),
            now_us
        ],
    )
    .with_context(|| format!("insert parent {}/{}", record.level, record.id))?;
    Ok(())
}

/// List every container at one level, sorted by id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn list_parents(conn: &Connection, level: Level) -> Result<Vec<ParentRecord>> {
    let mut stmt = conn.prepare(
        "SELECT parent_id, level, kind, instantiated_from
         FROM parents
         WHERE level = ?1
         ORDER BY parent_id ASC",
    )?;
    let rows = stmt
        .query_map(params![level.as_str()], row_to_parent)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("list_parents {level}"))?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Sibling rows
// ---------------------------------------------------------------------------

/// Load every sibling of one `(parent, level)` scope, sorted by order then id.
///
/// # Errors
///
/// Returns an error if the query fails or a persisted row is malformed
/// (including a non-positive `ord`).
pub fn list_scope_nodes(conn: &Connection, parent: &ParentId, level: Level) -> Result<Vec<SiblingNode>> {
    let mut stmt = conn.prepare_cached(
        "SELECT node_id, parent_id, level, ord, predecessor_id, instantiated_from
         FROM sibling_nodes
         WHERE parent_id = ?1 AND level = ?2
         ORDER BY ord ASC, node_id ASC",
    )?;
    let rows = stmt
        .query_map(params![parent.as_str(), level.as_str()], row_to_node)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("list_scope_nodes {level}/{parent}"))?;
    Ok(rows)
}

/// Count the siblings of one scope.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_scope_nodes(conn: &Connection, parent: &ParentId, level: Level) -> Result<usize> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sibling_nodes WHERE parent_id = ?1 AND level = ?2",
            params![parent.as_str(), level.as_str()],
            |row| row.get(0),
        )
        .with_context(|| format!("count_scope_nodes {level}/{parent}"))?;
    usize::try_from(count).context("negative row count")
}

/// Insert sibling rows. Callers wrap this in a transaction.
///
/// # Errors
///
/// Returns an error on any constraint violation; the caller's transaction
/// must then be dropped so nothing is persisted.
pub fn insert_nodes(conn: &Connection, nodes: &[SiblingNode], now_us: i64) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO sibling_nodes (
            node_id, parent_id, level, ord, predecessor_id, instantiated_from, updated_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for node in nodes {
        stmt.execute(params![
            node.id.as_str(),
            node.parent.as_str(),
            node.level.as_str(),
            i64::from(node.order.get()),
            node.predecessor.as_ref().map(NodeId::as_str),
            node.instantiated_from.as_ref().map(NodeId::as_str),
            now_us
        ])
        .with_context(|| format!("insert node {}/{}", node.level, node.id))?;
    }
    Ok(())
}

/// Write new `ord`/`predecessor_id` values for the given rows of one scope.
///
/// Changed rows are first parked on their negated order so that
/// intermediate states never collide with `UNIQUE (parent_id, level, ord)`,
/// then set to their final values. Callers wrap this in a transaction.
///
/// # Errors
///
/// Returns an error if a row is missing from the scope (deleted out of
/// band) or a constraint fails.
pub fn apply_node_changes(
    conn: &Connection,
    parent: &ParentId,
    level: Level,
    changes: &[NodeChange],
    now_us: i64,
) -> Result<()> {
    let mut park = conn.prepare_cached(
        "UPDATE sibling_nodes SET ord = -ord
         WHERE node_id = ?1 AND parent_id = ?2 AND level = ?3",
    )?;
    for change in changes {
        let touched = park
            .execute(params![change.id.as_str(), parent.as_str(), level.as_str()])
            .with_context(|| format!("park node {}", change.id))?;
        if touched != 1 {
            bail!("node {} vanished from scope {level}/{parent} before commit", change.id);
        }
    }

    let mut write = conn.prepare_cached(
        "UPDATE sibling_nodes
         SET ord = ?1, predecessor_id = ?2, updated_at_us = ?3
         WHERE node_id = ?4 AND parent_id = ?5 AND level = ?6",
    )?;
    for change in changes {
        write
            .execute(params![
                i64::from(change.order.get()),
                change.predecessor.as_ref().map(NodeId::as_str),
                now_us,
                change.id.as_str(),
                parent.as_str(),
                level.as_str()
            ])
            .with_context(|| format!("write node {}", change.id))?;
    }
    Ok(())
}

/// Record the timestamp of the latest successful commit.
///
/// # Errors
///
/// Returns an error if the metadata row cannot be updated.
pub fn touch_last_commit(conn: &Connection, now_us: i64) -> Result<()> {
    conn.execute(
        "UPDATE store_meta SET last_commit_at_us = ?1 WHERE id = 1",
        params![now_us],
    )
    .context("update store_meta.last_commit_at_us")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_db;

    fn pid(raw: &str) -> ParentId {
        ParentId::new(raw).expect("valid parent id")
    }

    fn node(id: &str, parent: &str, level: Level, order: u32) -> SiblingNode {
        SiblingNode::new(
            NodeId::new(id).expect("valid node id"),
            pid(parent),
            level,
            Order::try_from(order).expect("positive order"),
        )
    }

    fn seed(conn: &Connection) {
        for level in [Level::Master, Level::Instance] {
            insert_parent(
                conn,
                &ParentRecord {
                    id: pid("plan-1"),
                    level,
                    kind: ContainerKind::Plan,
                    instantiated_from: None,
                },
                0,
            )
            .expect("insert parent");
        }
        insert_nodes(
            conn,
            &[
                node("b", "plan-1", Level::Master, 2),
                node("a", "plan-1", Level::Master, 1),
                node("a", "plan-1", Level::Instance, 1),
            ],
            0,
        )
        .expect("insert nodes");
    }

    #[test]
    fn scope_listing_filters_by_level() {
        let conn = open_in_memory_db().expect("db");
        seed(&conn);

        let master = list_scope_nodes(&conn, &pid("plan-1"), Level::Master).expect("master");
        let ids: Vec<&str> = master.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let instance = list_scope_nodes(&conn, &pid("plan-1"), Level::Instance).expect("instance");
        assert_eq!(instance.len(), 1);
        assert!(instance.iter().all(|n| n.level == Level::Instance));
        assert_eq!(count_scope_nodes(&conn, &pid("plan-1"), Level::Master).ok(), Some(2));
    }

    #[test]
    fn get_parent_does_not_cross_levels() {
        let conn = open_in_memory_db().expect("db");
        insert_parent(
            &conn,
            &ParentRecord {
                id: pid("seq-9"),
                level: Level::Master,
                kind: ContainerKind::Sequence,
                instantiated_from: None,
            },
            0,
        )
        .expect("insert parent");

        assert!(get_parent(&conn, &pid("seq-9"), Level::Master).expect("query").is_some());
        assert!(get_parent(&conn, &pid("seq-9"), Level::Instance).expect("query").is_none());
    }

    #[test]
    fn master_parent_cannot_record_origin() {
        let conn = open_in_memory_db().expect("db");
        let result = insert_parent(
            &conn,
            &ParentRecord {
                id: pid("plan-x"),
                level: Level::Master,
                kind: ContainerKind::Plan,
                instantiated_from: Some(pid("plan-y")),
            },
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn swapping_orders_does_not_trip_unique_constraint() {
        let conn = open_in_memory_db().expect("db");
        seed(&conn);

        let changes = vec![
            NodeChange {
                id: NodeId::new("a").expect("id"),
                order: Order::try_from(2).expect("order"),
                predecessor: None,
            },
            NodeChange {
                id: NodeId::new("b").expect("id"),
                order: Order::FIRST,
                predecessor: None,
            },
        ];
        apply_node_changes(&conn, &pid("plan-1"), Level::Master, &changes, 1).expect("apply");

        let nodes = list_scope_nodes(&conn, &pid("plan-1"), Level::Master).expect("list");
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn applying_change_to_missing_node_fails() {
        let conn = open_in_memory_db().expect("db");
        seed(&conn);

        let changes = vec![NodeChange {
            id: NodeId::new("ghost").expect("id"),
            order: Order::FIRST,
            predecessor: None,
        }];
        let err = apply_node_changes(&conn, &pid("plan-1"), Level::Master, &changes, 1)
            .expect_err("missing node");
        assert!(err.to_string().contains("vanished"));
    }
}
