//! Canonical SQLite schema for the runsheet store.
//!
//! - `parents` holds one row per container at one level; the same raw
//!   `parent_id` may appear once as master and once as instance
//! - `sibling_nodes` holds the ordered children of each `(parent_id, level)`
//!   scope, with their optional predecessor link
//! - `store_meta` tracks schema version and the last commit timestamp
//!
//! `ord` only forbids zero at the SQL level: commits park changed rows on
//! negative values before writing final orders so that
//! `UNIQUE (parent_id, level, ord)` never trips mid-transaction. Positivity
//! and contiguity are enforced by the engine's post-commit validation.

/// Migration v1: containers, sibling rows, and store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS parents (
    parent_id TEXT NOT NULL CHECK (length(parent_id) BETWEEN 1 AND 128),
    level TEXT NOT NULL CHECK (level IN ('master', 'instance')),
    kind TEXT NOT NULL CHECK (kind IN ('migration', 'iteration', 'plan', 'sequence', 'phase', 'step')),
    instantiated_from TEXT,
    created_at_us INTEGER NOT NULL,
    PRIMARY KEY (parent_id, level),
    CHECK (level = 'instance' OR instantiated_from IS NULL)
);

CREATE TABLE IF NOT EXISTS sibling_nodes (
    node_id TEXT NOT NULL CHECK (length(node_id) BETWEEN 1 AND 128),
    parent_id TEXT NOT NULL,
    level TEXT NOT NULL CHECK (level IN ('master', 'instance')),
    ord INTEGER NOT NULL CHECK (ord <> 0),
    predecessor_id TEXT,
    instantiated_from TEXT,
    updated_at_us INTEGER NOT NULL,
    PRIMARY KEY (node_id, level),
    UNIQUE (parent_id, level, ord),
    FOREIGN KEY (parent_id, level) REFERENCES parents(parent_id, level) ON DELETE CASCADE,
    CHECK (predecessor_id IS NULL OR predecessor_id <> node_id)
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_commit_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO store_meta (id, schema_version, last_commit_at_us)
VALUES (1, 0, 0);

CREATE INDEX IF NOT EXISTS idx_sibling_nodes_scope
    ON sibling_nodes(parent_id, level, ord);

CREATE INDEX IF NOT EXISTS idx_sibling_nodes_predecessor
    ON sibling_nodes(level, predecessor_id);

CREATE INDEX IF NOT EXISTS idx_parents_origin
    ON parents(instantiated_from);
";

/// Indexes expected after the latest migration.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_sibling_nodes_scope",
    "idx_sibling_nodes_predecessor",
    "idx_parents_origin",
];
