//! `runsheet install`: seed an empty scope from a JSON node list.
//!
//! The file holds an array of entries:
//!
//! ```json
//! [
//!   { "id": "prep", "order": 1 },
//!   { "id": "cutover", "order": 2, "predecessor": "prep" }
//! ]
//! ```
//!
//! Instance entries may also carry `instantiated_from`, the master node they
//! were copied from. When `--kind` is given and the container does not exist
//! yet, it is registered in the same transaction as its nodes.

use super::{ScopeArgs, open_coordinator, render_change, report, resolve};
use crate::output::{CliError, OutputMode, fail};
use anyhow::{Context as _, bail};
use clap::Args;
use runsheet_core::model::InvalidOrder;
use runsheet_core::{
    ContainerKind, ErrorCode, Level, NodeId, Order, ParentId, ParentRecord, ReorderError,
    ScopeStore, SiblingNode, ValidationError,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// JSON array of nodes to install.
    #[arg(long, value_name = "PATH")]
    pub file: PathBuf,

    /// Register the container with this kind if it does not exist yet.
    #[arg(long)]
    pub kind: Option<ContainerKind>,

    /// Master container an instance container was created from.
    #[arg(long, value_name = "MASTER_PARENT")]
    pub from: Option<ParentId>,
}

/// One entry of the install file. Identifiers stay raw until
/// [`build_nodes`] so a bad one is reported with its entry index.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstallEntry {
    id: String,
    order: i64,
    #[serde(default)]
    predecessor: Option<String>,
    #[serde(default)]
    instantiated_from: Option<String>,
}

fn read_entries(path: &Path) -> anyhow::Result<Vec<InstallEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn entry_id(index: usize, field: &str, raw: &str) -> Result<NodeId, CliError> {
    NodeId::new(raw).map_err(|err| CliError {
        exit_code: 2,
        ..CliError::from_code(
            ErrorCode::InvalidIdentifier,
            "validation",
            format!("entry {index}, field '{field}': {err}"),
        )
    })
}

fn rejected(err: ValidationError) -> CliError {
    CliError::from(&ReorderError::from(err))
}

/// Turn file entries into sibling rows, collecting every bad order so they
/// are reported together.
fn build_nodes(
    parent: &ParentId,
    level: Level,
    entries: Vec<InstallEntry>,
) -> Result<Vec<SiblingNode>, CliError> {
    let mut nodes = Vec::with_capacity(entries.len());
    let mut non_positive = Vec::new();
    let mut out_of_range = Vec::new();

    for (index, entry) in entries.into_iter().enumerate() {
        let id = entry_id(index, "id", &entry.id)?;
        let predecessor = entry
            .predecessor
            .as_deref()
            .map(|raw| entry_id(index, "predecessor", raw))
            .transpose()?;
        let origin = entry
            .instantiated_from
            .as_deref()
            .map(|raw| entry_id(index, "instantiated_from", raw))
            .transpose()?;

        match Order::from_raw(entry.order) {
            Ok(order) => nodes.push(
                SiblingNode::new(id, parent.clone(), level, order)
                    .with_predecessor(predecessor)
                    .with_origin(origin),
            ),
            Err(InvalidOrder::NonPositive(_)) => non_positive.push(id),
            Err(InvalidOrder::OutOfRange(_)) => out_of_range.push(id),
        }
    }

    if !non_positive.is_empty() {
        non_positive.sort();
        return Err(rejected(ValidationError::NonPositiveOrder {
            nodes: non_positive,
        }));
    }
    if !out_of_range.is_empty() {
        out_of_range.sort();
        return Err(rejected(ValidationError::OrderOutOfRange {
            nodes: out_of_range,
        }));
    }
    Ok(nodes)
}

/// Execute `runsheet install <parent> --file nodes.json`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or names an invalid
/// identifier, the container is unknown and no `--kind` was given, the scope
/// already holds nodes, or the node set breaks an ordering or graph
/// invariant. A rejected install registers nothing.
pub fn run_install(
    args: &InstallArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let ScopeArgs { parent, level } = &args.scope;
    if args.from.is_some() && *level != Level::Instance {
        bail!("--from only applies to instance containers");
    }

    let entries = read_entries(&args.file)?;
    let nodes = build_nodes(parent, *level, entries).map_err(|err| fail(output, &err))?;
    let coordinator = open_coordinator(project_root, output)?;

    let outcome = match (coordinator.store().find_parent(parent, *level)?, args.kind) {
        (Some(existing), Some(kind)) if existing.kind != kind => {
            bail!("{level} container '{parent}' is a {}, not a {kind}", existing.kind);
        }
        (Some(_), _) => {
            let scope = resolve(&coordinator, &args.scope, output)?;
            coordinator.install_scope(&scope, nodes)
        }
        (None, Some(kind)) => {
            let container = ParentRecord {
                id: parent.clone(),
                level: *level,
                kind,
                instantiated_from: args.from.clone(),
            };
            coordinator.install_new_scope(&container, nodes).inspect(|_| {
                tracing::info!(parent = %parent, level = %level, kind = %kind, "registered container");
            })
        }
        (None, None) => Err(ReorderError::NotFound {
            parent: parent.clone(),
            level: *level,
        }),
    };

    let record = outcome.map_err(|err| report(output, &err))?;
    render_change(output, &record)
}
