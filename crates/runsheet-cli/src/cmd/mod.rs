pub mod check;
pub mod completions;
pub mod init;
pub mod install;
pub mod link;
pub mod origin;
pub mod parents;
pub mod reorder;
pub mod repair;
pub mod show;

use crate::output::{CliError, OutputMode, fail, pretty_kv, pretty_section};
use clap::Args;
use runsheet_core::config::{self, LOCK_TIMEOUT_ENV};
use runsheet_core::{
    ChangeRecord, ErrorCode, Level, ParentId, ReorderCoordinator, ReorderError, ScopeHandle,
    SiblingNode, SqliteStore,
};
use std::io::{self, Write};
use std::path::Path;

/// The `(parent, level)` pair naming one sibling scope.
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    /// Container whose children are ordered.
    pub parent: ParentId,

    /// Hierarchy tier of the container.
    #[arg(long, default_value_t = Level::Instance)]
    pub level: Level,
}

/// Open the project store with config from `.runsheet/config.toml` and the
/// environment.
pub fn open_coordinator(
    project_root: &Path,
    output: OutputMode,
) -> anyhow::Result<ReorderCoordinator<SqliteStore>> {
    let store_path = config::store_path(project_root);
    if !store_path.exists() {
        return Err(fail(
            output,
            &CliError::from_code(
                ErrorCode::NotInitialized,
                "not_initialized",
                format!("no runsheet store at {}", store_path.display()),
            ),
        ));
    }

    let loaded = config::load_engine_config(project_root).and_then(|from_file| {
        config::apply_env_overrides(from_file, std::env::var(LOCK_TIMEOUT_ENV).ok())
    });
    let engine_config = match loaded {
        Ok(engine_config) => engine_config,
        Err(err) => {
            return Err(fail(
                output,
                &CliError::from_code(ErrorCode::ConfigParseError, "config", format!("{err:#}")),
            ));
        }
    };

    ReorderCoordinator::open_project(project_root, engine_config)
}

/// Render a coordinator error and map it to a [`crate::output::Reported`] failure.
pub fn report(output: OutputMode, err: &ReorderError) -> anyhow::Error {
    fail(output, &CliError::from(err))
}

/// Resolve the scope named on the command line.
pub fn resolve(
    coordinator: &ReorderCoordinator<SqliteStore>,
    args: &ScopeArgs,
    output: OutputMode,
) -> anyhow::Result<ScopeHandle> {
    coordinator
        .resolve_scope(&args.parent, args.level)
        .map_err(|err| report(output, &err))
}

fn or_dash(value: Option<&impl std::fmt::Display>) -> String {
    value.map_or_else(|| "-".to_string(), ToString::to_string)
}

/// Write one node per line as `order<TAB>id<TAB>predecessor<TAB>origin`.
pub fn write_node_rows(w: &mut dyn Write, nodes: &[SiblingNode]) -> io::Result<()> {
    for node in nodes {
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            node.order,
            node.id,
            or_dash(node.predecessor.as_ref()),
            or_dash(node.instantiated_from.as_ref())
        )?;
    }
    Ok(())
}

/// Aligned node table for pretty output.
pub fn write_node_table(w: &mut dyn Write, nodes: &[SiblingNode]) -> io::Result<()> {
    if nodes.is_empty() {
        return writeln!(w, "(no nodes)");
    }
    writeln!(w, "{:>5}  {:<24} {:<24} ORIGIN", "ORDER", "ID", "AFTER")?;
    for node in nodes {
        writeln!(
            w,
            "{:>5}  {:<24} {:<24} {}",
            node.order.get(),
            node.id.as_str(),
            or_dash(node.predecessor.as_ref()),
            or_dash(node.instantiated_from.as_ref())
        )?;
    }
    Ok(())
}

fn text_change(record: &ChangeRecord, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}\t{}\t{}", record.scope, record.changed.len(), record.after_digest)?;
    for delta in &record.changed {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}",
            delta.id,
            or_dash(delta.order_before.as_ref()),
            delta.order_after,
            or_dash(delta.predecessor_before.as_ref()),
            or_dash(delta.predecessor_after.as_ref())
        )?;
    }
    Ok(())
}

fn pretty_change(record: &ChangeRecord, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Committed {}", record.scope))?;
    if record.is_noop() {
        writeln!(w, "No changes; scope already in the requested state.")?;
    } else {
        for delta in &record.changed {
            let mut parts = Vec::new();
            if delta.order_changed() {
                parts.push(format!(
                    "order {} -> {}",
                    or_dash(delta.order_before.as_ref()),
                    delta.order_after
                ));
            }
            if delta.predecessor_changed() {
                parts.push(format!(
                    "after {} -> {}",
                    or_dash(delta.predecessor_before.as_ref()),
                    or_dash(delta.predecessor_after.as_ref())
                ));
            }
            writeln!(w, "  {:<24} {}", delta.id.as_str(), parts.join(", "))?;
        }
    }
    writeln!(w)?;
    write_node_table(w, &record.after)?;
    writeln!(w)?;
    pretty_kv(w, "digest", &record.after_digest)
}

/// Render the outcome of a committed mutation.
pub fn render_change(output: OutputMode, record: &ChangeRecord) -> anyhow::Result<()> {
    crate::output::render_mode(output, record, text_change, pretty_change)
}
