//! `runsheet show`: list one scope's siblings in order.

use super::{ScopeArgs, open_coordinator, report, resolve, write_node_rows, write_node_table};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use clap::Args;
use runsheet_core::{ScopeHandle, SiblingNode, scope_digest};
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,
}

/// Committed state of one scope as returned in JSON output.
#[derive(Debug, Serialize)]
pub struct ScopeListing {
    pub scope: ScopeHandle,
    pub digest: String,
    pub nodes: Vec<SiblingNode>,
}

impl ScopeListing {
    pub fn new(scope: ScopeHandle, nodes: Vec<SiblingNode>) -> Self {
        Self {
            scope,
            digest: scope_digest(&nodes),
            nodes,
        }
    }
}

pub fn text_listing(listing: &ScopeListing, w: &mut dyn Write) -> io::Result<()> {
    write_node_rows(w, &listing.nodes)
}

pub fn pretty_listing(listing: &ScopeListing, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(
        w,
        &format!(
            "{} ({} {}s)",
            listing.scope,
            listing.nodes.len(),
            listing.scope.kind().child_noun()
        ),
    )?;
    write_node_table(w, &listing.nodes)?;
    writeln!(w)?;
    pretty_kv(w, "digest", &listing.digest)
}

/// Execute `runsheet show <parent>`.
///
/// # Errors
///
/// Returns an error if the scope cannot be resolved or read, or output
/// rendering fails.
pub fn run_show(args: &ShowArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let coordinator = open_coordinator(project_root, output)?;
    let scope = resolve(&coordinator, &args.scope, output)?;
    let nodes = coordinator
        .list_scope(&scope)
        .map_err(|err| report(output, &err))?;

    let listing = ScopeListing::new(scope, nodes);
    render_mode(output, &listing, text_listing, pretty_listing)
}
