use super::show::{ScopeListing, pretty_listing, text_listing};
use super::{open_coordinator, report};
use crate::output::{OutputMode, render_mode};
use clap::Args;
use runsheet_core::{Level, ParentId};
use std::path::Path;

#[derive(Args, Debug)]
pub struct OriginArgs {
    /// Instance container to trace back.
    pub parent: ParentId,
}

/// Execute `runsheet origin <instance-parent>`: show the master scope the
/// instance was created from.
///
/// # Errors
///
/// Returns an error if the instance has no recorded origin, either container
/// is missing, or the master scope cannot be read.
pub fn run_origin(args: &OriginArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let coordinator = open_coordinator(project_root, output)?;
    let listing = coordinator
        .resolve_scope(&args.parent, Level::Instance)
        .and_then(|instance| coordinator.resolve_origin(&instance))
        .and_then(|master| {
            let nodes = coordinator.list_scope(&master)?;
            Ok(ScopeListing::new(master, nodes))
        })
        .map_err(|err| report(output, &err))?;

    render_mode(output, &listing, text_listing, pretty_listing)
}
