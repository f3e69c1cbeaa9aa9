use super::{ScopeArgs, open_coordinator, render_change, report, resolve};
use crate::output::OutputMode;
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct RepairArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,
}

/// Execute `runsheet repair <parent>`: renumber the scope to `1..N`,
/// keeping relative order.
///
/// # Errors
///
/// Returns an error if the scope cannot be resolved, its predecessor graph
/// is invalid, or the commit fails.
pub fn run_repair(args: &RepairArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let coordinator = open_coordinator(project_root, output)?;
    let scope = resolve(&coordinator, &args.scope, output)?;
    let record = coordinator
        .repair(&scope)
        .map_err(|err| report(output, &err))?;
    render_change(output, &record)
}
