use super::{ScopeArgs, open_coordinator, report, resolve};
use crate::output::{OutputMode, Reported, pretty_kv, pretty_section, render_mode};
use clap::Args;
use runsheet_core::{OrderingResult, ScopeReport, ValidationResult};
use std::io::{self, Write};
use std::path::Path;

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,
}

fn ordering_status(result: &OrderingResult) -> String {
    match result {
        OrderingResult::Valid => "ok".to_string(),
        OrderingResult::Invalid(violation) => violation.to_string(),
    }
}

fn graph_status(result: &ValidationResult) -> String {
    match result {
        ValidationResult::Valid => "ok".to_string(),
        ValidationResult::Invalid(violation) => violation.to_string(),
    }
}

fn text_report(report: &ScopeReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{}\t{}\t{}",
        report.scope,
        if report.is_healthy() { "healthy" } else { "unhealthy" },
        report.nodes,
        ordering_status(&report.ordering),
        graph_status(&report.graph)
    )
}

fn pretty_report(report: &ScopeReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Check {}", report.scope))?;
    pretty_kv(w, "nodes", report.nodes.to_string())?;
    pretty_kv(w, "ordering", ordering_status(&report.ordering))?;
    pretty_kv(w, "graph", graph_status(&report.graph))?;
    if let Some(depth) = report.longest_chain {
        pretty_kv(w, "chain", format!("{depth} link(s) deepest"))?;
    }
    pretty_kv(w, "digest", &report.digest)?;
    writeln!(w)?;
    if report.is_healthy() {
        writeln!(w, "Scope is healthy.")
    } else {
        writeln!(w, "Scope is unhealthy. Run `runsheet repair` for gaps; fix links by hand.")
    }
}

/// Execute `runsheet check <parent>`. Read-only; takes no lock.
///
/// Exits with status 2 when the committed state breaks an ordering or graph
/// invariant.
///
/// # Errors
///
/// Returns an error if the scope cannot be resolved or read, or if it is
/// unhealthy.
pub fn run_check(args: &CheckArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let coordinator = open_coordinator(project_root, output)?;
    let scope = resolve(&coordinator, &args.scope, output)?;
    let scope_report = coordinator
        .check(&scope)
        .map_err(|err| report(output, &err))?;

    render_mode(output, &scope_report, text_report, pretty_report)?;
    if scope_report.is_healthy() {
        Ok(())
    } else {
        tracing::warn!(scope = %scope, "scope failed check");
        Err(anyhow::Error::new(Reported {
            exit_code: 2,
            message: format!("scope {scope} is unhealthy"),
        }))
    }
}
