//! `runsheet parents`: list registered containers.

use super::{open_coordinator, report};
use crate::output::{OutputMode, pretty_section, render_mode};
use clap::Args;
use runsheet_core::{Level, ParentId, ParentRecord, ReorderError};
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

#[derive(Args, Debug)]
pub struct ParentsArgs {
    /// Only list containers at this level.
    #[arg(long)]
    pub level: Option<Level>,
}

#[derive(Debug, Serialize)]
struct ParentListing {
    parents: Vec<ParentRecord>,
}

fn origin(record: &ParentRecord) -> &str {
    record.instantiated_from.as_ref().map_or("-", ParentId::as_str)
}

fn text_parents(listing: &ParentListing, w: &mut dyn Write) -> io::Result<()> {
    for record in &listing.parents {
        writeln!(w, "{}\t{}\t{}\t{}", record.level, record.kind, record.id, origin(record))?;
    }
    Ok(())
}

fn pretty_parents(listing: &ParentListing, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Containers ({})", listing.parents.len()))?;
    if listing.parents.is_empty() {
        return writeln!(w, "(no containers)");
    }
    writeln!(w, "{:<9} {:<10} {:<24} ORIGIN", "LEVEL", "KIND", "ID")?;
    for record in &listing.parents {
        writeln!(
            w,
            "{:<9} {:<10} {:<24} {}",
            record.level.as_str(),
            record.kind.as_str(),
            record.id.as_str(),
            origin(record)
        )?;
    }
    Ok(())
}

/// Execute `runsheet parents [--level LEVEL]`: masters first, then
/// instances, each sorted by id.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read.
pub fn run_parents(args: &ParentsArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let coordinator = open_coordinator(project_root, output)?;
    let levels = args
        .level
        .map_or_else(|| vec![Level::Master, Level::Instance], |level| vec![level]);

    let mut parents = Vec::new();
    for level in levels {
        let listed = coordinator
            .store()
            .list_parents(level)
            .map_err(|err| report(output, &ReorderError::Storage(err)))?;
        parents.extend(listed);
    }

    render_mode(output, &ParentListing { parents }, text_parents, pretty_parents)
}
