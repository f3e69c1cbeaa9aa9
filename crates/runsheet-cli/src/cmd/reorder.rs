use super::{ScopeArgs, open_coordinator, render_change, report, resolve};
use crate::output::OutputMode;
use clap::Args;
use runsheet_core::{NodeId, ReorderError, ValidationError};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Args, Debug)]
pub struct ReorderArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// New positions as `NODE=ORDER`. Siblings not named keep their order.
    #[arg(required = true, value_name = "NODE=ORDER", value_parser = parse_assignment)]
    pub assignments: Vec<(NodeId, i64)>,
}

/// Parse one `NODE=ORDER` pair. The order is kept signed so that zero and
/// negative values reach validation and are reported with the node name.
fn parse_assignment(raw: &str) -> Result<(NodeId, i64), String> {
    let (node, order) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NODE=ORDER, got '{raw}'"))?;
    let node = NodeId::new(node).map_err(|err| err.to_string())?;
    let order = order
        .trim()
        .parse::<i64>()
        .map_err(|_| format!("order for '{node}' must be an integer, got '{order}'"))?;
    Ok((node, order))
}

/// Collect assignments into one proposal. A node may be named once.
fn collect_orders(assignments: &[(NodeId, i64)]) -> Result<BTreeMap<NodeId, i64>, ValidationError> {
    let mut orders = BTreeMap::new();
    for (node, order) in assignments {
        if orders.insert(node.clone(), *order).is_some() {
            return Err(ValidationError::DuplicateNode { node: node.clone() });
        }
    }
    Ok(orders)
}

/// Execute `runsheet reorder <parent> NODE=ORDER...`.
///
/// # Errors
///
/// Returns an error if a node is named twice, the scope cannot be resolved,
/// the proposal is rejected, or the commit fails.
pub fn run_reorder(
    args: &ReorderArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let orders = collect_orders(&args.assignments)
        .map_err(|err| report(output, &ReorderError::from(err)))?;
    let coordinator = open_coordinator(project_root, output)?;
    let scope = resolve(&coordinator, &args.scope, output)?;

    let record = coordinator
        .reorder(&scope, &orders)
        .map_err(|err| report(output, &err))?;
    render_change(output, &record)
}
