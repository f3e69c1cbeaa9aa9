use super::{ScopeArgs, open_coordinator, render_change, report, resolve};
use crate::output::OutputMode;
use clap::Args;
use runsheet_core::{NodeId, ReorderRequest};
use std::path::Path;

/// Predecessor argument: a sibling id, or `none` to clear the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum After {
    Node(NodeId),
    Nothing,
}

impl After {
    fn into_option(self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(id),
            Self::Nothing => None,
        }
    }
}

fn parse_after(raw: &str) -> Result<After, String> {
    if raw.eq_ignore_ascii_case("none") {
        return Ok(After::Nothing);
    }
    NodeId::new(raw).map(After::Node).map_err(|err| err.to_string())
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Sibling whose predecessor is set.
    pub node: NodeId,

    /// Sibling that must run first, or `none`.
    #[arg(long, value_name = "PRED|none", value_parser = parse_after)]
    pub after: After,
}

/// Execute `runsheet link <parent> <node> --after <pred|none>`.
///
/// Orders are left as they are; the predecessor graph is validated against
/// the whole scope before anything is written.
///
/// # Errors
///
/// Returns an error if the scope cannot be resolved, the link would create a
/// cycle or an over-deep chain, or the commit fails.
pub fn run_link(args: &LinkArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let coordinator = open_coordinator(project_root, output)?;
    let scope = resolve(&coordinator, &args.scope, output)?;

    let request = ReorderRequest::default()
        .with_predecessor(args.node.clone(), args.after.clone().into_option());
    let record = coordinator
        .apply(&scope, &request)
        .map_err(|err| report(output, &err))?;
    render_change(output, &record)
}

#[cfg(test)]
mod tests {
    use super::{After, parse_after};

    #[test]
    fn none_clears_the_link() {
        assert_eq!(parse_after("none"), Ok(After::Nothing));
        assert_eq!(parse_after("NONE"), Ok(After::Nothing));
    }

    #[test]
    fn anything_else_is_a_node() {
        let After::Node(id) = parse_after("step-2").expect("node") else {
            panic!("expected a node");
        };
        assert_eq!(id.as_str(), "step-2");
        assert!(parse_after("two words").is_err());
    }
}
