use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::{Context as _, Result};
use clap::Args;
use runsheet_core::SqliteStore;
use runsheet_core::config::{self, STATE_DIR};
use serde::Serialize;
use std::path::Path;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite `config.toml` and `.gitignore` even if `.runsheet/` already exists.
    #[arg(long)]
    pub force: bool,
}

const CONFIG_TOML: &str = "[ordering]\n\
    max_chain_depth = 50\n\
    \n\
    [locking]\n\
    timeout_ms = 5000\n\
    lock_dir = \".runsheet/locks\"\n";

const GITIGNORE: &str = "runsheet.db\nrunsheet.db-*\nlocks/\n";

#[derive(Debug, Serialize)]
struct InitReport {
    state_dir: String,
    store: String,
    config: String,
}

/// Execute `runsheet init`. Creates the project skeleton:
///
/// ```text
/// .runsheet/
///   runsheet.db    (SQLite store, migrated to the latest schema)
///   config.toml    (default engine config)
///   .gitignore     (runsheet.db, lock files)
/// ```
///
/// Re-running against an existing store only migrates it; existing data is
/// never dropped.
///
/// # Errors
///
/// Returns an error if `.runsheet/` already exists and `--force` is not set,
/// or if any filesystem or database operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let state_dir = project_root.join(STATE_DIR);
    if state_dir.exists() && !args.force {
        anyhow::bail!("{STATE_DIR}/ already exists. Use `runsheet init --force` to reinitialize.");
    }

    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    let config_path = config::config_path(project_root);
    std::fs::write(&config_path, CONFIG_TOML)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let gitignore = state_dir.join(".gitignore");
    std::fs::write(&gitignore, GITIGNORE)
        .with_context(|| format!("Failed to write {}", gitignore.display()))?;

    let store_path = config::store_path(project_root);
    SqliteStore::open(&store_path)
        .with_context(|| format!("Failed to create store at {}", store_path.display()))?;

    tracing::info!(root = %project_root.display(), "initialized runsheet project");

    let report = InitReport {
        state_dir: state_dir.display().to_string(),
        store: store_path.display().to_string(),
        config: config_path.display().to_string(),
    };
    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "initialized\t{}", r.state_dir),
        |r, w| {
            pretty_section(w, "Initialized runsheet project")?;
            pretty_kv(w, "store", &r.store)?;
            pretty_kv(w, "config", &r.config)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::CONFIG_TOML;
    use runsheet_core::EngineConfig;

    #[test]
    fn config_template_matches_defaults() {
        let parsed: EngineConfig = toml::from_str(CONFIG_TOML).expect("template parses");
        let defaults = EngineConfig::default();
        assert_eq!(parsed.ordering.max_chain_depth, defaults.ordering.max_chain_depth);
        assert_eq!(parsed.locking.timeout_ms, defaults.locking.timeout_ms);
        assert_eq!(parsed.locking.lock_dir, defaults.locking.lock_dir);
    }
}
