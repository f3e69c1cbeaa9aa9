#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{OutputMode, Reported};
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "runsheet: ordered, dependency-checked sibling sets for migration plans",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format (overrides `RUNSHEET_FORMAT`).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Project root holding `.runsheet/` (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Derive the output mode from flags and environment.
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a runsheet project",
        long_about = "Create .runsheet/ with an empty store and a default config.",
        after_help = "EXAMPLES:\n    # Initialize in the current directory\n    runsheet init\n\n    # Initialize another directory\n    runsheet init --root ./cutover"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Seed an empty scope from a JSON file",
        long_about = "Register the container if needed and install its children in one transaction.",
        after_help = "EXAMPLES:\n    # Create a master phase with its steps\n    runsheet install phase-1 --level master --kind phase --file steps.json\n\n    # Instantiate it for a run\n    runsheet install run-7-phase-1 --kind phase --from phase-1 --file run.json"
    )]
    Install(cmd::install::InstallArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show one scope in order",
        long_about = "List the children of a container at one level, sorted by order.",
        after_help = "EXAMPLES:\n    # Show an instance scope\n    runsheet show run-7-phase-1\n\n    # Show the master template\n    runsheet show phase-1 --level master\n\n    # Emit machine-readable output\n    runsheet show phase-1 --level master --json"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Read",
        about = "Validate a scope without changing it",
        long_about = "Run ordering and dependency checks on the committed state. Exits 2 when unhealthy.",
        after_help = "EXAMPLES:\n    # Check an instance scope\n    runsheet check run-7-phase-1"
    )]
    Check(cmd::check::CheckArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show the master scope an instance came from",
        after_help = "EXAMPLES:\n    # Trace an instance back to its template\n    runsheet origin run-7-phase-1"
    )]
    Origin(cmd::origin::OriginArgs),

    #[command(
        next_help_heading = "Read",
        about = "List registered containers",
        after_help = "EXAMPLES:\n    # Every container, masters first\n    runsheet parents\n\n    # Only instances\n    runsheet parents --level instance"
    )]
    Parents(cmd::parents::ParentsArgs),

    #[command(
        next_help_heading = "Mutate",
        about = "Move siblings to new positions",
        long_about = "Assign new orders atomically. Unnamed siblings keep their order; gaps are closed.",
        after_help = "EXAMPLES:\n    # Swap the first two steps\n    runsheet reorder run-7-phase-1 prep=2 backup=1\n\n    # Reorder a master template\n    runsheet reorder phase-1 --level master cutover=1"
    )]
    Reorder(cmd::reorder::ReorderArgs),

    #[command(
        next_help_heading = "Mutate",
        about = "Set or clear a sibling's predecessor",
        after_help = "EXAMPLES:\n    # cutover runs after backup\n    runsheet link run-7-phase-1 cutover --after backup\n\n    # Remove the dependency\n    runsheet link run-7-phase-1 cutover --after none"
    )]
    Link(cmd::link::LinkArgs),

    #[command(
        next_help_heading = "Mutate",
        about = "Renumber a scope to 1..N",
        long_about = "Close gaps left by out-of-band deletes while keeping relative order.",
        after_help = "EXAMPLES:\n    # Repair an instance scope\n    runsheet repair run-7-phase-1"
    )]
    Repair(cmd::repair::RepairArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completions",
        after_help = "EXAMPLES:\n    # Bash\n    runsheet completions bash > /etc/bash_completion.d/runsheet"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("RUNSHEET_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "runsheet=debug,info"
        } else {
            "runsheet=info,warn"
        })
    });

    let format = env::var("RUNSHEET_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let project_root = match &cli.root {
        Some(root) => root.clone(),
        None => env::current_dir()?,
    };
    let output = cli.output_mode();

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, output, &project_root),
        Commands::Install(args) => cmd::install::run_install(args, output, &project_root),
        Commands::Show(args) => cmd::show::run_show(args, output, &project_root),
        Commands::Check(args) => cmd::check::run_check(args, output, &project_root),
        Commands::Origin(args) => cmd::origin::run_origin(args, output, &project_root),
        Commands::Parents(args) => cmd::parents::run_parents(args, output, &project_root),
        Commands::Reorder(args) => cmd::reorder::run_reorder(args, output, &project_root),
        Commands::Link(args) => cmd::link::run_link(args, output, &project_root),
        Commands::Repair(args) => cmd::repair::run_repair(args, output, &project_root),
        Commands::Completions(args) => {
            cmd::completions::run_completions(args.shell, &mut Cli::command())
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let result = run(&cli);
    if let Some(reported) = result.as_ref().err().and_then(|err| err.downcast_ref::<Reported>()) {
        std::process::exit(reported.exit_code);
    }
    result
}
