//! autorun CLI entry point

use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::{Path, PathBuf};

use autorun::cli::commands;
use autorun::cli::{GlobalFlags, Output, WorkflowContext};
use autorun::core::trigger::EventKind;
use autorun::core::workflow::DEFAULT_COMMIT_LABEL;
use autorun::telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "autorun")]
#[command(author, version, about = "Scheduled fetch-and-commit runner", long_about = None)]
struct Cli {
    /// Workflow file (default: autorun.yaml in this or a parent directory)
    #[arg(long, global = true, env = "AUTORUN_WORKFLOW")]
    workflow: Option<PathBuf>,

    /// Show debug logs and captured step output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workflow once: sync, setup, run, commit, push
    Run {
        /// Event to run as (push, schedule, manual)
        #[arg(long)]
        event: Option<EventKind>,
        /// Branch for a push event (default: current branch)
        #[arg(long)]
        branch: Option<String>,
        /// Run even if the working tree has uncommitted changes
        #[arg(long)]
        allow_dirty: bool,
        /// Clone this repository first and run inside the clone
        #[arg(long, value_name = "URL")]
        clone: Option<String>,
        /// Directory for --clone (default: derived from the URL)
        #[arg(long, requires = "clone")]
        dir: Option<PathBuf>,
    },
    /// Stage all changes and commit them if there are any
    Commit {
        /// Commit message
        #[arg(default_value = DEFAULT_COMMIT_LABEL)]
        label: String,
    },
    /// Run the workflow on its cron schedule until interrupted
    Schedule {
        /// Wait for the next fire, run once, and exit
        #[arg(long)]
        once: bool,
    },
    /// Show upcoming scheduled fire times (UTC)
    Next {
        /// Number of fire times to show
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
        /// Start from this instant instead of now (RFC 3339)
        #[arg(long)]
        after: Option<DateTime<Utc>>,
    },
    /// Exit 0 if an event triggers the workflow, 1 otherwise
    CheckTrigger {
        /// Event kind (push, schedule, manual)
        #[arg(long)]
        event: EventKind,
        /// Branch for a push event (default: current branch)
        #[arg(long)]
        branch: Option<String>,
    },
    /// Check the workflow file for errors
    Validate,
    /// Show the last run, history and lease
    Status,
    /// Write a starter autorun.yaml
    Init {
        /// Directory to write into (default: repository root)
        dir: Option<PathBuf>,
        /// Overwrite an existing workflow file
        #[arg(long)]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = match cli.command {
        Commands::Schedule { .. } => TelemetryConfig::daemon(cli.verbose),
        _ => TelemetryConfig::for_verbosity(cli.verbose, cli.quiet),
    };
    let _guard = init_telemetry(&telemetry)?;

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            Output::error(&format!("{:#}", e));
            1
        }
    };

    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let cwd = std::env::current_dir()?;
    let flags = GlobalFlags {
        quiet: cli.quiet,
        verbose: cli.verbose,
        json: cli.json,
    };
    let workflow = cli.workflow.as_deref();

    match cli.command {
        Commands::Run {
            event,
            branch,
            allow_dirty,
            clone,
            dir,
        } => {
            let start = match clone {
                Some(ref url) => commands::run::clone_for_run(url, dir.as_deref(), &cwd)?,
                None => cwd,
            };
            let ctx = load(workflow, &start, flags)?;
            let options = commands::run::RunOptions {
                event,
                branch,
                allow_dirty,
            };
            commands::run::run_run(&ctx, options)
        }
        Commands::Commit { label } => {
            commands::commit::run_commit(&cwd, &label, flags)?;
            Ok(0)
        }
        Commands::Schedule { once } => {
            let ctx = load(workflow, &cwd, flags)?;
            commands::schedule::run_schedule(ctx, once).await
        }
        Commands::Next { count, after } => {
            let ctx = load(workflow, &cwd, flags)?;
            commands::next::run_next(&ctx, count, after)?;
            Ok(0)
        }
        Commands::CheckTrigger { event, branch } => {
            let ctx = load(workflow, &cwd, flags)?;
            commands::check_trigger::run_check_trigger(&ctx, event, branch)
        }
        Commands::Validate => commands::validate::run_validate(workflow, &cwd, flags),
        Commands::Status => {
            let ctx = load(workflow, &cwd, flags)?;
            commands::status::run_status(&ctx)?;
            Ok(0)
        }
        Commands::Init { dir, force } => {
            commands::init::run_init(dir.as_deref(), &cwd, force, flags)?;
            Ok(0)
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "autorun", &mut std::io::stdout());
            Ok(0)
        }
    }
}

fn load(
    workflow: Option<&Path>,
    start: &Path,
    flags: GlobalFlags,
) -> anyhow::Result<WorkflowContext> {
    WorkflowContext::load(workflow, start, flags)
}
