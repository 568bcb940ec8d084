use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(version, about = "Parallel feature orchestrator")]
pub struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Graph document path, relative to the project directory
    #[arg(long, global = true)]
    pub graph: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate the graph document
    Validate,
    /// Print the dependency tree and dispatch waves
    Visualize,
    /// Execute the graph
    Run {
        /// Plan only: print dispatch waves without executing
        #[arg(long)]
        dry_run: bool,

        /// Maximum features running concurrently
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Branch to cut worktrees from and merge back into
        #[arg(long)]
        base_branch: Option<String>,

        /// Overall run deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print the captured log for a feature
    Logs {
        feature_id: String,
    },
}

fn init_tracing(project_dir: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = project_dir.join(".trellis").join("logs");
    if std::fs::create_dir_all(&log_dir).is_err() {
        // fall back to stderr so a read-only checkout still gets diagnostics
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return None;
    }

    let appender = tracing_appender::rolling::never(&log_dir, "trellis.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let _guard = init_tracing(&project_dir);

    match cli.command {
        Commands::Validate => cmd::validate::execute(&project_dir, cli.graph.as_ref()),
        Commands::Visualize => cmd::visualize::execute(&project_dir, cli.graph.as_ref()),
        Commands::Run {
            dry_run,
            max_parallel,
            base_branch,
            timeout,
        } => {
            cmd::run::execute(
                &project_dir,
                cmd::run::RunArgs {
                    graph_file: cli.graph,
                    dry_run,
                    max_parallel,
                    base_branch,
                    timeout_secs: timeout,
                },
            )
            .await
        }
        Commands::Logs { feature_id } => {
            cmd::logs::execute(&project_dir, cli.graph.as_ref(), &feature_id)
        }
    }
}
