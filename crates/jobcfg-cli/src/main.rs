//! jobcfg CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "jobcfg")]
#[command(about = "Resolve job declarations into execution-ready runs", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a job declaration by resolving it
    Validate {
        /// Path to the declaration file
        #[arg(default_value = "job.kdl")]
        path: String,
    },
    /// Print the fully resolved job
    Resolve {
        /// Path to the declaration file
        #[arg(default_value = "job.kdl")]
        path: String,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the merged argument line of each run
    Args {
        /// Path to the declaration file
        #[arg(default_value = "job.kdl")]
        path: String,
        /// Only print this run
        #[arg(long, env = "JOBCFG_RUN")]
        run: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Resolve { path, format } => {
            commands::resolve::resolve(&path, format)?;
        }
        Commands::Args { path, run } => {
            commands::resolve::args(&path, run.as_deref())?;
        }
    }

    Ok(())
}
