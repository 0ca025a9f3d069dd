mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::check::OutputFormat;

/// agenthub -- lease-based task claiming for agent workers.
#[derive(Parser)]
#[command(name = "agenthub", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the claim scenarios against a fresh store and audit the event logs.
    Check {
        /// Lease used by the expiry scenario (the check sleeps past it).
        #[arg(long, default_value_t = 1_000)]
        lease_ms: u64,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Also write a Markdown report here.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run workers and the reaper over a batch of simulated tasks.
    Demo {
        /// Path to agenthub.toml (short demo timings when omitted).
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 6)]
        tasks: usize,
        /// Overrides worker.count.
        #[arg(long)]
        workers: Option<usize>,
        /// Abandon every N-th handled task to exercise reclaim (0 = never).
        #[arg(long, default_value_t = 0)]
        crash_every: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Check {
            lease_ms,
            format,
            report,
        } => commands::check::run(lease_ms, format, report.as_deref()).await,
        Commands::Demo {
            config,
            tasks,
            workers,
            crash_every,
        } => commands::demo::run(config.as_deref(), tasks, workers, crash_every).await,
    }
}
