//! Package deployment admin CLI.

use clap::{Parser, Subcommand};
use pkgdeploy_api::telemetry::init_tracing;

mod commands;

#[derive(Parser)]
#[command(name = "pkgdeploy")]
#[command(about = "Package deployment admin tool", long_about = None)]
struct Cli {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Validate a configuration file
    CheckConfig {
        /// Path to the configuration file
        #[arg(default_value = "pkgdeploy.kdl")]
        path: String,
    },
    /// List persisted deployment jobs
    Jobs {
        /// Only show jobs with this status (e.g. SCHEDULED, FAILED)
        #[arg(long)]
        status: Option<String>,
    },
    /// Delete finished jobs older than the given age
    Purge {
        /// Age in days
        #[arg(long, default_value = "7")]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Migrate => {
            commands::migrate(cli.database_url.as_deref()).await?;
        }
        Commands::CheckConfig { path } => {
            commands::check_config(&path)?;
        }
        Commands::Jobs { status } => {
            commands::jobs::list(cli.database_url.as_deref(), status.as_deref()).await?;
        }
        Commands::Purge { days } => {
            commands::jobs::purge(cli.database_url.as_deref(), days).await?;
        }
    }

    Ok(())
}
