mod commands;
mod handoff;
mod signal;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "harvest")]
#[command(about = "Harvest merchant orders into a local buffer and push them downstream")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Collect, enrich, buffer and push every order in a date range.
    Run {
        /// First day to collect (YYYY-MM-DD, UTC+1). Defaults to today.
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last day to collect, inclusive. Defaults to `--start`.
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Only orders in this settlement status; `settled` is a shorthand.
        #[arg(long)]
        settlement_status: Option<String>,
    },
    /// Re-send every dead-lettered batch to the sink.
    Replay,
    /// Show the cached credentials and when they expire.
    AuthStatus,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = harvest_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Run {
            start,
            end,
            settlement_status,
        }) => commands::run_harvest(&config, start, end, settlement_status.as_deref()).await,
        Some(Commands::Replay) => commands::run_replay(&config).await,
        Some(Commands::AuthStatus) | None => commands::run_auth_status(&config).await,
    }
}

#[cfg(test)]
mod tests;
