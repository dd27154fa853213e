//! Audition CLI binary.
//!
//! This binary provides command-line access to Audition's batch workflow:
//! - Submit a condition × prompts × replicates run
//! - Poll pending batches, once or continuously
//! - Reconcile runs stamped with the wrong batch id
//! - Inspect and cancel runs

use audition::observability::{LoggingConfig, init_logging};
use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use cli::{Cli, Commands, Services, SubmitArgs};

    // Parse command-line arguments
    let cli = Cli::parse();

    // DATABASE_URL and API keys may live in .env
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose { "debug" } else { "info" };
    init_logging(
        &LoggingConfig::default()
            .with_log_level(log_level)
            .with_json_logs(cli.json_logs),
    )?;

    let services = Services::load(cli.config.as_deref())?;

    // Execute the requested command
    match cli.command {
        Commands::Submit {
            condition,
            version,
            conditions,
            prompts,
            replicates,
            single_lane,
        } => {
            let args = SubmitArgs {
                condition: &condition,
                version,
                conditions: conditions.as_deref(),
                prompts: &prompts,
                replicates,
                single_lane,
            };
            cli::submit(&services, args).await?;
        }

        Commands::Poll { watch, reconcile } => {
            cli::poll(&services, watch, reconcile).await?;
        }

        Commands::Reconcile => {
            cli::reconcile(&services).await?;
        }

        Commands::Cancel { run_id } => {
            cli::cancel(&services, &run_id).await?;
        }

        Commands::Status { run_id, format } => {
            cli::status(&services, &run_id, format).await?;
        }
    }

    Ok(())
}
