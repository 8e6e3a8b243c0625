use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mkpi_core::CategoryId;
use mkpi_storage::PgStore;
use mkpi_sync::{build_runtime, maybe_build_scheduler, SyncConfig, TickOutcome};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(name = "mkpi-cli")]
#[command(about = "Manufacturing KPI sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one live tick now.
    Sync,
    /// Run the end-of-day snapshot tick now.
    Snapshot,
    /// Apply pending database migrations.
    Migrate,
    /// Run the cron scheduler until interrupted.
    Serve,
    /// Print the newest report for a category, or the main report.
    Report {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        snapshot: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_outcome(outcome: &TickOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let runtime = build_runtime(config).await?;
            let outcome = runtime.orchestrator.run_sync_tick(Utc::now()).await?;
            print_outcome(&outcome)?;
        }
        Commands::Snapshot => {
            let runtime = build_runtime(config).await?;
            let outcome = runtime.orchestrator.run_snapshot_tick(Utc::now()).await?;
            print_outcome(&outcome)?;
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let runtime = build_runtime(config).await?;
            let Some(mut sched) = maybe_build_scheduler(
                &runtime.config,
                runtime.orchestrator.clone(),
                runtime.holidays.clone(),
            )
            .await?
            else {
                bail!("scheduler disabled; set MKPI_SCHEDULER_ENABLED=1");
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Report { category, snapshot } => {
            let runtime = build_runtime(config).await?;
            let body = match category {
                Some(id) => {
                    let report = runtime
                        .reader
                        .latest_process(&CategoryId::new(id), snapshot)
                        .await?;
                    serde_json::to_string_pretty(&report)?
                }
                None => serde_json::to_string_pretty(&runtime.reader.latest_main(snapshot).await?)?,
            };
            println!("{body}");
        }
    }

    Ok(())
}
