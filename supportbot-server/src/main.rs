use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use supportbot_core::tasks::maintenance;

mod context;
mod discord;

use context::{Secrets, ServerContext};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Postgres,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "supportbot")]
#[command(author, version, about = "SupportBot - Discord support sessions with AI answers and human escalation")]
pub struct Args {
    /// JSON support configuration; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Postgres connection URL (required with --store postgres)
    #[arg(long)]
    database_url: Option<String>,

    /// Backing store for sessions and rate-limit snapshots
    #[arg(long, value_enum, default_value = "memory")]
    store: StoreKind,

    /// Prefix for staff commands (`!status`, `!resume`, ...)
    #[arg(long, default_value = "!")]
    command_prefix: String,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("supportbot=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(sub) {
        eprintln!("Failed to set global subscriber: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    info!("SupportBot starting. store={:?}, prefix='{}'", args.store, args.command_prefix);

    if let Err(e) = run(args).await {
        error!("Server error: {:?}", e);
        return Err(e);
    }
    info!("Main finished. Goodbye!");
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let secrets = Secrets::from_env()?;
    let ctx = ServerContext::new(&args, secrets).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = maintenance::spawn_all(ctx.maintenance_targets(), &ctx.config, shutdown_rx.clone());
    tasks.extend(
        discord::run_gateway(ctx.discord_token.clone(), ctx.handler.clone(), shutdown_rx).await?,
    );

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received; shutting down");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            error!("Task ended abnormally: {:?}", e);
        }
    }

    // Final snapshot so cooldowns survive the restart.
    match ctx.orchestrator.rate_limiter().snapshot(&ctx.store).await {
        Ok(saved) => info!("Persisted {} rate limit record(s)", saved),
        Err(e) => error!("Final rate limit snapshot failed: {}", e),
    }
    Ok(())
}
