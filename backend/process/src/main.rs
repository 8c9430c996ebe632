use std::time::Duration;

use clap::{Parser, Subcommand};
use ledger::{Ledger, RedisStore};
use tokio::{signal::ctrl_c, time::interval};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile one raffle's entry counts with its tickets
    Audit { raffle_id: Uuid },

    /// Reconcile every raffle once
    AuditAll,

    /// Reconcile every raffle on an interval until interrupted
    Watch {
        #[arg(long, default_value_t = 300)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let store = RedisStore::connect(&args.redis_url).await?;
    let (ledger, _receiver) = Ledger::with_receiver(store);

    match args.command {
        Command::Audit { raffle_id } => {
            let summary = ledger.audit_raffle(raffle_id).await?;

            for line in &summary.report {
                println!("{line:?}");
            }
            println!(
                "Checked {}: {} verified, {} fixed, {} orphaned",
                summary.total_checked,
                summary.verified,
                summary.mismatches_fixed,
                summary.orphaned_fixed
            );
        }
        Command::AuditAll => {
            process::audit_all(&ledger).await?;
        }
        Command::Watch { interval: secs } => {
            let mut ticker = interval(Duration::from_secs(secs.max(1)));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        process::audit_all(&ledger).await?;
                    }
                    _ = ctrl_c() => {
                        info!("Received Ctrl+C, stopping watch");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
