//! stakewatch CLI: snapshot, inspect, verify.

use clap::{Parser, Subcommand};
use stakewatch::chain::fetch::FetchConfig;
use stakewatch::chain::rpc::RpcConfig;
use stakewatch::{
    compute_staking_snapshot, staking_data_digest, CancelToken, HttpRpcClient, SnapshotStore,
    StakingConfig,
};
use std::path::PathBuf;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    let cli = Cli::parse();
    match cli.command {
        Command::Snapshot(args) => run_snapshot(args),
        Command::Inspect(args) => run_inspect(&args),
        Command::Verify(args) => run_verify(&args),
    }
}

#[derive(Parser)]
#[command(name = "stakewatch")]
#[command(about = "Reconstruct custody stakes from on-chain transfer history")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full or incremental reconstruction and persist the snapshot.
    Snapshot(SnapshotArgs),
    /// Print the latest persisted snapshot.
    Inspect(InspectArgs),
    /// Recompute the latest snapshot's staking-data digest and compare.
    Verify(VerifyArgs),
}

#[derive(Parser)]
struct SnapshotArgs {
    /// Resume from the prior snapshot's checkpoint instead of replaying
    /// full history.
    #[arg(long)]
    incremental: bool,
    /// Config file; defaults to the standard lookup paths.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    rpc_url: Option<String>,
    #[arg(long, default_value = "./data/stakewatch.sqlite")]
    db: PathBuf,
    /// Also write the full result JSON here.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Parser)]
struct InspectArgs {
    #[arg(long, default_value = "./data/stakewatch.sqlite")]
    db: PathBuf,
}

#[derive(Parser)]
struct VerifyArgs {
    #[arg(long, default_value = "./data/stakewatch.sqlite")]
    db: PathBuf,
}

fn run_snapshot(args: SnapshotArgs) -> Result<(), Box<dyn std::error::Error>> {
    let staking_config = match &args.config {
        Some(path) => StakingConfig::load_from_path(path),
        None => StakingConfig::load(),
    };
    let mut rpc_config = RpcConfig::default();
    if let Some(url) = args.rpc_url {
        rpc_config.url = url;
    }
    let rpc = HttpRpcClient::new(rpc_config)?;
    let store = SnapshotStore::open(&args.db)?;
    let cancel = CancelToken::new();
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.cancel();
            }
        });
        compute_staking_snapshot(
            &rpc,
            &store,
            &staking_config,
            &FetchConfig::default(),
            args.incremental,
            &cancel,
        )
        .await
    })?;
    info!(
        wallets = result.staking_data.len(),
        total_staked = result.total_staked,
        total_locked = result.total_locked,
        requests = rpc.request_count(),
        "snapshot complete"
    );
    for warning in &result.warnings {
        tracing::warn!(%warning, "degraded");
    }
    if let Some(out) = &args.out {
        std::fs::write(out, serde_json::to_string_pretty(&result)?)?;
        info!(?out, "result written");
    }
    println!("{}", result.data_digest);
    Ok(())
}

fn run_inspect(args: &InspectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = SnapshotStore::open(&args.db)?;
    match store.load_latest_snapshot()? {
        Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        None => println!("no snapshot stored"),
    }
    Ok(())
}

fn run_verify(args: &VerifyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = SnapshotStore::open(&args.db)?;
    let Some(snapshot) = store.load_latest_snapshot()? else {
        eprintln!("no snapshot stored");
        std::process::exit(1);
    };
    let computed = staking_data_digest(&snapshot.staking_data)?;
    if computed == snapshot.data_digest {
        println!("OK\t{computed}");
    } else {
        eprintln!(
            "MISMATCH\tcomputed={computed}\tstored={}",
            snapshot.data_digest
        );
        std::process::exit(1);
    }
    Ok(())
}
