//! zone-manager binary entry point.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use zone_manager::{telemetry, Config, HickoryNameResolver, ZoneManagerService};

/// Partitioned maintenance worker for a DNS zone control plane.
#[derive(Parser, Debug)]
#[command(name = "zone-manager")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML). Missing files are skipped.
    #[arg(short, long, default_value = "zone-manager.toml")]
    config: PathBuf,

    /// Override `service.worker_id`.
    #[arg(long)]
    worker_id: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()).required(false))
        .add_source(
            config::Environment::with_prefix("ZONE_MANAGER")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    if let Some(worker_id) = &args.worker_id {
        config.service.worker_id = worker_id.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;

    if args.check {
        println!("{}: configuration ok", args.config.display());
        return Ok(());
    }

    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        worker_id = %config.service.worker_id,
        members = ?config.service.initial_members(),
        tasks = ?config.service.enabled_tasks,
        "starting zone-manager"
    );

    let resolver = HickoryNameResolver::from_system_conf()?;
    let service = ZoneManagerService::builder(config)
        .resolver(Arc::new(resolver))
        .build()?;

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received Ctrl-C, shutting down"),
                Err(e) => error!("failed to listen for Ctrl-C: {}", e),
            }
            token.cancel();
        }
    });

    if let Err(e) = service.run(token).await {
        error!("zone manager error: {}", e);
        return Err(e.into());
    }

    info!("zone-manager shutdown complete");
    Ok(())
}
