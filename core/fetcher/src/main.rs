//! ap-fetcher entrypoint.
//!
//! Loads the config, sets up logging, and hands control to the driving loop,
//! which runs until the process is terminated. Config problems exit before any
//! network activity; a panic anywhere in the loop is logged and exits 1.

use clap::Parser;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use ap_fetcher::{
    identity, load_config, logging, ArchipelagoClient, EventIngestor, FetcherConfig, Result,
    Runner, SnapshotPersister, StateStore,
};

#[derive(Parser)]
#[command(name = "ap-fetcher")]
#[command(about = "Mirrors a multiworld session into a JSON state file")]
#[command(version)]
struct Cli {
    /// Config file (default: config/config.json, then ../config/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("[ap-fetcher] {}", err);
            return ExitCode::FAILURE;
        }
    };

    // Dropped on return so the file writer drains before exit.
    let _logging_guard = logging::init(config.paths.fetcher_log.as_deref());

    match panic::catch_unwind(AssertUnwindSafe(|| start(config))) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            error!(error = %err, "Fetcher failed to start");
            ExitCode::FAILURE
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|message| message.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(panic = %message, "Fetcher loop crashed");
            ExitCode::FAILURE
        }
    }
}

fn start(config: FetcherConfig) -> Result<()> {
    let archipelago = &config.archipelago;
    info!(
        address = %archipelago.address(),
        game = %archipelago.game,
        slot = %archipelago.slot_name,
        "Starting fetcher"
    );

    if config.paths.state_file.is_none() {
        warn!("paths.state_file is not set; snapshots will not be written");
    }

    let uuid = identity::load_or_create(&config.paths.uuid_file);
    let client = ArchipelagoClient::new(archipelago, uuid)?;

    let store = Arc::new(StateStore::new(archipelago.game.clone()));
    let ingestor = EventIngestor::new(Arc::clone(&store), archipelago.clone());
    let persister = SnapshotPersister::new(
        Arc::clone(&store),
        config.paths.state_file.clone(),
        config.archipelago_raw.clone(),
    );

    info!(url = %client.url(), "Connecting");
    Runner::new(client, ingestor, persister, config.flush_interval).run()
}
