mod config;
mod runner;
mod store;
mod telemetry;

use clap::Parser;
use config::{CliArgs, DumpConfig};
use std::sync::Arc;
use store::AnyStore;
use telemetry::{init_telemetry, shutdown_telemetry};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    // Installed first so configuration warnings are visible.
    let providers = init_telemetry()?;
    let config = DumpConfig::try_from(args)?;
    log_startup_info(&config);

    let store = Arc::new(AnyStore::new(&config.store, config.pull_size));
    let outcome = runner::run(config, store).await;

    match &outcome {
        Ok(_summary) => {
            #[cfg(feature = "tracing")]
            tracing::info!(
                completed = _summary.completed(),
                failed = _summary.failed(),
                uploaded_bytes = _summary.uploaded_bytes(),
                "All cycles finished"
            );
        }
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::error!("Run aborted: {_e:#}");
        }
    }

    shutdown_telemetry(providers);
    outcome.map(|_| ())
}

fn log_startup_info(_config: &DumpConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting relaydump with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting relaydump with {} workers: {}",
            _config.num_workers,
            runner::describe(&_config.settings)
        );
    }
}
