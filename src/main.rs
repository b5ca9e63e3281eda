//! Port import server
//!
//! Accepts import streams over TCP and commits each one as a single
//! transaction. Configuration comes from a TOML file given as the first
//! argument, or from environment variables.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | PORT_SERVER_ADDR | 0.0.0.0:50051 | Listen address |
//! | PORT_MAX_FRAME_BYTES | 4194304 | Largest wire frame accepted |
//! | PORT_LOG_FORMAT | text | `text` or `json` |
//! | RUST_LOG | info | Log filter |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use port_ingest::observability::{init_tracing, BoxError};
use port_ingest::{ImportServer, ServerConfig, TransactionCoordinator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_toml_file(path)?,
        None => {
            let config = ServerConfig::from_env();
            config.validate()?;
            config
        }
    };
    init_tracing(config.log_format)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        shutdown.cancel();
    });

    let coordinator = Arc::new(TransactionCoordinator::new());
    let server = ImportServer::new(config, coordinator.clone()).bind().await?;

    println!("Port Import Server");
    println!("==================");
    println!("Listening on {}", server.local_addr()?);
    println!("Press Ctrl+C to shutdown");
    println!();

    server.serve(cancel).await?;

    let stats = coordinator.stats();
    info!(
        "Shut down: {} imports committed, {} aborted, {} records stored",
        stats.committed,
        stats.aborted,
        coordinator.committed_len()
    );
    Ok(())
}
