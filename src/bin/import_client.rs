//! Port import client
//!
//! Streams a ports JSON document to the import server one record at a time.
//! Type `c` + Enter or press Ctrl+C to cancel; the server then discards
//! everything sent so far.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | PORT_SERVER_ADDR | 127.0.0.1:50051 | Import server address |
//! | PORT_SOURCE_PATH | ports.json | Source document |
//! | PORT_RECORD_DELAY_MS | 0 | Pause after each record |
//! | PORT_CHANNEL_CAPACITY | 0 | Decoder queue depth (0 = rendezvous) |
//! | PORT_LOG_FORMAT | text | `text` or `json` |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use port_ingest::observability::{init_tracing, BoxError};
use port_ingest::{ClientConfig, ImportClient};
use std::io::BufRead;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel on Ctrl+C or on a `c` line from stdin
fn spawn_cancel_listeners(cancel: &CancellationToken) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, cancelling import");
            on_signal.cancel();
        }
    });

    // A detached thread, so a pending stdin read never delays exit
    let on_input = cancel.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("c") => {
                    info!("Cancel requested from stdin");
                    on_input.cancel();
                    break;
                }
                Ok(_) if on_input.is_cancelled() => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = match std::env::args().nth(1) {
        Some(path) => ClientConfig::from_toml_file(path)?,
        None => {
            let config = ClientConfig::from_env();
            config.validate()?;
            config
        }
    };
    init_tracing(config.log_format)?;

    let cancel = CancellationToken::new();
    spawn_cancel_listeners(&cancel);

    println!("Importing {} into {}", config.source_path.display(), config.server_addr);
    println!("Type 'c' + Enter or press Ctrl+C to cancel");

    let client = ImportClient::new(config);
    match client.run(&cancel).await {
        Ok(report) => {
            println!();
            println!("Import Summary");
            println!("==============");
            println!("Records sent:    {}", report.sent);
            println!("Send failures:   {}", report.send_failures);
            println!("Server failures: {}", report.response.failed_items_number);
            println!("Result:          {}", report.response.message);
            cancel.cancel();
            Ok(())
        }
        Err(e) => {
            error!("Import failed: {}", e);
            cancel.cancel();
            Err(e.into())
        }
    }
}
