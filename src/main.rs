//! Admission gate binary.
//!
//! ```text
//!     Client Request                ┌──────────────────────────────────────┐
//!     ─────────────────────────────▶│ identity → activity → token bucket   │
//!                                   │        │                    │        │
//!     429 Rate limit exceeded       │        ▼                    ▼        │
//!     ◀─────────────────────────────│  abuse signal (log)   admit / deny   │
//!                                   └─────────────────────────┬────────────┘
//!                                                             │ admit
//!                                                             ▼
//!                                                      upstream service
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use admission_gate::admin::{run_admin, AdminState};
use admission_gate::config::{load_config, GateConfig};
use admission_gate::lifecycle::signals::shutdown_on_signal;
use admission_gate::observability::{logging, metrics};
use admission_gate::{AdmissionFilter, GateServer, Shutdown};

#[derive(Parser)]
#[command(name = "admission-gate")]
#[command(about = "Per-client rate limiting and abuse detection in front of one service", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GateConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("admission-gate v{} starting", env!("CARGO_PKG_VERSION"));

    let admission = &config.admission;
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        bucket_capacity = admission.bucket_capacity,
        refill_window_secs = admission.refill_window_secs,
        abuse_threshold = admission.abuse_threshold,
        abuse_window_secs = admission.abuse_window_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let filter = Arc::new(AdmissionFilter::new(&config.admission));

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState {
            filter: filter.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        Some(tokio::spawn(run_admin(listener, state, shutdown.subscribe())))
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server_shutdown = shutdown.subscribe();
    let server = GateServer::with_filter(config, filter)?;
    server.run(listener, server_shutdown).await?;

    if let Some(task) = admin_task {
        if let Err(e) = task.await? {
            tracing::error!(error = %e, "Admin API failed");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
