//! server-frame demo binary.
//!
//! Boots one endpoint with a `/health` route under the lifecycle coordinator
//! and exits after an orderly shutdown (Ctrl-C, SIGTERM, SIGHUP, SIGQUIT).
//!
//! ```text
//! load config → init logging/metrics → coordinator.init(hooks)
//!     → bind + serve endpoint → coordinator.run()
//!     → coordinator.wait_for_shutdown() → exit
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use clap::Parser;

use server_frame::config::{load_config, FrameConfig};
use server_frame::lifecycle::{LifecycleCoordinator, LifecycleHooks};
use server_frame::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "server-frame")]
#[command(about = "Lifecycle-managed HTTP endpoint", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.port`.
    #[arg(short, long)]
    port: Option<u16>,
}

/// Marks itself draining once shutdown begins.
#[derive(Default)]
struct Service {
    draining: AtomicBool,
}

impl LifecycleHooks for Service {
    fn on_run(&self) -> bool {
        tracing::info!("Service accepting traffic");
        true
    }

    fn on_shutdown(&self) {
        self.draining.store(true, Ordering::SeqCst);
        tracing::info!("Service draining");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => FrameConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listener.port = port;
    }

    logging::init_logging(&config.log)?;
    tracing::info!("server-frame v0.1.0 starting");

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let service = Arc::new(Service::default());
    let mut coordinator = LifecycleCoordinator::new(config.clone());
    coordinator.init(Some(service.clone()))?;

    let mut endpoint = coordinator.endpoint("http");
    {
        let service = service.clone();
        endpoint.route_func(
            "/health",
            move || {
                let service = service.clone();
                async move {
                    if service.draining.load(Ordering::SeqCst) {
                        (StatusCode::OK, "draining")
                    } else {
                        (StatusCode::OK, "ok")
                    }
                }
            },
            &[Method::GET, Method::HEAD],
        )?;
    }

    let started = match endpoint.bind(config.listener.port).await {
        Ok(_) => match &config.listener.tls {
            Some(tls) => endpoint.serve_tls(&tls.cert_path, &tls.key_path).await,
            None => endpoint.serve(),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = started {
        tracing::error!(error = %e, "Endpoint failed to start; shutting down");
        coordinator.shutdown();
    } else if !coordinator.run()? {
        coordinator.shutdown();
    }

    let report = coordinator.wait_for_shutdown().await?;
    tracing::info!(
        signal = %report.signal,
        drained = report.drained,
        log_timed_out = report.log_shutdown.timed_out,
        "Shutdown complete"
    );
    Ok(())
}
