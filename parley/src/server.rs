//! Server lifecycle management
//!
//! Runs the HTTP/websocket server and watches the media worker. A shutdown
//! signal drains the HTTP server gracefully; a dead worker takes the whole
//! process down after `media.exit_delay_ms`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use parley_core::Config;
use parley_sfu::RoomRegistry;

pub struct ParleyServer {
    config: Config,
    registry: Arc<RoomRegistry>,
}

impl ParleyServer {
    pub const fn new(config: Config, registry: Arc<RoomRegistry>) -> Self {
        Self { config, registry }
    }

    /// Start all components and wait for shutdown
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let http_handle = self.start_http_server(shutdown_rx);
        let engine_died = wait_for_engine_death(&self.registry);

        info!("All servers started successfully");

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = engine_died => {
                error!(
                    exit_delay_ms = self.config.media.exit_delay_ms,
                    "Media worker died, exiting"
                );
                tokio::time::sleep(Duration::from_millis(self.config.media.exit_delay_ms)).await;
                std::process::exit(1);
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        let _ = shutdown_tx.send(true);

        let stats = self.registry.get_stats();
        info!(
            rooms = stats.rooms,
            participants = stats.participants,
            "Parley server shut down complete"
        );
        Ok(())
    }

    /// Start HTTP server with graceful shutdown support
    fn start_http_server(&self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let http_address = self.config.http_address();
        let router = parley_api::create_router(self.registry.clone(), &self.config);

        tokio::spawn(async move {
            let http_addr: std::net::SocketAddr = match http_address.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    error!("Invalid HTTP address '{}': {}", http_address, e);
                    return;
                }
            };

            let listener = match tokio::net::TcpListener::bind(http_addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Failed to bind HTTP address {}: {}", http_addr, e);
                    return;
                }
            };

            info!("HTTP server listening on {}", http_addr);

            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        })
    }
}

/// Resolve once the media worker reports that it died
async fn wait_for_engine_death(registry: &RoomRegistry) {
    let mut died = registry.engine().died();
    if died.wait_for(|dead| *dead).await.is_err() {
        // Sender gone: the worker can no longer report anything
        std::future::pending::<()>().await;
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
