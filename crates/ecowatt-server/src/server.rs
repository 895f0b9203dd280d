// ============================================
// File: crates/ecowatt-server/src/server.rs
// ============================================
//! # Server Orchestrator
//!
//! ## Creation Reason
//! Wires configuration into services, services into the HTTP router,
//! and owns the lifecycle: the background flush scheduler starts
//! before the listener and is drained after it stops.
//!
//! ## Server Architecture
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Server                             │
//! │                                                           │
//! │  HTTP router ──► AuthGate ──► SessionRegistry             │
//! │       │              │                                    │
//! │       ├──► TelemetryAggregator ◄── FlushScheduler (1s)    │
//! │       │              │                    │               │
//! │       │              └──── FlushSummary ──┴──► Sink       │
//! │       ├──► FotaManager                                    │
//! │       └──► PendingStore ◄──► JsonStore (data dir)         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All services are Arc-wrapped for sharing between the router and
//!   the scheduler; none of them spawn their own tasks.
//! - Graceful shutdown order matters: stop accepting requests first,
//!   then signal the scheduler, then wait for it (bounded).
//!
//! ## Last Modified
//! v0.1.0 - Initial server orchestrator

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::http::{router, AppState};
use crate::scheduler::spawn_flush_task;
use crate::services::auth::AuthGate;
use crate::services::events::EventLog;
use crate::services::fota::FotaManager;
use crate::services::pending::PendingStore;
use crate::services::session::SessionRegistry;
use crate::services::telemetry::TelemetryAggregator;
use crate::sink::{HttpSink, NullSink, TelemetrySink};
use crate::storage::JsonStore;

/// The EcoWatt cloud endpoint.
///
/// # Lifecycle
/// 1. Create with `Server::new(config)`
/// 2. Run with `server.run().await`
/// 3. Shut down via Ctrl+C
pub struct Server {
    config: ServerConfig,
}

impl Server {
    /// Creates a server from validated configuration.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Runs the server until shutdown.
    ///
    /// # Errors
    /// Returns an error when startup fails (bad keys, bind failure);
    /// runtime request errors never propagate here.
    pub async fn run(&self) -> Result<()> {
        info!("Starting EcoWatt cloud endpoint v{}", env!("CARGO_PKG_VERSION"));

        let state = self.build_state()?;
        let aggregator = Arc::clone(&state.aggregator);

        let sink: Arc<dyn TelemetrySink> = match &self.config.telemetry.sink_url {
            Some(url) => {
                info!("Downstream sink: {}", url);
                Arc::new(HttpSink::new(
                    url.clone(),
                    Duration::from_secs(self.config.telemetry.sink_timeout_secs),
                ))
            }
            None => {
                info!("No downstream sink configured");
                Arc::new(NullSink)
            }
        };

        let (shutdown_tx, _) = broadcast::channel(1);
        let flush_task = spawn_flush_task(aggregator, sink, shutdown_tx.subscribe());

        let app = router(state);
        let addr = self.config.network.listen_addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::startup_failed(format!("bind {addr} failed: {e}")))?;

        info!("Listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Shutting down server...");
        let _ = shutdown_tx.send(());
        match tokio::time::timeout(Duration::from_secs(5), flush_task).await {
            Ok(Ok(())) => info!("Flush scheduler stopped"),
            Ok(Err(e)) => warn!("Flush scheduler failed: {e}"),
            Err(_) => warn!("Flush scheduler timed out during shutdown"),
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// Builds the shared service graph.
    fn build_state(&self) -> Result<Arc<AppState>> {
        let security = &self.config.security;
        let psk = security.preshared_key()?;
        let chunk_key = security.chunk_key()?;

        let events = Arc::new(EventLog::new());
        let sessions = Arc::new(SessionRegistry::new(
            security.nonce_expiry_secs,
            security.first_contact_threshold,
            security.outbound_nonce_start,
        ));
        let gate = AuthGate::new(psk, Arc::clone(&sessions), Arc::clone(&events));

        let aggregator = Arc::new(TelemetryAggregator::new(
            self.config.telemetry.flush_debounce_secs,
        ));
        let fota = Arc::new(FotaManager::new(chunk_key, Arc::clone(&events)));

        info!("Loading persisted configurations...");
        let pending = Arc::new(PendingStore::load(JsonStore::new(
            &self.config.storage.data_dir,
        )));

        info!(
            debounce_secs = self.config.telemetry.flush_debounce_secs,
            nonce_expiry_secs = security.nonce_expiry_secs,
            "Services initialized"
        );

        Ok(Arc::new(AppState {
            gate,
            sessions,
            aggregator,
            fota,
            pending,
            events,
            security: security.clone(),
            default_chunk_size: self.config.fota.default_chunk_size,
        }))
    }
}

/// Resolves when the process receives Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {e}");
    }
    info!("Received shutdown signal");
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen_addr", &self.config.network.listen_addr)
            .finish()
    }
}
