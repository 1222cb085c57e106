//! Run supervisor
//!
//! Runs the control-plane API and the data listener as two independently
//! failing units under one [`CancellationToken`]. The first unit to exit, or
//! an interrupt/terminate signal, cancels the token; the supervisor then waits
//! up to the configured shutdown timeout for the other unit and returns the
//! first error observed.

use crate::config::DecoderConfig;
use crate::dispatch::DispatchClient;
use crate::error::{DecoderError, DecoderResult};
use crate::listener::{DataListener, PacketSink};
use crate::metrics::DecoderMetrics;
use crate::resolver::MessageResolver;
use crate::server::{ControlPlaneServer, ServerState};
use crate::store::SchemaStore;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type Unit = Pin<Box<dyn Future<Output = DecoderResult<()>> + Send>>;

fn boxed<F>(future: F) -> Unit
where
    F: Future<Output = DecoderResult<()>> + Send + 'static,
{
    Box::pin(future)
}

/// Owns both I/O planes and the shared store
pub struct Supervisor {
    config: DecoderConfig,
    store: Arc<SchemaStore>,
    server: ControlPlaneServer,
    listener: DataListener,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Build the shared store and bind both sockets
    pub async fn bind(config: DecoderConfig) -> DecoderResult<Self> {
        let store = Arc::new(SchemaStore::new());
        let metrics =
            DecoderMetrics::new().map_err(|e| DecoderError::Internal(e.to_string()))?;
        let resolver = MessageResolver::new(store.clone());

        let dispatch = config
            .dispatch
            .enabled
            .then(|| DispatchClient::new(config.dispatch.clone()));
        if dispatch.is_some() {
            info!(address = %config.dispatch.address(), "Control dispatch enabled");
        }

        let state = Arc::new(ServerState::new(
            resolver.clone(),
            metrics.clone(),
            dispatch,
        ));
        let server = ControlPlaneServer::bind(&config.api, state).await?;
        let listener = DataListener::bind(config.data.clone(), resolver, metrics).await?;

        Ok(Self {
            config,
            store,
            server,
            listener,
            cancel: CancellationToken::new(),
        })
    }

    pub fn api_addr(&self) -> DecoderResult<SocketAddr> {
        self.server.local_addr()
    }

    pub fn data_addr(&self) -> DecoderResult<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store(&self) -> Arc<SchemaStore> {
        self.store.clone()
    }

    /// Token that stops [`Supervisor::run`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run both units until one exits or a shutdown signal arrives
    pub async fn run(self, sink: Arc<dyn PacketSink>) -> DecoderResult<()> {
        let cancel = self.cancel.clone();

        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_shutdown_signal() => {
                    info!("Shutdown signal received, initiating graceful shutdown...");
                    signal_cancel.cancel();
                }
                _ = signal_cancel.cancelled() => {}
            }
        });

        let units: Vec<(&'static str, Unit)> = vec![
            ("control-plane API", boxed(self.server.serve(cancel.clone()))),
            ("data listener", boxed(self.listener.run(cancel.clone(), sink))),
        ];

        supervise(cancel, self.config.shutdown_timeout(), units).await
    }
}

/// Fail-fast group: the first unit to finish cancels the rest
async fn supervise(
    cancel: CancellationToken,
    shutdown_timeout: Duration,
    units: Vec<(&'static str, Unit)>,
) -> DecoderResult<()> {
    let mut set = JoinSet::new();
    for (name, future) in units {
        set.spawn(async move { (name, future.await) });
    }

    let mut first_error = None;
    if let Some(joined) = set.join_next().await {
        record_exit(joined, &mut first_error);
    }
    cancel.cancel();

    let drained = tokio::time::timeout(shutdown_timeout, async {
        while let Some(joined) = set.join_next().await {
            record_exit(joined, &mut first_error);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "Shutdown timed out after {:?}, aborting remaining units",
            shutdown_timeout
        );
        set.abort_all();
        while let Some(joined) = set.join_next().await {
            record_exit(joined, &mut first_error);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            info!("Supervisor stopped cleanly");
            Ok(())
        }
    }
}

fn record_exit(
    joined: Result<(&'static str, DecoderResult<()>), JoinError>,
    first_error: &mut Option<DecoderError>,
) {
    let failure = match joined {
        Ok((unit, Ok(()))) => {
            info!(unit, "Unit stopped");
            return;
        }
        Ok((unit, Err(e))) => {
            error!(unit, "Unit failed: {}", e);
            e
        }
        Err(e) if e.is_cancelled() => {
            warn!("Unit aborted");
            return;
        }
        Err(e) => {
            error!("Unit task panicked: {}", e);
            DecoderError::Internal(e.to_string())
        }
    };
    if first_error.is_none() {
        *first_error = Some(failure);
    }
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
