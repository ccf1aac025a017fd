//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};

use super::middleware::Authorizer;
use super::router::{AppState, HOOK_PATH, NOTIFY_PATH, create_router};
use crate::auth::ValidatorChain;
use crate::config::Config;
use crate::notify::{LoggingSink, NotificationSink};
use crate::webhook::InMemoryWebhookStore;
use crate::{Error, Result};

/// How often lapsed webhook registrations are purged
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Notify gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared authorization policy
    authorizer: Arc<Authorizer>,
    /// Notify payload sink
    notifier: Arc<dyn NotificationSink>,
    /// Webhook registrations
    webhooks: Arc<InMemoryWebhookStore>,
}

impl Gateway {
    /// Create a new gateway.
    ///
    /// Builds the validator chain, including any eager key loads. A single
    /// unconstructible validator aborts startup.
    pub async fn new(config: Config) -> Result<Self> {
        let chain = ValidatorChain::from_config(&config.auth).await?;
        let authorizer = Arc::new(Authorizer::from_config(chain, &config.auth)?);

        Ok(Self {
            config,
            authorizer,
            notifier: Arc::new(LoggingSink),
            webhooks: Arc::new(InMemoryWebhookStore::new()),
        })
    }

    /// Replace the notify sink.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// The shared authorizer
    #[must_use]
    pub fn authorizer(&self) -> &Arc<Authorizer> {
        &self.authorizer
    }

    /// Build the HTTP router without binding.
    pub fn router(&self) -> Router {
        let state = AppState {
            notifier: Arc::clone(&self.notifier),
            webhooks: self.webhooks.clone(),
            webhook_config: self.config.webhooks.clone(),
        };
        create_router(state, Arc::clone(&self.authorizer), &self.config.server)
    }

    /// Run the gateway until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("NOTIFY GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            validators = ?self.authorizer.chain().names(),
            header = %self.authorizer.header_name(),
            status = %self.authorizer.forbidden_status(),
            "Authorization policy"
        );
        if self.authorizer.chain().is_empty() {
            warn!("AUTHORIZATION has no validators - every protected request is rejected");
        }
        info!("  POST http://{}:{}{NOTIFY_PATH}", self.config.server.host, self.config.server.port);
        info!("  POST http://{}:{}{HOOK_PATH}", self.config.server.host, self.config.server.port);

        // Purge lapsed webhook registrations
        let webhooks = Arc::clone(&self.webhooks);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = webhooks.purge_expired(SystemTime::now());
                        if removed > 0 {
                            debug!(removed, "Purged expired webhooks");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
