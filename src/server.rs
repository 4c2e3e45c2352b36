use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api;
use crate::backend::{self, ExecutionBackend};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::scheduler::Dispatcher;

/// Process-level wiring of the HTTP surface and the dispatcher.
pub struct Server {
    config: ServerConfig,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl Server {
    /// Build the configured backend and a dispatcher bound to `shutdown`.
    pub async fn new(config: ServerConfig, shutdown: CancellationToken) -> Result<Self> {
        let backend = backend::from_config(&config.backend).await?;
        Self::with_backend(config, backend, shutdown)
    }

    pub fn with_backend(
        config: ServerConfig,
        backend: Arc<dyn ExecutionBackend>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::new(config.dispatcher.clone(), backend, shutdown.clone())?;
        Ok(Self {
            config,
            dispatcher,
            shutdown,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    ///
    /// 1. Starts the dispatcher's control loop
    /// 2. Serves HTTP until the shutdown token is cancelled
    /// 3. Waits for open HTTP connections and in-flight jobs to drain, bounded
    ///    by `shutdown_timeout`
    ///
    /// Hitting the deadline is logged and the HTTP server is forced closed;
    /// it is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher cannot start or the HTTP server fails.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        let _dispatcher_task = self.dispatcher.start()?;

        let app = api::router(self.dispatcher.clone());
        let http_shutdown = self.shutdown.clone();
        let mut http = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(http_shutdown.cancelled_owned())
                .await
        });

        tracing::info!(
            addr = %addr,
            max_concurrency = self.config.dispatcher.max_concurrency,
            "Server started"
        );

        let mut http_error = None;
        let http_finished = tokio::select! {
            _ = self.shutdown.cancelled() => false,
            result = &mut http => {
                match result {
                    Ok(Ok(())) => tracing::warn!("HTTP server exited before shutdown was requested"),
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "HTTP server failed");
                        http_error = Some(e);
                    }
                    Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
                }
                self.shutdown.cancel();
                true
            }
        };

        tracing::info!(timeout = ?self.config.shutdown_timeout, "Shutting down server");

        let dispatcher = self.dispatcher.clone();
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            if !http_finished {
                match (&mut http).await {
                    Ok(Ok(())) => tracing::info!("HTTP server gracefully stopped"),
                    Ok(Err(e)) => tracing::error!(error = %e, "HTTP server shutdown failed"),
                    Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
                }
            }
            dispatcher.wait_stopped().await;
            tracing::info!("Job dispatcher gracefully stopped");
        })
        .await;

        if drained.is_err() {
            let running = dispatcher.stats().await.running;
            tracing::error!(
                timeout = ?self.config.shutdown_timeout,
                running = running,
                "Graceful shutdown timed out, forcing close"
            );
            http.abort();
        }

        match http_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
