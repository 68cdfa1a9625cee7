//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates the shutdown controller, `start()` binds the TCP
//! listener, and `serve()` spawns the accept loop and hands back a
//! [`ServiceHandle`]. Splitting bind from serve lets the caller learn the
//! bound address before any request is accepted.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::handle::ServiceHandle;
use super::shutdown::ShutdownController;
use crate::config::ServiceConfig;
use crate::fault::{report_background_failure, FaultOutcome};
use crate::startup::StartupError;

/// Owns the listening socket until it is handed to the accept loop.
pub struct NetworkModule {
    config: ServiceConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound address, which carries the OS-assigned port
    /// when port 0 is configured.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Bind`] if the address cannot be bound.
    pub async fn start(&mut self) -> Result<SocketAddr, StartupError> {
        let addr = format!("{}:{}", self.config.host, self.config.listen_port);
        let bind_error = |source| StartupError::Bind {
            addr: addr.clone(),
            source,
        };

        let listener = TcpListener::bind(&addr).await.map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;

        self.shutdown.set_listening();
        info!(addr = %local, "TCP listener bound");

        self.listener = Some(listener);
        Ok(local)
    }

    /// Spawns the accept loop for `router` and returns the handle used to
    /// close it.
    ///
    /// The loop stops accepting once shutdown is triggered and resolves after
    /// every in-flight connection has finished.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::NotBound`] if `start()` was not called first.
    pub fn serve(self, router: Router) -> Result<ServiceHandle, StartupError> {
        let listener = self.listener.ok_or(StartupError::NotBound)?;
        let local = listener.local_addr().map_err(|source| StartupError::Bind {
            addr: format!("{}:{}", self.config.host, self.config.listen_port),
            source,
        })?;

        let signal = Arc::clone(&self.shutdown);
        let server = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { signal.wait_for_shutdown().await })
            .await;

            if let Err(e) = &result {
                if report_background_failure("http accept loop", e) == FaultOutcome::Terminate {
                    std::process::exit(1);
                }
            }
            result
        });

        info!(addr = %local, "serving HTTP connections");
        Ok(ServiceHandle::new(local, self.shutdown, server))
    }
}
