//! The live listening socket and its single-resolution close.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::shutdown::{ServiceState, ShutdownController};

/// Outcome of a failed close. Cloneable so every caller of
/// [`ServiceHandle::close`] observes the same value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloseError {
    #[error("server stopped with an I/O error: {0}")]
    Server(String),
    #[error("server task panicked")]
    Panicked,
    #[error("server task was cancelled")]
    Cancelled,
}

/// Handle to a bound, listening service.
///
/// Exactly one exists per [`start`](crate::startup::start) call. Dropping
/// the handle does not stop the server; call [`close`](Self::close).
#[derive(Debug)]
pub struct ServiceHandle {
    local_addr: SocketAddr,
    controller: Arc<ShutdownController>,
    server: Mutex<JoinHandle<io::Result<()>>>,
    closed: OnceCell<Result<(), CloseError>>,
}

impl ServiceHandle {
    pub(crate) fn new(
        local_addr: SocketAddr,
        controller: Arc<ShutdownController>,
        server: JoinHandle<io::Result<()>>,
    ) -> Self {
        Self {
            local_addr,
            controller,
            server: Mutex::new(server),
            closed: OnceCell::new(),
        }
    }

    /// Address the socket is bound to (with the OS-assigned port when the
    /// configured port was 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        self.controller.state()
    }

    /// Stops accepting connections and waits for in-flight ones to finish.
    ///
    /// The first call drives the close; later and concurrent calls wait for
    /// and return the same outcome. A caller that is cancelled mid-drain
    /// leaves the server task in place, so the next call resumes waiting on
    /// it.
    ///
    /// # Errors
    ///
    /// Returns the [`CloseError`] recorded by the first call if the server
    /// task failed instead of draining cleanly.
    pub async fn close(&self) -> Result<(), CloseError> {
        self.closed
            .get_or_init(|| self.drive_close())
            .await
            .clone()
    }

    async fn drive_close(&self) -> Result<(), CloseError> {
        info!(addr = %self.local_addr, "closing listener, draining connections");
        self.controller.trigger_shutdown();

        // Awaited by reference: the handle stays owned here until the task
        // has finished, whichever caller observes it.
        let mut server = self.server.lock().await;
        let outcome = match (&mut *server).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CloseError::Server(e.to_string())),
            Err(e) if e.is_panic() => Err(CloseError::Panicked),
            Err(_) => Err(CloseError::Cancelled),
        };
        drop(server);

        self.controller.mark_closed();
        match &outcome {
            Ok(()) => info!(addr = %self.local_addr, "listener closed"),
            Err(e) => error!(addr = %self.local_addr, error = %e, "listener closed with error"),
        }
        outcome
    }
}
