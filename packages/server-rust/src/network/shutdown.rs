//! Service lifecycle state and the shutdown signal.
//!
//! Uses `ArcSwap` for lock-free state reads and a `watch` channel to tell
//! the accept loop to stop.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Lifecycle of the listening socket.
///
/// State machine: Starting -> Listening -> Closing -> Closed.
/// States are ordered; the controller never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceState {
    /// Socket not yet bound.
    Starting,
    /// Socket bound and accepting connections.
    Listening,
    /// Accept loop stopped; in-flight connections are draining.
    Closing,
    /// Every connection has finished and the socket is released.
    Closed,
}

impl ServiceState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the lifecycle state and broadcasts the shutdown request.
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    state: ArcSwap<ServiceState>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            state: ArcSwap::from_pointee(ServiceState::Starting),
        }
    }

    /// Moves to `next` if that is a forward transition. Returns whether the
    /// state changed.
    fn advance(&self, next: ServiceState) -> bool {
        let previous = self
            .state
            .rcu(|current| if **current < next { Arc::new(next) } else { Arc::clone(current) });
        *previous < next
    }

    /// Records a successful bind.
    pub fn set_listening(&self) -> bool {
        self.advance(ServiceState::Listening)
    }

    /// Moves to `Closing` and signals the accept loop. Returns `false` if
    /// shutdown was already requested.
    pub fn trigger_shutdown(&self) -> bool {
        let changed = self.advance(ServiceState::Closing);
        self.shutdown_signal.send_replace(true);
        changed
    }

    /// Records that every connection has drained.
    pub fn mark_closed(&self) -> bool {
        self.advance(ServiceState::Closed)
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        **self.state.load()
    }

    /// Returns a receiver that flips to `true` when shutdown is requested.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_receiver();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|requested| *requested).await;
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
