//! Shared storage connection handle with a monotonic state machine.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

/// Storage link state.
///
/// State machine: Connecting -> Open | Failed. Leaves Connecting at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    /// A connection attempt is in progress.
    Connecting,
    /// The server answered; the client is available.
    Open,
    /// The attempt failed; handlers must cope without storage.
    Failed,
}

impl StorageState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Failed => "failed",
        }
    }
}

struct Inner<C> {
    url: String,
    state: watch::Sender<StorageState>,
    client: OnceLock<C>,
}

/// Cloneable handle to the single storage link of the process.
///
/// All request handlers share one connection; this type does not serialize
/// access to the client.
pub struct StorageConnection<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for StorageConnection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for StorageConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConnection")
            .field("url", &self.redacted_url())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<C> StorageConnection<C> {
    /// Creates a handle in the `Connecting` state.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let (state, _rx) = watch::channel(StorageState::Connecting);
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                state,
                client: OnceLock::new(),
            }),
        }
    }

    /// Connection string as configured, including any credentials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Connection string with credentials masked, for logs.
    #[must_use]
    pub fn redacted_url(&self) -> String {
        redact_credentials(&self.inner.url)
    }

    #[must_use]
    pub fn state(&self) -> StorageState {
        *self.inner.state.borrow()
    }

    /// The driver client, available once the state is `Open`.
    #[must_use]
    pub fn client(&self) -> Option<&C> {
        self.inner.client.get()
    }

    /// Waits until the connection leaves `Connecting` and returns the outcome.
    pub async fn settled(&self) -> StorageState {
        let mut rx = self.inner.state.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        rx.wait_for(|s| *s != StorageState::Connecting)
            .await
            .map_or(StorageState::Failed, |s| *s)
    }

    /// Stores the client and moves to `Open`. Returns `false` if the
    /// connection already left `Connecting`.
    pub(crate) fn mark_open(&self, client: C) -> bool {
        if self.state() != StorageState::Connecting || self.inner.client.set(client).is_err() {
            return false;
        }
        self.transition(StorageState::Open)
    }

    /// Moves to `Failed`. Returns `false` if the connection already left
    /// `Connecting`.
    pub(crate) fn mark_failed(&self) -> bool {
        self.transition(StorageState::Failed)
    }

    fn transition(&self, to: StorageState) -> bool {
        self.inner.state.send_if_modified(|current| {
            if *current == StorageState::Connecting {
                *current = to;
                true
            } else {
                false
            }
        })
    }
}

/// Replaces the `user:password@` part of a URL with `***@`.
fn redact_credentials(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", &url[..scheme_end], &rest[at + 1..]),
        None => url.to_string(),
    }
}
