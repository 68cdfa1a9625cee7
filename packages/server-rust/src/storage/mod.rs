//! Persistent-storage link for the wifimap server.
//!
//! - [`StorageConnector`]: pluggable driver seam (`MongoDB` in production,
//!   in-memory stubs in tests)
//! - [`StorageConnection`]: shared handle carrying the link state
//!   (Connecting -> Open | Failed) and, once open, the driver client
//! - [`establish`]: drives one connection attempt and records the outcome

pub mod connection;
pub mod mongo;

pub use connection::*;
pub use mongo::MongoConnector;

use async_trait::async_trait;
use tracing::{error, info};

/// Pluggable storage driver.
///
/// Implementations: `MongoDB` ([`MongoConnector`]), stubs in tests.
#[async_trait]
pub trait StorageConnector: Send + Sync + 'static {
    /// Driver handle shared with request handlers once connected.
    type Client: Send + Sync + 'static;

    /// Opens a link to `url` and verifies the server is reachable.
    async fn connect(&self, url: &str) -> anyhow::Result<Self::Client>;
}

/// Makes a single connection attempt and records the outcome on `connection`.
///
/// Failures are logged, never retried, and never propagated: request
/// handlers observe a `Failed` connection instead.
pub async fn establish<K>(connector: &K, connection: &StorageConnection<K::Client>) -> StorageState
where
    K: StorageConnector,
{
    let target = connection.redacted_url();
    info!(url = %target, "connecting to storage");

    match connector.connect(connection.url()).await {
        Ok(client) => {
            connection.mark_open(client);
            info!(url = %target, "storage connection open");
        }
        Err(e) => {
            connection.mark_failed();
            let detail = format!("{e:#}");
            error!(url = %target, error = %detail, "storage connection failed");
        }
    }
    connection.state()
}
