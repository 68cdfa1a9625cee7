//! Startup sequencing: pipeline, storage link, warm-up, bind.
//!
//! ```text
//!  start(config)
//!    ├─ validate + assemble pipeline, mount routes
//!    ├─ spawn: connect storage ──(Open && warm-up enabled)──▶ await bound addr ──▶ warm-up
//!    └─ bind socket ──▶ serve ──▶ ServiceHandle (Listening)
//! ```
//!
//! The storage connection runs concurrently with the bind. Its failure is
//! logged and never prevents the service from listening.

use std::io;
use std::net::SocketAddr;

use axum::Router;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::network::{NetworkModule, Pipeline, PipelineBuilder, PipelineError, PipelineStage, ServiceHandle};
use crate::storage::{establish, StorageConnection, StorageConnector, StorageState};
use crate::warmup::spawn_cache_warmup;

/// Reasons the service failed to reach the `Listening` state.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid request pipeline: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("listener must be bound before serving")]
    NotBound,
}

/// Builds the standard pipeline through the validating builder.
///
/// # Errors
///
/// Returns [`PipelineError`] if the declared stage list is inconsistent.
pub fn build_pipeline() -> Result<Pipeline, PipelineError> {
    PipelineStage::ALL
        .iter()
        .try_fold(PipelineBuilder::new(), |builder, &stage| builder.stage(stage))?
        .build()
}

/// Starts the service and resolves once the socket is listening.
///
/// `routes` receives the shared storage connection and returns the route
/// table mounted under the API prefix. The storage link is opened in the
/// background with `connector`; when it opens and warm-up is enabled, the
/// two cache warm-up triggers fire against the bound address.
///
/// # Errors
///
/// Returns [`StartupError`] if the pipeline is invalid or the socket cannot
/// be bound. Storage failures are logged only.
pub async fn start<K, F>(
    config: ServiceConfig,
    routes: F,
    connector: K,
) -> Result<ServiceHandle, StartupError>
where
    K: StorageConnector,
    F: FnOnce(StorageConnection<K::Client>) -> Router,
{
    let pipeline = build_pipeline()?;
    let storage = StorageConnection::new(config.storage_url.clone());
    let app = pipeline.assemble(&config, routes(storage.clone()));

    info!(
        environment = config.environment.as_str(),
        prefix = %config.api_prefix,
        docs = config.environment.docs_enabled(),
        "request pipeline assembled"
    );

    let (bound_tx, bound_rx) = oneshot::channel();
    tokio::spawn(connect_storage(
        connector,
        storage,
        config.cache_warmup_enabled.then(|| config.api_prefix.clone()),
        bound_rx,
    ));

    let mut network = NetworkModule::new(config);
    let addr = network.start().await?;
    // The storage task may already have finished; nobody listening is fine.
    let _ = bound_tx.send(addr);

    network.serve(app)
}

/// Opens the storage link, then fires the warm-up triggers if it opened and
/// `warmup_prefix` is set.
async fn connect_storage<K: StorageConnector>(
    connector: K,
    storage: StorageConnection<K::Client>,
    warmup_prefix: Option<String>,
    bound: oneshot::Receiver<SocketAddr>,
) {
    if establish(&connector, &storage).await != StorageState::Open {
        return;
    }
    let Some(prefix) = warmup_prefix else {
        debug!("cache warm-up disabled");
        return;
    };
    match bound.await {
        Ok(addr) => {
            spawn_cache_warmup(addr, &prefix);
        }
        Err(_) => warn!("listener never bound; skipping cache warm-up"),
    }
}
