//! Best-effort cache warm-up triggers.
//!
//! Once storage opens, the service asks its own route table to rebuild two
//! collaborator-owned caches. Each trigger is a detached `PATCH` request:
//! outcomes are logged, never retried, and never affect the service.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use reqwest::StatusCode;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Rebuilds the feature cache.
pub const FEATURE_CACHE_PATH: &str = "wifis/patch/reloadFeatureCache";

/// Rebuilds the heatmap cache.
pub const HEATMAP_CACHE_PATH: &str = "wifis/patch/reloadHeatmapData";

pub const WARMUP_PATHS: [&str; 2] = [FEATURE_CACHE_PATH, HEATMAP_CACHE_PATH];

#[derive(Debug, thiserror::Error)]
pub enum WarmupError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
}

/// URL of a warm-up trigger on the service bound at `addr`.
///
/// Wildcard bind addresses are reached through loopback.
#[must_use]
pub fn warmup_url(addr: SocketAddr, api_prefix: &str, path: &str) -> String {
    let target = match addr {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, v4.port()))
        }
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, v6.port()))
        }
        other => other,
    };
    format!("http://{target}{api_prefix}{path}")
}

/// Issues one trigger and returns the response status.
///
/// # Errors
///
/// Returns [`WarmupError`] on transport failure or a non-success status.
pub async fn trigger(client: &reqwest::Client, url: &str) -> Result<StatusCode, WarmupError> {
    let status = client.patch(url).send().await?.status();
    if status.is_success() {
        Ok(status)
    } else {
        Err(WarmupError::Status(status))
    }
}

/// Fires both warm-up triggers as independent detached tasks.
///
/// The returned handles may be dropped; they exist so callers can await
/// completion in tests.
pub fn spawn_cache_warmup(addr: SocketAddr, api_prefix: &str) -> Vec<JoinHandle<()>> {
    let client = reqwest::Client::new();
    WARMUP_PATHS
        .iter()
        .map(|path| {
            let client = client.clone();
            let url = warmup_url(addr, api_prefix, path);
            tokio::spawn(async move {
                match trigger(&client, &url).await {
                    Ok(status) => info!(%url, status = status.as_u16(), "cache warm-up triggered"),
                    Err(e) => warn!(%url, error = %e, "cache warm-up failed"),
                }
            })
        })
        .collect()
}
