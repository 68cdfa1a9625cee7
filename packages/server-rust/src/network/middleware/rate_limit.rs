//! Fixed-window rate limiting per client identity.
//!
//! Each identity (peer IP address) gets a counter that resets when its
//! window elapses. Once the counter reaches `max_requests`, further
//! requests in the same window are answered with `429 Too Many Requests`
//! and never reach later stages.

use std::future::{ready, Future};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::warn;

use crate::config::RateLimitConfig;

/// Body of every rate-limit rejection.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again later.";

/// Identity used when the peer address is unknown.
const UNKNOWN_CLIENT: &str = "unknown";

/// Tracked identities above which expired windows are swept, at most once
/// per window length.
const SWEEP_THRESHOLD: usize = 10_000;

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Admitted; `remaining` requests are left in the current window.
    Allowed { remaining: u32 },
    /// Rejected; the window resets after `retry_after`.
    Rejected { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-identity fixed-window counters.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Window>,
    last_sweep: Mutex<Option<Instant>>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            last_sweep: Mutex::new(None),
        }
    }

    /// Counts one request for `key` at the current time.
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// Counts one request for `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        if self.windows.len() >= SWEEP_THRESHOLD && self.sweep_due(now) {
            self.sweep(now);
        }

        let mut window = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= self.config.window {
            window.started = now;
            window.count = 0;
        }

        if window.count < self.config.max_requests {
            window.count += 1;
            Decision::Allowed {
                remaining: self.config.max_requests - window.count,
            }
        } else {
            Decision::Rejected {
                retry_after: self.config.window.saturating_sub(elapsed),
            }
        }
    }

    /// Claims the next sweep slot if a full window has passed since the last
    /// one.
    fn sweep_due(&self, now: Instant) -> bool {
        let mut last = self.last_sweep.lock();
        match *last {
            Some(at) if now.saturating_duration_since(at) < self.config.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Drops windows that have fully elapsed.
    pub fn sweep(&self, now: Instant) {
        let window = self.config.window;
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < window);
    }

    /// Number of identities currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

fn client_key<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_CLIENT.to_string(), |ConnectInfo(addr)| addr.ip().to_string())
}

fn too_many_requests(retry_after: Duration) -> Response {
    let seconds = retry_after.as_millis().div_ceil(1000).max(1);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, seconds.to_string())],
        RATE_LIMIT_MESSAGE,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// RateLimitLayer
// ---------------------------------------------------------------------------

/// Tower layer enforcing a [`FixedWindowLimiter`]. Clones share counters.
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Arc<FixedWindowLimiter>,
}

impl RateLimitLayer {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limiter: Arc::new(FixedWindowLimiter::new(config)),
        }
    }

    /// Shared limiter backing this layer.
    #[must_use]
    pub fn limiter(&self) -> Arc<FixedWindowLimiter> {
        Arc::clone(&self.limiter)
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimitService
// ---------------------------------------------------------------------------

/// Service wrapper that short-circuits over-limit requests with 429.
#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<FixedWindowLimiter>,
}

impl<S, B> Service<Request<B>> for RateLimitService<S>
where
    S: Service<Request<B>, Response = Response>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let key = client_key(&request);
        match self.limiter.check(&key) {
            Decision::Allowed { .. } => Box::pin(self.inner.call(request)),
            Decision::Rejected { retry_after } => {
                warn!(client = %key, retry_after = ?retry_after, "rate limit exceeded");
                Box::pin(ready(Ok(too_many_requests(retry_after))))
            }
        }
    }
}
