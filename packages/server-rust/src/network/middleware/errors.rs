//! Terminal error-reporting stage.
//!
//! Earlier stages and route handlers never leak raw failures to callers.
//! Instead they return a response tagged with a [`ReportedFailure`]
//! extension (see [`RouteError`]). The terminal stage is the last to see
//! every response: it removes the tag, logs the failure once, and replaces
//! the response with a uniform JSON error body:
//!
//! ```text
//! {"error": {"status": 500, "message": "Internal Server Error"}}
//! ```
//!
//! Server-side failures only ever expose the canonical status reason.
//! Handler panics are caught and routed through the same path.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tower::{Layer, Service};
use tracing::{error, warn};

use crate::fault::{describe_payload, RequestScope};

/// Failure marker carried in response extensions until the terminal stage.
#[derive(Debug, Clone)]
pub struct ReportedFailure {
    /// Status of the uniform error response.
    pub status: StatusCode,
    /// Message safe to show the caller (client errors only).
    pub public_message: Option<String>,
    /// Full failure description, logged but never sent.
    pub detail: String,
}

impl IntoResponse for ReportedFailure {
    /// Produces a bodiless response tagged with the failure; the terminal
    /// stage supplies the body.
    fn into_response(self) -> Response {
        let mut response = self.status.into_response();
        response.extensions_mut().insert(self);
        response
    }
}

impl ReportedFailure {
    fn message(&self) -> String {
        let canonical = self.status.canonical_reason().unwrap_or("Error").to_string();
        if self.status.is_server_error() {
            canonical
        } else {
            self.public_message.clone().unwrap_or(canonical)
        }
    }
}

/// Error type for collaborator route handlers.
///
/// Returning `Err(RouteError)` from a handler forwards the failure to the
/// terminal stage instead of producing a response directly.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RouteError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let public_message = match &self {
            Self::BadRequest(msg) | Self::NotFound(msg) => Some(msg.clone()),
            Self::StorageUnavailable | Self::Internal(_) => None,
        };
        ReportedFailure {
            status: self.status(),
            public_message,
            detail: format!("{self:#}"),
        }
        .into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

/// Converts tagged responses into the uniform error body. Untagged
/// responses pass through untouched.
pub async fn report_failures(mut response: Response) -> Response {
    let Some(failure) = response.extensions_mut().remove::<ReportedFailure>() else {
        return response;
    };

    let status = failure.status.as_u16();
    if failure.status.is_server_error() {
        error!(status, error = %failure.detail, "request failed");
    } else {
        warn!(status, error = %failure.detail, "request rejected");
    }

    let body = ErrorEnvelope {
        error: ErrorBody {
            status,
            message: failure.message(),
        },
    };
    let mut reported = (failure.status, Json(body)).into_response();
    // Headers set by earlier stages (security, CORS, request id) survive.
    for (name, value) in response.headers() {
        if name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
            reported.headers_mut().entry(name).or_insert_with(|| value.clone());
        }
    }
    reported
}

/// Panic handler for `CatchPanicLayer`: tags a 500 for the terminal stage.
#[allow(clippy::needless_pass_by_value)]
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    ReportedFailure {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        public_message: None,
        detail: format!("handler panicked: {}", describe_payload(payload.as_ref())),
    }
    .into_response()
}

// ---------------------------------------------------------------------------
// RequestScopeLayer
// ---------------------------------------------------------------------------

/// Tower layer that marks request processing with a [`RequestScope`] so the
/// process-wide fault reporter can tell handler panics from uncaught ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestScopeLayer;

impl<S> Layer<S> for RequestScopeLayer {
    type Service = RequestScopeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestScopeService { inner }
    }
}

/// Service wrapper entering a [`RequestScope`] around every call and poll.
#[derive(Debug, Clone)]
pub struct RequestScopeService<S> {
    inner: S,
}

impl<S, R> Service<R> for RequestScopeService<S>
where
    S: Service<R>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Scoped<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: R) -> Self::Future {
        let _scope = RequestScope::enter();
        Scoped {
            inner: Box::pin(self.inner.call(req)),
        }
    }
}

/// Future that re-enters the request scope on every poll.
pub struct Scoped<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _scope = RequestScope::enter();
        self.inner.as_mut().poll(cx)
    }
}
