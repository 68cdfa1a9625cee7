//! HTTP middleware stages for the wifimap server.
//!
//! Each submodule implements one stage of the request pipeline; the order
//! in which they are applied lives in [`crate::network::pipeline`].
//! Builders for stages that are plain `tower-http` configuration live here.

pub mod compression;
pub mod errors;
pub mod headers;
pub mod liveness;
pub mod rate_limit;

pub use compression::{compression_layer, compression_opt_out, NO_COMPRESSION_HEADER};
pub use errors::{panic_response, report_failures, ReportedFailure, RequestScopeLayer, RouteError};
pub use headers::{security_headers, suppress_etag, SECURITY_HEADERS};
pub use liveness::liveness_probe;
pub use rate_limit::{FixedWindowLimiter, RateLimitLayer, RATE_LIMIT_MESSAGE};

use axum::http::header::HeaderName;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Header carrying the per-request UUID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The composed access-log layer type produced by [`build_access_log_layers`].
///
/// Outermost to innermost: assign request ID, trace, copy ID to response.
type AccessLogLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TraceLayer<
            tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
        >,
        tower::layer::util::Stack<SetRequestIdLayer<MakeRequestUuid>, tower::layer::util::Identity>,
    >,
>;

/// Builds the access-log stage.
///
/// 1. `SetRequestId` -- assigns a UUID v4 `x-request-id` unless the caller sent one
/// 2. `Tracing` -- logs method, URI, status and latency as structured spans
/// 3. `PropagateRequestId` -- copies `x-request-id` onto the response
///
/// Bodies pass through untouched.
#[must_use]
pub fn build_access_log_layers() -> AccessLogLayers {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Builds the CORS layer from the configured list of allowed origins.
///
/// A wildcard `"*"` in the origins list allows any origin. Otherwise,
/// each origin string is parsed and added to an explicit allowlist.
#[must_use]
pub fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
