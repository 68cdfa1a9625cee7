//! Fixed-order request pipeline.
//!
//! The pipeline is an immutable, ordered list of [`PipelineStage`]s built
//! once at startup. Stage order is part of the externally observable
//! contract, so [`PipelineBuilder`] refuses any sequence that deviates from
//! the declared positions:
//!
//! ```text
//!  request ──▶ 1 RateLimiter ──▶ 2 SecurityHeaders ──▶ 3 CrossOrigin
//!          ──▶ 4 Liveness (GET /alive short-circuits here)
//!          ──▶ 5 AccessLog ──▶ 6 Compression ──▶ 7 BodyParsers
//!          ──▶ 8 CacheControl ──▶ 9 RouteMount ──▶ 10 CatchAll
//!          ──▶ 11 ErrorReporter (terminal)
//! ```
//!
//! In axum terms stages 1-8 are layers, 9-10 are the router itself, and the
//! terminal stage is the last layer registered. Because the last layer is the
//! outermost one, the terminal stage sees every response on its way out and
//! is the single place where forwarded failures become error responses.

use std::fmt;

use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, map_response};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::debug;

use super::handlers::{docs_router, not_found};
use super::middleware::{
    build_access_log_layers, build_cors_layer, compression_layer, compression_opt_out,
    liveness_probe, panic_response, report_failures, security_headers, suppress_etag,
    RateLimitLayer, RequestScopeLayer,
};
use crate::config::ServiceConfig;

/// One cross-cutting request processor, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    RateLimiter,
    SecurityHeaders,
    CrossOrigin,
    Liveness,
    AccessLog,
    Compression,
    BodyParsers,
    CacheControl,
    RouteMount,
    CatchAll,
    ErrorReporter,
}

impl PipelineStage {
    /// Every stage in its required position.
    pub const ALL: [Self; 11] = [
        Self::RateLimiter,
        Self::SecurityHeaders,
        Self::CrossOrigin,
        Self::Liveness,
        Self::AccessLog,
        Self::Compression,
        Self::BodyParsers,
        Self::CacheControl,
        Self::RouteMount,
        Self::CatchAll,
        Self::ErrorReporter,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::RateLimiter => "rate-limiter",
            Self::SecurityHeaders => "security-headers",
            Self::CrossOrigin => "cross-origin",
            Self::Liveness => "liveness",
            Self::AccessLog => "access-log",
            Self::Compression => "compression",
            Self::BodyParsers => "body-parsers",
            Self::CacheControl => "cache-control",
            Self::RouteMount => "route-mount",
            Self::CatchAll => "catch-all",
            Self::ErrorReporter => "error-reporter",
        }
    }

    /// Declared position constraint, for logs and error messages.
    #[must_use]
    pub fn constraint(self) -> &'static str {
        match self {
            Self::RateLimiter => "must run first",
            Self::SecurityHeaders => "must run before cross-origin",
            Self::CrossOrigin => "must run before the liveness probe",
            Self::Liveness => "must run before access logging",
            Self::AccessLog => "must run before compression",
            Self::Compression => "must run before body parsing",
            Self::BodyParsers => "must run before cache-control suppression",
            Self::CacheControl => "must run before route mount",
            Self::RouteMount => "must run before the catch-all",
            Self::CatchAll => "must run before the error reporter",
            Self::ErrorReporter => "must run last",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::ErrorReporter
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from assembling a pipeline out of order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("stage {stage} registered after the terminal stage")]
    AfterTerminal { stage: PipelineStage },
    #[error("stage {stage} registered after {previous}: {stage} {}", stage.constraint())]
    OutOfOrder {
        stage: PipelineStage,
        previous: PipelineStage,
    },
    #[error("stage {stage} registered twice")]
    Duplicate { stage: PipelineStage },
    #[error("pipeline has no terminal error-reporting stage")]
    MissingTerminal,
}

/// Incrementally registers stages, enforcing their position constraints.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<PipelineStage>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `stage` after the ones already present.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if `stage` follows the terminal stage,
    /// is already registered, or belongs before the last registered stage.
    pub fn stage(mut self, stage: PipelineStage) -> Result<Self, PipelineError> {
        if let Some(&previous) = self.stages.last() {
            if previous.is_terminal() {
                return Err(PipelineError::AfterTerminal { stage });
            }
            if previous == stage {
                return Err(PipelineError::Duplicate { stage });
            }
            if previous > stage {
                return Err(PipelineError::OutOfOrder { stage, previous });
            }
        }
        self.stages.push(stage);
        Ok(self)
    }

    /// Freezes the registered stages into a [`Pipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingTerminal`] unless the error reporter
    /// was registered last.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        match self.stages.last() {
            Some(stage) if stage.is_terminal() => Ok(Pipeline {
                stages: self.stages,
            }),
            _ => Err(PipelineError::MissingTerminal),
        }
    }
}

/// An immutable, validated sequence of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<PipelineStage>,
}

impl Pipeline {
    /// The full pipeline with every stage in declared order.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            stages: PipelineStage::ALL.to_vec(),
        }
    }

    #[must_use]
    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    #[must_use]
    pub fn contains(&self, stage: PipelineStage) -> bool {
        self.stages.contains(&stage)
    }

    /// Builds the serving router: `routes` mounted under the configured API
    /// prefix, wrapped by every stage of this pipeline.
    pub fn assemble(&self, config: &ServiceConfig, routes: Router) -> Router {
        let mut router = Router::new();

        if self.contains(PipelineStage::RouteMount) {
            router = mount_routes(router, config, routes);
        }
        if self.contains(PipelineStage::CatchAll) {
            router = router.fallback(not_found);
        }

        // The innermost layer is registered first, so walk the stages that
        // precede the route table from last to first.
        for &stage in self.stages.iter().rev() {
            router = match stage {
                PipelineStage::RouteMount
                | PipelineStage::CatchAll
                | PipelineStage::ErrorReporter => router,
                PipelineStage::CacheControl => router.layer(map_response(suppress_etag)),
                PipelineStage::BodyParsers => router
                    .layer(DefaultBodyLimit::max(config.body_limit_bytes))
                    .layer(RequestBodyLimitLayer::new(config.body_limit_bytes)),
                PipelineStage::Compression => router
                    .layer(compression_layer())
                    .layer(from_fn(compression_opt_out)),
                PipelineStage::AccessLog => router.layer(build_access_log_layers()),
                PipelineStage::Liveness => router.layer(from_fn(liveness_probe)),
                PipelineStage::CrossOrigin => router.layer(build_cors_layer(&config.cors_origins)),
                PipelineStage::SecurityHeaders => router.layer(map_response(security_headers)),
                PipelineStage::RateLimiter => router.layer(RateLimitLayer::new(config.rate_limit)),
            };
            debug!(stage = %stage, "pipeline stage registered");
        }

        // Registered last: nothing may wrap the terminal stage.
        if self.contains(PipelineStage::ErrorReporter) {
            router = router
                .layer(RequestScopeLayer)
                .layer(CatchPanicLayer::custom(panic_response))
                .layer(map_response(report_failures));
        }

        router
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

/// Binds the collaborator route table under the API prefix, plus the
/// documentation UI outside production.
fn mount_routes(router: Router, config: &ServiceConfig, routes: Router) -> Router {
    let path = config.mount_path();
    let router = if path.is_empty() {
        router.merge(routes)
    } else {
        router.nest(path, routes)
    };

    if config.environment.docs_enabled() {
        router.merge(docs_router())
    } else {
        router
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::extract::Request;
    use axum::http::{header, Method, StatusCode};
    use axum::routing::{get, post};
    use axum::Json;
    use tower::ServiceExt;

    use super::*;
    use crate::config::{Environment, RateLimitConfig};
    use crate::network::middleware::RouteError;

    fn config() -> ServiceConfig {
        ServiceConfig {
            rate_limit: RateLimitConfig {
                window: std::time::Duration::from_millis(1000),
                max_requests: 1000,
            },
            ..ServiceConfig::default()
        }
    }

    fn routes() -> Router {
        Router::new()
            .route("/wifis", get(|| async { "wifi list" }))
            .route("/wifis/big", get(|| async { "x".repeat(10_000) }))
            .route("/wifis/tagged", get(|| async { ([(header::ETAG, "\"v1\"")], "tagged") }))
            .route(
                "/wifis",
                post(|Json(body): Json<serde_json::Value>| async move { Json(body) }),
            )
            .route(
                "/wifis/fail",
                get(|| async { Err::<String, _>(RouteError::Internal(anyhow::anyhow!("db timeout at 10.0.0.5"))) }),
            )
            .route("/wifis/panic", get(explode))
    }

    async fn explode() -> &'static str {
        panic!("handler bug")
    }

    fn app() -> Router {
        Pipeline::standard().assemble(&config(), routes())
    }

    fn get_req(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // -- builder ------------------------------------------------------------

    #[test]
    fn standard_pipeline_is_declared_order() {
        let pipeline = Pipeline::standard();
        assert_eq!(pipeline.stages(), &PipelineStage::ALL);
        assert_eq!(pipeline.stages().last(), Some(&PipelineStage::ErrorReporter));
    }

    #[test]
    fn builder_accepts_declared_order() {
        let built = PipelineStage::ALL
            .iter()
            .try_fold(PipelineBuilder::new(), |b, &s| b.stage(s))
            .and_then(PipelineBuilder::build)
            .unwrap();
        assert_eq!(built, Pipeline::standard());
    }

    #[test]
    fn builder_rejects_body_parsers_before_compression() {
        let err = PipelineBuilder::new()
            .stage(PipelineStage::BodyParsers)
            .unwrap()
            .stage(PipelineStage::Compression)
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::OutOfOrder {
                stage: PipelineStage::Compression,
                previous: PipelineStage::BodyParsers,
            }
        );
    }

    #[test]
    fn builder_rejects_stage_after_terminal() {
        let err = PipelineBuilder::new()
            .stage(PipelineStage::ErrorReporter)
            .unwrap()
            .stage(PipelineStage::RouteMount)
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::AfterTerminal {
                stage: PipelineStage::RouteMount
            }
        );
    }

    #[test]
    fn builder_rejects_duplicates() {
        let err = PipelineBuilder::new()
            .stage(PipelineStage::RateLimiter)
            .unwrap()
            .stage(PipelineStage::RateLimiter)
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::Duplicate {
                stage: PipelineStage::RateLimiter
            }
        );
    }

    #[test]
    fn builder_requires_terminal_stage() {
        let err = PipelineBuilder::new()
            .stage(PipelineStage::RouteMount)
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(err, PipelineError::MissingTerminal);
    }

    #[test]
    fn out_of_order_message_names_constraint() {
        let err = PipelineError::OutOfOrder {
            stage: PipelineStage::Compression,
            previous: PipelineStage::BodyParsers,
        };
        assert_eq!(
            err.to_string(),
            "stage compression registered after body-parsers: compression must run before body parsing"
        );
    }

    // -- assembled router -----------------------------------------------------

    #[tokio::test]
    async fn alive_returns_ok() {
        let resp = app().oneshot(get_req("/alive")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "OK");
    }

    #[tokio::test]
    async fn alive_works_without_routes() {
        let app = Pipeline::standard().assemble(&config(), Router::new());
        let resp = app.oneshot(get_req("/alive")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "OK");
    }

    #[tokio::test]
    async fn alive_bypasses_access_log() {
        let resp = app().oneshot(get_req("/alive")).await.unwrap();
        assert!(resp.headers().get("x-request-id").is_none());
        // Earlier stages still apply.
        assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn routes_are_mounted_under_prefix() {
        let resp = app().oneshot(get_req("/api/v1/wifis")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));
        assert_eq!(body_string(resp).await, "wifi list");
    }

    #[tokio::test]
    async fn unknown_paths_hit_catch_all() {
        for path in ["/no-such-route", "/api/v1/no-such-route"] {
            let resp = app().oneshot(get_req(path)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{path}");
            assert_eq!(body_string(resp).await, "Not Found");
        }
    }

    #[tokio::test]
    async fn route_errors_become_uniform_responses() {
        let resp = app().oneshot(get_req("/api/v1/wifis/fail")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(resp).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"]["message"], "Internal Server Error");
        assert!(!body.contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn error_responses_keep_stage_headers() {
        let resp = app().oneshot(get_req("/api/v1/wifis/fail")).await.unwrap();
        assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
        assert!(resp.headers().contains_key("x-request-id"));
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn handler_panics_become_uniform_responses() {
        let resp = app().oneshot(get_req("/api/v1/wifis/panic")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["error"]["status"], 500);
    }

    #[tokio::test]
    async fn security_headers_on_every_response() {
        let resp = app().oneshot(get_req("/no-such-route")).await.unwrap();
        assert_eq!(resp.headers()["x-frame-options"], "SAMEORIGIN");
        assert_eq!(resp.headers()["referrer-policy"], "no-referrer");
    }

    #[tokio::test]
    async fn cors_headers_applied() {
        let req = Request::builder()
            .uri("/api/v1/wifis")
            .header("origin", "https://maps.example")
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn etags_are_stripped() {
        let resp = app().oneshot(get_req("/api/v1/wifis/tagged")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(header::ETAG).is_none());
    }

    #[tokio::test]
    async fn compression_honours_opt_out() {
        let compressed = app()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/wifis/big")
                    .header(header::ACCEPT_ENCODING, "gzip")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(compressed.headers()[header::CONTENT_ENCODING], "gzip");

        let plain = app()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/wifis/big")
                    .header(header::ACCEPT_ENCODING, "gzip")
                    .header("x-no-compression", "true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(plain.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body_string(plain).await.len(), 10_000);
    }

    #[tokio::test]
    async fn json_bodies_are_parsed() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/wifis")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"bssid":"aa:bb"}"#))
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, r#"{"bssid":"aa:bb"}"#);
    }

    #[tokio::test]
    async fn declared_oversized_body_rejected_before_handler() {
        let limit = ServiceConfig::default().body_limit_bytes;
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/wifis")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, (limit + 1).to_string())
            .body(Body::from("{}"))
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn streamed_oversized_body_rejected() {
        let cfg = ServiceConfig {
            body_limit_bytes: 64,
            ..config()
        };
        let app = Pipeline::standard().assemble(&cfg, routes());
        let payload = format!(r#"{{"pad":"{}"}}"#, "x".repeat(200));
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/wifis")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn sixth_request_in_window_is_rejected_before_routes() {
        let cfg = ServiceConfig {
            rate_limit: RateLimitConfig::default(),
            ..config()
        };
        let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = hits.clone();
        let routes = Router::new().route(
            "/wifis",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    "ok"
                }
            }),
        );
        let app = Pipeline::standard().assemble(&cfg, routes);

        for _ in 0..5 {
            let resp = app.clone().oneshot(get_req("/api/v1/wifis")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        let resp = app.oneshot(get_req("/api/v1/wifis")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn docs_follow_environment() {
        let dev = app().oneshot(get_req("/api-docs/openapi.json")).await.unwrap();
        assert_eq!(dev.status(), StatusCode::OK);

        let prod_cfg = ServiceConfig {
            environment: Environment::Production,
            ..config()
        };
        let prod = Pipeline::standard()
            .assemble(&prod_cfg, routes())
            .oneshot(get_req("/api-docs/openapi.json"))
            .await
            .unwrap();
        assert_eq!(prod.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn root_prefix_merges_routes() {
        let cfg = ServiceConfig {
            api_prefix: "/".to_string(),
            ..config()
        };
        let resp = Pipeline::standard()
            .assemble(&cfg, routes())
            .oneshot(get_req("/wifis"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn partial_pipeline_without_catch_all_uses_default_404() {
        let pipeline = PipelineBuilder::new()
            .stage(PipelineStage::RouteMount)
            .and_then(|b| b.stage(PipelineStage::ErrorReporter))
            .and_then(PipelineBuilder::build)
            .unwrap();
        let resp = pipeline
            .assemble(&config(), routes())
            .oneshot(get_req("/nope"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(resp).await, "");
    }
}
