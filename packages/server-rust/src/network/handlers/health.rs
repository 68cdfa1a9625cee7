//! Liveness and catch-all handlers.
//!
//! Both return fixed bodies and depend on nothing: not storage state, not
//! the route table, not the shutdown controller.

use axum::http::StatusCode;

/// Path answered by the liveness probe.
pub const LIVENESS_PATH: &str = "/alive";

/// Body of every liveness response.
pub const LIVENESS_BODY: &str = "OK";

/// Body of every catch-all response.
pub const NOT_FOUND_BODY: &str = "Not Found";

/// Liveness probe -- always returns 200 with a literal body.
#[utoipa::path(
    get,
    path = "/alive",
    tag = "health",
    responses(
        (status = 200, description = "The process is up and serving", body = String)
    )
)]
pub async fn alive() -> &'static str {
    LIVENESS_BODY
}

/// Fallback for requests that match no route.
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, NOT_FOUND_BODY)
}
