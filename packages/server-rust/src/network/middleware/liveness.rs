//! Liveness short-circuit.
//!
//! Answers `GET /alive` (and `HEAD`) directly so probes never reach the
//! access logger, compression, body parsing or the route table.

use axum::extract::Request;
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::network::handlers::{alive, LIVENESS_PATH};

pub async fn liveness_probe(request: Request, next: Next) -> Response {
    let is_probe = request.uri().path() == LIVENESS_PATH
        && matches!(*request.method(), Method::GET | Method::HEAD);
    if is_probe {
        return alive().await.into_response();
    }
    next.run(request).await
}
