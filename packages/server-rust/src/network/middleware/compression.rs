//! Response compression with a per-request opt-out.
//!
//! A request carrying [`NO_COMPRESSION_HEADER`] has its `Accept-Encoding`
//! removed before the compression layer sees it, so the opt-out wins over
//! the generic size/content-type predicate.

use axum::extract::Request;
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};
use tower_http::compression::CompressionLayer;

/// Request header that disables compression for its response.
pub const NO_COMPRESSION_HEADER: &str = "x-no-compression";

/// Responses at or below this many bytes are sent uncompressed.
pub const COMPRESSION_THRESHOLD: u16 = 1024;

/// Honours [`NO_COMPRESSION_HEADER`]. Must wrap the compression layer.
pub async fn compression_opt_out(mut request: Request, next: Next) -> Response {
    if request.headers().contains_key(NO_COMPRESSION_HEADER) {
        request.headers_mut().remove(header::ACCEPT_ENCODING);
    }
    next.run(request).await
}

/// Compression for bodies above [`COMPRESSION_THRESHOLD`], skipping gRPC,
/// images and server-sent events.
#[must_use]
pub fn compression_layer() -> CompressionLayer<impl Predicate> {
    let predicate = SizeAbove::new(COMPRESSION_THRESHOLD)
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE);
    CompressionLayer::new().compress_when(predicate)
}
