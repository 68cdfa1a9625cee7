//! Interactive API documentation, mounted outside production.
//!
//! Only the routes owned by this crate are described here; route tables
//! supplied by collaborators publish their own documents.

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Path of the Swagger UI.
pub const DOCS_PATH: &str = "/api-docs";

/// Path of the generated `OpenAPI` document.
pub const OPENAPI_PATH: &str = "/api-docs/openapi.json";

#[derive(OpenApi)]
#[openapi(
    paths(super::health::alive),
    tags((name = "health", description = "Process liveness"))
)]
pub struct ApiDoc;

/// Router serving the Swagger UI and its `OpenAPI` document.
#[must_use]
pub fn docs_router() -> Router {
    Router::new().merge(SwaggerUi::new(DOCS_PATH).url(OPENAPI_PATH, ApiDoc::openapi()))
}
