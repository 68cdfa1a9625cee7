//! HTTP handlers owned by the server itself.
//!
//! Business routes are supplied by collaborators and mounted under the API
//! prefix; this module only holds the liveness probe, the catch-all and the
//! documentation UI.

pub mod docs;
pub mod health;

pub use docs::{docs_router, ApiDoc, DOCS_PATH, OPENAPI_PATH};
pub use health::{alive, not_found, LIVENESS_BODY, LIVENESS_PATH, NOT_FOUND_BODY};
