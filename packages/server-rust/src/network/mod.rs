//! HTTP surface: request pipeline, listener lifecycle and shutdown control.

pub mod handle;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod pipeline;
pub mod shutdown;

pub use handle::{CloseError, ServiceHandle};
pub use module::NetworkModule;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, PipelineStage};
pub use shutdown::{ServiceState, ShutdownController};
