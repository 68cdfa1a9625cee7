//! wifimap server: request pipeline assembly, storage bootstrap, cache
//! warm-up and graceful shutdown for the wifimap HTTP API.
//!
//! Route handlers are supplied by the caller of [`start`]; this crate owns
//! everything around them.

pub mod config;
pub mod fault;
pub mod logging;
pub mod network;
pub mod startup;
pub mod storage;
pub mod warmup;

pub use config::{ConfigError, Environment, RateLimitConfig, ServiceConfig};
pub use fault::{FaultPolicy, FaultReporter};
pub use network::middleware::RouteError;
pub use network::{CloseError, ServiceHandle, ServiceState};
pub use startup::{start, StartupError};
pub use storage::{MongoConnector, StorageConnection, StorageConnector, StorageState};
