//! Runtime configuration for the wifimap server.
//!
//! [`ServiceConfig`] is resolved exactly once at process start from the
//! environment (plus an optional CLI port override) and is immutable
//! afterwards. Resolution goes through an injectable lookup function so
//! tests never touch the real process environment.

use std::time::Duration;

use crate::fault::FaultPolicy;

/// Port used when neither the CLI nor `PORT` provides one.
pub const DEFAULT_PORT: u16 = 5000;

/// Prefix under which the external route table is mounted.
pub const DEFAULT_API_PREFIX: &str = "/api/v1/";

/// Storage URL used when `DATABASE_URL` is unset.
pub const DEFAULT_STORAGE_URL: &str = "mongodb://mongo:27017/prj";

/// Maximum accepted request body (JSON or URL-encoded): 100 MiB.
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 100 * 1024 * 1024;

/// Errors produced while resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid port {value:?}: expected an integer in 0..=65535")]
    InvalidPort { value: String },
    #[error("invalid API prefix {value:?}: must start with '/'")]
    InvalidPrefix { value: String },
    #[error("invalid fault policy {value:?}: expected \"continue\" or \"exit\"")]
    InvalidFaultPolicy { value: String },
}

/// Deployment environment, derived from `NODE_ENV`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Production,
    /// Any other value, including an unset variable (`"development"`).
    Other(String),
}

impl Environment {
    fn from_value(value: Option<String>) -> Self {
        match value {
            Some(v) if v == "production" => Self::Production,
            Some(v) => Self::Other(v),
            None => Self::Other("development".to_string()),
        }
    }

    /// Returns `true` for the production environment.
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Interactive API documentation is served everywhere except production.
    #[must_use]
    pub fn docs_enabled(&self) -> bool {
        !self.is_production()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Production => "production",
            Self::Other(name) => name,
        }
    }
}

/// Fixed-window rate limit applied per client identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Length of one counting window.
    pub window: Duration,
    /// Requests admitted per identity within one window.
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1000),
            max_requests: 5,
        }
    }
}

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bind host for the listening socket.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub listen_port: u16,
    /// Prefix for the external route table; always starts and ends with `/`.
    pub api_prefix: String,
    /// Connection string for persistent storage.
    pub storage_url: String,
    /// Deployment environment.
    pub environment: Environment,
    /// Issue cache warm-up triggers once storage is open.
    pub cache_warmup_enabled: bool,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Rate-limiter policy.
    pub rate_limit: RateLimitConfig,
    /// Maximum request body size in bytes.
    pub body_limit_bytes: usize,
    /// What the fault reporter does after logging an uncaught failure.
    pub fault_policy: FaultPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            listen_port: DEFAULT_PORT,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            storage_url: DEFAULT_STORAGE_URL.to_string(),
            environment: Environment::Other("development".to_string()),
            cache_warmup_enabled: false,
            cors_origins: vec!["*".to_string()],
            rate_limit: RateLimitConfig::default(),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            fault_policy: FaultPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Resolves configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any variable holds an unparseable value.
    pub fn from_env(port_override: Option<u16>) -> Result<Self, ConfigError> {
        Self::resolve(port_override, |key| std::env::var(key).ok())
    }

    /// Resolves configuration using `lookup` in place of the environment.
    ///
    /// Empty values are treated as unset. Port precedence is
    /// `port_override` > `PORT` > [`DEFAULT_PORT`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any variable holds an unparseable value.
    pub fn resolve<F>(port_override: Option<u16>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let listen_port = match (port_override, var("PORT")) {
            (Some(port), _) => port,
            (None, Some(raw)) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort { value: raw })?,
            (None, None) => DEFAULT_PORT,
        };

        let api_prefix = match var("API_PREFIX") {
            Some(raw) => normalize_prefix(&raw)?,
            None => defaults.api_prefix,
        };

        let docker_url = var("DOCKER_ENV").and_then(|_| var("DOCKER_DATABASE_URL"));
        let storage_url = docker_url
            .or_else(|| var("DATABASE_URL"))
            .unwrap_or(defaults.storage_url);

        let cors_origins = var("CORS_ORIGINS").map_or(defaults.cors_origins, |raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(ToString::to_string)
                .collect()
        });

        let fault_policy = match var("FAULT_POLICY") {
            Some(raw) => raw
                .parse()
                .map_err(|()| ConfigError::InvalidFaultPolicy { value: raw })?,
            None => defaults.fault_policy,
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            listen_port,
            api_prefix,
            storage_url,
            environment: Environment::from_value(var("NODE_ENV")),
            cache_warmup_enabled: var("CACHE_ON_STARTUP").is_some_and(|v| is_truthy(&v)),
            cors_origins,
            rate_limit: defaults.rate_limit,
            body_limit_bytes: defaults.body_limit_bytes,
            fault_policy,
        })
    }

    /// The prefix as an axum nest path: no trailing slash, empty for `/`.
    #[must_use]
    pub fn mount_path(&self) -> &str {
        self.api_prefix.trim_end_matches('/')
    }
}

fn normalize_prefix(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('/') {
        return Err(ConfigError::InvalidPrefix {
            value: raw.to_string(),
        });
    }
    if trimmed.ends_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/"))
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn resolve_with(
        port_override: Option<u16>,
        vars: &[(&str, &str)],
    ) -> Result<ServiceConfig, ConfigError> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::resolve(port_override, |key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = resolve_with(None, &[]).unwrap();
        assert_eq!(config.listen_port, 5000);
        assert_eq!(config.api_prefix, "/api/v1/");
        assert_eq!(config.storage_url, "mongodb://mongo:27017/prj");
        assert!(!config.environment.is_production());
        assert!(config.environment.docs_enabled());
        assert!(!config.cache_warmup_enabled);
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.rate_limit.window, Duration::from_millis(1000));
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.body_limit_bytes, 104_857_600);
        assert_eq!(config.fault_policy, FaultPolicy::Continue);
    }

    #[test]
    fn port_precedence_override_then_env_then_default() {
        assert_eq!(resolve_with(Some(7000), &[("PORT", "6000")]).unwrap().listen_port, 7000);
        assert_eq!(resolve_with(None, &[("PORT", "6000")]).unwrap().listen_port, 6000);
        assert_eq!(resolve_with(None, &[("PORT", "")]).unwrap().listen_port, 5000);
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = resolve_with(None, &[("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { value } if value == "eighty"));
    }

    #[test]
    fn api_prefix_gets_trailing_slash() {
        let config = resolve_with(None, &[("API_PREFIX", "/api/v2")]).unwrap();
        assert_eq!(config.api_prefix, "/api/v2/");
        assert_eq!(config.mount_path(), "/api/v2");
    }

    #[test]
    fn api_prefix_without_leading_slash_is_rejected() {
        let err = resolve_with(None, &[("API_PREFIX", "api")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPrefix { .. }));
    }

    #[test]
    fn root_prefix_mounts_at_empty_path() {
        let config = resolve_with(None, &[("API_PREFIX", "/")]).unwrap();
        assert_eq!(config.mount_path(), "");
    }

    #[test]
    fn docker_url_overrides_database_url() {
        let config = resolve_with(
            None,
            &[
                ("DATABASE_URL", "mongodb://local:27017/prj"),
                ("DOCKER_ENV", "true"),
                ("DOCKER_DATABASE_URL", "mongodb://docker:27017/prj"),
            ],
        )
        .unwrap();
        assert_eq!(config.storage_url, "mongodb://docker:27017/prj");
    }

    #[test]
    fn docker_url_ignored_without_docker_env() {
        let config = resolve_with(
            None,
            &[
                ("DATABASE_URL", "mongodb://local:27017/prj"),
                ("DOCKER_DATABASE_URL", "mongodb://docker:27017/prj"),
            ],
        )
        .unwrap();
        assert_eq!(config.storage_url, "mongodb://local:27017/prj");
    }

    #[test]
    fn docker_env_without_docker_url_keeps_database_url() {
        let config = resolve_with(
            None,
            &[("DATABASE_URL", "mongodb://local:27017/prj"), ("DOCKER_ENV", "1")],
        )
        .unwrap();
        assert_eq!(config.storage_url, "mongodb://local:27017/prj");
    }

    #[test]
    fn production_disables_docs() {
        let config = resolve_with(None, &[("NODE_ENV", "production")]).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert!(!config.environment.docs_enabled());

        let staging = resolve_with(None, &[("NODE_ENV", "staging")]).unwrap();
        assert_eq!(staging.environment.as_str(), "staging");
        assert!(staging.environment.docs_enabled());
    }

    #[test]
    fn cache_on_startup_flag() {
        assert!(resolve_with(None, &[("CACHE_ON_STARTUP", "true")]).unwrap().cache_warmup_enabled);
        assert!(resolve_with(None, &[("CACHE_ON_STARTUP", "1")]).unwrap().cache_warmup_enabled);
        assert!(!resolve_with(None, &[("CACHE_ON_STARTUP", "false")]).unwrap().cache_warmup_enabled);
        assert!(!resolve_with(None, &[("CACHE_ON_STARTUP", "")]).unwrap().cache_warmup_enabled);
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = resolve_with(
            None,
            &[("CORS_ORIGINS", "https://a.example, https://b.example,")],
        )
        .unwrap();
        assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn fault_policy_parsing() {
        let config = resolve_with(None, &[("FAULT_POLICY", "exit")]).unwrap();
        assert_eq!(config.fault_policy, FaultPolicy::Exit);

        let err = resolve_with(None, &[("FAULT_POLICY", "panic")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFaultPolicy { .. }));
    }
}
