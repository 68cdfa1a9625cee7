//! wifimap server binary.
//!
//! Resolves configuration, installs logging and the fault reporter, starts
//! the service and closes it gracefully on SIGINT or SIGTERM.

use std::process::ExitCode;

use axum::Router;
use clap::Parser;
use tracing::{error, info};

use wifimap_server::{logging, start, FaultReporter, MongoConnector, ServiceConfig};

#[derive(Debug, Parser)]
#[command(name = "wifimap-server", version, about = "wifimap HTTP API server")]
struct Args {
    /// Listen port; overrides `PORT`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match ServiceConfig::from_env(args.port) {
        Ok(config) => config,
        Err(e) => {
            // No subscriber yet: the environment is part of what failed.
            eprintln!("invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    logging::init(&config.environment);
    FaultReporter::new(config.fault_policy).install();

    let code = run(config).await;
    info!(code, "process exiting");
    ExitCode::from(code)
}

async fn run(config: ServiceConfig) -> u8 {
    let handle = match start(config, |_storage| Router::new(), MongoConnector::default()).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "startup failed");
            return 1;
        }
    };
    info!(addr = %handle.local_addr(), "service listening");

    shutdown_signal().await;

    match handle.close().await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "graceful shutdown failed");
            1
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("SIGINT received"),
        () = terminate => info!("SIGTERM received"),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn port_comes_only_from_the_flag() {
        let args = Args::try_parse_from(["wifimap-server", "--port", "8080"]).unwrap();
        assert_eq!(args.port, Some(8080));

        // `PORT` is resolved by the configuration layer, not by clap.
        let args = Args::try_parse_from(["wifimap-server"]).unwrap();
        assert_eq!(args.port, None);
    }
}
