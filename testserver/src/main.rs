//! # Noodle Test Server
//!
//! Serves the demonstration `FileService` and `StatService`, the health service and server
//! reflection (`v1` and `v1alpha`) on every configured endpoint.
//!
//! Each endpoint runs in its own task with its own listener. Failing to bind any of them
//! stops the whole process with exit code 1.
mod config;

use clap::Parser;
use config::ServerConfig;
use file_service::{FILE_DESCRIPTOR_SET, FileServer, FileServiceServer, StatServiceServer};
use noodle_core::endpoint::Endpoint;
use std::path::PathBuf;
use std::process;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "noodle-testserver", version, about = "Demonstration gRPC server")]
struct Cli {
    /// JSON file listing the endpoints to serve
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra endpoint to serve, as address:port (repeatable)
    #[arg(short, long = "listen", value_parser = parse_listen)]
    listen: Vec<Endpoint>,

    /// Directory whose entries are served
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum ListenError {
    #[error("Failed to listen on {endpoint}: {source}")]
    Bind {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to build the reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),
    #[error("Server on {endpoint} stopped: {source}")]
    Serve {
        endpoint: Endpoint,
        #[source]
        source: tonic::transport::Error,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut endpoints = match cli.config.as_deref().map(ServerConfig::load).transpose() {
        Ok(config) => config.map(|c| c.endpoints).unwrap_or_default(),
        Err(err) => {
            tracing::error!("{err:#}");
            process::exit(1);
        }
    };
    endpoints.extend(cli.listen);

    if endpoints.is_empty() {
        tracing::error!("No endpoints configured, use --config or --listen");
        process::exit(1);
    }

    for endpoint in &endpoints {
        tracing::info!(%endpoint, "Endpoint from config");
    }

    for endpoint in endpoints {
        let files = FileServer::new(cli.root.clone());
        tokio::spawn(async move {
            if let Err(err) = serve(endpoint, files).await {
                tracing::error!("{err}");
                process::exit(1);
            }
        });
    }

    tracing::info!("Waiting for signal...");
    shutdown_signal().await;
    tracing::info!("Signal received, exiting...");
}

async fn serve(endpoint: Endpoint, files: FileServer) -> Result<(), ListenError> {
    let listener = TcpListener::bind(endpoint.target())
        .await
        .map_err(|source| ListenError::Bind {
            endpoint: endpoint.clone(),
            source,
        })?;

    let reflection_v1 = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;
    let reflection_v1alpha = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1alpha()?;

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<FileServiceServer<FileServer>>()
        .await;

    tracing::info!(%endpoint, "Starting server");

    Server::builder()
        .add_service(reflection_v1)
        .add_service(reflection_v1alpha)
        .add_service(health_service)
        .add_service(FileServiceServer::new(files.clone()))
        .add_service(StatServiceServer::new(files))
        .serve_with_incoming(TcpListenerStream::new(listener))
        .await
        .map_err(|source| ListenError::Serve { endpoint, source })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn parse_listen(value: &str) -> Result<Endpoint, String> {
    let (address, port) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("Invalid endpoint '{value}'. Expected 'address:port'"))?;
    let port = port
        .parse()
        .map_err(|e| format!("Invalid port in '{value}': {e}"))?;
    let address = address.trim_start_matches('[').trim_end_matches(']');

    Ok(Endpoint::new(address, port))
}

#[cfg(test)]
mod tests {
    use super::parse_listen;
    use noodle_core::endpoint::Endpoint;

    #[test]
    fn parses_listen_addresses() {
        assert_eq!(
            parse_listen("0.0.0.0:9000").unwrap(),
            Endpoint::new("0.0.0.0", 9000)
        );
        assert_eq!(parse_listen("[::1]:50051").unwrap(), Endpoint::new("::1", 50051));
        assert!(parse_listen("localhost").is_err());
        assert!(parse_listen("localhost:http").is_err());
    }
}
