//! The switchyard server binary: environment-driven configuration,
//! default handlers and signal-triggered graceful shutdown.

use std::sync::Arc;

use http::StatusCode;
use switchyard::BoxError;
use switchyard::server::{Server, ServerConfig, service_fn, text_response};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let server = Server::new(config).with_handler(Arc::new(service_fn(|req| async move {
        match req.uri().path() {
            "/" => text_response(StatusCode::OK, "switchyard is up\n"),
            _ => text_response(StatusCode::NOT_FOUND, "not found\n"),
        }
    })));

    let runner = server.clone();
    let serve = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received; shutting down");
    let drained = server.shutdown().await;
    if !drained {
        tracing::warn!("shutdown timeout elapsed before all connections drained");
    }

    serve.await??;
    Ok(())
}
