//! Listener and graceful shutdown for the HTTP adapters
//!
//! Cloud Run and GKE both stop an instance with SIGTERM and a grace period.
//! The server stops accepting connections, lets in-flight requests finish,
//! and then returns so the caller can drain coordination.

use axum::Router;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

/// Failure to run the HTTP listener
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] io::Error),
}

/// Completes on SIGTERM (pod or revision termination) or SIGINT (Ctrl+C)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

/// Serve `router` on `0.0.0.0:port` until a shutdown signal arrives
///
/// # Errors
///
/// Returns `ServeError` if the port cannot be bound or the server fails.
pub async fn serve(router: Router, port: u16) -> Result<(), ServeError> {
    serve_with_shutdown(router, SocketAddr::from(([0, 0, 0, 0], port)), shutdown_signal()).await
}

/// Serve `router` on `addr` until `signal` completes
///
/// # Errors
///
/// Returns `ServeError` if the address cannot be bound or the server fails.
pub async fn serve_with_shutdown<F>(router: Router, addr: SocketAddr, signal: F) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })?;
    let local = listener.local_addr()?;
    info!(addr = %local, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await?;

    info!("Listener stopped, in-flight requests completed");
    Ok(())
}
