// HTTP transport: router, per-connection DRBG attachment, serve loop

pub mod handlers;

use std::convert::Infallible;
use std::future::{ready, Ready};
use std::io;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::routing::get;
use axum::serve::IncomingStream;
use axum::{Extension, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::Service;
use tracing::warn;

use crate::rng::drbg::Drbg;
use crate::rng::reservoir::EntropyReservoir;

// Re-exports
pub use handlers::HealthInfo;

/// Shared handles the request handlers operate on.
#[derive(Clone)]
pub struct AppState {
    pub master: Arc<Drbg>,
    pub reservoir: Arc<EntropyReservoir>,
}

/// Build the service router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/random", get(handlers::random_bytes))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_exposition))
        .with_state(state)
}

/// Make-service invoked once per accepted connection.
///
/// Each accept derives a fresh DRBG from the master and attaches it to the
/// connection's router as a request extension, giving every connection its
/// own keystream for the connection's lifetime. If derivation fails the
/// connection is still served, without the extension; `/v1/random` then
/// answers 503.
#[derive(Clone)]
pub struct ConnectionService {
    router: Router,
    master: Arc<Drbg>,
}

impl ConnectionService {
    pub fn new(router: Router, master: Arc<Drbg>) -> Self {
        Self { router, master }
    }
}

impl<'a> Service<IncomingStream<'a>> for ConnectionService {
    type Response = Router;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, stream: IncomingStream<'a>) -> Self::Future {
        let router = match Drbg::for_connection(&self.master) {
            Ok(drbg) => self.router.clone().layer(Extension(Arc::new(drbg))),
            Err(err) => {
                warn!(
                    peer = %stream.remote_addr(),
                    error = %err,
                    "per-connection DRBG derivation failed, serving degraded"
                );
                self.router.clone()
            }
        };
        ready(Ok(router))
    }
}

/// Serve requests on `listener` until the shutdown signal fires, then drain
/// in-flight connections gracefully.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let master = Arc::clone(&state.master);
    let service = ConnectionService::new(router(state), master);

    axum::serve(listener, service)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}
