//! HTTPS listener for a provisioned serving certificate.

use std::future::Future;
use std::net::SocketAddr;

use axum::{http::StatusCode, routing::get, serve::Listener, Json, Router};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use tracing::{debug, error, info, warn};

use crate::errors::{Error, Result};
use crate::provisioning::ServingCertificate;

/// Connections that have not finished the TLS handshake by then are dropped.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Completed handshakes waiting for the HTTP server to pick them up.
const ACCEPTED_BACKLOG: usize = 64;

const PRODUCT: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

/// `/` and `/healthz`.
pub fn default_router() -> Router {
    Router::new()
        .route("/", get(|| async { PRODUCT }))
        .route("/healthz", get(|| async { (StatusCode::OK, Json(json!({ "status": "ok" }))) }))
}

/// Bind `addr` and serve `router` over TLS until `shutdown` resolves.
pub async fn serve_https<F>(
    addr: SocketAddr,
    acceptor: TlsAcceptor,
    router: Router,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        Error::transport(format!("Failed to bind HTTPS listener on {}: {}", addr, e))
    })?;
    serve_on(listener, acceptor, router, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve_on<F>(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let tls_listener = TlsListener::new(listener, acceptor, TLS_HANDSHAKE_TIMEOUT)
        .map_err(|e| Error::transport(format!("HTTPS listener has no local address: {}", e)))?;
    info!(address = %tls_listener.local_addr, "Starting HTTPS server");
    axum::serve(tls_listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::transport(format!("HTTPS server error: {}", e)))?;
    info!("HTTPS server shutdown completed");
    Ok(())
}

/// Serve `certificate` on its configured port until ctrl-c.
pub async fn serve_certificate(certificate: &ServingCertificate, router: Router) -> Result<()> {
    let acceptor = certificate.tls_acceptor()?;
    info!(
        address = %certificate.listen_addr(),
        subject = %certificate.info().subject,
        expires_at = %certificate.info().not_after,
        "Binding serving certificate"
    );
    serve_https(certificate.listen_addr(), acceptor, router, ctrl_c()).await
}

/// Resolves on ctrl-c.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "HTTPS server shutdown listener failed");
    }
}

/// Hands axum connections whose TLS handshake already completed. Handshakes
/// run on their own tasks so a client that connects and then stalls cannot
/// hold up anyone else.
struct TlsListener {
    connections: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    local_addr: SocketAddr,
}

impl TlsListener {
    fn new(
        listener: TcpListener,
        acceptor: TlsAcceptor,
        handshake_timeout: Duration,
    ) -> std::io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (sender, connections) = mpsc::channel(ACCEPTED_BACKLOG);
        tokio::spawn(accept_loop(listener, acceptor, sender, handshake_timeout));
        Ok(Self { connections, local_addr })
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.connections.recv().await {
            Some(connection) => connection,
            // The accept loop is gone; nothing will ever arrive.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// Accept TCP connections until the [`TlsListener`] is dropped.
async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    connections: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
    handshake_timeout: Duration,
) {
    loop {
        let accepted = tokio::select! {
            _ = connections.closed() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, addr) = match accepted {
            Ok(connection) => connection,
            Err(err) => {
                if !is_connection_error(&err) {
                    error!("HTTPS accept error: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let connections = connections.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => {
                    let _ = connections.send((tls_stream, addr)).await;
                }
                Ok(Err(err)) => warn!(error = %err, %addr, "TLS handshake failed"),
                Err(_) => warn!(%addr, timeout = ?handshake_timeout, "TLS handshake timed out"),
            }
        });
    }
    debug!("HTTPS accept loop stopped");
}

fn is_connection_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}
