pub mod forward;

use crate::backend::{BackendPool, SharedBackendPool};
use anyhow::Result;
use forward::{BoxError, ProxyBody, service_unavailable};
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use socket2::TcpKeepalive;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, error, info, warn};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Accepts HTTP connections and dispatches each request to the pool.
pub struct Proxy {
    backend_pool: SharedBackendPool,
    drain_timeout: Duration,
}

impl Proxy {
    pub fn new(backend_pool: SharedBackendPool) -> Self {
        Self {
            backend_pool,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Upper bound on how long [`Proxy::serve`] waits for open connections
    /// after shutdown.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Serves until `shutdown` fires, then stops accepting and waits up to
    /// the drain timeout for in-flight requests to finish. Idle keep-alive
    /// connections are closed.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!("Load balancer listening on {}", listener.local_addr()?);

        let graceful = GracefulShutdown::new();
        let mut backoff = Duration::ZERO;

        'accept: loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((client_socket, client_addr)) => {
                        backoff = Duration::ZERO;
                        debug!("New connection from {}", client_addr);
                        if let Err(e) = configure_keepalive(&client_socket) {
                            debug!("Failed to tune socket for {}: {}", client_addr, e);
                        }

                        let pool = self.backend_pool.clone();
                        let service = service_fn(move |request: Request<Incoming>| {
                            let pool = pool.clone();
                            async move {
                                let request = request.map(|body| body.map_err(BoxError::from).boxed_unsync());
                                Ok::<_, Infallible>(dispatch(&pool, request, Some(client_addr)).await)
                            }
                        });

                        let connection = http1::Builder::new()
                            .serve_connection(TokioIo::new(client_socket), service);
                        let connection = graceful.watch(connection);
                        tokio::spawn(async move {
                            if let Err(e) = connection.await {
                                debug!("Error serving connection from {}: {}", client_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        backoff = next_accept_backoff(backoff);
                        error!("Failed to accept connection: {}; retrying in {:?}", e, backoff);
                        tokio::select! {
                            _ = time::sleep(backoff) => {}
                            _ = shutdown.recv() => break 'accept,
                        }
                    }
                },
                _ = shutdown.recv() => break 'accept,
            }
        }

        info!("Load balancer stopped accepting connections");
        drop(listener);

        tokio::select! {
            _ = graceful.shutdown() => {
                info!("All connections drained");
            }
            _ = time::sleep(self.drain_timeout) => {
                warn!(timeout = ?self.drain_timeout, "Timed out waiting for connections to drain");
            }
        }

        Ok(())
    }
}

fn next_accept_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        MIN_ACCEPT_BACKOFF
    } else {
        (current * 2).min(MAX_ACCEPT_BACKOFF)
    }
}

/// Picks one backend and forwards to it; 503 when none is alive.
///
/// A forwarding failure is answered by the backend's error hook. The
/// request is never re-dispatched to another backend.
pub async fn dispatch(
    pool: &BackendPool,
    request: Request<ProxyBody>,
    client_addr: Option<SocketAddr>,
) -> Response<ProxyBody> {
    match pool.next_backend() {
        Some(backend) => backend.proxy().serve(request, client_addr).await,
        None => {
            debug!(method = %request.method(), uri = %request.uri(), "No backend available");
            service_unavailable()
        }
    }
}

fn configure_keepalive(stream: &TcpStream) -> Result<()> {
    let sock_ref = socket2::SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));

    sock_ref.set_tcp_keepalive(&keepalive)?;
    stream.set_nodelay(true)?;

    Ok(())
}
