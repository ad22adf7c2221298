//! Real backends and a real balancer on ephemeral ports.
#![allow(dead_code)]

use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use roundabout::proxy::forward::http_client;
use roundabout::{BackendPool, Proxy, SharedBackendPool, Shutdown};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub type TestClient = Client<HttpConnector, Empty<Bytes>>;

/// Backend answering every request with its name and a fixed status.
pub struct TestBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl TestBackend {
    pub async fn start(name: &'static str) -> Self {
        Self::with_status(name, StatusCode::OK).await
    }

    pub async fn with_status(name: &'static str, status: StatusCode) -> Self {
        Self::spawn(name, status, Duration::ZERO).await
    }

    /// Waits `delay` before answering each request.
    pub async fn slow(name: &'static str, delay: Duration) -> Self {
        Self::spawn(name, StatusCode::OK, delay).await
    }

    async fn spawn(name: &'static str, status: StatusCode, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let forwarded = request
                            .headers()
                            .get("x-forwarded-for")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned);
                        async move {
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                            let mut response = Response::builder()
                                .status(status)
                                .header("x-backend", name);
                            if let Some(value) = forwarded {
                                response = response.header("x-echo-forwarded-for", value);
                            }
                            Ok::<_, Infallible>(
                                response.body(Full::new(Bytes::from_static(name.as_bytes()))).unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(socket), service)
                        .await;
                });
            }
        });

        Self { addr, hits, handle }
    }

    pub fn url(&self) -> Uri {
        format!("http://{}", self.addr).parse().unwrap()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Closes the listening socket.
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

pub struct TestBalancer {
    pub addr: SocketAddr,
    pub pool: SharedBackendPool,
    shutdown: Shutdown,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestBalancer {
    pub async fn start(targets: Vec<Uri>) -> Self {
        let pool = Arc::new(BackendPool::from_targets(
            targets,
            http_client(),
            Some(Duration::from_secs(5)),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let proxy = Proxy::new(pool.clone());
        let rx = shutdown.subscribe();
        let handle = tokio::spawn(async move { proxy.serve(listener, rx).await });

        Self {
            addr,
            pool,
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("balancer did not stop")
            .expect("balancer task panicked")
    }
}

/// Address that refuses connections.
pub async fn closed_url() -> Uri {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr).parse().unwrap()
}

pub fn client() -> TestClient {
    Client::builder(TokioExecutor::new()).build_http()
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

pub async fn get(client: &TestClient, addr: SocketAddr, path: &str) -> Reply {
    let uri: Uri = format!("http://{}{}", addr, path).parse().unwrap();
    let response = client.get(uri).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();

    Reply {
        status,
        headers,
        body: String::from_utf8(body.to_vec()).unwrap(),
    }
}
