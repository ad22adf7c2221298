//! Single-target reverse proxy used as each backend's forwarding handle.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue, TE, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderMap, HeaderName, Request, Response, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time;
use tracing::{debug, error};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type flowing through the proxy in both directions.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

pub type HttpClient = Client<HttpConnector, ProxyBody>;

/// Hook turning a forwarding failure into the response sent to the caller.
pub type ErrorHandler = Arc<dyn Fn(&ForwardError) -> Response<ProxyBody> + Send + Sync>;

// Headers meaningful only for a single transport hop.
const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid upstream uri: {0}")]
    InvalidUri(#[from] http::Error),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
}

pub fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Plain-text 503 sent when no backend can take the request.
pub fn service_unavailable() -> Response<ProxyBody> {
    let mut response = Response::new(full("Service Unavailable\n"));
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    response
}

fn reject(_: &ForwardError) -> Response<ProxyBody> {
    service_unavailable()
}

/// Forwards requests to one fixed target.
#[derive(Clone)]
pub struct ReverseProxy {
    target: Uri,
    client: HttpClient,
    timeout: Option<Duration>,
    error_handler: ErrorHandler,
}

impl ReverseProxy {
    pub fn new(target: Uri, client: HttpClient, timeout: Option<Duration>) -> Self {
        Self {
            target,
            client,
            timeout,
            error_handler: Arc::new(reject),
        }
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ForwardError) -> Response<ProxyBody> + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn target(&self) -> &Uri {
        &self.target
    }

    /// Forwards `request`, answering through the error hook on failure.
    /// Never retries.
    pub async fn serve(
        &self,
        request: Request<ProxyBody>,
        client_addr: Option<SocketAddr>,
    ) -> Response<ProxyBody> {
        match self.forward(request, client_addr).await {
            Ok(response) => response,
            Err(e) => {
                error!(backend = %self.target, error = %e, "Forwarding failed");
                (self.error_handler)(&e)
            }
        }
    }

    pub async fn forward(
        &self,
        mut request: Request<ProxyBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<ProxyBody>, ForwardError> {
        let uri = rewrite_uri(&self.target, request.uri())?;
        debug!(from = %request.uri(), to = %uri, "Forwarding request");
        *request.uri_mut() = uri;

        prepare_request_headers(request.headers_mut(), client_addr);

        let pending = self.client.request(request);
        let response = match self.timeout {
            Some(limit) => time::timeout(limit, pending)
                .await
                .map_err(|_| ForwardError::Timeout(limit))??,
            None => pending.await?,
        };

        let (mut parts, body) = response.into_parts();
        remove_hop_headers(&mut parts.headers);
        Ok(Response::from_parts(
            parts,
            body.map_err(BoxError::from).boxed_unsync(),
        ))
    }
}

impl fmt::Debug for ReverseProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReverseProxy")
            .field("target", &self.target)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Points `incoming` at `target`, joining the paths with a single slash
/// and concatenating both queries.
pub(crate) fn rewrite_uri(target: &Uri, incoming: &Uri) -> Result<Uri, http::Error> {
    let path = join_paths(target.path(), incoming.path());

    let target_query = target.query().unwrap_or_default();
    let request_query = incoming.query().unwrap_or_default();
    let query = if target_query.is_empty() || request_query.is_empty() {
        format!("{}{}", target_query, request_query)
    } else {
        format!("{}&{}", target_query, request_query)
    };

    let path_and_query = if query.is_empty() {
        path
    } else {
        format!("{}?{}", path, query)
    };

    Uri::builder()
        .scheme(target.scheme_str().unwrap_or("http"))
        .authority(target.authority().map(|a| a.as_str()).unwrap_or_default())
        .path_and_query(path_and_query)
        .build()
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

fn remove_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Outbound request headers: hop-by-hop fields removed except `TE: trailers`,
/// client address appended to `X-Forwarded-For`.
fn prepare_request_headers(headers: &mut HeaderMap, client_addr: Option<SocketAddr>) {
    let keep_trailers = accepts_trailers(headers);
    remove_hop_headers(headers);
    if keep_trailers {
        headers.insert(TE, HeaderValue::from_static("trailers"));
    }
    if let Some(addr) = client_addr {
        append_forwarded_for(headers, addr.ip());
    }
}

fn accepts_trailers(headers: &HeaderMap) -> bool {
    headers
        .get_all(TE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| token.split(';').next())
        .any(|token| token.trim().eq_ignore_ascii_case("trailers"))
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), ip)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}
