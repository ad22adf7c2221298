use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use tokio::net::TcpListener;

// Stand-in backend for trying the balancer locally:
//   cargo run --bin echo_server -- 8081
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(8081);

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    println!("Echo server listening on port {}", port);

    loop {
        let (socket, _) = listener.accept().await?;
        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| async move {
                let body = format!(
                    "Backend {} says: {} {}\n",
                    port,
                    request.method(),
                    request.uri()
                );
                Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(socket), service)
                .await
            {
                eprintln!("Error handling client: {}", e);
            }
        });
    }
}
