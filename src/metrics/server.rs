//! Operations endpoint
//!
//! A side listener, separate from the gateway port, serving:
//!
//! * `GET /metrics` - Prometheus text exposition
//! * `GET /health` - process liveness
//! * `GET /ready` - 200 once the token verifier holds provider keys, 503 before
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vmgate::auth::TokenVerifier;
//! use vmgate::metrics::server::{MetricsServer, MetricsServerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = Arc::new(TokenVerifier::unready());
//! let mut server = MetricsServer::new(MetricsServerConfig {
//!     address: "127.0.0.1:9090".to_string(),
//! })
//! .with_readiness(verifier);
//!
//! let addr = server.start().await?;
//! println!("Operations endpoint on {}", addr);
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::auth::TokenVerifier;
use crate::config::MetricsConfig;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Listen address, e.g. "0.0.0.0:9090"
    pub address: String,
}

impl From<&MetricsConfig> for MetricsServerConfig {
    fn from(config: &MetricsConfig) -> Self {
        Self {
            address: format!("0.0.0.0:{}", config.port),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Running side listener; dropped handles keep serving until `shutdown`
pub struct MetricsServer {
    config: MetricsServerConfig,
    verifier: Option<Arc<TokenVerifier>>,
    running: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig) -> Self {
        Self {
            config,
            verifier: None,
            running: None,
        }
    }

    /// Report `verifier` readiness on `/ready`. Without it `/ready` mirrors `/health`.
    #[must_use]
    pub fn with_readiness(mut self, verifier: Arc<TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Bind and serve in the background; returns the bound address
    pub async fn start(&mut self) -> Result<SocketAddr, MetricsServerError> {
        let listener = TcpListener::bind(&self.config.address).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, self.verifier.clone(), shutdown_rx));
        self.running = Some((shutdown_tx, handle));

        info!("Operations endpoint listening on {}", addr);
        Ok(addr)
    }

    pub async fn shutdown(&mut self) {
        if let Some((shutdown_tx, handle)) = self.running.take() {
            let _ = shutdown_tx.send(());
            let _ = handle.await;
        }
    }
}

async fn serve(
    listener: TcpListener,
    verifier: Option<Arc<TokenVerifier>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        let stream = tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Operations endpoint shutting down");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!("Operations endpoint failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let verifier = verifier.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let ready = verifier.as_ref().map_or(true, |v| v.is_ready());
                async move { Ok::<_, Infallible>(route(&req, ready)) }
            });
            let _ = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await;
        });
    }
}

fn route(req: &Request<hyper::body::Incoming>, ready: bool) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => render_metrics(),
        (&Method::GET, "/health") => {
            respond(StatusCode::OK, "application/json", r#"{"status":"ok"}"#)
        }
        (&Method::GET, "/ready") if ready => {
            respond(StatusCode::OK, "application/json", r#"{"ready":true}"#)
        }
        (&Method::GET, "/ready") => respond(
            StatusCode::SERVICE_UNAVAILABLE,
            "application/json",
            r#"{"ready":false}"#,
        ),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}

fn render_metrics() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            "Failed to encode metrics",
        );
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
