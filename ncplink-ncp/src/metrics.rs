//! Prometheus metrics for the co-processor.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Request duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1];

/// Prometheus metrics for the co-processor.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Frames received by kind.
    pub frames_received_total: CounterVec,
    /// Frames sent by kind.
    pub frames_sent_total: CounterVec,
    /// Requests by command.
    pub requests_total: CounterVec,
    /// Failed dispatches by status.
    pub dispatch_errors_total: CounterVec,
    /// Frames discarded by the decoder.
    pub malformed_frames_total: Counter,
    /// Handler duration by command.
    pub request_duration: HistogramVec,
    /// 1 while a host link is being served.
    pub link_connected: Gauge,
    /// Inbound bytes dropped on overflow.
    pub bus_dropped_bytes_total: Counter,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let frames_received_total = CounterVec::new(
            Opts::new("ncplink_frames_received_total", "Frames received by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(frames_received_total.clone()))?;

        let frames_sent_total = CounterVec::new(
            Opts::new("ncplink_frames_sent_total", "Frames sent by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(frames_sent_total.clone()))?;

        let requests_total = CounterVec::new(
            Opts::new("ncplink_requests_total", "Total requests by command"),
            &["command"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let dispatch_errors_total = CounterVec::new(
            Opts::new(
                "ncplink_dispatch_errors_total",
                "Requests answered with an error response, by status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(dispatch_errors_total.clone()))?;

        let malformed_frames_total = Counter::with_opts(Opts::new(
            "ncplink_malformed_frames_total",
            "Inbound frames discarded as malformed",
        ))?;
        registry.register(Box::new(malformed_frames_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "ncplink_request_duration_seconds",
                "Handler duration in seconds by command",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["command"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let link_connected = Gauge::with_opts(Opts::new(
            "ncplink_link_connected",
            "Whether a host link is currently served",
        ))?;
        registry.register(Box::new(link_connected.clone()))?;

        let bus_dropped_bytes_total = Counter::with_opts(Opts::new(
            "ncplink_bus_dropped_bytes_total",
            "Inbound bytes dropped because the receive queue was full",
        ))?;
        registry.register(Box::new(bus_dropped_bytes_total.clone()))?;

        Ok(Self {
            registry,
            frames_received_total,
            frames_sent_total,
            requests_total,
            dispatch_errors_total,
            malformed_frames_total,
            request_duration,
            link_connected,
            bus_dropped_bytes_total,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => match metrics.encode() {
            Ok(body) => {
                let mut response = respond(StatusCode::OK, body);
                response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static(
                        "text/plain; version=0.0.4; charset=utf-8",
                    ),
                );
                response
            }
            Err(e) => {
                tracing::warn!("Failed to encode metrics: {}", e);
                respond(StatusCode::INTERNAL_SERVER_ERROR, "encode failed")
            }
        },
        "/health" | "/healthz" => respond(StatusCode::OK, "OK"),
        _ => respond(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}
