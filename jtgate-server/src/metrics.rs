//! Prometheus metrics and operator HTTP endpoints.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server exposing `/metrics`, `/health`, `/sessions` and `/stats`,
//!   plus `DELETE /sessions/{terminal_id}` to disconnect a terminal

use crate::dispatch::Dispatcher;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use jtgate_core::{ChainOutcome, SessionRegistry, SessionState};
use jtgate_protocol::msg_id;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Chain duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0,
];

const SESSION_STATES: [SessionState; 4] = [
    SessionState::Initial,
    SessionState::Registering,
    SessionState::Authenticating,
    SessionState::Authenticated,
];

/// Prometheus metrics for the gateway.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently active connections.
    pub connections_active: Gauge,
    /// Connections refused because the cap was reached.
    pub connections_rejected_total: Counter,
    /// Wire frames split off terminal streams.
    pub frames_total: Counter,
    /// Complete messages run through the chain, by message name.
    pub messages_total: CounterVec,
    /// Dropped frames by protocol error code.
    pub decode_errors_total: CounterVec,
    /// Frames written back to terminals.
    pub responses_total: Counter,
    /// Whole-chain duration by message name.
    pub chain_duration: HistogramVec,
    /// Stage results by stage and status.
    pub stage_results_total: CounterVec,
    /// Live sessions by state.
    pub sessions_active: GaugeVec,
    /// Sessions removed by the idle sweep.
    pub sessions_expired_total: Counter,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total = Counter::with_opts(Opts::new(
            "jtgate_connections_total",
            "Total number of terminal connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "jtgate_connections_active",
            "Number of currently open terminal connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        let connections_rejected_total = Counter::with_opts(Opts::new(
            "jtgate_connections_rejected_total",
            "Connections refused at the connection cap",
        ))?;
        registry.register(Box::new(connections_rejected_total.clone()))?;

        let frames_total = Counter::with_opts(Opts::new(
            "jtgate_frames_total",
            "Wire frames received, including subpackage pieces and dropped frames",
        ))?;
        registry.register(Box::new(frames_total.clone()))?;

        let messages_total = CounterVec::new(
            Opts::new("jtgate_messages_total", "Messages processed by the chain"),
            &["message"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let decode_errors_total = CounterVec::new(
            Opts::new(
                "jtgate_decode_errors_total",
                "Frames dropped by protocol error code",
            ),
            &["code"],
        )?;
        registry.register(Box::new(decode_errors_total.clone()))?;

        let responses_total = Counter::with_opts(Opts::new(
            "jtgate_responses_total",
            "Frames written back to terminals",
        ))?;
        registry.register(Box::new(responses_total.clone()))?;

        let chain_duration = HistogramVec::new(
            HistogramOpts::new(
                "jtgate_chain_duration_seconds",
                "Processing chain duration in seconds by message",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["message"],
        )?;
        registry.register(Box::new(chain_duration.clone()))?;

        let stage_results_total = CounterVec::new(
            Opts::new(
                "jtgate_stage_results_total",
                "Stage results by stage and status",
            ),
            &["stage", "status"],
        )?;
        registry.register(Box::new(stage_results_total.clone()))?;

        let sessions_active = GaugeVec::new(
            Opts::new("jtgate_sessions_active", "Live terminal sessions by state"),
            &["state"],
        )?;
        registry.register(Box::new(sessions_active.clone()))?;

        let sessions_expired_total = Counter::with_opts(Opts::new(
            "jtgate_sessions_expired_total",
            "Sessions removed by the idle sweep",
        ))?;
        registry.register(Box::new(sessions_expired_total.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            connections_rejected_total,
            frames_total,
            messages_total,
            decode_errors_total,
            responses_total,
            chain_duration,
            stage_results_total,
            sessions_active,
            sessions_expired_total,
        })
    }

    /// Records a finished chain run.
    pub fn observe_outcome(&self, outcome: &ChainOutcome) {
        let message = msg_id::name(outcome.message_id);
        self.messages_total.with_label_values(&[message]).inc();
        self.chain_duration
            .with_label_values(&[message])
            .observe(outcome.duration.as_secs_f64());
        for result in &outcome.results {
            self.stage_results_total
                .with_label_values(&[result.stage.as_str(), result.status.as_str()])
                .inc();
        }
    }

    /// Refreshes the per-state session gauges.
    pub fn observe_sessions(&self, sessions: &SessionRegistry) {
        for state in SESSION_STATES {
            self.sessions_active
                .with_label_values(&[state.as_str()])
                .set(sessions.count_in(state) as f64);
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the operator HTTP server.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    dispatcher: Arc<Dispatcher>,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, metrics, dispatcher, shutdown).await
}

/// Serves operator requests on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    metrics: Arc<Metrics>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing::info!(
        "Metrics server listening on http://{}/metrics",
        listener.local_addr()?
    );

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let dispatcher = dispatcher.clone();
                                async move { handle_request(req, metrics, dispatcher).await }
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

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    dispatcher: Arc<Dispatcher>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    if req.method() == Method::DELETE {
        let removed = req
            .uri()
            .path()
            .strip_prefix("/sessions/")
            .and_then(|terminal_id| dispatcher.sessions().remove(terminal_id));
        return match removed {
            Some(snapshot) => {
                tracing::info!("Session {} removed by operator", snapshot.terminal_id);
                json(&snapshot)
            }
            None => text(StatusCode::NOT_FOUND, "Not Found"),
        };
    }

    match req.uri().path() {
        "/metrics" => {
            metrics.observe_sessions(dispatcher.sessions());
            match metrics.encode() {
                Ok(body) => Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                    .body(Full::new(Bytes::from(body))),
                Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
        "/health" | "/healthz" => text(StatusCode::OK, "OK"),
        "/sessions" => json(&dispatcher.sessions().snapshot()),
        "/stats" => json(&dispatcher.stats()),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn text(
    status: StatusCode,
    body: impl Into<Bytes>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
}

fn json<T: serde::Serialize>(value: &T) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body))),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use jtgate_core::ProcessResult;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.connections_total.inc();
        metrics.connections_active.inc();
        metrics
            .decode_errors_total
            .with_label_values(&["CHECKSUM_MISMATCH"])
            .inc();

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("jtgate_connections_total 1"));
        assert!(encoded.contains("jtgate_connections_active 1"));
        assert!(encoded.contains("jtgate_decode_errors_total{code=\"CHECKSUM_MISMATCH\"} 1"));
    }

    #[test]
    fn test_observe_outcome() {
        let metrics = Metrics::new().unwrap();
        let outcome = ChainOutcome {
            context_id: 1,
            message_id: msg_id::HEARTBEAT,
            terminal_id: Some("13800138000".into()),
            results: vec![
                ProcessResult::success("validator"),
                ProcessResult::failed("session_handler", "not registered"),
            ],
            response: None,
            attributes: Default::default(),
            completed: false,
            duration: Duration::from_micros(250),
        };
        metrics.observe_outcome(&outcome);

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("jtgate_messages_total{message=\"HEARTBEAT\"} 1"));
        assert!(encoded.contains(
            "jtgate_stage_results_total{stage=\"session_handler\",status=\"FAILED\"} 1"
        ));
        assert!(encoded.contains("jtgate_chain_duration_seconds_count{message=\"HEARTBEAT\"} 1"));
    }

    #[test]
    fn test_observe_sessions() {
        let metrics = Metrics::new().unwrap();
        let sessions = SessionRegistry::new(Duration::from_secs(60));
        sessions.touch("13800138000", msg_id::REGISTRATION).unwrap();
        sessions.touch("13800138001", msg_id::REGISTRATION).unwrap();
        metrics.observe_sessions(&sessions);

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("jtgate_sessions_active{state=\"REGISTERING\"} 2"));
        assert!(encoded.contains("jtgate_sessions_active{state=\"AUTHENTICATED\"} 0"));
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        request(addr, "GET", path).await
    }

    async fn request(addr: SocketAddr, method: &str, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            method, path
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_operator_endpoints() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let dispatcher = Arc::new(
            Dispatcher::new(&PipelineConfig::default(), sessions.clone())
                .unwrap()
                .with_metrics(metrics.clone()),
        );
        sessions.touch("13800138000", msg_id::REGISTRATION).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(serve(listener, metrics, dispatcher, shutdown_rx));

        let health = get(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.ends_with("OK"));

        let sessions = get(addr, "/sessions").await;
        assert!(sessions.contains("\"terminal_id\":\"13800138000\""));
        assert!(sessions.contains("\"REGISTERING\""));

        let stats = get(addr, "/stats").await;
        assert!(stats.contains("\"stages\""));

        let body = get(addr, "/metrics").await;
        assert!(body.contains("jtgate_sessions_active{state=\"REGISTERING\"} 1"));

        assert!(get(addr, "/nope").await.starts_with("HTTP/1.1 404"));

        let removed = request(addr, "DELETE", "/sessions/13800138000").await;
        assert!(removed.starts_with("HTTP/1.1 200"));
        assert!(removed.contains("\"DISCONNECTED\""));
        assert!(request(addr, "DELETE", "/sessions/13800138000")
            .await
            .starts_with("HTTP/1.1 404"));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
