//! TCP gateway implementation.

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::metrics::Metrics;
use jtgate_protocol::codec::DEFAULT_MAX_FRAME_LEN;
use jtgate_protocol::subpackage::{DEFAULT_MAX_BUFFERED, DEFAULT_MAX_PENDING};
use jtgate_protocol::{
    BodyRegistry, Decoder, Encoder, Message, ProtocolError, Reassembler, StreamDecoder,
    DEFAULT_PORT, MAX_BODY_LEN,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest partial frame a connection may buffer.
    pub max_frame_bytes: usize,
    /// How long subpackage pieces wait for the rest of their message.
    pub subpackage_timeout: Duration,
    /// Incomplete subpackaged messages held per connection.
    pub max_pending_subpackages: usize,
    /// Body bytes held per connection for incomplete subpackaged messages.
    pub max_subpackage_bytes: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_connections", &self.max_connections)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("subpackage_timeout", &self.subpackage_timeout)
            .field("max_pending_subpackages", &self.max_pending_subpackages)
            .field("max_subpackage_bytes", &self.max_subpackage_bytes)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout: Duration::from_secs(300),
            max_connections: 10_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_LEN,
            subpackage_timeout: Duration::from_secs(60),
            max_pending_subpackages: DEFAULT_MAX_PENDING,
            max_subpackage_bytes: DEFAULT_MAX_BUFFERED,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Takes the network and pipeline settings from a loaded config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            idle_timeout: config.network.idle_timeout(),
            max_connections: config.network.max_connections,
            max_frame_bytes: config.network.max_frame_bytes,
            subpackage_timeout: config.pipeline.subpackage_timeout(),
            max_pending_subpackages: config.network.max_pending_subpackages,
            max_subpackage_bytes: config.network.max_subpackage_bytes,
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    /// Wire frames split off the stream, including subpackage pieces and
    /// frames later dropped.
    pub frames_total: AtomicU64,
    /// Complete messages run through the chain.
    pub messages_total: AtomicU64,
    pub decode_errors_total: AtomicU64,
    pub responses_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// State shared by every connection task.
struct Shared {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    encoder: Encoder,
    decoder: Decoder,
    stats: Arc<ServerStats>,
}

/// Per-connection framing and reply state.
struct Connection {
    addr: SocketAddr,
    framer: StreamDecoder,
    reassembler: Reassembler,
    next_serial: u16,
}

/// TCP gateway for JT/T 808 terminals.
pub struct Server {
    shared: Arc<Shared>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>, registry: Arc<BodyRegistry>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                config,
                dispatcher,
                encoder: Encoder::new(registry.clone()),
                decoder: Decoder::new(registry),
                stats: Arc::new(ServerStats::default()),
            }),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.shared.config.bind_addr).await?;
        self.run_with_listener(listener).await
    }

    /// Runs the accept loop on an already bound listener.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();
        let shared = &self.shared;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if shared.stats.connections_active.load(Ordering::Relaxed)
                                >= shared.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                shared.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                if let Some(ref metrics) = shared.config.metrics {
                                    metrics.connections_rejected_total.inc();
                                }
                                continue;
                            }

                            shared.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            shared.stats.connections_active.fetch_add(1, Ordering::Relaxed);
                            if let Some(ref metrics) = shared.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let shared = shared.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                match Self::handle_connection(stream, addr, &shared, &mut conn_shutdown).await {
                                    Ok(()) | Err(ServerError::ShuttingDown) => {}
                                    Err(e) => {
                                        tracing::debug!("Connection {} error: {}", addr, e);
                                        shared.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                    }
                                }

                                shared.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                if let Some(ref metrics) = shared.config.metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!("Terminal disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Handles a single terminal connection.
    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        shared: &Shared,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!("Terminal connected: {}", addr);

        let mut conn = Connection {
            addr,
            framer: StreamDecoder::with_max_frame_len(shared.config.max_frame_bytes),
            reassembler: Reassembler::with_limits(
                shared.config.subpackage_timeout,
                shared.config.max_pending_subpackages,
                shared.config.max_subpackage_bytes,
            ),
            next_serial: 0,
        };
        let mut buf = [0u8; 4096];

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by terminal", addr);
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::trace!("[{}] Received {} bytes", addr, n);
                            conn.framer.extend(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }

                _ = tokio::time::sleep(shared.config.idle_timeout) => {
                    tracing::debug!("[{}] Idle timeout", addr);
                    return Ok(());
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }

            let evicted = conn.reassembler.evict_expired();
            if evicted > 0 {
                tracing::warn!("[{}] Dropped {} incomplete subpackaged messages", addr, evicted);
            }

            loop {
                let raw = match conn.framer.next_frame() {
                    Ok(Some(raw)) => raw,
                    Ok(None) => break,
                    Err(e) => {
                        shared.record_decode_error(addr, &e);
                        continue;
                    }
                };
                shared.stats.frames_total.fetch_add(1, Ordering::Relaxed);
                if let Some(ref metrics) = shared.config.metrics {
                    metrics.frames_total.inc();
                }

                let message = match shared.decode(&mut conn, &raw) {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(e) => {
                        shared.record_decode_error(addr, &e);
                        continue;
                    }
                };

                shared.stats.messages_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "[{}] {} from {} (serial={})",
                    addr,
                    jtgate_protocol::msg_id::name(message.message_id()),
                    message.header.terminal_id,
                    message.serial_number()
                );

                let outcome = shared.dispatcher.process(message).await;
                if let Some(response) = outcome.response {
                    shared.send(&mut stream, &mut conn, response).await?;
                }
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns a sender that triggers shutdown when sent to.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.shared.stats
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }
}

impl Shared {
    /// Decodes one raw frame, holding subpackage pieces until complete.
    fn decode(&self, conn: &mut Connection, raw: &[u8]) -> Result<Option<Message>, ProtocolError> {
        let frame = self.decoder.decode_frame(raw)?;
        match conn.reassembler.push(frame)? {
            Some(frame) => self.decoder.resolve(frame).map(Some),
            None => Ok(None),
        }
    }

    fn record_decode_error(&self, addr: SocketAddr, error: &ProtocolError) {
        tracing::warn!("[{}] Dropped frame: {}", addr, error);
        self.stats.decode_errors_total.fetch_add(1, Ordering::Relaxed);
        if let Some(ref metrics) = self.config.metrics {
            metrics
                .decode_errors_total
                .with_label_values(&[error.code()])
                .inc();
        }
    }

    /// Writes a reply, assigning it the connection's next outbound serials.
    async fn send(
        &self,
        stream: &mut TcpStream,
        conn: &mut Connection,
        mut response: Message,
    ) -> Result<(), ServerError> {
        response.header.serial_number = conn.next_serial;
        let frames = match self.encoder.encode_split(&response, MAX_BODY_LEN) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(
                    "[{}] Failed to encode reply {:#06x}: {}",
                    conn.addr,
                    response.message_id(),
                    e
                );
                self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        };
        conn.next_serial = conn.next_serial.wrapping_add(frames.len() as u16);

        for frame in &frames {
            tracing::trace!("[{}] Writing {} bytes", conn.addr, frame.len());
            stream.write_all(frame).await?;
        }
        self.stats.responses_total.fetch_add(1, Ordering::Relaxed);
        if let Some(ref metrics) = self.config.metrics {
            metrics.responses_total.inc();
        }
        Ok(())
    }
}
