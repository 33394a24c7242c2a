//! Message dispatch through the standard processing chain.

use crate::config::PipelineConfig;
use crate::metrics::Metrics;
use jtgate_core::{
    ChainOutcome, CoreError, GlobalSnapshot, HandlerResult, MonitorSnapshot, PerformanceMonitor,
    ProcessorChain, Router, SessionHandler, SessionRegistry, StageError, StatsSnapshot, Validator,
};
use jtgate_protocol::{msg_id, GeneralResponse, Header, Message, RegistrationResponse};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Runs decoded messages through monitor, validator, session and router
/// stages and reports each finished chain to the monitor.
pub struct Dispatcher {
    chain: ProcessorChain,
    monitor: Arc<PerformanceMonitor>,
    validator: Arc<Validator>,
    router: Arc<Router>,
    sessions: Arc<SessionRegistry>,
    metrics: Option<Arc<Metrics>>,
}

/// Statistics served on the operator `/stats` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub chain: GlobalSnapshot,
    pub stages: Vec<StageStats>,
    pub monitor: MonitorSnapshot,
    pub sessions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageStats {
    pub name: String,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

impl Dispatcher {
    /// Builds the standard chain with the default platform replies installed.
    pub fn new(pipeline: &PipelineConfig, sessions: Arc<SessionRegistry>) -> Result<Self, CoreError> {
        let monitor = Arc::new(PerformanceMonitor::new());
        let validator = Arc::new(Validator::new(pipeline.strict_validation));
        let router = Arc::new(Router::new());
        install_default_handlers(&router, sessions.clone());

        let chain = ProcessorChain::with_policy(pipeline.failure_policy())
            .with_stage(monitor.clone())?
            .with_stage(validator.clone())?
            .with_stage(Arc::new(SessionHandler::new(sessions.clone())))?
            .with_stage(router.clone())?;

        tracing::debug!("Processing chain: {}", chain.stage_names().join(" -> "));

        Ok(Self {
            chain,
            monitor,
            validator,
            router,
            sessions,
            metrics: None,
        })
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs one message through the chain.
    pub async fn process(&self, message: Message) -> ChainOutcome {
        let outcome = self.chain.process(message).await;
        self.monitor.complete(&outcome);
        if let Some(ref metrics) = self.metrics {
            metrics.observe_outcome(&outcome);
        }

        if let Some(failure) = outcome.first_failure() {
            tracing::debug!(
                "Message {} from {} stopped at '{}'",
                msg_id::name(outcome.message_id),
                outcome.terminal_id.as_deref().unwrap_or("-"),
                failure.stage
            );
        }
        outcome
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// The validator stage, for adding rules at startup.
    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    /// The router stage, for replacing or adding handlers at startup.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn chain(&self) -> &ProcessorChain {
        &self.chain
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            chain: self.chain.global_snapshot(),
            stages: self
                .chain
                .stage_snapshots()
                .into_iter()
                .map(|(name, stats)| StageStats { name, stats })
                .collect(),
            monitor: self.monitor.snapshot(),
            sessions: self.sessions.len(),
        }
    }
}

/// Builds a platform reply header addressed to the sender of `request`.
///
/// The serial number is left at zero; the connection assigns one on write.
pub fn reply_header(request: &Message, message_id: u16) -> Header {
    let header = Header::new(message_id, request.header.terminal_id.clone(), 0);
    match request.header.protocol_version {
        Some(version) => header.with_version(version),
        None => header,
    }
}

/// Builds a platform general response to `request`.
pub fn general_response(request: &Message, result: u8) -> Message {
    Message::new(
        reply_header(request, msg_id::PLATFORM_GENERAL_RESPONSE),
        GeneralResponse::new(request.serial_number(), request.message_id(), result),
    )
}

/// Hands out registration auth codes.
#[derive(Debug)]
struct AuthCodes {
    next: AtomicU64,
}

impl AuthCodes {
    fn new() -> Self {
        let seed = chrono::Utc::now().timestamp_millis().unsigned_abs();
        Self {
            next: AtomicU64::new(seed),
        }
    }

    fn issue(&self) -> String {
        format!("{:012X}", self.next.fetch_add(1, Ordering::Relaxed) & 0xFFFF_FFFF_FFFF)
    }
}

async fn acknowledge(message: Message) -> HandlerResult {
    Ok(Some(general_response(&message, GeneralResponse::SUCCESS)))
}

fn install_default_handlers(router: &Router, sessions: Arc<SessionRegistry>) {
    let codes = Arc::new(AuthCodes::new());
    router.register_fn(msg_id::REGISTRATION, move |message: Message| {
        let code = codes.issue();
        async move {
            tracing::info!("Terminal {} registered", message.header.terminal_id);
            let body = RegistrationResponse::accepted(message.serial_number(), code);
            let reply = Message::new(reply_header(&message, msg_id::REGISTRATION_RESPONSE), body);
            Ok::<_, StageError>(Some(reply))
        }
    });

    for id in [
        msg_id::AUTHENTICATION,
        msg_id::HEARTBEAT,
        msg_id::LOCATION_REPORT,
        msg_id::BATCH_LOCATION,
    ] {
        router.register_fn(id, acknowledge);
    }

    router.register_fn(msg_id::TERMINAL_LOGOUT, move |message: Message| {
        let sessions = sessions.clone();
        async move {
            if let Some(terminal_id) = message.terminal_id() {
                if sessions.remove(terminal_id).is_some() {
                    tracing::info!("Terminal {} logged out", terminal_id);
                }
            }
            Ok::<_, StageError>(Some(general_response(&message, GeneralResponse::SUCCESS)))
        }
    });
}
