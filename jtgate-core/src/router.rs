//! Message routing stage.

use crate::context::ProcessContext;
use crate::error::StageError;
use crate::processor::Processor;
use crate::result::ProcessResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use jtgate_protocol::{msg_id, Message};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Result returned by message handlers.
pub type HandlerResult = Result<Option<Message>, StageError>;

/// Business logic for one message id.
///
/// Returns an optional reply for the terminal.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: Message) -> BoxFuture<'static, HandlerResult>;
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    handler: F,
}

impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, message: Message) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(message))
    }
}

/// Wraps an async closure as a handler.
pub fn handler_fn<F, Fut>(handler: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler { handler }
}

/// Dispatches messages to handlers keyed by message id.
///
/// Messages without a handler are skipped.
#[derive(Default)]
pub struct Router {
    handlers: RwLock<HashMap<u16, Arc<dyn MessageHandler>>>,
}

impl Router {
    pub const NAME: &'static str = "router";
    pub const PRIORITY: i32 = 100;

    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for the id.
    pub fn register<H>(&self, message_id: u16, handler: H)
    where
        H: MessageHandler + 'static,
    {
        if self
            .handlers
            .write()
            .insert(message_id, Arc::new(handler))
            .is_some()
        {
            tracing::debug!("Replaced handler for {}", msg_id::name(message_id));
        }
    }

    /// Registers an async closure as the handler for a message id.
    pub fn register_fn<F, Fut>(&self, message_id: u16, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(message_id, handler_fn(handler));
    }

    pub fn unregister(&self, message_id: u16) -> bool {
        self.handlers.write().remove(&message_id).is_some()
    }

    pub fn has_handler(&self, message_id: u16) -> bool {
        self.handlers.read().contains_key(&message_id)
    }

    /// Routed message ids in ascending order.
    pub fn message_ids(&self) -> Vec<u16> {
        let mut ids: Vec<_> = self.handlers.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("message_ids", &self.message_ids())
            .finish()
    }
}

#[async_trait]
impl Processor for Router {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn process(&self, ctx: &mut ProcessContext) -> Result<ProcessResult, StageError> {
        let message_id = ctx.message().message_id();
        let handler = self.handlers.read().get(&message_id).cloned();
        let Some(handler) = handler else {
            return Ok(ProcessResult::skipped(
                Self::NAME,
                format!("no handler for {}", msg_id::name(message_id)),
            ));
        };

        match handler.handle(ctx.message().clone()).await {
            Ok(Some(response)) => {
                ctx.set_response(response.clone());
                Ok(ProcessResult::success(Self::NAME).with_response(response))
            }
            Ok(None) => Ok(ProcessResult::success(Self::NAME)),
            Err(e) => {
                tracing::warn!("Handler for {} failed: {}", msg_id::name(message_id), e);
                Ok(ProcessResult::failed(Self::NAME, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ProcessStatus;
    use jtgate_protocol::{EmptyBody, GeneralResponse, Header};

    fn no_reply() -> HandlerResult {
        Ok(None)
    }

    fn context(message_id: u16) -> ProcessContext {
        ProcessContext::new(1, Message::new(Header::new(message_id, "13800138000", 9), EmptyBody))
    }

    #[tokio::test]
    async fn test_no_handler_skips() {
        let router = Router::new();
        let mut ctx = context(msg_id::HEARTBEAT);
        let result = router.process(&mut ctx).await.unwrap();
        assert_eq!(result.status, ProcessStatus::Skipped);
    }

    #[tokio::test]
    async fn test_handler_response_lands_in_context() {
        let router = Router::new();
        router.register_fn(msg_id::HEARTBEAT, |message: Message| async move {
            let reply = GeneralResponse::new(message.serial_number(), message.message_id(), GeneralResponse::SUCCESS);
            let header = Header::new(msg_id::PLATFORM_GENERAL_RESPONSE, message.header.terminal_id.clone(), 0);
            Ok::<_, StageError>(Some(Message::new(header, reply)))
        });
        assert!(router.has_handler(msg_id::HEARTBEAT));

        let mut ctx = context(msg_id::HEARTBEAT);
        let result = router.process(&mut ctx).await.unwrap();
        assert!(result.is_success());
        assert!(result.response.is_some());

        let response = ctx.response().unwrap();
        assert_eq!(response.message_id(), msg_id::PLATFORM_GENERAL_RESPONSE);
        assert_eq!(response.body_as::<GeneralResponse>().unwrap().reply_serial, 9);
    }

    #[tokio::test]
    async fn test_handler_without_reply() {
        let router = Router::new();
        router.register_fn(msg_id::TERMINAL_GENERAL_RESPONSE, |_| async { no_reply() });
        let mut ctx = context(msg_id::TERMINAL_GENERAL_RESPONSE);
        assert!(router.process(&mut ctx).await.unwrap().is_success());
        assert!(ctx.response().is_none());
    }

    #[tokio::test]
    async fn test_handler_error_fails() {
        let router = Router::new();
        router.register_fn(msg_id::LOCATION_REPORT, |_| async {
            Err::<Option<Message>, _>(StageError::Handler("store rejected location".into()))
        });

        let mut ctx = context(msg_id::LOCATION_REPORT);
        let result = router.process(&mut ctx).await.unwrap();
        assert_eq!(result.status, ProcessStatus::Failed);
        assert!(result.error.unwrap().contains("store rejected location"));
    }

    #[test]
    fn test_register_and_unregister() {
        let router = Router::new();
        router.register_fn(0x0200, |_| async { no_reply() });
        router.register_fn(0x0002, |_| async { no_reply() });
        assert_eq!(router.message_ids(), vec![0x0002, 0x0200]);

        assert!(router.unregister(0x0200));
        assert!(!router.unregister(0x0200));
        assert!(!router.has_handler(0x0200));
    }
}
