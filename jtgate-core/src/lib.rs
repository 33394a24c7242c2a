//! # jtgate-core
//!
//! Message processing pipeline for jtgate.
//!
//! This crate provides:
//! - Per-message context and uniform stage results
//! - A priority-ordered processor chain with a configurable failure policy
//! - Per-stage and global statistics
//! - The terminal session registry and its state machine
//! - The built-in stages: performance monitor, validator, session handler
//!   and router

pub mod chain;
pub mod context;
pub mod error;
pub mod monitor;
pub mod processor;
pub mod result;
pub mod router;
pub mod session;
pub mod session_handler;
pub mod stats;
pub mod validator;

pub use chain::{ChainOutcome, FailurePolicy, ProcessorChain};
pub use context::ProcessContext;
pub use error::{CoreError, SessionError, StageError, ValidationError};
pub use monitor::{MonitorSnapshot, PerformanceMonitor};
pub use processor::Processor;
pub use result::{ProcessResult, ProcessStatus};
pub use router::{handler_fn, FnHandler, HandlerResult, MessageHandler, Router};
pub use session::{Session, SessionRegistry, SessionSnapshot, SessionState};
pub use session_handler::SessionHandler;
pub use stats::{Counters, GlobalSnapshot, GlobalStats, ProcessorStats, StatsSnapshot};
pub use validator::{ValidationRule, Validator};
