//! # jtgate-server
//!
//! TCP gateway for jtgate.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - Stream re-framing, subpackage reassembly and message dispatch
//! - The standard processing chain with default platform replies
//! - Idle session sweeping
//! - Prometheus metrics and operator HTTP endpoints
//! - YAML and environment configuration

pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod server;
pub mod sweeper;

pub use config::{Config, ConfigError, MetricsConfig, NetworkConfig, PipelineConfig, SessionConfig};
pub use dispatch::{DispatchStats, Dispatcher, StageStats};
pub use error::ServerError;
pub use metrics::Metrics;
pub use server::{Server, ServerConfig, ServerStats};
pub use sweeper::{SessionSweeper, SweeperStats};
