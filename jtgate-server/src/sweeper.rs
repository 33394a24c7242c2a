//! Idle session sweeper.

use crate::config::SessionConfig;
use crate::metrics::Metrics;
use jtgate_core::SessionRegistry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Periodically removes sessions idle longer than the registry timeout.
pub struct SessionSweeper {
    sessions: Arc<SessionRegistry>,
    interval: Duration,
    metrics: Option<Arc<Metrics>>,
    swept_total: AtomicU64,
    runs: AtomicU64,
    shutdown: AtomicBool,
    notify: Notify,
}

impl SessionSweeper {
    pub fn new(sessions: Arc<SessionRegistry>, config: &SessionConfig) -> Self {
        Self::with_interval(sessions, config.sweep_interval())
    }

    pub fn with_interval(sessions: Arc<SessionRegistry>, interval: Duration) -> Self {
        Self {
            sessions,
            interval,
            metrics: None,
            swept_total: AtomicU64::new(0),
            runs: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs one sweep, returning how many sessions were removed.
    pub fn sweep(&self) -> usize {
        let expired = self.sessions.sweep_expired();
        self.runs.fetch_add(1, Ordering::Relaxed);
        if expired.is_empty() {
            return 0;
        }

        for session in &expired {
            tracing::info!(
                "Session {} expired after {}s idle ({} messages)",
                session.terminal_id,
                session.idle_secs,
                session.message_count
            );
        }
        self.swept_total
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        if let Some(ref metrics) = self.metrics {
            metrics.sessions_expired_total.inc_by(expired.len() as f64);
            metrics.observe_sessions(&self.sessions);
        }
        expired.len()
    }

    /// Runs the sweep loop (call from a background task).
    pub async fn run(&self) {
        tracing::info!(
            "Session sweeper started (interval={:?}, timeout={:?})",
            self.interval,
            self.sessions.timeout()
        );

        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let removed = self.sweep();
            tracing::debug!(
                "Sweep removed {} sessions, {} remain",
                removed,
                self.sessions.len()
            );
        }

        tracing::info!("Session sweeper stopped");
    }

    /// Signals the sweep loop to exit.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    pub fn stats(&self) -> SweeperStats {
        SweeperStats {
            runs: self.runs.load(Ordering::Relaxed),
            swept_total: self.swept_total.load(Ordering::Relaxed),
        }
    }
}

/// Sweeper statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperStats {
    pub runs: u64,
    pub swept_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use jtgate_protocol::msg_id;

    #[test]
    fn test_sweep_removes_idle_sessions() {
        let sessions = Arc::new(SessionRegistry::new(Duration::ZERO));
        sessions.touch("13800138000", msg_id::REGISTRATION).unwrap();
        sessions.touch("13800138001", msg_id::REGISTRATION).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let metrics = Arc::new(Metrics::new().unwrap());
        let sweeper = SessionSweeper::with_interval(sessions.clone(), Duration::from_secs(60))
            .with_metrics(metrics.clone());
        assert_eq!(sweeper.sweep(), 2);
        assert!(sessions.is_empty());
        assert_eq!(sweeper.stats(), SweeperStats { runs: 1, swept_total: 2 });
        assert_eq!(metrics.sessions_expired_total.get(), 2.0);
    }

    #[test]
    fn test_sweep_keeps_active_sessions() {
        let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(3600)));
        sessions.touch("13800138000", msg_id::REGISTRATION).unwrap();

        let sweeper = SessionSweeper::with_interval(sessions.clone(), Duration::from_secs(60));
        assert_eq!(sweeper.sweep(), 0);
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_run_loop_sweeps_and_stops() {
        let sessions = Arc::new(SessionRegistry::new(Duration::ZERO));
        sessions.touch("13800138000", msg_id::REGISTRATION).unwrap();

        let sweeper = Arc::new(SessionSweeper::with_interval(
            sessions.clone(),
            Duration::from_millis(10),
        ));
        let task = tokio::spawn({
            let sweeper = sweeper.clone();
            async move { sweeper.run().await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !sessions.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        sweeper.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(sweeper.stats().runs >= 1);
    }
}
