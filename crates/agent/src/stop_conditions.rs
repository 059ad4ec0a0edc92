// Stop-condition checkers for CommandRunner (§4.8). Each is polled on the
// supervisor's cadence and can preempt the running subprocess by returning
// an event + human-readable reason.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use testflinger_core::port::TimeProvider;

use crate::client::AgentClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    GlobalTimeout,
    OutputTimeout,
    Cancelled,
}

impl StopEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            StopEvent::GlobalTimeout => "global_timeout",
            StopEvent::OutputTimeout => "output_timeout",
            StopEvent::Cancelled => "cancelled",
        }
    }
}

#[async_trait]
pub trait StopConditionChecker: Send + Sync {
    /// Called on the runner's polling cadence. `Some((event, reason))`
    /// means the subprocess must be killed.
    async fn check(&self) -> Option<(StopEvent, String)>;

    /// Called whenever output is drained from the subprocess, so checkers
    /// tracking an idle timer can reset it.
    fn on_output(&self) {}
}

/// Fires once `now - start_time > timeout_seconds`. Registered for every
/// phase except `reserve` (§4.8).
pub struct GlobalTimeoutChecker {
    time_provider: Arc<dyn TimeProvider>,
    start_time: i64,
    timeout_ms: i64,
}

impl GlobalTimeoutChecker {
    pub fn new(time_provider: Arc<dyn TimeProvider>, timeout_seconds: i64) -> Self {
        let start_time = time_provider.now_millis();
        Self { time_provider, start_time, timeout_ms: timeout_seconds * 1000 }
    }
}

#[async_trait]
impl StopConditionChecker for GlobalTimeoutChecker {
    async fn check(&self) -> Option<(StopEvent, String)> {
        let elapsed = self.time_provider.now_millis() - self.start_time;
        if elapsed > self.timeout_ms {
            Some((StopEvent::GlobalTimeout, format!("global timeout exceeded after {}ms", elapsed)))
        } else {
            None
        }
    }
}

/// Fires when no output has been seen for `timeout_seconds`. Registered
/// only in the `test` phase (§4.8).
pub struct OutputTimeoutChecker {
    time_provider: Arc<dyn TimeProvider>,
    last_output_time: AtomicI64,
    timeout_ms: i64,
}

impl OutputTimeoutChecker {
    pub fn new(time_provider: Arc<dyn TimeProvider>, timeout_seconds: i64) -> Self {
        let now = time_provider.now_millis();
        Self {
            last_output_time: AtomicI64::new(now),
            time_provider,
            timeout_ms: timeout_seconds * 1000,
        }
    }
}

#[async_trait]
impl StopConditionChecker for OutputTimeoutChecker {
    async fn check(&self) -> Option<(StopEvent, String)> {
        let last = self.last_output_time.load(Ordering::SeqCst);
        let elapsed = self.time_provider.now_millis() - last;
        if elapsed > self.timeout_ms {
            Some((StopEvent::OutputTimeout, format!("no output for {}ms", elapsed)))
        } else {
            None
        }
    }

    fn on_output(&self) {
        self.last_output_time.store(self.time_provider.now_millis(), Ordering::SeqCst);
    }
}

/// Polls the server's job state; fires once it reports `cancelled`.
/// Registered in every phase except `provision` (provisioning must not be
/// interrupted, §4.8).
pub struct JobCancelledChecker {
    client: Arc<dyn AgentClient>,
    job_id: String,
}

impl JobCancelledChecker {
    pub fn new(client: Arc<dyn AgentClient>, job_id: impl Into<String>) -> Self {
        Self { client, job_id: job_id.into() }
    }
}

#[async_trait]
impl StopConditionChecker for JobCancelledChecker {
    async fn check(&self) -> Option<(StopEvent, String)> {
        match self.client.check_job_state(&self.job_id).await {
            Ok(state) if state == "cancelled" => {
                Some((StopEvent::Cancelled, "job cancelled by server".to_string()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64 as StdAtomicI64;

    struct FakeTime(StdAtomicI64);
    impl TimeProvider for FakeTime {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn global_timeout_fires_after_deadline() {
        let time = Arc::new(FakeTime(StdAtomicI64::new(0)));
        let checker = GlobalTimeoutChecker::new(time.clone(), 10);
        assert!(checker.check().await.is_none());
        time.0.store(11_000, Ordering::SeqCst);
        let (event, _) = checker.check().await.unwrap();
        assert_eq!(event, StopEvent::GlobalTimeout);
    }

    #[tokio::test]
    async fn output_timeout_resets_on_output() {
        let time = Arc::new(FakeTime(StdAtomicI64::new(0)));
        let checker = OutputTimeoutChecker::new(time.clone(), 5);
        time.0.store(4_000, Ordering::SeqCst);
        assert!(checker.check().await.is_none());
        checker.on_output();
        time.0.store(8_000, Ordering::SeqCst);
        assert!(checker.check().await.is_none());
        time.0.store(14_000, Ordering::SeqCst);
        assert!(checker.check().await.is_some());
    }
}
