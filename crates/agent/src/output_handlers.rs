// CommandRunner output handler fan-out (§4.8): every chunk drained from a
// phase subprocess's stdout+stderr is pushed through all of these.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use testflinger_core::domain::{LogFragment, LogType};
use testflinger_core::port::TimeProvider;
use tokio::io::AsyncWriteExt;

use crate::client::AgentClient;

#[async_trait]
pub trait OutputHandler: Send + Sync {
    async fn on_output(&self, text: &str);
}

/// Appends raw phase output to `<phase>.log` under the run directory.
pub struct FileAppender {
    path: PathBuf,
}

impl FileAppender {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl OutputHandler for FileAppender {
    async fn on_output(&self, text: &str) {
        let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await;
        if let Ok(mut file) = file {
            let _ = file.write_all(text.as_bytes()).await;
        } else {
            tracing::warn!(path = %self.path.display(), "failed to open phase log for append");
        }
    }
}

/// Streams phase output to the server's live log endpoint as it arrives.
/// `fragment_number` is strictly monotonic per (job, log_type, phase) (§4.8,
/// §5 ordering guarantee).
pub struct LivePoster {
    client: Arc<dyn AgentClient>,
    clock: Arc<dyn TimeProvider>,
    job_id: String,
    log_type: LogType,
    phase: String,
    next_fragment: AtomicI64,
}

impl LivePoster {
    pub fn new(client: Arc<dyn AgentClient>, clock: Arc<dyn TimeProvider>, job_id: impl Into<String>, log_type: LogType, phase: impl Into<String>) -> Self {
        Self {
            client,
            clock,
            job_id: job_id.into(),
            log_type,
            phase: phase.into(),
            next_fragment: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl OutputHandler for LivePoster {
    async fn on_output(&self, text: &str) {
        let fragment_number = self.next_fragment.fetch_add(1, Ordering::SeqCst);
        let fragment = LogFragment {
            job_id: self.job_id.clone(),
            log_type: self.log_type,
            phase: self.phase.clone(),
            fragment_number,
            timestamp: self.clock.now_millis(),
            log_data: text.to_string(),
        };
        // Log/event-webhook errors are logged and swallowed; they never
        // abort a job (§7 Propagation policy).
        if let Err(err) = self.client.post_log(&self.job_id, self.log_type, &fragment).await {
            tracing::warn!(error = %err, job_id = %self.job_id, phase = %self.phase, "failed to post live log fragment");
        }
    }
}
