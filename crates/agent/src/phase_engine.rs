// AgentPhaseEngine (§4.7): the single-threaded cooperative loop that drives
// one job through the fixed phase sequence, then returns to polling.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use testflinger_core::domain::{JobSpec, JobState, LogType, PHASE_SEQUENCE};
use testflinger_core::port::TimeProvider;
use tracing::{info, warn};

use crate::attachments::{extract_attachments, strip_attachment_manifests};
use crate::client::{AgentClient, JobAssignment};
use crate::command_runner::CommandRunner;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::output_handlers::{FileAppender, LivePoster, OutputHandler};
use crate::status_handler::{PendingAction, StatusHandler};
use crate::stop_conditions::{GlobalTimeoutChecker, JobCancelledChecker, OutputTimeoutChecker, StopConditionChecker, StopEvent};

/// Recovery-failed sentinel exit code (§4.7 step f).
const RECOVERY_FAIL_CODE: i32 = 46;
const MAX_GLOBAL_TIMEOUT_SECONDS: i64 = 14_400;
const MAX_OUTPUT_TIMEOUT_SECONDS: i64 = 900;
const DEVICE_INFO_POLL_INTERVAL: Duration = Duration::from_secs(60);
const SERVER_RECONNECT_INTERVAL: Duration = Duration::from_secs(30);
const SERVER_RECONNECT_MAX: Duration = Duration::from_secs(180);

pub struct PhaseEngine {
    config: AgentConfig,
    client: Arc<dyn AgentClient>,
    clock: Arc<dyn TimeProvider>,
    status: StatusHandler,
    terminate: Arc<AtomicBool>,
    /// Flipped by the process's SIGUSR1 handler; consumed (and cleared) on
    /// the next tick (§4.9, §5).
    restart_signal: Arc<AtomicBool>,
}

impl PhaseEngine {
    pub fn new(
        config: AgentConfig,
        client: Arc<dyn AgentClient>,
        clock: Arc<dyn TimeProvider>,
        terminate: Arc<AtomicBool>,
        restart_signal: Arc<AtomicBool>,
    ) -> Self {
        Self { config, client, clock, status: StatusHandler::new(), terminate, restart_signal }
    }

    pub async fn run_forever(&mut self) -> ! {
        loop {
            self.tick().await;
        }
    }

    /// One iteration of the cooperative loop (§4.7 steps 1-8).
    async fn tick(&mut self) {
        if self.restart_signal.swap(false, Ordering::SeqCst) {
            self.status.signal_restart();
        }
        self.retransmit_preserved_rundirs().await;
        self.refresh_offline_restart_state().await;

        if let Some(action) = self.status.pending_action() {
            self.apply_pending_action(action).await;
            return;
        }

        let queues = self.queues_to_poll().await;
        if queues.is_empty() {
            tokio::time::sleep(Duration::from_secs(self.config.polling_interval)).await;
            return;
        }

        let assignment = match self.client.check_jobs(&queues).await {
            Ok(Some(a)) => a,
            Ok(None) => {
                tokio::time::sleep(Duration::from_secs(self.config.polling_interval)).await;
                return;
            }
            Err(err) => {
                warn!(error = %err, "job poll failed");
                tokio::time::sleep(Duration::from_secs(self.config.polling_interval)).await;
                return;
            }
        };

        self.run_job(assignment).await;
    }

    /// §4.7 step 1: retry transmitting any rundirs preserved by a prior
    /// failed outcome upload, before polling for new work.
    async fn retransmit_preserved_rundirs(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.config.results_basedir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match self.client.transmit_job_outcome(&path).await {
                Ok(()) => info!(rundir = %path.display(), "retransmitted preserved outcome"),
                Err(err) => warn!(rundir = %path.display(), error = %err, "preserved outcome still cannot be transmitted"),
            }
        }
    }

    /// §4.7 step 2: merge locally accumulated signals (SIGUSR1) with
    /// whatever the server's agent record currently reports.
    async fn refresh_offline_restart_state(&mut self) {
        let Ok(data) = self.client.get_agent_data(&self.config.agent_id).await else {
            return;
        };
        let restart = data.get("restart").and_then(Value::as_bool).unwrap_or(false);
        let offline = data.get("offline").and_then(Value::as_bool).unwrap_or(false);
        let comment = data.get("comment").and_then(Value::as_str).unwrap_or("").to_string();
        if restart || offline || !comment.is_empty() {
            self.status.update(comment, restart, offline);
        }
    }

    /// §4.7 step 3: act on a pending offline/restart request when no job is
    /// running. Restart exits the process for the surrounding supervisor
    /// (systemd/init) to relaunch; offline just idles without polling.
    async fn apply_pending_action(&mut self, action: PendingAction) {
        match action {
            PendingAction::Offline => {
                warn!(comment = %self.status.comment(), "agent offline, not polling for work");
                tokio::time::sleep(Duration::from_secs(self.config.polling_interval)).await;
            }
            PendingAction::Restart => {
                info!(comment = %self.status.comment(), "agent restarting");
                self.status.clear_restart();
                std::process::exit(0);
            }
        }
    }

    /// Queue filtering (§4.6): an agent normally requests its full
    /// configured queue list, but defers to the server's restricted-queue
    /// view when that view names a subset the agent itself owns.
    async fn queues_to_poll(&self) -> Vec<String> {
        let Ok(data) = self.client.get_agent_data(&self.config.agent_id).await else {
            return self.config.job_queues.clone();
        };
        let restricted: Vec<String> = data
            .get("restricted_queues")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        if restricted.is_empty() {
            return self.config.job_queues.clone();
        }
        self.config.job_queues.iter().filter(|q| restricted.contains(q)).cloned().collect()
    }

    async fn run_job(&mut self, assignment: JobAssignment) {
        let job_id = assignment.job_id.clone();
        let mut spec = assignment.spec;
        let rundir = self.config.execution_basedir.join(&job_id);
        let _ = tokio::fs::create_dir_all(&rundir).await;

        if let Err(err) = self.fetch_and_unpack_attachments(&job_id, &spec, &rundir).await {
            warn!(job_id = %job_id, error = %err, "attachment fetch/unpack failed");
        }
        strip_attachment_manifests(&mut spec);
        if let Ok(raw) = serde_json::to_vec_pretty(&spec) {
            let _ = tokio::fs::write(rundir.join("testflinger.json"), raw).await;
        }

        let webhook = spec.job_status_webhook.clone();
        let mut status = serde_json::Map::new();

        for &phase in PHASE_SEQUENCE {
            if self.job_cancelled(&job_id).await {
                self.emit(&webhook, "cancelled", json!({"job_id": job_id})).await;
                break;
            }

            self.refresh_offline_restart_state().await;

            if phase_should_skip(phase, &spec, &self.config) {
                status.insert(format!("{}_status", phase.as_str()), json!(0));
                continue;
            }

            let _ = self.client.post_job_state(&job_id, phase.as_str()).await;
            self.emit(&webhook, &format!("{}_start", phase.as_str()), json!({"job_id": job_id})).await;

            let started = self.clock.now_millis();
            let (code, event, reason) = self.run_phase(phase, &job_id, &spec, &rundir).await;
            let duration_ms = self.clock.now_millis() - started;

            status.insert(format!("{}_status", phase.as_str()), json!(code));
            if let Some(event) = event {
                status.insert(format!("{}_event", phase.as_str()), json!(event.as_str()));
            }
            let outcome_event = if code == 0 { "success" } else { "fail" };
            self.emit(
                &webhook,
                &format!("{}_{}", phase.as_str(), outcome_event),
                json!({"job_id": job_id, "exit_code": code, "reason": reason, "duration_ms": duration_ms}),
            )
            .await;

            if phase == JobState::Provision {
                let _ = self.client.post_provision_log(&self.config.agent_id, Some(job_id.as_str()), code, &reason).await;
            }

            if code == RECOVERY_FAIL_CODE {
                self.status.update(format!("recovery failed during {}: {reason}", phase.as_str()), false, true);
                self.emit(&webhook, "recovery_fail", json!({"job_id": job_id, "phase": phase.as_str()})).await;
                break;
            }

            if code != 0 && phase != JobState::Test {
                break;
            }

            if phase == JobState::Allocate && code == 0 {
                self.handle_allocate_phase(&job_id, &spec, &rundir).await;
            }
        }

        self.run_cleanup(&job_id, &spec, &rundir, &webhook, &mut status).await;
        self.emit(&webhook, "job_end", json!({"job_id": job_id})).await;

        if let Err(err) = self.finish_job(&job_id, &rundir, &status).await {
            warn!(job_id = %job_id, error = %err, "outcome upload failed, preserving rundir for retry");
            self.preserve_rundir(&rundir).await;
        }

        self.client.wait_for_server_connectivity(SERVER_RECONNECT_INTERVAL, SERVER_RECONNECT_MAX).await;
        let _ = self.client.post_agent_data(&self.config.agent_id, json!({"job_id": ""})).await;
    }

    async fn fetch_and_unpack_attachments(&self, job_id: &str, spec: &JobSpec, rundir: &Path) -> Result<()> {
        if spec.secret_paths().is_empty() && !has_attachments(spec) {
            return Ok(());
        }
        if let Some(archive) = self.client.get_attachments(job_id, rundir).await? {
            extract_attachments(&archive, rundir)?;
            tokio::fs::remove_file(&archive).await.ok();
        }
        Ok(())
    }

    async fn job_cancelled(&self, job_id: &str) -> bool {
        matches!(self.client.check_job_state(job_id).await, Ok(state) if state == "cancelled")
    }

    async fn run_phase(&self, phase: JobState, job_id: &str, spec: &JobSpec, rundir: &Path) -> (i32, Option<StopEvent>, String) {
        let Some(command) = self.config.command_for_phase(phase) else {
            return (0, None, String::new());
        };

        let env = self.phase_env(phase, job_id, spec);
        let log_path = rundir.join(format!("{}.log", phase.as_str()));

        let mut handlers: Vec<Arc<dyn OutputHandler>> = vec![Arc::new(FileAppender::new(log_path))];
        handlers.push(Arc::new(LivePoster::new(self.client.clone(), self.clock.clone(), job_id, LogType::Output, phase.as_str())));

        let mut checkers: Vec<Arc<dyn StopConditionChecker>> = Vec::new();
        if phase != JobState::Reserve {
            checkers.push(Arc::new(GlobalTimeoutChecker::new(self.clock.clone(), effective_global_timeout(spec, &self.config))));
        }
        if phase == JobState::Test {
            checkers.push(Arc::new(OutputTimeoutChecker::new(self.clock.clone(), effective_output_timeout(spec, &self.config))));
        }
        if phase != JobState::Provision {
            checkers.push(Arc::new(JobCancelledChecker::new(self.client.clone(), job_id)));
        }

        let runner = CommandRunner::new(Duration::from_secs(self.config.polling_interval), self.terminate.clone());
        match runner.run(command, &env, rundir, &handlers, &checkers).await {
            Ok(result) => result,
            Err(err) => (100, None, format!("{err}")),
        }
    }

    /// §4.7 step 5h / the allocate special-case: device-info.json is posted
    /// to the result endpoint (retried every 60s), then the job blocks in
    /// `wait_for_completion` until a terminal state is reached.
    async fn handle_allocate_phase(&self, job_id: &str, spec: &JobSpec, rundir: &Path) {
        let device_info_path = rundir.join("device-info.json");
        let device_info = match tokio::fs::read(&device_info_path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or(Value::Null),
            Err(_) => return,
        };

        loop {
            match self.client.post_result(job_id, device_info.clone()).await {
                Ok(()) => break,
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "device-info post failed, retrying");
                    tokio::time::sleep(DEVICE_INFO_POLL_INTERVAL).await;
                }
            }
        }

        let _ = self.client.post_job_state(job_id, "allocated").await;

        let parent_id = spec.parent_job_id.clone();
        loop {
            let job_terminal = self.is_terminal(job_id).await;
            let parent_terminal = match &parent_id {
                Some(pid) => self.is_terminal(pid).await,
                None => false,
            };
            if job_terminal || parent_terminal {
                break;
            }
            tokio::time::sleep(DEVICE_INFO_POLL_INTERVAL).await;
        }
    }

    async fn is_terminal(&self, job_id: &str) -> bool {
        matches!(self.client.check_job_state(job_id).await.as_deref(), Ok("cancelled") | Ok("complete"))
    }

    async fn run_cleanup(&self, job_id: &str, spec: &JobSpec, rundir: &Path, webhook: &Option<String>, status: &mut serde_json::Map<String, Value>) {
        self.emit(webhook, "cleanup_start", json!({"job_id": job_id})).await;
        let (code, _event, reason) = self.run_phase(JobState::Cleanup, job_id, spec, rundir).await;
        status.insert("cleanup_status".to_string(), json!(code));
        let outcome = if code == 0 { "cleanup_success" } else { "cleanup_fail" };
        self.emit(webhook, outcome, json!({"job_id": job_id, "exit_code": code, "reason": reason})).await;
    }

    async fn finish_job(&self, job_id: &str, rundir: &Path, status: &serde_json::Map<String, Value>) -> Result<()> {
        let mut outcome = Value::Object(status.clone());
        if let Value::Object(ref mut map) = outcome {
            map.insert("job_id".into(), json!(job_id));
        }
        tokio::fs::write(rundir.join("testflinger-outcome.json"), serde_json::to_vec_pretty(&outcome)?).await?;
        self.client.transmit_job_outcome(rundir).await
    }

    async fn preserve_rundir(&self, rundir: &Path) {
        let Some(name) = rundir.file_name() else { return };
        let dest = self.config.results_basedir.join(name);
        let _ = tokio::fs::create_dir_all(&self.config.results_basedir).await;
        let _ = tokio::fs::rename(rundir, &dest).await;
    }

    fn phase_env(&self, phase: JobState, job_id: &str, _spec: &JobSpec) -> HashMap<String, String> {
        let mut env = self.config.env_vars();
        env.insert("TESTFLINGER_JOB_ID".to_string(), job_id.to_string());
        env.insert("TESTFLINGER_PHASE".to_string(), phase.as_str().to_string());
        env
    }

    async fn emit(&self, webhook: &Option<String>, event_name: &str, detail: Value) {
        let Some(url) = webhook else { return };
        let payload = json!({"event_name": event_name, "timestamp": self.clock.now_millis(), "detail": detail});
        if let Err(err) = self.client.post_status_update(url, &payload).await {
            warn!(error = %err, event = %event_name, "status webhook post failed");
        }
    }
}

fn has_attachments(spec: &JobSpec) -> bool {
    [&spec.provision_data, &spec.firmware_update_data, &spec.test_data]
        .into_iter()
        .filter_map(|d| d.as_ref())
        .any(|v| v.get("attachments").is_some())
}

/// §4.7 phase skip rules: no configured command always skips. For the five
/// data-bearing phases, an absent data block or an explicit `skip: true`
/// also skips.
fn phase_should_skip(phase: JobState, spec: &JobSpec, config: &AgentConfig) -> bool {
    if config.command_for_phase(phase).is_none() {
        return true;
    }
    let data = match phase {
        JobState::Provision => &spec.provision_data,
        JobState::FirmwareUpdate => &spec.firmware_update_data,
        JobState::Test => &spec.test_data,
        JobState::Allocate => &spec.allocate_data,
        JobState::Reserve => &spec.reserve_data,
        _ => return false,
    };
    match data {
        None => true,
        Some(value) => value.get("skip").and_then(Value::as_bool).unwrap_or(false),
    }
}

/// `min(job.global_timeout, config.global_timeout, 14400)` (§4.8).
fn effective_global_timeout(spec: &JobSpec, config: &AgentConfig) -> i64 {
    let mut value = config.global_timeout.min(MAX_GLOBAL_TIMEOUT_SECONDS);
    if let Some(job_value) = spec.global_timeout {
        value = value.min(job_value);
    }
    value
}

/// `min(job.output_timeout, config.output_timeout, 900)` (§4.8).
fn effective_output_timeout(spec: &JobSpec, config: &AgentConfig) -> i64 {
    let mut value = config.output_timeout.min(MAX_OUTPUT_TIMEOUT_SECONDS);
    if let Some(job_value) = spec.output_timeout {
        value = value.min(job_value);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn base_spec() -> JobSpec {
        JobSpec {
            job_queue: "q".into(),
            job_priority: 0,
            tags: vec![],
            global_timeout: None,
            output_timeout: None,
            job_status_webhook: None,
            parent_job_id: None,
            provision_data: None,
            firmware_update_data: None,
            test_data: Some(json!({"test_cmds": "echo hi"})),
            allocate_data: None,
            reserve_data: None,
            extra: Map::new(),
        }
    }

    fn base_config() -> AgentConfig {
        serde_json::from_value(json!({
            "agent_id": "agent-01",
            "test_command": "echo hi",
            "provision_command": "bash provision.sh",
        }))
        .unwrap()
    }

    #[test]
    fn phase_with_no_command_is_skipped() {
        let spec = base_spec();
        let config = base_config();
        assert!(phase_should_skip(JobState::FirmwareUpdate, &spec, &config));
    }

    #[test]
    fn phase_with_absent_data_block_is_skipped() {
        let spec = base_spec();
        let config = base_config();
        assert!(phase_should_skip(JobState::Provision, &spec, &config));
    }

    #[test]
    fn phase_with_skip_flag_is_skipped() {
        let mut spec = base_spec();
        spec.test_data = Some(json!({"test_cmds": "echo hi", "skip": true}));
        let config = base_config();
        assert!(phase_should_skip(JobState::Test, &spec, &config));
    }

    #[test]
    fn configured_phase_with_data_runs() {
        let spec = base_spec();
        let config = base_config();
        assert!(!phase_should_skip(JobState::Test, &spec, &config));
    }

    #[test]
    fn global_timeout_is_capped_at_the_hard_ceiling() {
        let mut spec = base_spec();
        spec.global_timeout = Some(100_000);
        let config = base_config();
        assert_eq!(effective_global_timeout(&spec, &config), MAX_GLOBAL_TIMEOUT_SECONDS);
    }

    #[test]
    fn global_timeout_prefers_the_tighter_of_job_and_config() {
        let mut spec = base_spec();
        spec.global_timeout = Some(60);
        let config = base_config();
        assert_eq!(effective_global_timeout(&spec, &config), 60);
    }
}
