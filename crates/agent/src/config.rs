// Agent configuration (§6: "Agent configuration (YAML, keys recognized)").
//
// Loaded the way the workspace's other config consumers are meant to: a
// single YAML file resolved via `directories` (XDG-style default location)
// or an explicit `--config` path, parsed through the `config` crate's
// layered builder so environment variables can override individual keys
// for container deployments.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use testflinger_core::domain::JobState;

fn default_polling_interval() -> u64 {
    10
}

fn default_global_timeout() -> i64 {
    4 * 60 * 60
}

fn default_output_timeout() -> i64 {
    15 * 60
}

fn default_output_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_logging_level() -> String {
    "info".to_string()
}

/// Top-level agent configuration, one YAML document per agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,

    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,

    #[serde(default = "default_server_address")]
    pub server_address: String,

    #[serde(default = "default_execution_basedir")]
    pub execution_basedir: PathBuf,

    #[serde(default = "default_logging_basedir")]
    pub logging_basedir: PathBuf,

    #[serde(default = "default_results_basedir")]
    pub results_basedir: PathBuf,

    #[serde(default = "default_logging_level")]
    pub logging_level: String,

    #[serde(default)]
    pub logging_quiet: bool,

    #[serde(default)]
    pub job_queues: Vec<String>,

    #[serde(default = "default_global_timeout")]
    pub global_timeout: i64,

    #[serde(default = "default_output_timeout")]
    pub output_timeout: i64,

    #[serde(default = "default_output_bytes")]
    pub output_bytes: usize,

    /// `<phase>_command`, one per phase including cleanup. Any phase absent
    /// here is skipped with exit code 0 (§4.7 phase skip rules).
    #[serde(default)]
    pub setup_command: Option<String>,
    #[serde(default)]
    pub provision_command: Option<String>,
    #[serde(default)]
    pub firmware_update_command: Option<String>,
    #[serde(default)]
    pub test_command: Option<String>,
    #[serde(default)]
    pub allocate_command: Option<String>,
    #[serde(default)]
    pub reserve_command: Option<String>,
    #[serde(default)]
    pub cleanup_command: Option<String>,

    /// Any unrecognized YAML key, exported verbatim into every phase
    /// command's environment so per-device substitutions keep working.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_server_address() -> String {
    "http://localhost:8000".to_string()
}

fn default_execution_basedir() -> PathBuf {
    PathBuf::from("/tmp/testflinger/run")
}

fn default_logging_basedir() -> PathBuf {
    PathBuf::from("/tmp/testflinger/logs")
}

fn default_results_basedir() -> PathBuf {
    PathBuf::from("/tmp/testflinger/results")
}

impl AgentConfig {
    /// The configured shell command for `phase`, if any (§4.7 phase skip rules).
    pub fn command_for_phase(&self, phase: JobState) -> Option<&str> {
        match phase {
            JobState::Setup => self.setup_command.as_deref(),
            JobState::Provision => self.provision_command.as_deref(),
            JobState::FirmwareUpdate => self.firmware_update_command.as_deref(),
            JobState::Test => self.test_command.as_deref(),
            JobState::Allocate => self.allocate_command.as_deref(),
            JobState::Reserve => self.reserve_command.as_deref(),
            JobState::Cleanup => self.cleanup_command.as_deref(),
            _ => None,
        }
    }

    /// Load from an explicit path, or fall back to the XDG config dir
    /// (`<config>/testflinger-agent/config.yaml`) when `path` is `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let resolved = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        let settings = config::Config::builder()
            .add_source(config::File::from(resolved.as_path()))
            .add_source(config::Environment::with_prefix("TESTFLINGER_AGENT").separator("__"))
            .build()?;

        let cfg: AgentConfig = settings.try_deserialize()?;
        Ok(cfg)
    }

    /// Every string-valued config key, flattened for export into a phase
    /// command's environment (§6 agent environment variables).
    pub fn env_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("TESTFLINGER_AGENT_ID".to_string(), self.agent_id.clone());
        vars.insert("TESTFLINGER_SERVER".to_string(), self.server_address.clone());
        for (k, v) in &self.extra {
            if let Some(s) = v.as_str() {
                vars.insert(k.to_uppercase(), s.to_string());
            }
        }
        vars
    }
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    let dirs = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("could not determine home directory for default config path"))?;
    Ok(dirs.config_dir().join("testflinger-agent").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_fills_in_defaults() {
        let file = write_config("agent_id: device-01\n");
        let cfg = AgentConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.agent_id, "device-01");
        assert_eq!(cfg.polling_interval, 10);
        assert_eq!(cfg.global_timeout, 4 * 60 * 60);
        assert!(cfg.job_queues.is_empty());
    }

    #[test]
    fn phase_commands_parse_and_are_looked_up_by_state() {
        let file = write_config(
            "agent_id: device-01\ntest_command: \"echo hi\"\nprovision_command: \"bash provision.sh\"\n",
        );
        let cfg = AgentConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.command_for_phase(JobState::Test), Some("echo hi"));
        assert_eq!(cfg.command_for_phase(JobState::Provision), Some("bash provision.sh"));
        assert_eq!(cfg.command_for_phase(JobState::Allocate), None);
    }

    #[test]
    fn unknown_keys_are_exported_as_env_vars() {
        let file = write_config("agent_id: device-01\ndevice_ip: \"10.0.0.5\"\n");
        let cfg = AgentConfig::load(Some(file.path())).unwrap();
        let env = cfg.env_vars();
        assert_eq!(env.get("DEVICE_IP").map(String::as_str), Some("10.0.0.5"));
    }
}
