// Agent Domain Model
//
// Tracks the last-known state of a remote agent process as reported by its
// own status posts (`POST /agents/data/{name}`), plus the rolling log ring
// and provision pass/fail streak original_source tracks per agent.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Max lines kept in an agent's rolling log ring (original_source: `$slice: -100`).
pub const AGENT_LOG_RING_CAPACITY: usize = 100;
/// Max entries kept in an agent's provision log ring.
pub const PROVISION_LOG_RING_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Waiting,
    Setup,
    Provision,
    FirmwareUpdate,
    Test,
    Allocate,
    Allocated,
    Reserve,
    Cleanup,
    Offline,
    Maintenance,
    Restart,
    Unknown,
}

impl AgentState {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Waiting => "waiting",
            AgentState::Setup => "setup",
            AgentState::Provision => "provision",
            AgentState::FirmwareUpdate => "firmware_update",
            AgentState::Test => "test",
            AgentState::Allocate => "allocate",
            AgentState::Allocated => "allocated",
            AgentState::Reserve => "reserve",
            AgentState::Cleanup => "cleanup",
            AgentState::Offline => "offline",
            AgentState::Maintenance => "maintenance",
            AgentState::Restart => "restart",
            AgentState::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "waiting" => AgentState::Waiting,
            "setup" => AgentState::Setup,
            "provision" => AgentState::Provision,
            "firmware_update" => AgentState::FirmwareUpdate,
            "test" => AgentState::Test,
            "allocate" => AgentState::Allocate,
            "allocated" => AgentState::Allocated,
            "reserve" => AgentState::Reserve,
            "cleanup" => AgentState::Cleanup,
            "offline" => AgentState::Offline,
            "maintenance" => AgentState::Maintenance,
            "restart" => AgentState::Restart,
            _ => AgentState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakType {
    Pass,
    Fail,
}

/// One entry in an agent's provision log ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionLogEntry {
    pub job_id: Option<String>,
    pub exit_code: i32,
    pub detail: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: String,
    pub state: AgentState,
    pub queues: Vec<String>,
    pub location: Option<String>,
    pub job_id: Option<String>,
    pub last_updated: i64,
    pub log: VecDeque<String>,
    pub provision_log: VecDeque<ProvisionLogEntry>,
    pub provision_streak_type: Option<StreakType>,
    pub provision_streak_count: i64,
}

impl AgentRecord {
    pub fn new(name: impl Into<String>, now_millis: i64) -> Self {
        Self {
            name: name.into(),
            state: AgentState::Unknown,
            queues: Vec::new(),
            location: None,
            job_id: None,
            last_updated: now_millis,
            log: VecDeque::new(),
            provision_log: VecDeque::new(),
            provision_streak_type: None,
            provision_streak_count: 0,
        }
    }

    /// Append a log line, trimming to the ring capacity (original_source's
    /// `$push` + `$slice: -100`).
    pub fn push_log_line(&mut self, line: String) {
        self.log.push_back(line);
        while self.log.len() > AGENT_LOG_RING_CAPACITY {
            self.log.pop_front();
        }
    }

    /// Record a provision attempt and update the pass/fail streak.
    /// A run of consecutive passes resets a fail streak and vice versa;
    /// the counter increments only while the streak type holds.
    pub fn record_provision(&mut self, entry: ProvisionLogEntry) {
        let outcome = if entry.exit_code == 0 {
            StreakType::Pass
        } else {
            StreakType::Fail
        };
        match self.provision_streak_type {
            Some(t) if t as u8 == outcome as u8 => self.provision_streak_count += 1,
            _ => {
                self.provision_streak_type = Some(outcome);
                self.provision_streak_count = 1;
            }
        }
        self.provision_log.push_back(entry);
        while self.provision_log.len() > PROVISION_LOG_RING_CAPACITY {
            self.provision_log.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_ring_trims_to_capacity() {
        let mut agent = AgentRecord::new("a1", 0);
        for i in 0..150 {
            agent.push_log_line(format!("line {i}"));
        }
        assert_eq!(agent.log.len(), AGENT_LOG_RING_CAPACITY);
        assert_eq!(agent.log.front().unwrap(), "line 50");
    }

    #[test]
    fn provision_streak_tracks_consecutive_outcomes() {
        let mut agent = AgentRecord::new("a1", 0);
        for _ in 0..3 {
            agent.record_provision(ProvisionLogEntry {
                job_id: None,
                exit_code: 0,
                detail: "ok".into(),
                timestamp: 0,
            });
        }
        assert_eq!(agent.provision_streak_type, Some(StreakType::Pass));
        assert_eq!(agent.provision_streak_count, 3);

        agent.record_provision(ProvisionLogEntry {
            job_id: None,
            exit_code: 1,
            detail: "fail".into(),
            timestamp: 0,
        });
        assert_eq!(agent.provision_streak_type, Some(StreakType::Fail));
        assert_eq!(agent.provision_streak_count, 1);
    }
}
