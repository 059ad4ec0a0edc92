// Log fragment domain model (§3, §4.5)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Output,
    Serial,
}

impl LogType {
    pub fn as_str(self) -> &'static str {
        match self {
            LogType::Output => "output",
            LogType::Serial => "serial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "output" => Some(LogType::Output),
            "serial" => Some(LogType::Serial),
            _ => None,
        }
    }
}

/// A single appended chunk of phase output. `fragment_number` is strictly
/// monotonic per (job_id, log_type, phase) and is the sole ordering key;
/// arrival order is irrelevant (§4.5, §8 "fragment assembly" property).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFragment {
    pub job_id: String,
    pub log_type: LogType,
    pub phase: String,
    pub fragment_number: i64,
    pub timestamp: i64,
    pub log_data: String,
}

/// Assembled view of one phase's log, built by concatenating fragments in
/// `fragment_number` order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssembledPhaseLog {
    pub last_fragment_number: i64,
    pub log_data: String,
}

/// Reconstruct per-phase logs from an arbitrarily ordered fragment list.
pub fn assemble(mut fragments: Vec<LogFragment>) -> BTreeMap<String, AssembledPhaseLog> {
    fragments.sort_by_key(|f| f.fragment_number);
    let mut out: BTreeMap<String, AssembledPhaseLog> = BTreeMap::new();
    for frag in fragments {
        let entry = out.entry(frag.phase.clone()).or_default();
        entry.log_data.push_str(&frag.log_data);
        entry.last_fragment_number = entry.last_fragment_number.max(frag.fragment_number);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembly_is_insensitive_to_arrival_order() {
        let make = |n: i64, data: &str| LogFragment {
            job_id: "j".into(),
            log_type: LogType::Output,
            phase: "test".into(),
            fragment_number: n,
            timestamp: n,
            log_data: data.into(),
        };
        let in_order = assemble(vec![make(1, "a"), make(2, "b"), make(3, "c")]);
        let shuffled = assemble(vec![make(3, "c"), make(1, "a"), make(2, "b")]);
        assert_eq!(in_order["test"].log_data, "abc");
        assert_eq!(shuffled["test"].log_data, "abc");
        assert_eq!(shuffled["test"].last_fragment_number, 3);
    }
}
