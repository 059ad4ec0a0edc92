// AuthZ Domain Model
//
// Grounded directly in original_source/server/src/testflinger/api/auth.py:
// a totally ordered role hierarchy plus per-client priority/queue/reservation
// limits. Role comparison is the single gate used for both "may I act on this
// job" and "may I mutate this other client's permissions" decisions (§4.3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Wildcard key used in `max_priority`/`max_reservation_time` maps to express
/// "applies to every queue unless a more specific entry exists".
pub const WILDCARD_QUEUE: &str = "*";

/// Default cap on reservation length (6 hours), overridable per client.
pub const DEFAULT_MAX_RESERVATION_SECONDS: i64 = 6 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerRole {
    #[default]
    User,
    Contributor,
    Manager,
    Admin,
    Agent,
}

impl ServerRole {
    pub fn level(self) -> u8 {
        self as u8 + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServerRole::User => "user",
            ServerRole::Contributor => "contributor",
            ServerRole::Manager => "manager",
            ServerRole::Admin => "admin",
            ServerRole::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "user" => ServerRole::User,
            "contributor" => ServerRole::Contributor,
            "manager" => ServerRole::Manager,
            "admin" => ServerRole::Admin,
            "agent" => ServerRole::Agent,
            _ => return None,
        })
    }
}

/// `current_level >= target_level`, i.e. can `self` act on/as `target`.
pub fn role_hierarchy_satisfied(current: ServerRole, target: ServerRole) -> bool {
    current.level() >= target.level()
}

/// The one client id that can never be mutated or deleted via the API
/// (original_source: `TESTFLINGER_ADMIN_ID`).
pub const TESTFLINGER_ADMIN_ID: &str = "testflinger-admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientPermissions {
    pub client_id: String,
    /// bcrypt hash of the client secret; never serialized back to clients.
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub role: ServerRole,
    pub max_priority: HashMap<String, i32>,
    pub allowed_queues: Vec<String>,
    pub max_reservation_time: HashMap<String, i64>,
}

impl ClientPermissions {
    /// `max(max_priority["*"], max_priority[queue])`, per §4.2.
    pub fn max_priority_for(&self, queue: &str) -> i32 {
        let star = self.max_priority.get(WILDCARD_QUEUE).copied().unwrap_or(0);
        let specific = self.max_priority.get(queue).copied().unwrap_or(0);
        star.max(specific)
    }

    pub fn max_reservation_for(&self, queue: &str) -> i64 {
        let star = self
            .max_reservation_time
            .get(WILDCARD_QUEUE)
            .copied()
            .unwrap_or(DEFAULT_MAX_RESERVATION_SECONDS);
        let specific = self.max_reservation_time.get(queue).copied();
        specific.unwrap_or(star).max(star)
    }

    pub fn may_use_queue(&self, queue: &str) -> bool {
        self.allowed_queues.iter().any(|q| q == queue)
    }

    pub fn is_protected(&self) -> bool {
        self.client_id == TESTFLINGER_ADMIN_ID
    }
}

/// Opaque refresh token record (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub client_id: String,
    pub issued_at: i64,
    /// `None` means non-expiring (admin/manager clients may receive these).
    pub expires_at: Option<i64>,
    pub revoked: bool,
    pub last_accessed: i64,
}

impl RefreshToken {
    pub fn is_valid(&self, now_millis: i64) -> bool {
        if self.revoked {
            return false;
        }
        match self.expires_at {
            Some(exp) => now_millis < exp,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_order_is_total_and_matches_original_levels() {
        assert_eq!(ServerRole::User.level(), 1);
        assert_eq!(ServerRole::Contributor.level(), 2);
        assert_eq!(ServerRole::Manager.level(), 3);
        assert_eq!(ServerRole::Admin.level(), 4);
        assert_eq!(ServerRole::Agent.level(), 5);
        assert!(role_hierarchy_satisfied(ServerRole::Admin, ServerRole::Manager));
        assert!(!role_hierarchy_satisfied(ServerRole::Manager, ServerRole::Admin));
        assert!(role_hierarchy_satisfied(ServerRole::Manager, ServerRole::Manager));
    }

    #[test]
    fn max_priority_takes_the_higher_of_wildcard_and_specific() {
        let mut perms = sample_perms();
        perms.max_priority.insert("*".into(), 50);
        perms.max_priority.insert("rpi4".into(), 100);
        assert_eq!(perms.max_priority_for("rpi4"), 100);
        assert_eq!(perms.max_priority_for("other"), 50);
    }

    #[test]
    fn admin_id_is_protected() {
        let mut perms = sample_perms();
        perms.client_id = TESTFLINGER_ADMIN_ID.to_string();
        assert!(perms.is_protected());
    }

    fn sample_perms() -> ClientPermissions {
        ClientPermissions {
            client_id: "c1".into(),
            secret_hash: "hash".into(),
            role: ServerRole::User,
            max_priority: HashMap::new(),
            allowed_queues: vec![],
            max_reservation_time: HashMap::new(),
        }
    }
}
