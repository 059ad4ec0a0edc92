// Purely local agent status tracking (§4.9). Accumulates offline/restart
// requests across a phase and across ticks; the engine only acts on them at
// a phase boundary.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Offline,
    Restart,
}

#[derive(Debug, Default)]
pub struct StatusHandler {
    needs_restart: bool,
    needs_offline: bool,
    comment: String,
}

impl StatusHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn needs_restart(&self) -> bool {
        self.needs_restart
    }

    pub fn needs_offline(&self) -> bool {
        self.needs_offline
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// SIGUSR1 sets the restart flag directly; a signal always means
    /// restart regardless of the current offline comment (§4.9, §5).
    pub fn signal_restart(&mut self) {
        self.needs_restart = true;
    }

    /// `update(comment, restart, offline)` (§4.9):
    ///   - `restart=true` sets the restart flag; the comment is adopted
    ///     unless the handler is already flagged offline.
    ///   - `offline=true` sets the offline flag and adopts the comment
    ///     unconditionally (offline takes precedence).
    ///   - `offline=false` while currently offline clears both the offline
    ///     flag and the comment.
    ///   - `needs_restart` persists once set; only `clear_restart` (called
    ///     by the engine once it actually restarts) clears it.
    pub fn update(&mut self, comment: impl Into<String>, restart: bool, offline: bool) {
        let comment = comment.into();

        if restart {
            self.needs_restart = true;
            if !self.needs_offline {
                self.comment = comment.clone();
            }
        }

        if offline {
            self.needs_offline = true;
            self.comment = comment;
        } else if self.needs_offline {
            self.needs_offline = false;
            self.comment.clear();
        }
    }

    pub fn clear_restart(&mut self) {
        self.needs_restart = false;
    }

    /// Offline beats restart at the phase boundary (§4.9).
    pub fn pending_action(&self) -> Option<PendingAction> {
        if self.needs_offline {
            Some(PendingAction::Offline)
        } else if self.needs_restart {
            Some(PendingAction::Restart)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_adopts_comment_when_not_offline() {
        let mut handler = StatusHandler::new();
        handler.update("device flaky", true, false);
        assert!(handler.needs_restart());
        assert_eq!(handler.comment(), "device flaky");
    }

    #[test]
    fn offline_takes_precedence_over_restart_comment() {
        let mut handler = StatusHandler::new();
        handler.update("offline for maintenance", false, true);
        handler.update("device flaky", true, false);
        assert!(handler.needs_offline());
        assert!(handler.needs_restart());
        assert_eq!(handler.comment(), "offline for maintenance");
        assert_eq!(handler.pending_action(), Some(PendingAction::Offline));
    }

    #[test]
    fn explicit_offline_false_clears_offline_state() {
        let mut handler = StatusHandler::new();
        handler.update("offline for maintenance", false, true);
        handler.update("", false, false);
        assert!(!handler.needs_offline());
        assert_eq!(handler.comment(), "");
    }

    #[test]
    fn needs_restart_persists_until_explicitly_cleared() {
        let mut handler = StatusHandler::new();
        handler.signal_restart();
        handler.update("", false, false);
        assert!(handler.needs_restart());
        handler.clear_restart();
        assert!(!handler.needs_restart());
    }
}
