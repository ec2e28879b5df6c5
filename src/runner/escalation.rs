//! Dual-timeout kill escalation state machine.
//!
//! A run moves `Running -> Terminating -> Killed` as its timeout and then
//! its grace period expire, or jumps to `Exited` from any state when the
//! process ends on its own. The machine only decides; signal delivery is
//! the runner's job.

use std::time::Duration;

/// Default grace period between SIGTERM and the escalated kill.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Phase of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Process is running normally.
    Running,
    /// Timeout hit; graceful termination signal sent, grace timer armed.
    Terminating,
    /// Grace expired; forceful kill issued.
    Killed,
    /// Process has exited. Terminal.
    Exited,
}

/// Two-stage escalation tracker for one run.
#[derive(Debug, Clone)]
pub struct KillEscalation {
    phase: RunPhase,
    timeout: Duration,
    grace: Duration,
    term_sent: bool,
}

impl KillEscalation {
    /// Create a tracker in the `Running` phase.
    #[must_use]
    pub fn new(timeout: Duration, grace: Duration) -> Self {
        Self {
            phase: RunPhase::Running,
            timeout,
            grace,
            term_sent: false,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Configured run timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Configured grace period.
    #[must_use]
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Whether the run timeout is still armed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase == RunPhase::Running
    }

    /// Whether the grace timer is armed.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.phase == RunPhase::Terminating
    }

    /// The run timeout fired. Returns true when the caller should send the
    /// graceful termination signal; false when the phase no longer applies.
    pub fn on_timeout(&mut self) -> bool {
        if self.phase != RunPhase::Running {
            return false;
        }
        self.transition(RunPhase::Terminating);
        self.term_sent = true;
        true
    }

    /// The grace timer fired without a process exit. Returns true when the
    /// caller should issue the forceful kill.
    pub fn on_grace_expired(&mut self) -> bool {
        if self.phase != RunPhase::Terminating {
            return false;
        }
        self.transition(RunPhase::Killed);
        true
    }

    /// The process exited (by itself or due to a signal). Cancels any
    /// pending stage by leaving the armed phases.
    pub fn on_exit(&mut self) {
        if self.phase != RunPhase::Exited {
            self.transition(RunPhase::Exited);
        }
    }

    /// Whether a termination signal was ever sent.
    #[must_use]
    pub fn termination_requested(&self) -> bool {
        self.term_sent
    }

    /// Final `(success, timed_out)` flags for the run.
    #[must_use]
    pub fn finalize(&self, exit_code: Option<i32>) -> (bool, bool) {
        let timed_out = self.term_sent;
        let success = !timed_out && exit_code == Some(0);
        (success, timed_out)
    }

    fn transition(&mut self, next: RunPhase) {
        tracing::debug!(from = ?self.phase, to = ?next, "Escalation transition");
        self.phase = next;
    }
}
