//! Configuration types.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Process supervision settings.
    pub runner: RunnerSettings,
    /// Progress relay settings.
    pub relay: RelaySettings,
    /// Trigger deduplication settings.
    pub dedupe: DedupeSettings,
    /// Access control and project mapping.
    pub access: AccessSettings,
}

/// Process supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Binary override; resolution applies when unset.
    pub binary: Option<PathBuf>,
    /// Run timeout in seconds.
    pub timeout_secs: u64,
    /// Grace period between SIGTERM and forceful kill, in seconds.
    pub grace_secs: u64,
    /// Liveness log interval in seconds.
    pub heartbeat_secs: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            binary: None,
            timeout_secs: 300,
            grace_secs: 5,
            heartbeat_secs: 30,
        }
    }
}

impl RunnerSettings {
    /// Run timeout as a duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Grace period as a duration.
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    /// Heartbeat interval as a duration.
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

/// Progress relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Remote endpoint for progress updates. Logged locally when unset.
    pub endpoint: Option<String>,
    /// Flush cadence in milliseconds.
    pub cadence_ms: u64,
    /// Trailing-window size of the text preview, in characters.
    pub preview_chars: usize,
    /// Hard ceiling for a rendered progress body, in characters.
    pub max_body_chars: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            cadence_ms: 2000,
            preview_chars: 500,
            max_body_chars: 4000,
        }
    }
}

impl RelaySettings {
    /// Flush cadence as a duration.
    #[must_use]
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }
}

/// Trigger deduplication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeSettings {
    /// Expiry window in seconds.
    pub window_secs: u64,
    /// Entry-count ceiling that triggers a sweep.
    pub ceiling: usize,
}

impl Default for DedupeSettings {
    fn default() -> Self {
        Self {
            window_secs: 60,
            ceiling: 1000,
        }
    }
}

impl DedupeSettings {
    /// Expiry window as a duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Access control: which conversation identities may trigger runs, and
/// where each identity's project lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessSettings {
    /// Identities allowed to trigger runs. Empty means everyone.
    pub allowed: HashSet<String>,
    /// Identity to working-directory mapping.
    pub projects: HashMap<String, PathBuf>,
}

impl AccessSettings {
    /// Whether the identity may trigger runs.
    #[must_use]
    pub fn is_allowed(&self, identity: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(identity)
    }

    /// The working directory mapped to this identity, if any.
    #[must_use]
    pub fn project_dir(&self, identity: &str) -> Option<&PathBuf> {
        self.projects.get(identity)
    }
}
