//! Semantic events produced from the Claude Code output stream.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder output when a run produced no text at all.
pub const EMPTY_OUTPUT_PLACEHOLDER: &str = "(no output)";

/// One semantic event within a run.
///
/// `Complete` is terminal: it is emitted exactly once per run and no
/// event follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// The model started extended thinking.
    Thinking,
    /// A prose fragment arrived. `accumulated` is the full text so far
    /// and never shrinks within a run.
    TextDelta {
        fragment: String,
        accumulated: String,
    },
    /// A tool invocation was announced.
    ToolInvoked { tool: String },
    /// A tool finished; elapsed seconds when the stream reported them.
    ToolCompleted {
        tool: String,
        elapsed_secs: Option<f64>,
    },
    /// Terminal event carrying the run outcome.
    Complete(RunResult),
}

impl RunEvent {
    /// Whether this is the terminal event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Outcome of one supervised run. Produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// True only when no termination signal was sent and the process
    /// exited with code zero.
    pub success: bool,
    /// Final text output; falls back to accumulated stream text, then to
    /// [`EMPTY_OUTPUT_PLACEHOLDER`].
    pub output: String,
    /// Whether the run hit its timeout (graceful or forceful path).
    pub timed_out: bool,
    /// Process exit code. `None` when the process never started or was
    /// killed by a signal.
    pub exit_code: Option<i32>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Cost reported by the terminal record, when present.
    pub cost_usd: Option<f64>,
    /// Conversation turns reported by the terminal record, when present.
    pub num_turns: Option<u32>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl RunResult {
    /// Result for a process that could not be spawned. No process state
    /// machine was entered; the diagnostic goes into `output`.
    #[must_use]
    pub fn spawn_failure(diagnostic: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            output: diagnostic.into(),
            timed_out: false,
            exit_code: None,
            duration: Duration::ZERO,
            cost_usd: None,
            num_turns: None,
            started_at,
        }
    }
}
