//! Run requests and pre-spawn validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::guard::PromptGuard;

/// Prompt length ceiling in characters. Longer prompts are truncated, not
/// rejected.
pub const MAX_PROMPT_CHARS: usize = 10_000;

/// Error type for request validation. Every variant carries a reason
/// suitable for showing to the requester.
#[derive(thiserror::Error, Debug)]
pub enum RequestError {
    /// The prompt contained a forbidden pattern.
    #[error("Prompt rejected: {reason}")]
    ForbiddenPattern { reason: String },
    /// The prompt was empty or whitespace.
    #[error("Prompt is empty")]
    EmptyPrompt,
}

/// An immutable, validated request for one supervised run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    prompt: String,
    working_dir: PathBuf,
    timeout: Duration,
    truncated: bool,
}

impl RunRequest {
    /// Validate and build a request using the default guard rules.
    ///
    /// # Errors
    ///
    /// Returns `RequestError` when the prompt is empty or matches a
    /// forbidden pattern. Oversized prompts are truncated, never rejected.
    pub fn new(
        prompt: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, RequestError> {
        Self::with_guard(
            prompt,
            working_dir,
            timeout,
            &PromptGuard::with_default_rules(),
        )
    }

    /// Validate and build a request against a specific guard.
    ///
    /// The forbidden-pattern check runs on the full input before any
    /// truncation so a pattern beyond the ceiling still rejects.
    ///
    /// # Errors
    ///
    /// Returns `RequestError` when the prompt is empty or matches a rule.
    pub fn with_guard(
        prompt: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
        guard: &PromptGuard,
    ) -> Result<Self, RequestError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(RequestError::EmptyPrompt);
        }

        if let Some(rule) = guard.first_match(&prompt) {
            tracing::warn!(
                category = ?rule.category(),
                reason = rule.description(),
                "Rejected prompt before spawn"
            );
            return Err(RequestError::ForbiddenPattern {
                reason: rule.description().to_string(),
            });
        }

        let (prompt, truncated) = truncate_chars(prompt, MAX_PROMPT_CHARS);
        if truncated {
            tracing::warn!(limit = MAX_PROMPT_CHARS, "Prompt truncated to length ceiling");
        }

        Ok(Self {
            prompt,
            working_dir: working_dir.into(),
            timeout,
            truncated,
        })
    }

    /// The sanitized prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// The working directory for the run.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The run timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the prompt was truncated to the length ceiling.
    #[must_use]
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }
}

/// Truncate to at most `limit` characters, char-safe.
fn truncate_chars(s: String, limit: usize) -> (String, bool) {
    match s.char_indices().nth(limit) {
        Some((byte_idx, _)) => {
            let mut s = s;
            s.truncate(byte_idx);
            (s, true)
        }
        None => (s, false),
    }
}
