//! Claude Code process spawning and control.
//!
//! Resolves the binary, constructs the fixed non-interactive argument
//! template, builds a sanitized child environment, and wraps the running
//! child with graceful/forceful termination helpers.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Environment variables under this prefix are stripped from the child so
/// a nested invocation cannot detect or alter outer run state.
pub const RESERVED_ENV_PREFIX: &str = "CLAUDE";

/// Binary name used for the weakest resolution fallback.
const BINARY_NAME: &str = "claude";

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Claude binary not found")]
    NotFound,
    /// Permission denied when spawning.
    #[error("Permission denied spawning Claude binary")]
    PermissionDenied,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Resolve the Claude binary path.
///
/// Preference order: the well-known local install location, then a `PATH`
/// scan, then the bare name. Degrading to the weakest fallback is not an
/// error; a bad path surfaces later as a spawn failure.
#[must_use]
pub fn resolve_binary() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        let installed = home.join(".claude").join("local").join(BINARY_NAME);
        if installed.is_file() {
            return installed;
        }
    }

    if let Some(paths) = env::var_os("PATH") {
        for dir in env::split_paths(&paths) {
            let candidate = dir.join(BINARY_NAME);
            if candidate.is_file() {
                return candidate;
            }
        }
    }

    tracing::debug!("Claude binary not found in install dir or PATH, using bare name");
    PathBuf::from(BINARY_NAME)
}

/// Build the child environment: a copy of the current environment with
/// every reserved-prefix variable removed.
#[must_use]
pub fn sanitized_env() -> HashMap<String, String> {
    scrub_env(env::vars())
}

fn scrub_env(vars: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
    vars.filter(|(key, _)| !key.starts_with(RESERVED_ENV_PREFIX))
        .collect()
}

/// Configuration for one Claude Code invocation.
///
/// The argument template is fixed; only the prompt and working directory
/// vary per run. Callers cannot inject flags.
#[derive(Debug, Clone)]
pub struct ClaudeCommand {
    prompt: String,
    working_dir: PathBuf,
    binary: Option<PathBuf>,
}

impl ClaudeCommand {
    /// Create a command for the given prompt and working directory.
    #[must_use]
    pub fn new(prompt: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            binary: None,
        }
    }

    /// Override the binary path (used by tests and config).
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Get the prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Get the working directory.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Build the fixed command-line argument template.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        vec![
            "-p".to_string(),
            self.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--include-partial-messages".to_string(),
        ]
    }
}

/// A running Claude Code process.
#[derive(Debug)]
pub struct ClaudeProcess {
    child: Child,
}

impl ClaudeProcess {
    /// Spawn a Claude Code process.
    ///
    /// The child gets piped stdout/stderr, the sanitized environment, and
    /// (on Unix) its own process group so an escalated kill reaches any
    /// grandchildren.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(command: &ClaudeCommand) -> Result<Self, SpawnError> {
        let binary = command
            .binary
            .clone()
            .unwrap_or_else(resolve_binary);

        let mut cmd = Command::new(&binary);
        cmd.args(command.build_args())
            .current_dir(&command.working_dir)
            .env_clear()
            .envs(sanitized_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(SpawnError::from_io)?;
        tracing::debug!(binary = %binary.display(), pid = ?child.id(), "Spawned Claude process");

        Ok(Self { child })
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Send the graceful termination signal (SIGTERM).
    ///
    /// Delivery failure means the process already exited; that is a benign
    /// no-op, not an error.
    pub fn terminate(&self) {
        terminate_pid(self.id());
    }

    /// Forcefully kill the process group.
    ///
    /// Falls back to killing the direct child when group delivery fails.
    pub async fn kill_group(&mut self) {
        kill_group_pid(self.id());
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "Kill failed (already exited?)");
        }
    }
}

/// Send SIGTERM to a process by id. Benign no-op when the process already
/// exited or no id is known.
pub fn terminate_pid(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        match kill(pid, Signal::SIGTERM) {
            Ok(()) => tracing::debug!(%pid, "Sent SIGTERM"),
            Err(e) => tracing::debug!(%pid, error = %e, "SIGTERM not delivered (already exited?)"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        tracing::debug!("Graceful termination not supported on this platform");
    }
}

/// Send SIGKILL to a process group by leader id, falling back to the
/// process itself when group delivery fails.
pub fn kill_group_pid(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{kill, killpg, Signal};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        if killpg(pgid, Signal::SIGKILL).is_ok() {
            tracing::debug!(%pgid, "Sent SIGKILL to process group");
        } else if let Err(e) = kill(pgid, Signal::SIGKILL) {
            tracing::debug!(%pgid, error = %e, "SIGKILL not delivered (already exited?)");
        }
    }

    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_fixed_template() {
        let command = ClaudeCommand::new("do the thing", "/tmp");
        let args = command.build_args();

        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "do the thing");
        assert!(args.contains(&"--output-format".to_string()));
        assert!(args.contains(&"stream-json".to_string()));
        assert!(args.contains(&"--include-partial-messages".to_string()));
    }

    #[test]
    fn test_prompt_content_cannot_add_flags() {
        // A hostile prompt stays a single positional argument.
        let command = ClaudeCommand::new("--resume hijack", "/tmp");
        let args = command.build_args();
        assert_eq!(args[1], "--resume hijack");
        assert_eq!(args.len(), ClaudeCommand::new("x", "/tmp").build_args().len());
    }

    #[test]
    fn test_scrub_env_removes_reserved_prefix() {
        let vars = vec![
            ("CLAUDECODE".to_string(), "1".to_string()),
            ("CLAUDE_CODE_ENTRYPOINT".to_string(), "cli".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("HOME".to_string(), "/home/u".to_string()),
        ];
        let scrubbed = scrub_env(vars.into_iter());

        assert!(!scrubbed.contains_key("CLAUDECODE"));
        assert!(!scrubbed.contains_key("CLAUDE_CODE_ENTRYPOINT"));
        assert_eq!(scrubbed.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert_eq!(scrubbed.get("HOME").map(String::as_str), Some("/home/u"));
    }

    #[test]
    fn test_resolve_binary_never_fails() {
        // Worst case is the bare name; resolution must not error.
        let path = resolve_binary();
        assert!(!path.as_os_str().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_classified() {
        let command = ClaudeCommand::new("x", "/tmp")
            .with_binary("/nonexistent/claude-relay-test-binary");
        let result = ClaudeProcess::spawn(&command);
        assert!(matches!(result, Err(SpawnError::NotFound)));
    }

    #[tokio::test]
    async fn test_spawn_and_wait_echo() {
        let command = ClaudeCommand::new("ignored", "/tmp").with_binary("/bin/echo");
        let mut process = ClaudeProcess::spawn(&command).unwrap();
        assert!(process.id().is_some());

        let status = process.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_take_stdout_once() {
        let command = ClaudeCommand::new("x", "/tmp").with_binary("/bin/echo");
        let mut process = ClaudeProcess::spawn(&command).unwrap();

        assert!(process.take_stdout().is_some());
        assert!(process.take_stdout().is_none());
        process.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_is_noop_after_exit() {
        let command = ClaudeCommand::new("x", "/tmp").with_binary("/bin/echo");
        let mut process = ClaudeProcess::spawn(&command).unwrap();
        process.wait().await.unwrap();

        // Must not panic or error.
        process.terminate();
        process.kill_group().await;
    }
}
