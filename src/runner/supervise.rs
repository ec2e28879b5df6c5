//! Run supervision: spawn, stream, escalate, finalize.
//!
//! The runner owns the whole lifecycle of one external process: it wires
//! the framer/parser to stdout, forwards semantic events to the caller's
//! channel, logs a periodic liveness line, enforces the dual-timeout kill
//! escalation, and resolves everything that happens after a successful
//! spawn into exactly one [`RunResult`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::cli::{
    event_stream, kill_group_pid, terminate_pid, ClaudeCommand, ClaudeProcess, RunEvent,
    RunResult, EMPTY_OUTPUT_PLACEHOLDER,
};
use crate::runner::escalation::{KillEscalation, DEFAULT_GRACE};
use crate::runner::request::RunRequest;

/// Interval between liveness log lines while the process is alive.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Buffer size for the internal parsed-event channel.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// How many trailing stderr lines are kept for diagnostics.
const STDERR_TAIL_LINES: usize = 40;

/// How long the post-exit drain waits per event. An orphaned grandchild
/// can hold the stdio pipes open past the run; the drain must not.
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Configuration for the runner. The per-run timeout lives on the
/// [`RunRequest`]; this covers everything that does not vary per run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Binary override; resolution applies when unset.
    pub binary: Option<PathBuf>,
    /// Grace period between SIGTERM and the forceful kill.
    pub grace: Duration,
    /// Liveness log interval.
    pub heartbeat: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            binary: None,
            grace: DEFAULT_GRACE,
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }
}

/// Supervises Claude Code runs.
#[derive(Debug, Clone, Default)]
pub struct ClaudeRunner {
    config: RunnerConfig,
}

impl ClaudeRunner {
    /// Create a runner with the given configuration.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Execute one run, forwarding events to `events` as they arrive.
    ///
    /// The terminal `Complete` event is emitted exactly once, after the
    /// process has exited and the flags are final; the parser's own
    /// terminal event is absorbed rather than forwarded. A dropped
    /// receiver never fails the run.
    pub async fn run(&self, request: &RunRequest, events: &mpsc::Sender<RunEvent>) -> RunResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();

        tracing::info!(
            %run_id,
            cwd = %request.working_dir().display(),
            timeout_secs = request.timeout().as_secs(),
            "Starting Claude run"
        );

        let mut command = ClaudeCommand::new(request.prompt(), request.working_dir());
        if let Some(binary) = &self.config.binary {
            command = command.with_binary(binary);
        }

        let mut process = match ClaudeProcess::spawn(&command) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(%run_id, error = %e, "Failed to spawn Claude process");
                let result = RunResult::spawn_failure(e.to_string(), started_at);
                let _ = events.send(RunEvent::Complete(result.clone())).await;
                return result;
            }
        };
        let pid = process.id();

        // Reader task: framer + parser over stdout, feeding the internal
        // channel until EOF.
        let (parsed_tx, mut parsed_rx) = mpsc::channel::<RunEvent>(DEFAULT_CHANNEL_BUFFER);
        let mut reader_handle = None;
        let mut reader_done = match process.take_stdout() {
            Some(stdout) => {
                reader_handle = Some(tokio::spawn(async move {
                    let mut stream = std::pin::pin!(event_stream(stdout));
                    while let Some(event) = stream.next().await {
                        if parsed_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }));
                false
            }
            None => true,
        };

        let stderr_tail = process.take_stderr().map(|stderr| {
            tokio::spawn(async move {
                let mut tail: VecDeque<String> = VecDeque::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() >= STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let mut escalation = KillEscalation::new(request.timeout(), self.config.grace);
        let mut heartbeat = time::interval_at(started + self.config.heartbeat, self.config.heartbeat);
        let timeout_sleep = time::sleep(request.timeout());
        tokio::pin!(timeout_sleep);
        let grace_sleep = time::sleep(self.config.grace);
        tokio::pin!(grace_sleep);

        let mut parser_result: Option<RunResult> = None;
        let mut accumulated = String::new();

        let exit_status = loop {
            tokio::select! {
                maybe_event = parsed_rx.recv(), if !reader_done => {
                    match maybe_event {
                        Some(event) => {
                            forward_event(event, &mut parser_result, &mut accumulated, events).await;
                        }
                        None => reader_done = true,
                    }
                }
                status = process.wait() => {
                    escalation.on_exit();
                    break status.ok();
                }
                _ = heartbeat.tick() => {
                    tracing::info!(
                        %run_id,
                        elapsed_secs = started.elapsed().as_secs(),
                        chars = accumulated.chars().count(),
                        "Claude run alive"
                    );
                }
                () = &mut timeout_sleep, if escalation.is_running() => {
                    if escalation.on_timeout() {
                        tracing::warn!(%run_id, "Run timeout reached, sending SIGTERM");
                        terminate_pid(pid);
                        grace_sleep.as_mut().reset(Instant::now() + escalation.grace());
                    }
                }
                () = &mut grace_sleep, if escalation.is_terminating() => {
                    if escalation.on_grace_expired() {
                        tracing::warn!(%run_id, "Grace period expired, killing process group");
                        kill_group_pid(pid);
                    }
                }
            }
        };

        // The process is gone; drain whatever the reader still holds so no
        // buffered event is lost before finalizing. Bounded per event so an
        // orphaned grandchild keeping the pipe open cannot stall the run.
        loop {
            match time::timeout(DRAIN_WINDOW, parsed_rx.recv()).await {
                Ok(Some(event)) => {
                    forward_event(event, &mut parser_result, &mut accumulated, events).await;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(%run_id, "Drain window elapsed with output pipe still open");
                    if let Some(handle) = &reader_handle {
                        handle.abort();
                    }
                    break;
                }
            }
        }

        let exit_code = exit_status.and_then(|status| status.code());
        let (success, timed_out) = escalation.finalize(exit_code);
        let duration = started.elapsed();

        let result = match parser_result {
            Some(mut result) => {
                result.success = success && result.success;
                result.timed_out = timed_out;
                result.exit_code = exit_code;
                result.started_at = started_at;
                if result.duration.is_zero() {
                    result.duration = duration;
                }
                result
            }
            None => RunResult {
                success,
                output: if accumulated.is_empty() {
                    EMPTY_OUTPUT_PLACEHOLDER.to_string()
                } else {
                    accumulated
                },
                timed_out,
                exit_code,
                duration,
                cost_usd: None,
                num_turns: None,
                started_at,
            },
        };

        if !result.success {
            if let Some(mut handle) = stderr_tail {
                match time::timeout(DRAIN_WINDOW, &mut handle).await {
                    Ok(Ok(tail)) if !tail.is_empty() => {
                        tracing::warn!(%run_id, stderr = %tail, "Claude process stderr tail");
                    }
                    Ok(_) => {}
                    Err(_) => handle.abort(),
                }
            }
        }

        tracing::info!(
            %run_id,
            exit_code = ?exit_code,
            timed_out,
            success = result.success,
            duration_secs = result.duration.as_secs(),
            "Claude run finished"
        );

        let _ = events.send(RunEvent::Complete(result.clone())).await;
        result
    }
}

/// Forward one parsed event, absorbing the parser's terminal event and
/// tracking the accumulated text for liveness and fallback output.
async fn forward_event(
    event: RunEvent,
    parser_result: &mut Option<RunResult>,
    accumulated: &mut String,
    events: &mpsc::Sender<RunEvent>,
) {
    match event {
        RunEvent::Complete(result) => {
            *parser_result = Some(result);
        }
        event => {
            if let RunEvent::TextDelta {
                accumulated: total, ..
            } = &event
            {
                accumulated.clone_from(total);
            }
            if events.send(event).await.is_err() {
                tracing::debug!("Event receiver dropped, continuing run");
            }
        }
    }
}
