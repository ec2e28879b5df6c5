//! Incremental parser from wire records to semantic run events.
//!
//! The parser consumes one framed record at a time in arrival order and
//! carries the per-run state the stream itself does not repeat: the text
//! accumulated so far, the currently active tool, and a latched thinking
//! flag. Malformed records are skipped without aborting the run.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::events::{RunEvent, RunResult, EMPTY_OUTPUT_PLACEHOLDER};
use super::records::{
    AssistantContent, ContentBlock, ContentDelta, ResultRecord, StreamPayload, WireRecord,
};

/// Placeholder tool identifier when a result arrives with no tracked tool.
const UNKNOWN_TOOL: &str = "tool";

/// Stateful record-to-event parser for a single run.
#[derive(Debug)]
pub struct EventParser {
    accumulated: String,
    active_tool: Option<String>,
    thinking: bool,
    finished: bool,
    started_at: DateTime<Utc>,
}

impl EventParser {
    /// Create a parser for a run starting now.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Create a parser with an explicit start timestamp (carried into the
    /// terminal [`RunResult`]).
    #[must_use]
    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self {
            accumulated: String::new(),
            active_tool: None,
            thinking: false,
            finished: false,
            started_at,
        }
    }

    /// Text accumulated from all deltas so far.
    #[must_use]
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Whether the terminal record has been seen.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Parse one raw line and dispatch it.
    ///
    /// Non-JSON or structurally unexpected lines are dropped with a debug
    /// log; the stream must tolerate rare corruption.
    pub fn feed_line(&mut self, line: &str) -> Vec<RunEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<WireRecord>(trimmed) {
            Ok(record) => self.feed(record),
            Err(e) => {
                tracing::debug!(error = %e, len = trimmed.len(), "Skipping malformed record");
                Vec::new()
            }
        }
    }

    /// Dispatch one wire record, returning the semantic events it caused.
    pub fn feed(&mut self, record: WireRecord) -> Vec<RunEvent> {
        if self.finished {
            // Nothing follows the terminal record.
            tracing::debug!("Ignoring record after terminal result");
            return Vec::new();
        }

        match record {
            WireRecord::StreamEvent { event } => self.on_stream_payload(event),
            WireRecord::Assistant { message } => self.on_assistant_turn(&message.content),
            WireRecord::User {
                message,
                tool_use_result,
            } => {
                if message.content.leads_with_tool_result() {
                    let tool = self
                        .active_tool
                        .take()
                        .unwrap_or_else(|| UNKNOWN_TOOL.to_string());
                    let elapsed_secs = tool_use_result.and_then(|r| r.elapsed_secs());
                    tracing::trace!(tool = %tool, ?elapsed_secs, "Tool completed");
                    vec![RunEvent::ToolCompleted { tool, elapsed_secs }]
                } else {
                    Vec::new()
                }
            }
            WireRecord::Result(result) => vec![self.on_result(&result)],
            WireRecord::System(init) => {
                tracing::debug!(
                    subtype = init.subtype.as_deref().unwrap_or("-"),
                    session_id = init.session_id.as_deref().unwrap_or("-"),
                    "System record"
                );
                Vec::new()
            }
            WireRecord::Unknown => Vec::new(),
        }
    }

    fn on_stream_payload(&mut self, payload: StreamPayload) -> Vec<RunEvent> {
        match payload {
            StreamPayload::ContentBlockStart { content_block, .. } => match content_block {
                ContentBlock::Thinking => {
                    if self.thinking {
                        // Latched: repeated thinking starts are not re-announced.
                        Vec::new()
                    } else {
                        self.thinking = true;
                        vec![RunEvent::Thinking]
                    }
                }
                ContentBlock::ToolUse { name, .. } => {
                    self.thinking = false;
                    self.active_tool = Some(name.clone());
                    tracing::trace!(tool = %name, "Tool invoked");
                    vec![RunEvent::ToolInvoked { tool: name }]
                }
                ContentBlock::Text => {
                    // Subsequent deltas are prose, not thought.
                    self.thinking = false;
                    Vec::new()
                }
                ContentBlock::Unknown => Vec::new(),
            },
            StreamPayload::ContentBlockDelta { delta, .. } => match delta {
                ContentDelta::TextDelta { text } => {
                    self.thinking = false;
                    self.accumulated.push_str(&text);
                    vec![RunEvent::TextDelta {
                        fragment: text,
                        accumulated: self.accumulated.clone(),
                    }]
                }
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// The assistant turn is a redundant second channel for tool use; a
    /// tool it announces is only emitted when it differs from the tool the
    /// streaming channel already activated.
    fn on_assistant_turn(&mut self, content: &[AssistantContent]) -> Vec<RunEvent> {
        let mut events = Vec::new();
        for item in content {
            if let AssistantContent::ToolUse { name, .. } = item {
                if self.active_tool.as_deref() != Some(name.as_str()) {
                    self.active_tool = Some(name.clone());
                    tracing::trace!(tool = %name, "Tool invoked (assistant turn)");
                    events.push(RunEvent::ToolInvoked { tool: name.clone() });
                }
            }
        }
        events
    }

    fn on_result(&mut self, record: &ResultRecord) -> RunEvent {
        self.finished = true;

        let output = record
            .result
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                if self.accumulated.is_empty() {
                    EMPTY_OUTPUT_PLACEHOLDER.to_string()
                } else {
                    self.accumulated.clone()
                }
            });

        tracing::debug!(
            is_error = record.is_error,
            duration_ms = ?record.duration_ms,
            num_turns = ?record.num_turns,
            "Terminal result record"
        );

        RunEvent::Complete(RunResult {
            success: !record.is_error,
            output,
            timed_out: false,
            exit_code: None,
            duration: Duration::from_millis(record.duration_ms.unwrap_or(0)),
            cost_usd: record.total_cost_usd,
            num_turns: record.num_turns,
            started_at: self.started_at,
        })
    }
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_delta(text: &str) -> String {
        format!(
            r#"{{"type":"stream_event","event":{{"type":"content_block_delta","delta":{{"type":"text_delta","text":"{text}"}}}}}}"#
        )
    }

    fn block_start(block: &str) -> String {
        format!(
            r#"{{"type":"stream_event","event":{{"type":"content_block_start","content_block":{block}}}}}"#
        )
    }

    #[test]
    fn test_text_deltas_accumulate() {
        let mut parser = EventParser::new();
        let first = parser.feed_line(&text_delta("Hello, "));
        let second = parser.feed_line(&text_delta("world"));

        assert_eq!(
            first,
            vec![RunEvent::TextDelta {
                fragment: "Hello, ".to_string(),
                accumulated: "Hello, ".to_string(),
            }]
        );
        assert_eq!(
            second,
            vec![RunEvent::TextDelta {
                fragment: "world".to_string(),
                accumulated: "Hello, world".to_string(),
            }]
        );
        assert_eq!(parser.accumulated(), "Hello, world");
    }

    #[test]
    fn test_thinking_latched_once() {
        let mut parser = EventParser::new();
        let thinking = block_start(r#"{"type":"thinking"}"#);

        assert_eq!(parser.feed_line(&thinking), vec![RunEvent::Thinking]);
        assert!(parser.feed_line(&thinking).is_empty());
        assert!(parser.feed_line(&thinking).is_empty());
    }

    #[test]
    fn test_text_start_clears_thinking_without_event() {
        let mut parser = EventParser::new();
        parser.feed_line(&block_start(r#"{"type":"thinking"}"#));
        assert!(parser
            .feed_line(&block_start(r#"{"type":"text"}"#))
            .is_empty());
        // Thinking may be announced again once cleared.
        assert_eq!(
            parser.feed_line(&block_start(r#"{"type":"thinking"}"#)),
            vec![RunEvent::Thinking]
        );
    }

    #[test]
    fn test_tool_use_clears_thinking_and_tracks_tool() {
        let mut parser = EventParser::new();
        parser.feed_line(&block_start(r#"{"type":"thinking"}"#));
        let events =
            parser.feed_line(&block_start(r#"{"type":"tool_use","id":"t1","name":"Read"}"#));
        assert_eq!(
            events,
            vec![RunEvent::ToolInvoked {
                tool: "Read".to_string()
            }]
        );
        // Cleared thinking re-latches.
        assert_eq!(
            parser.feed_line(&block_start(r#"{"type":"thinking"}"#)),
            vec![RunEvent::Thinking]
        );
    }

    #[test]
    fn test_assistant_turn_deduplicates_same_tool() {
        let mut parser = EventParser::new();
        parser.feed_line(&block_start(r#"{"type":"tool_use","id":"t1","name":"Bash"}"#));

        let assistant = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash"}]}}"#;
        assert!(parser.feed_line(assistant).is_empty());
    }

    #[test]
    fn test_assistant_turn_announces_different_tool() {
        let mut parser = EventParser::new();
        parser.feed_line(&block_start(r#"{"type":"tool_use","id":"t1","name":"Bash"}"#));

        let assistant = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t2","name":"Write"}]}}"#;
        assert_eq!(
            parser.feed_line(assistant),
            vec![RunEvent::ToolInvoked {
                tool: "Write".to_string()
            }]
        );
    }

    #[test]
    fn test_repeat_invocation_of_same_tool_is_merged() {
        // Identifier equality is the only dedup rule: the same tool invoked
        // twice in direct succession with no completion in between collapses
        // into one announcement. Deliberate, if surprising.
        let mut parser = EventParser::new();
        let assistant = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash"}]}}"#;
        assert_eq!(parser.feed_line(assistant).len(), 1);
        let again = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t2","name":"Bash"}]}}"#;
        assert!(parser.feed_line(again).is_empty());
    }

    #[test]
    fn test_tool_completion_uses_active_tool_and_elapsed() {
        let mut parser = EventParser::new();
        parser.feed_line(&block_start(r#"{"type":"tool_use","id":"t1","name":"Grep"}"#));

        let user = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1"}]},"toolUseResult":{"durationMs":1500}}"#;
        let events = parser.feed_line(user);
        assert_eq!(
            events,
            vec![RunEvent::ToolCompleted {
                tool: "Grep".to_string(),
                elapsed_secs: Some(1.5),
            }]
        );
    }

    #[test]
    fn test_tool_completion_placeholder_when_untracked() {
        let mut parser = EventParser::new();
        let user = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t9"}]}}"#;
        assert_eq!(
            parser.feed_line(user),
            vec![RunEvent::ToolCompleted {
                tool: "tool".to_string(),
                elapsed_secs: None,
            }]
        );
    }

    #[test]
    fn test_tool_completion_clears_active_tool() {
        let mut parser = EventParser::new();
        parser.feed_line(&block_start(r#"{"type":"tool_use","id":"t1","name":"Read"}"#));
        let user = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1"}]}}"#;
        parser.feed_line(user);

        // Same tool may now be announced again by the secondary channel.
        let assistant = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t2","name":"Read"}]}}"#;
        assert_eq!(parser.feed_line(assistant).len(), 1);
    }

    #[test]
    fn test_result_prefers_explicit_output() {
        let mut parser = EventParser::new();
        parser.feed_line(&text_delta("streamed"));
        let events = parser.feed_line(r#"{"type":"result","is_error":false,"result":"explicit"}"#);

        match &events[..] {
            [RunEvent::Complete(result)] => {
                assert_eq!(result.output, "explicit");
                assert!(result.success);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_result_falls_back_to_accumulated_text() {
        let mut parser = EventParser::new();
        parser.feed_line(&text_delta("Hi"));
        let events = parser.feed_line(r#"{"type":"result","is_error":false,"result":""}"#);

        match &events[..] {
            [RunEvent::Complete(result)] => assert_eq!(result.output, "Hi"),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_result_placeholder_when_everything_empty() {
        let mut parser = EventParser::new();
        let events = parser.feed_line(r#"{"type":"result"}"#);
        match &events[..] {
            [RunEvent::Complete(result)] => assert_eq!(result.output, EMPTY_OUTPUT_PLACEHOLDER),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_result_carries_metrics_and_inverts_error() {
        let mut parser = EventParser::new();
        let line = r#"{"type":"result","is_error":true,"result":"boom","duration_ms":2000,"total_cost_usd":0.12,"num_turns":4}"#;
        match &parser.feed_line(line)[..] {
            [RunEvent::Complete(result)] => {
                assert!(!result.success);
                assert_eq!(result.duration, Duration::from_millis(2000));
                assert_eq!(result.cost_usd, Some(0.12));
                assert_eq!(result.num_turns, Some(4));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_records_after_terminal_are_ignored() {
        let mut parser = EventParser::new();
        parser.feed_line(r#"{"type":"result"}"#);
        assert!(parser.is_finished());
        assert!(parser.feed_line(&text_delta("late")).is_empty());
    }

    #[test]
    fn test_malformed_records_skipped_without_effect() {
        let mut parser = EventParser::new();
        let mut events = Vec::new();
        events.extend(parser.feed_line(&text_delta("a")));
        events.extend(parser.feed_line("not json at all"));
        events.extend(parser.feed_line("{\"truncated\":"));
        events.extend(parser.feed_line(&text_delta("b")));

        let mut clean = EventParser::new();
        let mut expected = Vec::new();
        expected.extend(clean.feed_line(&text_delta("a")));
        expected.extend(clean.feed_line(&text_delta("b")));

        assert_eq!(events, expected);
    }

    #[test]
    fn test_blank_lines_ignored() {
        let mut parser = EventParser::new();
        assert!(parser.feed_line("").is_empty());
        assert!(parser.feed_line("   ").is_empty());
    }
}
