//! Wire records from Claude Code stream-json output.
//!
//! Each line of stdout is one self-contained JSON record. The shapes here
//! form a closed set; anything the CLI adds later falls into the `Unknown`
//! variants instead of failing deserialization.

use serde::Deserialize;

/// A single top-level record from the output stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireRecord {
    /// Session bookkeeping (init banner and similar).
    System(SystemRecord),
    /// A full assistant turn. Redundantly announces tool use that the
    /// streaming channel also carries.
    Assistant {
        message: AssistantMessage,
    },
    /// A user-side turn; carries tool results fed back to the model.
    User {
        message: UserMessage,
        #[serde(default, rename = "toolUseResult")]
        tool_use_result: Option<ToolUseResult>,
    },
    /// A wrapped low-level streaming event (partial message output).
    StreamEvent {
        event: StreamPayload,
    },
    /// Terminal record closing the run.
    Result(ResultRecord),
    #[serde(other)]
    Unknown,
}

/// System record payload. Only the fields we log are modeled.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemRecord {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Low-level streaming payload inside a `stream_event` record.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPayload {
    ContentBlockStart {
        #[serde(default)]
        index: Option<usize>,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: Option<usize>,
        delta: ContentDelta,
    },
    ContentBlockStop {
        #[serde(default)]
        index: Option<usize>,
    },
    MessageStart,
    MessageDelta,
    MessageStop,
    #[serde(other)]
    Unknown,
}

/// Content block opening a streamed section.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Thinking,
    Text,
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
    },
    #[serde(other)]
    Unknown,
}

/// Incremental content inside a streamed section.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta,
    InputJsonDelta,
    SignatureDelta,
    #[serde(other)]
    Unknown,
}

/// Assistant turn message body.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<AssistantContent>,
}

/// One content item of an assistant turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking,
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
    },
    #[serde(other)]
    Unknown,
}

/// User turn message body. Content is either plain text or blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: UserContent,
}

/// User content: the CLI emits either a bare string or a block list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<UserBlock>),
}

impl Default for UserContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl UserContent {
    /// Whether the first content item reports a tool result.
    #[must_use]
    pub fn leads_with_tool_result(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Blocks(blocks) => matches!(blocks.first(), Some(UserBlock::ToolResult { .. })),
        }
    }
}

/// One content block of a user turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserBlock {
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Unknown,
}

/// Structured tool outcome attached to a user record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseResult {
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl ToolUseResult {
    /// Elapsed wall time in seconds, when reported.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn elapsed_secs(&self) -> Option<f64> {
        self.duration_ms.map(|ms| ms as f64 / 1000.0)
    }
}

/// Terminal record fields. Everything is optional except the error flag;
/// real streams omit fields freely.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultRecord {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub session_id: Option<String>,
}
