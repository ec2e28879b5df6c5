//! Progress rendering state for the update coalescer.
//!
//! Folds the event sequence into a short text body: completed-tool
//! history, a single status line, and a trailing preview of the prose
//! accumulated so far.

use crate::cli::RunEvent;

/// Default trailing-window size for the text preview, in characters.
pub const DEFAULT_PREVIEW_CHARS: usize = 500;

/// Default ceiling for the rendered body, in characters.
pub const DEFAULT_MAX_BODY_CHARS: usize = 4000;

/// Separator between the status section and the text preview.
const SECTION_SEPARATOR: &str = "---";

/// Rendering knobs.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Trailing-window size of the text preview.
    pub preview_chars: usize,
    /// Hard ceiling for the composed body.
    pub max_body_chars: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            preview_chars: DEFAULT_PREVIEW_CHARS,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
        }
    }
}

/// Mutable rendering state for one run.
#[derive(Debug)]
pub struct RenderState {
    history: Vec<String>,
    status: String,
    text: String,
    dirty: bool,
    options: RenderOptions,
}

impl RenderState {
    /// Create an empty state.
    #[must_use]
    pub fn new(options: RenderOptions) -> Self {
        Self {
            history: Vec::new(),
            status: String::new(),
            text: String::new(),
            dirty: false,
            options,
        }
    }

    /// Fold one event into the state. The terminal event is a no-op here;
    /// stopping is the coalescer's concern.
    pub fn apply(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Thinking => {
                self.status = "thinking...".to_string();
                self.dirty = true;
            }
            RunEvent::ToolInvoked { tool } => {
                self.status = format!("running {tool}...");
                self.dirty = true;
            }
            RunEvent::ToolCompleted { tool, elapsed_secs } => {
                self.history.push(match elapsed_secs {
                    Some(secs) => format!("[done] {tool} ({secs:.1}s)"),
                    None => format!("[done] {tool}"),
                });
                self.status = "analyzing...".to_string();
                self.dirty = true;
            }
            RunEvent::TextDelta { accumulated, .. } => {
                self.text.clone_from(accumulated);
                self.status = "composing...".to_string();
                self.dirty = true;
            }
            RunEvent::Complete(_) => {}
        }
    }

    /// Whether state changed since the last [`Self::take_dirty`].
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Read and clear the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Re-mark the state dirty (after a failed flush).
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Compose the body: history (oldest first), status line, then a
    /// separator and the trailing text preview. Hard-clamped to the
    /// configured ceiling as a final safety net.
    #[must_use]
    pub fn render(&self) -> String {
        let mut body = String::new();

        for line in &self.history {
            body.push_str(line);
            body.push('\n');
        }

        if !self.status.is_empty() {
            body.push_str(&self.status);
        }

        if !self.text.is_empty() {
            let (preview, truncated) = tail_chars(&self.text, self.options.preview_chars);
            body.push('\n');
            body.push_str(SECTION_SEPARATOR);
            body.push('\n');
            if truncated {
                body.push('…');
            }
            body.push_str(&preview);
        }

        clamp_chars(&body, self.options.max_body_chars)
    }
}

/// Last `n` characters of `s`, plus whether anything was cut.
fn tail_chars(s: &str, n: usize) -> (String, bool) {
    let total = s.chars().count();
    if total <= n {
        (s.to_string(), false)
    } else {
        (s.chars().skip(total - n).collect(), true)
    }
}

/// First `n` characters of `s`, char-safe.
#[must_use]
pub fn clamp_chars(s: &str, n: usize) -> String {
    match s.char_indices().nth(n) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
