//! Line framing for the Claude Code output stream.
//!
//! Stdout arrives in arbitrary chunks that do not respect record
//! boundaries. The framer buffers partial lines and yields only complete
//! newline-terminated records.

/// Splits arriving text into newline-terminated records.
///
/// A record is complete once its trailing `\n` has been seen. Anything
/// after the last newline stays buffered until the next chunk arrives.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: String,
}

impl LineFramer {
    /// Create an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text and return the records it completed.
    ///
    /// Records are returned without their line terminator; a trailing
    /// `\r` (CRLF streams) is stripped as well.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut records = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let mut record: String = self.buffer.drain(..=pos).collect();
            record.pop(); // '\n'
            if record.ends_with('\r') {
                record.pop();
            }
            records.push(record);
        }
        records
    }

    /// Number of buffered bytes not yet part of a complete record.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Take the trailing unterminated record, if any.
    ///
    /// Call at end of stream; a well-formed stream ends with a newline
    /// and leaves nothing behind.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
