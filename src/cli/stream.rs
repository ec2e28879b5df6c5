//! Stream adapter over Claude Code stdout.
//!
//! Couples the line framer and event parser to an async reader and exposes
//! the result as a `Stream` of semantic events.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::events::RunEvent;
use super::framer::LineFramer;
use super::parser::EventParser;

/// Read buffer size for stdout chunks.
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Internal state threaded through the unfold.
struct StreamState<R> {
    reader: R,
    framer: LineFramer,
    parser: EventParser,
    queued: std::collections::VecDeque<RunEvent>,
    eof: bool,
}

/// Turn a raw output reader into a stream of [`RunEvent`]s.
///
/// Invalid UTF-8 chunks and malformed records are dropped; the stream ends
/// at EOF after the framer's trailing partial record (if any) is parsed.
pub fn event_stream<R>(reader: R) -> impl futures_core::Stream<Item = RunEvent>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let state = StreamState {
        reader,
        framer: LineFramer::new(),
        parser: EventParser::new(),
        queued: std::collections::VecDeque::new(),
        eof: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queued.pop_front() {
                return Some((event, state));
            }
            if state.eof {
                return None;
            }

            let mut buf = vec![0u8; READ_CHUNK_BYTES];
            match state.reader.read(&mut buf).await {
                Ok(0) => {
                    state.eof = true;
                    if let Some(trailing) = state.framer.finish() {
                        state.queued.extend(state.parser.feed_line(&trailing));
                    }
                }
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    for record in state.framer.push(&chunk) {
                        state.queued.extend(state.parser.feed_line(&record));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Error reading process output");
                    state.eof = true;
                }
            }
        }
    })
}
