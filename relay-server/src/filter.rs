//! Per-line decisions for the Ollama NDJSON stream.
//!
//! Each line maps to at most one [`OutputEvent`]:
//!
//! ```text
//! {"message":{"content":"Hel"},"done":false}        -> Content("Hel")
//! {"message":{"thinking":"let me see"},"done":false} -> nothing
//! not json                                          -> nothing
//! {"message":{"content":""},"done":true}            -> Done
//! ```
//!
//! `Done` means "stop reading"; the caller must not pull further lines.

use relay_shared::{OutputEvent, UpstreamFrame};
use tracing::{debug, warn};

/// Decode one upstream line. Blank keep-alive lines and anything that is not
/// a frame-shaped JSON object yield `None`.
pub fn decode_line(line: &str) -> Option<UpstreamFrame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(frame) => Some(frame),
        Err(e) => {
            debug!(error = %e, "skipping unparseable upstream line");
            None
        }
    }
}

/// Decide what a decoded frame contributes to the client stream.
///
/// A `done` frame ends the stream and its content is discarded. The
/// `thinking` field never surfaces. Blank content produces nothing.
pub fn filter_frame(frame: &UpstreamFrame) -> Option<OutputEvent> {
    if let Some(err) = &frame.error {
        warn!(error = %err, "upstream reported an error mid-stream");
        return Some(OutputEvent::Done);
    }
    if frame.done {
        return Some(OutputEvent::Done);
    }

    let message = frame.message.as_ref()?;
    if message.content.trim().is_empty() {
        return None;
    }
    Some(OutputEvent::Content(message.content.clone()))
}

pub fn filter_line(line: &str) -> Option<OutputEvent> {
    decode_line(line).as_ref().and_then(filter_frame)
}
