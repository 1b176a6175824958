//! Upstream lines in, server-sent events out.
//!
//! Wire format towards the browser:
//!
//! ```text
//! data: Hel
//!
//! data: lo
//!
//! event: done
//! data: end
//!
//! ```
//!
//! The `done` event is written exactly once when the upstream finishes, fails
//! mid-stream or was never reachable. It is *not* written when the stream is
//! cancelled by shutdown or by the client going away, so a truncated answer
//! never looks complete.

use crate::filter::filter_line;
use axum::response::sse::Event;
use futures_util::{Stream, StreamExt};
use relay_shared::OutputEvent;
use std::convert::Infallible;
use std::fmt::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drive the read → filter pipeline one line at a time.
///
/// Dropping the returned stream drops `lines` and with it the upstream
/// connection. axum drops the response body when the client disconnects.
pub fn relay<S, E>(
    lines: S,
    shutdown: CancellationToken,
) -> impl Stream<Item = OutputEvent> + Send
where
    S: Stream<Item = Result<String, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut lines = Box::pin(lines);
        let mut guard = DisconnectGuard::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(chunks = guard.chunks, "shutdown requested, abandoning stream");
                    guard.finished = true;
                    return;
                }
                next = lines.next() => next,
            };

            match next {
                Some(Ok(line)) => match filter_line(&line) {
                    Some(OutputEvent::Done) => break,
                    Some(event) => {
                        guard.chunks += 1;
                        yield event;
                    }
                    None => continue,
                },
                Some(Err(e)) => {
                    warn!(error = %e, chunks = guard.chunks, "upstream stream failed");
                    break;
                }
                None => {
                    debug!("upstream closed without a done frame");
                    break;
                }
            }
        }

        // Release the upstream connection before the marker goes out.
        drop(lines);
        guard.finished = true;
        info!(chunks = guard.chunks, "stream complete");
        yield OutputEvent::Done;
    }
}

/// Logs when a relay is dropped before it finished, i.e. the client left.
#[derive(Default)]
struct DisconnectGuard {
    chunks: usize,
    finished: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.finished {
            debug!(chunks = self.chunks, "client disconnected, upstream closed");
        }
    }
}

/// Frame output events for [`axum::response::Sse`]. Each event is flushed by
/// axum as its own body frame.
pub fn encode<S>(events: S) -> impl Stream<Item = Result<Event, Infallible>> + Send
where
    S: Stream<Item = OutputEvent> + Send,
{
    events.map(|event| Ok(to_sse_event(&event)))
}

pub fn to_sse_event(event: &OutputEvent) -> Event {
    match event {
        OutputEvent::Content(text) => Event::default().data(normalize_newlines(text)),
        OutputEvent::Done => Event::default().event("done").data("end"),
    }
}

/// The event format has no room for a bare `\r`; fold every line break to
/// `\n` so multi-line content becomes consecutive `data:` lines.
fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
