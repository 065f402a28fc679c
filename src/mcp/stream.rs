//! Event Stream Framing
//!
//! The tool server pushes server-sent events over one long-lived GET. This
//! module turns the raw byte stream into frames and classifies each frame:
//!
//! - a session announcement (`/messages/?session_id=...`) carrying the callback
//!   endpoint every POST must go to
//! - a JSON-RPC result or error for an outstanding tool call
//! - keep-alive pings and anything else, which are ignored
//!
//! Decoding never fails: a frame that cannot be understood is logged and
//! classified as [`StreamEvent::Ignored`] so the read loop keeps going.

use crate::mcp::protocol::{McpError, McpResponse};
use crate::mcp::transport::FrameStream;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;

/// Server-assigned session identity for one stream lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    /// Session identifier extracted from the announcement
    pub session_id: String,

    /// Callback path (or absolute URL) that calls are POSTed to
    pub callback_endpoint: String,
}

impl SessionDescriptor {
    /// Resolve the callback endpoint against the server base URL
    pub fn callback_url(&self, base_url: &str) -> String {
        if self.callback_endpoint.starts_with("http://")
            || self.callback_endpoint.starts_with("https://")
        {
            return self.callback_endpoint.clone();
        }
        format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            self.callback_endpoint
        )
    }
}

/// Semantic meaning of one frame
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A new session has been announced
    SessionReady(SessionDescriptor),

    /// A tool call identified by `id` has settled
    CallSettled {
        id: String,
        outcome: Result<Value, McpError>,
    },

    /// Keep-alive comment
    Ping,

    /// Anything else (unparseable, notifications, unknown shapes)
    Ignored,
}

/// Extracts the session token from an announcement
struct SessionTokenParser {
    key: &'static str,
    accept: fn(char) -> bool,
}

impl SessionTokenParser {
    fn parse(&self, frame: &str) -> Option<String> {
        let start = frame.find(self.key)? + self.key.len();
        let token: String = frame[start..]
            .chars()
            .take_while(|c| (self.accept)(*c))
            .collect();
        (!token.is_empty()).then_some(token)
    }
}

fn is_uuid_char(c: char) -> bool {
    c.is_ascii_hexdigit() || c == '-'
}

fn is_hex_char(c: char) -> bool {
    c.is_ascii_hexdigit()
}

/// Known session token encodings, tried in order.
const SESSION_TOKEN_PARSERS: &[SessionTokenParser] = &[
    SessionTokenParser {
        key: "sessionId=",
        accept: is_uuid_char,
    },
    SessionTokenParser {
        key: "session_id=",
        accept: is_hex_char,
    },
];

/// Parse a session announcement frame
///
/// Returns `None` when the frame is not an announcement or no known token
/// encoding matches.
pub fn parse_session_announcement(frame: &str) -> Option<SessionDescriptor> {
    let frame = frame.trim();
    let looks_like_endpoint = frame.starts_with('/')
        || frame.starts_with("http://")
        || frame.starts_with("https://")
        || SESSION_TOKEN_PARSERS.iter().any(|p| frame.contains(p.key));
    if !looks_like_endpoint {
        return None;
    }

    let session_id = SESSION_TOKEN_PARSERS
        .iter()
        .find_map(|parser| parser.parse(frame))?;

    Some(SessionDescriptor {
        session_id,
        callback_endpoint: frame.to_string(),
    })
}

/// Classify one frame
pub fn decode_frame(frame: &str) -> StreamEvent {
    let frame = frame.trim();
    if frame.is_empty() {
        return StreamEvent::Ignored;
    }
    if frame.starts_with(':') {
        return StreamEvent::Ping;
    }

    let payload = frame
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(frame);

    if payload.starts_with('{') {
        return decode_json(payload);
    }

    if let Some(descriptor) = parse_session_announcement(payload) {
        return StreamEvent::SessionReady(descriptor);
    }

    tracing::debug!(
        "Ignoring non-JSON stream frame: {}",
        payload.chars().take(100).collect::<String>()
    );
    StreamEvent::Ignored
}

fn decode_json(payload: &str) -> StreamEvent {
    let response: McpResponse = match serde_json::from_str(payload) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("Ignoring malformed JSON frame: {}", e);
            return StreamEvent::Ignored;
        }
    };

    let Some(id) = response.id_key() else {
        tracing::trace!("Ignoring JSON frame without id");
        return StreamEvent::Ignored;
    };

    match response.into_outcome() {
        Some(outcome) => StreamEvent::CallSettled { id, outcome },
        None => StreamEvent::Ignored,
    }
}

/// Incremental server-sent events splitter
///
/// Events are separated by a blank line. `data:` lines of one event are joined
/// with newlines; an event with no data but a comment line (`: ping`) yields the
/// comment itself so the decoder can recognise keep-alives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and collect every completed frame
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = find_event_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = event_to_frame(&String::from_utf8_lossy(&event[..end])) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing event that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        event_to_frame(&String::from_utf8_lossy(&rest))
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn event_to_frame(event: &str) -> Option<String> {
    let mut data: Option<String> = None;
    let mut comment: Option<&str> = None;

    for line in event.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        } else if line.starts_with(':') {
            comment.get_or_insert(line);
        }
        // event:, id: and retry: fields carry nothing we need
    }

    match (data, comment) {
        (Some(data), _) if !data.trim().is_empty() => Some(data),
        (_, Some(comment)) => Some(comment.to_string()),
        _ => None,
    }
}

/// Adapt a byte stream (e.g. `reqwest::Response::bytes_stream`) into frames
pub fn sse_frames<S, B, E>(bytes: S) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let bytes = Box::pin(bytes);
    let frames = stream::unfold(
        (bytes, SseDecoder::new(), std::collections::VecDeque::new(), false),
        |(mut bytes, mut decoder, mut ready, mut done)| async move {
            loop {
                if let Some(frame) = ready.pop_front() {
                    return Some((Ok(frame), (bytes, decoder, ready, done)));
                }
                if done {
                    return None;
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => ready.extend(decoder.push(chunk.as_ref())),
                    Some(Err(e)) => {
                        done = true;
                        return Some((
                            Err(anyhow::anyhow!("Event stream read error: {}", e)),
                            (bytes, decoder, ready, done),
                        ));
                    }
                    None => {
                        done = true;
                        ready.extend(decoder.finish());
                    }
                }
            }
        },
    );
    Box::pin(frames)
}
