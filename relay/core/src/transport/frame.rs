//! Event Frame Protocol
//!
//! Text wire format for server-originated events.
//!
//! # Frame Format
//!
//! ```text
//! event: <type>\n
//! data: <json>\n
//! \n
//! ```
//!
//! Frames are self-delimited by a blank line. Lines starting with `:` are
//! comments (heartbeats, stream markers) and never surface as frames.
//!
//! # Decoding
//!
//! - Bytes are buffered, not text, so multi-byte characters may straddle reads
//! - `event:` and `data:` may appear in either order; a frame missing either is dropped
//! - A malformed payload is reported for that frame only; decoding continues
//! - Buffered bytes without a terminator are capped at [`MAX_FRAME_SIZE`]

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Maximum bytes buffered for a single unterminated frame (10 MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Frame terminator
const SEPARATOR: &[u8] = b"\n\n";

const EVENT_PREFIX: &str = "event:";
const DATA_PREFIX: &str = "data:";

/// One decoded frame
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Value of the `event:` line
    pub event_type: String,
    /// Parsed `data:` payload
    pub data: Value,
}

impl Frame {
    /// Create a frame
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Encode this frame to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode(&self.event_type, &self.data)
    }
}

/// Errors produced by the frame codec
///
/// All decode errors are scoped to a single frame; the decoder stays usable.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Event type cannot be written on a single line
    #[error("Invalid event type {0:?}")]
    InvalidEventType(String),

    /// Payload serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// `data:` line is not valid JSON
    #[error("Invalid JSON payload for event {event_type:?}: {message}")]
    InvalidJson {
        /// Event type of the offending frame
        event_type: String,
        /// Parser message
        message: String,
    },

    /// Frame bytes are not UTF-8
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    /// Unterminated frame grew past the cap
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Bytes buffered
        size: usize,
        /// Configured cap
        max: usize,
    },
}

/// Encode a named event with a JSON payload
///
/// # Errors
///
/// Returns `FrameError::InvalidEventType` if the type is empty or contains a
/// line break, and `FrameError::Serialization` if the payload cannot be
/// serialized.
pub fn encode<T: Serialize + ?Sized>(event_type: &str, data: &T) -> Result<Vec<u8>, FrameError> {
    if event_type.is_empty() || event_type.contains(['\n', '\r']) {
        return Err(FrameError::InvalidEventType(event_type.to_string()));
    }

    // serde_json never emits raw newlines, so the payload stays on one line
    let json = serde_json::to_vec(data).map_err(|e| FrameError::Serialization(e.to_string()))?;

    let mut buf = Vec::with_capacity(EVENT_PREFIX.len() + event_type.len() + json.len() + 16);
    buf.extend_from_slice(b"event: ");
    buf.extend_from_slice(event_type.as_bytes());
    buf.extend_from_slice(b"\ndata: ");
    buf.extend_from_slice(&json);
    buf.extend_from_slice(SEPARATOR);
    Ok(buf)
}

/// Encode a comment frame (`: <text>\n\n`)
///
/// Line breaks in `text` are replaced with spaces.
#[must_use]
pub fn encode_comment(text: &str) -> Vec<u8> {
    let text = text.replace(['\n', '\r'], " ");
    format!(": {text}\n\n").into_bytes()
}

/// Decoder state machine for streaming frame parsing
///
/// Buffers incoming bytes and yields complete frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
    /// Bytes past `read_pos` already searched without finding a separator
    scanned: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            scanned: 0,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of buffered bytes not yet consumed
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was decoded
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the next complete frame is malformed; it has been
    ///   consumed and the following call continues with the next frame
    pub fn decode(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            let pending = &self.buffer[self.read_pos..];
            // A separator may straddle the previous scan's end
            let resume = self.scanned.saturating_sub(SEPARATOR.len() - 1);
            let Some(offset) = find_separator(&pending[resume..]) else {
                if pending.len() > MAX_FRAME_SIZE {
                    let size = pending.len();
                    self.clear();
                    return Err(FrameError::FrameTooLarge {
                        size,
                        max: MAX_FRAME_SIZE,
                    });
                }
                self.scanned = pending.len();
                return Ok(None);
            };

            let block_start = self.read_pos;
            let block_end = block_start + resume + offset;
            self.read_pos = block_end + SEPARATOR.len();
            self.scanned = 0;

            if let Some(frame) = parse_block(&self.buffer[block_start..block_end])? {
                return Ok(Some(frame));
            }
            // Comment or incomplete block: keep scanning
        }
    }

    /// Push a chunk and decode every frame it completes
    pub fn feed(&mut self, data: &[u8]) -> Vec<Result<Frame, FrameError>> {
        self.push(data);
        let mut out = Vec::new();
        loop {
            match self.decode() {
                Ok(Some(frame)) => out.push(Ok(frame)),
                Ok(None) => break,
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.scanned = 0;
    }
}

fn find_separator(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(SEPARATOR.len())
        .position(|window| window == SEPARATOR)
}

/// Parse one separator-delimited block
///
/// `Ok(None)` means the block carries no typed frame (comment-only, or
/// missing its event or data line).
fn parse_block(block: &[u8]) -> Result<Option<Frame>, FrameError> {
    let text = std::str::from_utf8(block).map_err(|_| FrameError::InvalidUtf8)?;

    let mut event_type = None;
    let mut data = None;
    for line in text.lines() {
        if event_type.is_none() {
            if let Some(rest) = line.strip_prefix(EVENT_PREFIX) {
                event_type = Some(rest.trim());
                continue;
            }
        }
        if data.is_none() {
            if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
                data = Some(rest.trim());
            }
        }
    }

    let (Some(event_type), Some(data)) = (event_type, data) else {
        if !text.trim_start().starts_with(':') {
            tracing::trace!(block = %text, "Dropping frame without event or data line");
        }
        return Ok(None);
    };

    let data = serde_json::from_str(data).map_err(|e| FrameError::InvalidJson {
        event_type: event_type.to_string(),
        message: e.to_string(),
    })?;

    Ok(Some(Frame::new(event_type, data)))
}
