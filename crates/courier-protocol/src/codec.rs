//! Codec for encoding and decoding protocol frames.
//!
//! Frames travel as UTF-8 JSON text messages, one frame per WebSocket
//! message. There is no length prefix; the transport delimits frames.

use bytes::Bytes;
use thiserror::Error;

use crate::events::WireEvent;

/// Maximum accepted inbound frame size (64 KiB).
///
/// This bounds what a client may send in a single message; the 10 kB cap on
/// triggered event payloads is enforced separately by the caller.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("Invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame that requires a payload arrived without one.
    #[error("Missing data payload for {0}")]
    MissingData(&'static str),
}

/// Encode a frame to JSON bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(frame: &WireEvent) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(frame)?;
    Ok(Bytes::from(payload))
}

/// Decode a frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is oversized or not a valid frame.
pub fn decode(text: &str) -> Result<WireEvent, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}
