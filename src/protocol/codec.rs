//! Frame codec: PCM bytes to and from the text-safe wire payload.
//!
//! Audio travels inside JSON envelopes, so every frame is base64-encoded on
//! the way out and decoded on the way in. The codec knows nothing about
//! ordering; the connection's single ordered transport owns that.

use base64::prelude::*;
use thiserror::Error;

use crate::audio::AudioFrame;

use super::messages::WireMessage;

/// A malformed audio payload. Non-fatal: the consuming relay logs the error
/// and drops the frame without stopping the stream.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload used characters outside the base64 alphabet
    #[error("invalid base64 audio payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
}

/// Encoder/decoder between [`AudioFrame`] and the wire representation.
///
/// Decoding is stateful only to tag inbound frames with their arrival order;
/// outbound frames keep the sequence number assigned at capture time.
#[derive(Debug, Default)]
pub struct FrameCodec {
    next_inbound_seq: u64,
}

impl FrameCodec {
    /// Create a codec with a fresh inbound sequence counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap one captured frame as an append message.
    pub fn encode(frame: &AudioFrame) -> WireMessage {
        WireMessage::AudioAppend {
            audio: BASE64_STANDARD.encode(frame.data()),
        }
    }

    /// Recover a frame from an inbound message.
    ///
    /// Returns `Ok(None)` for every non-audio kind. A delta whose payload is
    /// not valid base64 is a [`CodecError`].
    pub fn decode(&mut self, msg: &WireMessage) -> Result<Option<AudioFrame>, CodecError> {
        let WireMessage::AudioDelta { delta } = msg else {
            return Ok(None);
        };
        let bytes = BASE64_STANDARD.decode(delta)?;
        let frame = AudioFrame::new(self.next_inbound_seq, bytes);
        self.next_inbound_seq += 1;
        Ok(Some(frame))
    }
}

// =============================================================================
// Tests
// =============================================================================
