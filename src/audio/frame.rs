//! Fixed-size PCM audio frames.

use bytes::Bytes;

/// One capture/playback quantum of 16-bit PCM audio.
///
/// Frames are immutable once built and carry the monotonically increasing
/// sequence number assigned when the samples left (or arrived at) the device
/// boundary. The byte length is constant for the lifetime of a capture
/// session: `frame_size_samples * 2` for mono 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    seq: u64,
    data: Bytes,
}

impl AudioFrame {
    /// Build a frame from raw little-endian PCM bytes.
    pub fn new(seq: u64, data: impl Into<Bytes>) -> Self {
        Self {
            seq,
            data: data.into(),
        }
    }

    /// Sequence number assigned at capture time.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Raw PCM bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the frame, keeping only the PCM bytes.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Byte length of the frame.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_accessors() {
        let frame = AudioFrame::new(7, vec![1u8, 2, 3, 4]);
        assert_eq!(frame.seq(), 7);
        assert_eq!(frame.data(), &[1, 2, 3, 4]);
        assert_eq!(frame.len(), 4);
        assert!(!frame.is_empty());
    }
}
