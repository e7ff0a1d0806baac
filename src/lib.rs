//! Duplex realtime voice streaming over a websocket protocol connection.
//!
//! The crate captures microphone PCM, ships it to a realtime peer as
//! atomic append+commit units, plays the peer's audio deltas back to the
//! speaker, and injects timed side prompts into the running conversation.
//! [`session::StreamSession`] is the entry point; everything underneath is
//! reachable through trait seams so the full lifecycle is testable without
//! hardware or a live peer.

pub mod audio;
pub mod bookkeeping;
pub mod config;
pub mod protocol;
pub mod session;

pub use audio::{AudioFrame, CaptureSource, DeviceError, PlaybackSink};
pub use bookkeeping::{BookkeepingError, DocumentStoreBookkeeper, LogBookkeeper, SessionBookkeeper};
pub use config::{ConfigError, SessionConfig, SidePrompt};
pub use protocol::{
    CodecError, ConnectError, FrameCodec, InboundSource, OutboundSink, SendError, WireMessage,
};
pub use session::{SessionError, SessionReport, SessionState, SessionTransport, StreamSession};
