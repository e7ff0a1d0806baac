//! Wire protocol for the realtime voice endpoint.
//!
//! The protocol is JSON-framed over a single WebSocket connection:
//!
//! Outbound (client to server):
//! - input_audio_buffer.append - Append one base64-encoded PCM frame
//! - input_audio_buffer.commit - Commit the appended frame
//! - conversation.item.create - Inject a side prompt into the conversation
//! - response.create - Ask the model to generate a response
//!
//! Inbound (server to client):
//! - response.output_audio.delta - One base64-encoded chunk of assistant audio
//! - response.audio_transcript.delta - One text fragment of the assistant transcript
//! - anything else is carried opaquely as [`WireMessage::Unknown`]
//!
//! The connection serializes all outbound traffic through a single writer
//! task; inbound messages are consumed as a pull-based sequence rather than
//! through callbacks.

pub mod codec;
pub mod connection;
pub mod messages;

pub use codec::{CodecError, FrameCodec};
pub use connection::{
    CloseError, ConnectError, ConnectionCloser, InboundSource, InboundStream, MessageSender,
    OutboundSink, ProtocolConnection, SendError, WsCloser,
};
pub use messages::{ContentPart, ConversationItem, WireMessage};
