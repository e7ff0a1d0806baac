//! Message types for the realtime voice protocol.
//!
//! All messages are JSON objects tagged by a `type` field. The enum covers
//! the kinds this client produces and consumes; every other inbound kind is
//! preserved verbatim as [`WireMessage::Unknown`] so the playback side can
//! ignore it without losing information.

use serde::{Deserialize, Serialize};

// =============================================================================
// Wire Messages
// =============================================================================

/// A single protocol message, outbound or inbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Append one base64-encoded PCM frame to the input audio buffer
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend {
        /// Base64-encoded PCM 16-bit audio
        audio: String,
    },

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    AudioCommit,

    /// Inject an item (side prompt) into the conversation
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Ask the model to generate a response
    #[serde(rename = "response.create")]
    ResponseCreate,

    /// One chunk of assistant audio (inbound only)
    #[serde(rename = "response.output_audio.delta")]
    AudioDelta {
        /// Base64-encoded PCM 16-bit audio
        delta: String,
    },

    /// One chunk of the assistant's audio transcript (inbound only)
    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta {
        /// Transcript text fragment
        delta: String,
    },

    /// Any message kind this client does not interpret, kept raw
    #[serde(skip)]
    Unknown(serde_json::Value),
}

impl WireMessage {
    /// Build a side-prompt item-create message.
    pub fn prompt(role: &str, text: &str) -> Self {
        WireMessage::ConversationItemCreate {
            item: ConversationItem {
                item_type: "message".to_string(),
                role: role.to_string(),
                content: vec![ContentPart {
                    content_type: "input_text".to_string(),
                    text: text.to_string(),
                }],
            },
        }
    }

    /// Parse an inbound JSON text frame.
    ///
    /// Never fails: kinds outside the known set, and malformed payloads of
    /// known kinds, come back as [`WireMessage::Unknown`] carrying the raw
    /// value.
    pub fn parse(text: &str) -> Self {
        if let Ok(msg) = serde_json::from_str::<WireMessage>(text) {
            return msg;
        }
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => WireMessage::Unknown(value),
            Err(_) => WireMessage::Unknown(serde_json::Value::String(text.to_string())),
        }
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            // Unknown is never produced locally, but round-trip it faithfully.
            WireMessage::Unknown(value) => serde_json::to_string(value),
            _ => serde_json::to_string(self),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item carried by `conversation.item.create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type (always "message" for side prompts)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role (system, user, assistant)
    pub role: String,
    /// Content parts
    pub content: Vec<ContentPart>,
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (always "input_text" for side prompts)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    pub text: String,
}

// =============================================================================
// Tests
// =============================================================================
