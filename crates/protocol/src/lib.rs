//! Wire contracts for the conversation socket.
//!
//! Both directions are JSON text frames. Inbound frames are
//! `{ "type": ..., "payload": ... }` envelopes; outbound commands are
//! internally tagged by `type`. Using shared types keeps the client and the
//! tests agreeing on field names.

mod command;
mod event;

pub use command::{ClientCommand, InputAudio, StartConversation, TurnTiming, UserContent, UserTurn};
pub use event::{AssistantDelta, AssistantFinal, ServerEvent, UserTranscript};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound event type names as constants to prevent typos.
pub mod event_types {
    pub const ASSISTANT_DELTA: &str = "assistant_delta";
    pub const ASSISTANT_FINAL: &str = "assistant_final";
    pub const USER_TRANSCRIPT: &str = "user_transcript";
    /// Realtime-API style transcription event, treated like `user_transcript`.
    pub const INPUT_AUDIO_TRANSCRIPTION_COMPLETED: &str =
        "conversation.item.input_audio_transcription.completed";
    pub const CONVERSATION_END: &str = "conversation_end";
    /// Synthesized for `{"error": "..."}` frames.
    pub const ERROR: &str = "error";
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("frame has no type")]
    MissingType,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// One inbound frame after envelope deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Parse a text frame.
    ///
    /// The backend reports failures as bare `{"error": "..."}` objects with no
    /// `type`; those become an `error` envelope with `payload.message`.
    pub fn parse(frame: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(frame)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        if let Some(kind) = map.get("type").and_then(Value::as_str) {
            let kind = kind.to_string();
            let payload = map.remove("payload").unwrap_or(Value::Null);
            return Ok(Self { kind, payload });
        }

        match map.remove("error") {
            Some(error) => {
                let message = match error {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Ok(Self::new(
                    event_types::ERROR,
                    serde_json::json!({ "message": message }),
                ))
            }
            None => Err(ProtocolError::MissingType),
        }
    }
}
