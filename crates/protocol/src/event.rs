use crate::{event_types, Envelope};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// A typed inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    AssistantDelta(AssistantDelta),
    AssistantFinal(AssistantFinal),
    UserTranscript(UserTranscript),
    ConversationEnd { message: Option<String> },
    /// Backend application error reported over the socket.
    Error { message: String },
    Unknown { kind: String },
}

/// Incremental assistant output. Either field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssistantDelta {
    #[serde(default)]
    pub text: Option<String>,
    /// Base64 audio, optionally `data:audio/...;base64,` prefixed.
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub audio_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssistantFinal {
    /// Complete text; supersedes the accumulated deltas when present.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserTranscript {
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
}

impl UserTranscript {
    /// `transcript` wins over `text` when both are present.
    pub fn content(&self) -> Option<&str> {
        self.transcript
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.text.as_deref().filter(|s| !s.is_empty()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    message: Option<String>,
}

impl ServerEvent {
    pub fn from_envelope(envelope: Envelope) -> Self {
        let Envelope { kind, payload } = envelope;
        match kind.as_str() {
            event_types::ASSISTANT_DELTA => {
                let mut delta: AssistantDelta = payload_or_default(&kind, payload);
                delta.text = delta.text.filter(|t| !t.is_empty());
                delta.audio = delta.audio.filter(|a| !a.is_empty());
                ServerEvent::AssistantDelta(delta)
            }
            event_types::ASSISTANT_FINAL => {
                // Older backends send a status string ("Response complete.") instead of an object.
                let mut fin: AssistantFinal = payload_or_default(&kind, payload);
                fin.text = fin.text.filter(|t| !t.is_empty());
                ServerEvent::AssistantFinal(fin)
            }
            event_types::USER_TRANSCRIPT | event_types::INPUT_AUDIO_TRANSCRIPTION_COMPLETED => {
                ServerEvent::UserTranscript(payload_or_default(&kind, payload))
            }
            event_types::CONVERSATION_END => {
                let body: MessagePayload = payload_or_default(&kind, payload);
                ServerEvent::ConversationEnd {
                    message: body.message,
                }
            }
            event_types::ERROR => {
                let body: MessagePayload = payload_or_default(&kind, payload);
                ServerEvent::Error {
                    message: body.message.unwrap_or_else(|| "unknown error".to_string()),
                }
            }
            _ => ServerEvent::Unknown { kind },
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            ServerEvent::AssistantDelta(_) => event_types::ASSISTANT_DELTA,
            ServerEvent::AssistantFinal(_) => event_types::ASSISTANT_FINAL,
            ServerEvent::UserTranscript(_) => event_types::USER_TRANSCRIPT,
            ServerEvent::ConversationEnd { .. } => event_types::CONVERSATION_END,
            ServerEvent::Error { .. } => event_types::ERROR,
            ServerEvent::Unknown { kind } => kind,
        }
    }
}

fn payload_or_default<T: DeserializeOwned + Default>(kind: &str, payload: Value) -> T {
    if !payload.is_object() {
        return T::default();
    }
    serde_json::from_value(payload).unwrap_or_else(|e| {
        tracing::warn!(kind, error = %e, "malformed payload, ignoring fields");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: &str, payload: Value) -> ServerEvent {
        ServerEvent::from_envelope(Envelope::new(kind, payload))
    }

    #[test]
    fn test_delta_with_text_and_audio() {
        let ev = event(
            "assistant_delta",
            json!({"text": "Hello", "audio": "data:audio/wav;base64,AAAA", "audio_id": "a1"}),
        );
        let ServerEvent::AssistantDelta(delta) = ev else {
            panic!("expected delta");
        };
        assert_eq!(delta.text.as_deref(), Some("Hello"));
        assert_eq!(delta.audio.as_deref(), Some("data:audio/wav;base64,AAAA"));
        assert_eq!(delta.audio_id.as_deref(), Some("a1"));
    }

    #[test]
    fn test_empty_delta_fields_are_absent() {
        let ServerEvent::AssistantDelta(delta) = event("assistant_delta", json!({"text": ""})) else {
            panic!("expected delta");
        };
        assert!(delta.text.is_none());
        assert!(delta.audio.is_none());
    }

    #[test]
    fn test_final_with_status_string_payload() {
        assert_eq!(
            event("assistant_final", json!("Response complete.")),
            ServerEvent::AssistantFinal(AssistantFinal::default())
        );
    }

    #[test]
    fn test_final_with_text_and_id() {
        let ServerEvent::AssistantFinal(fin) =
            event("assistant_final", json!({"text": "Hello there", "id": "assistant_1"}))
        else {
            panic!("expected final");
        };
        assert_eq!(fin.text.as_deref(), Some("Hello there"));
        assert_eq!(fin.id.as_deref(), Some("assistant_1"));
    }

    #[test]
    fn test_both_transcript_event_names() {
        for kind in [
            "user_transcript",
            "conversation.item.input_audio_transcription.completed",
        ] {
            let ServerEvent::UserTranscript(t) =
                event(kind, json!({"transcript": "hello bot", "item_id": "u1"}))
            else {
                panic!("expected transcript for {kind}");
            };
            assert_eq!(t.content(), Some("hello bot"));
            assert_eq!(t.item_id.as_deref(), Some("u1"));
        }
    }

    #[test]
    fn test_transcript_falls_back_to_text() {
        let t = UserTranscript {
            transcript: Some(String::new()),
            text: Some("typed".into()),
            item_id: None,
        };
        assert_eq!(t.content(), Some("typed"));
    }

    #[test]
    fn test_conversation_end_and_error() {
        assert_eq!(
            event("conversation_end", json!({"message": "Thanks!"})),
            ServerEvent::ConversationEnd {
                message: Some("Thanks!".into())
            }
        );
        let env = Envelope::parse(r#"{"error":"No content provided in user message."}"#).unwrap();
        assert_eq!(
            ServerEvent::from_envelope(env),
            ServerEvent::Error {
                message: "No content provided in user message.".into()
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let ev = event("session.updated", json!({}));
        assert_eq!(ev.kind(), "session.updated");
    }
}
