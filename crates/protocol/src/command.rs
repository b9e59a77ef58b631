use serde::{Deserialize, Serialize};

/// Outbound command, serialized as `{ "type": "start" | "user", ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Start(StartConversation),
    User(UserTurn),
}

impl ClientCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientCommand::Start(_) => "start",
            ClientCommand::User(_) => "user",
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// First message on a fresh socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartConversation {
    pub article: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    /// Opaque participant identifier, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prolific_id: Option<String>,
}

/// One user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTurn {
    pub content: Vec<UserContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TurnTiming>,
}

impl UserTurn {
    /// A spoken turn carrying base64 audio.
    pub fn audio(data: impl Into<String>, format: Option<&str>) -> Self {
        Self {
            content: vec![UserContent::InputAudio {
                input_audio: InputAudio {
                    data: data.into(),
                    format: format.map(str::to_string),
                },
            }],
            timing: None,
        }
    }

    /// A turn whose text was produced on the client (typed or recognized locally).
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![UserContent::Text { text: text.into() }],
            timing: None,
        }
    }

    pub fn with_timing(mut self, timing: TurnTiming) -> Self {
        self.timing = Some(timing);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    InputAudio { input_audio: InputAudio },
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudio {
    /// Base64 without a data-URI prefix.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Response timing for the experiment, all in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurnTiming {
    /// From the end of the assistant turn until recording started.
    pub thinking_time: f64,
    pub recording_duration: f64,
    /// From the end of the assistant turn until the turn was sent.
    pub total_response_time: f64,
}
