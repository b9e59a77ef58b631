use crate::messages;
use apollolytics_audio::AudioError;
use apollolytics_events::TurnState;
use apollolytics_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("cannot {action} in state {state}")]
    InvalidState {
        action: &'static str,
        state: TurnState,
    },

    #[error("article text is empty")]
    EmptyArticle,

    #[error("voice recording is not available")]
    VoiceUnavailable,

    #[error("session is closed")]
    SessionClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("journal error: {0}")]
    Journal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DialogueError {
    /// Text shown to the participant for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            DialogueError::Transport(_) | DialogueError::SessionClosed => {
                messages::SERVER_UNREACHABLE
            }
            DialogueError::Audio(AudioError::Decode(_)) => messages::PLAYBACK_FAILED,
            DialogueError::Audio(_) | DialogueError::VoiceUnavailable => {
                messages::MICROPHONE_UNAVAILABLE
            }
            DialogueError::EmptyArticle => messages::EMPTY_ARTICLE,
            DialogueError::InvalidState { .. } => messages::NOT_NOW,
            DialogueError::Config(_) | DialogueError::Journal(_) | DialogueError::Io(_) => {
                messages::INTERNAL
            }
        }
    }
}

impl From<toml::de::Error> for DialogueError {
    fn from(e: toml::de::Error) -> Self {
        DialogueError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for DialogueError {
    fn from(e: serde_json::Error) -> Self {
        DialogueError::Journal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DialogueError>;
