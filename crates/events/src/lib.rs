//! Event contracts between the dialogue core and the presentation shell.
//!
//! The shell never reads session state directly; everything it renders
//! arrives as one of these payloads on an [`EventBus`]. Shared types keep
//! the two sides agreeing on field names.

mod bus;

pub use bus::{EmittedEvent, EventBus, EventBusExt, EventBusRef, InMemoryEventBus, NullEventBus};

use apollolytics_transcript::TranscriptEntry;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Turn-taking state of a dialogue session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TurnState {
    Idle,
    Starting,
    AssistantSpeaking,
    AwaitingUser,
    Recording,
    Thinking,
    Ended,
    Error,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Starting => "starting",
            TurnState::AssistantSpeaking => "assistant-speaking",
            TurnState::AwaitingUser => "awaiting-user",
            TurnState::Recording => "recording",
            TurnState::Thinking => "thinking",
            TurnState::Ended => "ended",
            TurnState::Error => "error",
        }
    }

    /// No further transitions happen from here.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Ended | TurnState::Error)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Producers: dialogue session
/// Consumers: shell (status line, record button)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangedEvent {
    pub state: TurnState,
    /// Short progress text while waiting ("Analyzing article...", "Thinking...").
    #[serde(default)]
    pub loading_message: Option<String>,
}

/// Full transcript snapshot after any change.
///
/// Producers: dialogue session
/// Consumers: shell (conversation view)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptUpdatedEvent {
    pub entries: Vec<TranscriptEntry>,
}

/// Transient user-visible message that is not a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeEvent {
    pub message: String,
}

/// Producers: dialogue session
/// Consumers: shell (end screen)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEndedEvent {
    #[serde(default)]
    pub message: Option<String>,
    /// Show the end-of-conversation celebration.
    #[serde(default)]
    pub celebrate: bool,
}

/// Event names as constants to prevent typos.
pub mod event_names {
    pub const STATE_CHANGED: &str = "dialogue:state_changed";
    pub const TRANSCRIPT_UPDATED: &str = "dialogue:transcript_updated";
    pub const NOTICE: &str = "dialogue:notice";
    pub const CONVERSATION_ENDED: &str = "dialogue:conversation_ended";
}
