//! Turn-taking core of the apollolytics dialogue client.
//!
//! A [`DialogueSession`] owns one conversation: the transport, the
//! microphone, the playback sequencer and the transcript. The
//! [`DialogueRunner`] feeds it from the channel, the shell and the playback
//! clock. The shell only sees what the session publishes on its event bus.

mod config;
mod error;
mod journal;
pub mod messages;
mod runner;
mod session;
mod voice;

pub use config::{
    DialogueConfig, DialogueMode, VoicePreference, DEFAULT_ENDPOINT, ENDPOINT_ENV, MODE_ENV,
    PROLIFIC_ID_ENV,
};
pub use error::{DialogueError, Result};
pub use journal::{
    FileJournal, Journal, JournalEntry, JournalLevel, JournalRef, MemoryJournal,
};
pub use runner::{DialogueOutcome, DialogueRunner, ShellCommand};
pub use session::{CaptureDone, CaptureJob, DecodeJob, DialogueSession};
pub use voice::VoiceCapability;

pub use apollolytics_events::TurnState;
