//! Terminal rendering of dialogue events.

use apollolytics_events::{
    event_names, ConversationEndedEvent, EventBus, NoticeEvent, StateChangedEvent,
    TranscriptUpdatedEvent, TurnState,
};
use apollolytics_transcript::{Role, TranscriptEntry};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

/// EventBus implementation that prints to the terminal.
#[derive(Default)]
pub struct ConsoleEventBus {
    /// Last printed content per entry id.
    printed: Mutex<HashMap<String, String>>,
}

impl ConsoleEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_state(&self, event: StateChangedEvent) {
        let hint = match event.state {
            TurnState::AwaitingUser => Some("press Enter to record, or type a reply"),
            TurnState::Recording => Some("recording... press Enter to send"),
            TurnState::AssistantSpeaking => Some("press Enter to interrupt"),
            _ => None,
        };
        if let Some(loading) = event.loading_message {
            println!("  ... {loading}");
        } else if let Some(hint) = hint {
            println!("  [{}] {hint}", event.state);
        }
    }

    fn on_transcript(&self, event: TranscriptUpdatedEvent) {
        let Ok(mut printed) = self.printed.lock() else {
            return;
        };
        for entry in event.entries.iter().filter(|e| e.is_final || e.is_placeholder) {
            if printed.get(&entry.id) == Some(&entry.content) {
                continue;
            }
            // Notices are printed as they are raised.
            if !entry.is_notice {
                println!("{}", render(entry));
            }
            printed.insert(entry.id.clone(), entry.content.clone());
        }
    }

    fn on_end(&self, event: ConversationEndedEvent) {
        if event.celebrate {
            println!("\n  *** Conversation complete. Thank you! ***\n");
        } else {
            println!("\n  Conversation ended.\n");
        }
    }
}

fn render(entry: &TranscriptEntry) -> String {
    let who = match entry.role {
        Role::User => "you",
        Role::Assistant => "bot",
    };
    if entry.is_placeholder {
        format!("{who:>4}: ({})", entry.content)
    } else {
        format!("{who:>4}: {}", entry.content)
    }
}

impl EventBus for ConsoleEventBus {
    fn emit(&self, topic: &str, payload: serde_json::Value) {
        match topic {
            event_names::STATE_CHANGED => {
                if let Ok(event) = serde_json::from_value(payload) {
                    self.on_state(event);
                }
            }
            event_names::TRANSCRIPT_UPDATED => {
                if let Ok(event) = serde_json::from_value(payload) {
                    self.on_transcript(event);
                }
            }
            event_names::NOTICE => {
                if let Ok(NoticeEvent { message }) = serde_json::from_value(payload) {
                    println!("   !  {message}");
                }
            }
            event_names::CONVERSATION_ENDED => {
                if let Ok(event) = serde_json::from_value(payload) {
                    self.on_end(event);
                }
            }
            other => tracing::debug!(topic = other, "unhandled event"),
        }
        let _ = std::io::stdout().flush();
    }
}
