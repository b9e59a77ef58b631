#![allow(dead_code)]

use apollolytics_audio::{ManualSink, ScriptedCapture};
use apollolytics_dialogue::{
    DialogueConfig, DialogueSession, MemoryJournal, Result, VoiceCapability,
};
use apollolytics_events::{event_names, InMemoryEventBus, StateChangedEvent, TurnState};
use apollolytics_protocol::Envelope;
use apollolytics_transport::ChannelEvent;
use base64::Engine;
use std::sync::Arc;

pub struct Fixture {
    pub capture: ScriptedCapture,
    pub sink: ManualSink,
    pub bus: Arc<InMemoryEventBus>,
    pub journal: Arc<MemoryJournal>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            capture: ScriptedCapture::new(24_000),
            sink: ManualSink::new(),
            bus: Arc::new(InMemoryEventBus::new()),
            journal: Arc::new(MemoryJournal::new()),
        }
    }

    pub fn session(&self, config: DialogueConfig) -> DialogueSession {
        self.session_with_voice(
            config,
            VoiceCapability::AudioPipeline(Box::new(self.capture.clone())),
        )
    }

    pub fn session_with_voice(
        &self,
        config: DialogueConfig,
        voice: VoiceCapability,
    ) -> DialogueSession {
        DialogueSession::new(
            config,
            voice,
            Box::new(self.sink.clone()),
            self.bus.clone(),
            self.journal.clone(),
        )
    }

    pub fn states(&self) -> Vec<TurnState> {
        self.bus
            .payloads::<StateChangedEvent>(event_names::STATE_CHANGED)
            .into_iter()
            .map(|e| e.state)
            .collect()
    }
}

pub fn message(kind: &str, payload: serde_json::Value) -> ChannelEvent {
    ChannelEvent::Message(Envelope::new(kind, payload))
}

/// Base64 PCM16 silence lasting `secs` at 24 kHz.
pub fn pcm_payload(secs: f64) -> String {
    let samples = (secs * 24_000.0).round() as usize;
    base64::engine::general_purpose::STANDARD.encode(vec![0u8; samples * 2])
}

/// Decode everything the session queued, completing in reverse order.
pub fn decode_all_reversed(session: &mut DialogueSession) {
    let jobs = session.take_decode_jobs();
    let results: Vec<_> = jobs.into_iter().map(|job| job.run()).collect();
    for (ticket, decoded) in results.into_iter().rev() {
        session.on_fragment_decoded(ticket, decoded);
    }
}

/// Run the pending microphone job inline, as the runner does off-thread.
pub fn finish_capture(session: &mut DialogueSession) -> Result<()> {
    match session.take_capture_job() {
        Some(job) => session.on_capture_done(job.run()),
        None => Ok(()),
    }
}

pub fn start_recording(session: &mut DialogueSession) -> Result<()> {
    session.start_recording()?;
    finish_capture(session)
}

pub fn stop_recording(session: &mut DialogueSession) -> Result<()> {
    session.stop_recording()?;
    finish_capture(session)
}
