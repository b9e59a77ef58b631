//! The dialogue session: one conversation, from `start` to the end.
//!
//! All state changes go through named transitions on [`DialogueSession`].
//! The session is synchronous; the runner feeds it channel events, shell
//! commands, decode and capture completions and playback ticks in arrival
//! order. Work that can block (decoding, opening or closing the microphone)
//! is handed out as jobs and reported back when done.

use crate::config::DialogueConfig;
use crate::journal::{JournalLevel, JournalRef};
use crate::messages;
use crate::voice::VoiceCapability;
use crate::{DialogueError, Result};
use apollolytics_audio::{
    decode_fragment, AudioError, AudioFormat, AudioSink, CapturedUtterance, DecodedAudio,
    FragmentTicket, PlaybackSequencer, PlaybackSignal, VoiceCapture,
};
use apollolytics_events::{
    event_names, ConversationEndedEvent, EventBusExt, EventBusRef, NoticeEvent, StateChangedEvent,
    TranscriptUpdatedEvent, TurnState,
};
use apollolytics_protocol::{
    AssistantDelta, AssistantFinal, ClientCommand, ServerEvent, StartConversation, TurnTiming,
    UserTranscript, UserTurn,
};
use apollolytics_transcript::{Role, Transcript};
use apollolytics_transport::{ChannelEvent, Transport, TransportError, TransportExt};
use serde_json::json;
use std::time::Instant;
use uuid::Uuid;

/// Assistant output collected since the turn began.
#[derive(Debug, Default)]
struct UtteranceBuffer {
    text: String,
    saw_audio: bool,
    final_received: bool,
    final_text: Option<String>,
    id: Option<String>,
}

impl UtteranceBuffer {
    /// Final text wins over the streamed deltas when the backend sent one.
    fn resolved_text(&self) -> &str {
        self.final_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.text)
    }
}

/// A fragment waiting to be decoded off the session thread.
#[derive(Debug, Clone)]
pub struct DecodeJob {
    pub ticket: FragmentTicket,
    pub payload: String,
    pub format: AudioFormat,
}

impl DecodeJob {
    pub fn run(self) -> (FragmentTicket, apollolytics_audio::Result<DecodedAudio>) {
        let decoded = decode_fragment(&self.payload, self.format);
        (self.ticket, decoded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureAction {
    Start,
    Stop,
}

/// A microphone operation to run off the session thread. The device
/// travels with the job and comes back in its [`CaptureDone`].
pub struct CaptureJob {
    action: CaptureAction,
    capture: Box<dyn VoiceCapture>,
}

impl CaptureJob {
    pub fn run(self) -> CaptureDone {
        let CaptureJob {
            action,
            mut capture,
        } = self;
        let result = match action {
            CaptureAction::Start => CaptureResult::Started(capture.start()),
            CaptureAction::Stop => CaptureResult::Stopped(capture.stop()),
        };
        CaptureDone { capture, result }
    }
}

enum CaptureResult {
    Started(apollolytics_audio::Result<()>),
    Stopped(apollolytics_audio::Result<CapturedUtterance>),
}

pub struct CaptureDone {
    capture: Box<dyn VoiceCapture>,
    result: CaptureResult,
}

#[derive(Debug, Default)]
struct TurnClock {
    awaiting_since: Option<Instant>,
    recording_started: Option<Instant>,
}

pub struct DialogueSession {
    id: Uuid,
    config: DialogueConfig,
    state: TurnState,
    loading: Option<String>,
    transcript: Transcript,
    buffer: Option<UtteranceBuffer>,
    transport: Option<Box<dyn Transport>>,
    voice_name: &'static str,
    is_audio: bool,
    /// `None` while a capture job holds the device.
    capture: Option<Box<dyn VoiceCapture>>,
    capture_job: Option<CaptureJob>,
    playback: PlaybackSequencer,
    bus: EventBusRef,
    journal: JournalRef,
    decode_jobs: Vec<DecodeJob>,
    pending_turn: Option<UserTurn>,
    clock: TurnClock,
    closed: bool,
}

impl DialogueSession {
    pub fn new(
        config: DialogueConfig,
        voice: VoiceCapability,
        sink: Box<dyn AudioSink>,
        bus: EventBusRef,
        journal: JournalRef,
    ) -> Self {
        let id = Uuid::new_v4();
        let voice_name = voice.name();
        let is_audio = voice.is_audio();
        tracing::info!(session = %id, mode = %config.mode, voice = voice_name, "dialogue session created");
        Self {
            id,
            config,
            state: TurnState::Idle,
            loading: None,
            transcript: Transcript::new(),
            buffer: None,
            transport: None,
            voice_name,
            is_audio,
            capture: voice.into_capture(),
            capture_job: None,
            playback: PlaybackSequencer::new(sink),
            bus,
            journal,
            decode_jobs: Vec::new(),
            pending_turn: None,
            clock: TurnClock::default(),
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn loading_message(&self) -> Option<&str> {
        self.loading.as_deref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn config(&self) -> &DialogueConfig {
        &self.config
    }

    pub fn voice_name(&self) -> &'static str {
        self.voice_name
    }

    /// The microphone is being opened or closed off the session thread.
    pub fn capture_in_flight(&self) -> bool {
        self.is_audio && self.capture.is_none()
    }

    pub fn playback_idle(&self) -> bool {
        self.playback.is_idle()
    }

    pub fn has_pending_turn(&self) -> bool {
        self.pending_turn.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn validate_article(article: &str) -> Result<()> {
        if article.trim().is_empty() {
            return Err(DialogueError::EmptyArticle);
        }
        Ok(())
    }

    /// `idle -> starting`: take ownership of an opened transport and send
    /// the `start` command.
    pub fn begin(&mut self, article: &str, transport: Box<dyn Transport>) -> Result<()> {
        if self.closed {
            transport.close();
            return Err(DialogueError::SessionClosed);
        }
        if self.state != TurnState::Idle {
            transport.close();
            return Err(self.invalid("start the conversation"));
        }
        if let Err(e) = Self::validate_article(article) {
            transport.close();
            return Err(e);
        }

        let command = ClientCommand::Start(StartConversation {
            article: article.to_string(),
            mode: self.config.mode.as_str().to_string(),
            origin_url: self.config.origin_url.clone(),
            prolific_id: self.config.prolific_id.clone(),
        });
        if let Err(e) = transport.send(&command) {
            transport.close();
            self.fail(&format!("failed to send start: {e}"));
            return Err(e.into());
        }

        self.transport = Some(transport);
        self.record(
            JournalLevel::Info,
            "conversation started",
            Some(json!({
                "mode": self.config.mode.as_str(),
                "article_chars": article.chars().count(),
                "endpoint": self.config.endpoint,
            })),
        );
        self.set_state(TurnState::Starting, Some(messages::ANALYZING_ARTICLE));
        Ok(())
    }

    /// The channel could not be opened.
    pub fn connection_failed(&mut self, error: &TransportError) {
        self.fail(&error.to_string());
    }

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => tracing::debug!(session = %self.id, "channel opened"),
            ChannelEvent::Message(envelope) => {
                self.handle_server_event(ServerEvent::from_envelope(envelope))
            }
            ChannelEvent::Error(reason) => self.fail(&reason),
            ChannelEvent::Closed { reason } => {
                if !self.state.is_terminal() {
                    let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                    self.fail(&reason);
                }
            }
        }
    }

    pub fn handle_server_event(&mut self, event: ServerEvent) {
        if self.state.is_terminal() {
            tracing::debug!(kind = event.kind(), state = %self.state, "ignoring event after session end");
            return;
        }
        match event {
            ServerEvent::AssistantDelta(delta) => self.on_assistant_delta(delta),
            ServerEvent::AssistantFinal(fin) => self.on_assistant_final(fin),
            ServerEvent::UserTranscript(t) => self.on_user_transcript(t),
            ServerEvent::ConversationEnd { message } => self.on_conversation_end(message),
            ServerEvent::Error { message } => self.on_backend_error(message),
            ServerEvent::Unknown { kind } => tracing::debug!(%kind, "ignoring unknown event"),
        }
    }

    fn on_assistant_delta(&mut self, delta: AssistantDelta) {
        match self.state {
            TurnState::AssistantSpeaking => {}
            TurnState::Starting | TurnState::Thinking => self.begin_assistant_turn(),
            state => {
                tracing::debug!(%state, "ignoring assistant delta outside an assistant turn");
                return;
            }
        }

        let format = self.config.playback;
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };
        if let Some(text) = delta.text {
            buffer.text.push_str(&text);
        }
        if let Some(audio) = delta.audio {
            buffer.saw_audio = true;
            let ticket = self.playback.enqueue();
            self.decode_jobs.push(DecodeJob {
                ticket,
                payload: audio,
                format,
            });
        }
    }

    fn begin_assistant_turn(&mut self) {
        self.buffer = Some(UtteranceBuffer::default());
        self.set_state(TurnState::AssistantSpeaking, None);
    }

    fn on_assistant_final(&mut self, fin: AssistantFinal) {
        match self.state {
            TurnState::AssistantSpeaking => {}
            // A reply with no streamed deltas still forms a turn.
            TurnState::Starting | TurnState::Thinking => self.begin_assistant_turn(),
            state => {
                tracing::debug!(%state, "ignoring assistant final outside an assistant turn");
                return;
            }
        }
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.final_received = true;
            if fin.text.is_some() {
                buffer.final_text = fin.text;
            }
            if fin.id.is_some() {
                buffer.id = fin.id;
            }
        }
        self.maybe_finish_assistant_turn();
    }

    /// `assistant-speaking -> awaiting-user` once the final arrived and all
    /// of the turn's audio has been heard.
    fn maybe_finish_assistant_turn(&mut self) {
        let ready = self.state == TurnState::AssistantSpeaking
            && self.buffer.as_ref().is_some_and(|b| b.final_received)
            && self.playback.is_idle();
        if !ready {
            return;
        }
        if let Some(buffer) = self.buffer.take() {
            self.flush_buffer(buffer);
        }
        self.clock.awaiting_since = Some(Instant::now());
        self.set_state(TurnState::AwaitingUser, None);
    }

    fn flush_buffer(&mut self, buffer: UtteranceBuffer) {
        let text = buffer.resolved_text().trim().to_string();
        if text.is_empty() {
            tracing::debug!(audio = buffer.saw_audio, "assistant turn had no text");
            return;
        }
        self.transcript
            .finalize_pending(Role::Assistant, buffer.id.clone(), text);
        self.record(
            JournalLevel::Info,
            "assistant turn complete",
            Some(json!({ "id": buffer.id, "audio": buffer.saw_audio })),
        );
        self.emit_transcript();
    }

    fn on_user_transcript(&mut self, transcript: UserTranscript) {
        let Some(content) = transcript.content() else {
            tracing::debug!("ignoring empty user transcript");
            return;
        };
        let outcome = self
            .transcript
            .fill_placeholder(content, transcript.item_id.as_deref());
        tracing::debug!(?outcome, "user transcript received");
        self.emit_transcript();
    }

    fn on_conversation_end(&mut self, message: Option<String>) {
        if let Some(buffer) = self.buffer.take() {
            self.flush_buffer(buffer);
        }
        if let Some(message) = message.as_deref().filter(|m| !m.trim().is_empty()) {
            self.transcript.append_notice(message);
            self.emit_transcript();
        }
        self.release_microphone();
        self.close_transport();
        self.record(JournalLevel::Info, "conversation ended", None);
        self.set_state(TurnState::Ended, None);
        self.bus.publish(
            event_names::CONVERSATION_ENDED,
            &ConversationEndedEvent {
                message,
                celebrate: self.config.enable_confetti_on_end,
            },
        );
    }

    fn on_backend_error(&mut self, message: String) {
        self.record(
            JournalLevel::Warn,
            "backend reported an error",
            Some(json!({ "message": &message, "state": self.state.as_str() })),
        );
        match self.state {
            TurnState::Starting => self.fail(&message),
            TurnState::Thinking => {
                // The turn was rejected; the participant can try again.
                self.transcript.discard_pending(Role::User);
                self.pending_turn = None;
                self.notify(&format!("Error: {message}"));
                self.clock.awaiting_since = Some(Instant::now());
                self.set_state(TurnState::AwaitingUser, None);
            }
            _ => self.notify(&format!("Error: {message}")),
        }
    }

    /// Fragments that arrived since the last call.
    pub fn take_decode_jobs(&mut self) -> Vec<DecodeJob> {
        std::mem::take(&mut self.decode_jobs)
    }

    pub fn on_fragment_decoded(
        &mut self,
        ticket: FragmentTicket,
        decoded: apollolytics_audio::Result<DecodedAudio>,
    ) {
        if let Err(e) = &decoded {
            self.record(
                JournalLevel::Warn,
                "audio fragment skipped",
                Some(json!({ "seq": ticket.seq, "error": e.to_string() })),
            );
        }
        self.playback.complete(ticket, decoded);
        self.poll_playback();
    }

    pub fn poll_playback(&mut self) {
        let Some(PlaybackSignal::Drained { generation }) = self.playback.poll() else {
            return;
        };
        tracing::debug!(generation, "playback drained");
        self.maybe_finish_assistant_turn();
    }

    /// Ask for the microphone. The state does not change until the device
    /// is open, see [`DialogueSession::on_capture_done`].
    pub fn start_recording(&mut self) -> Result<()> {
        if self.closed {
            return Err(DialogueError::SessionClosed);
        }
        if !matches!(
            self.state,
            TurnState::AwaitingUser | TurnState::AssistantSpeaking
        ) {
            return Err(self.invalid("start recording"));
        }
        if !self.is_audio {
            return Err(DialogueError::VoiceUnavailable);
        }
        let Some(capture) = self.capture.take() else {
            return Err(self.invalid("start recording"));
        };
        tracing::debug!("opening microphone");
        self.capture_job = Some(CaptureJob {
            action: CaptureAction::Start,
            capture,
        });
        Ok(())
    }

    /// Ask for the recording to be sealed. The turn is sent once the
    /// device has handed its samples back.
    pub fn stop_recording(&mut self) -> Result<()> {
        if self.state != TurnState::Recording {
            return Err(self.invalid("stop recording"));
        }
        if !self.is_audio {
            return Err(DialogueError::VoiceUnavailable);
        }
        let Some(capture) = self.capture.take() else {
            return Err(self.invalid("stop recording"));
        };
        self.capture_job = Some(CaptureJob {
            action: CaptureAction::Stop,
            capture,
        });
        Ok(())
    }

    /// Microphone work requested since the last call.
    pub fn take_capture_job(&mut self) -> Option<CaptureJob> {
        self.capture_job.take()
    }

    /// Take the device back from a finished capture job and continue the
    /// transition it was started for.
    pub fn on_capture_done(&mut self, done: CaptureDone) -> Result<()> {
        let CaptureDone { capture, result } = done;
        self.capture = Some(capture);
        if self.closed {
            self.release_microphone();
            return Ok(());
        }
        match result {
            CaptureResult::Started(started) => self.on_microphone_open(started),
            CaptureResult::Stopped(stopped) => self.on_recording_sealed(stopped),
        }
    }

    /// `awaiting-user -> recording`. From `assistant-speaking` this is a
    /// barge-in: queued audio is dropped and the text heard so far is kept.
    fn on_microphone_open(&mut self, started: apollolytics_audio::Result<()>) -> Result<()> {
        if let Err(e) = started {
            self.record(
                JournalLevel::Error,
                "microphone unavailable",
                Some(json!({ "error": e.to_string() })),
            );
            if !self.state.is_terminal() {
                self.notify(messages::MICROPHONE_UNAVAILABLE);
            }
            return Err(e.into());
        }

        let barge_in = match self.state {
            TurnState::AwaitingUser => false,
            TurnState::AssistantSpeaking => true,
            state => {
                tracing::debug!(%state, "microphone opened after the turn moved on");
                self.release_microphone();
                return Ok(());
            }
        };
        if barge_in {
            self.playback.clear();
            self.decode_jobs.clear();
            if let Some(buffer) = self.buffer.take() {
                self.flush_buffer(buffer);
            }
            self.clock.awaiting_since = None;
            self.record(JournalLevel::Info, "assistant interrupted", None);
        }
        self.clock.recording_started = Some(Instant::now());
        self.set_state(TurnState::Recording, None);
        Ok(())
    }

    /// `recording -> thinking`: reserve the user's slot in the transcript
    /// and send the sealed audio.
    fn on_recording_sealed(
        &mut self,
        stopped: apollolytics_audio::Result<CapturedUtterance>,
    ) -> Result<()> {
        if self.state != TurnState::Recording {
            tracing::debug!(state = %self.state, "recording sealed after the session moved on");
            return Ok(());
        }
        let utterance = match stopped {
            Ok(utterance) => utterance,
            Err(e) => return Err(self.abandon_recording(messages::MICROPHONE_UNAVAILABLE, e)),
        };
        if utterance.is_empty() {
            self.notify(messages::EMPTY_RECORDING);
            self.back_to_awaiting();
            return Ok(());
        }
        let encoded = match utterance.encode() {
            Ok(encoded) => encoded,
            Err(e) => return Err(self.abandon_recording(messages::EMPTY_RECORDING, e)),
        };

        let stopped_at = utterance.stopped_at;
        let started_at = self.clock.recording_started.take().unwrap_or(utterance.started_at);
        let awaiting_since = self.clock.awaiting_since.take().unwrap_or(started_at);
        let timing = TurnTiming {
            thinking_time: started_at.saturating_duration_since(awaiting_since).as_secs_f64(),
            recording_duration: utterance.elapsed().as_secs_f64(),
            total_response_time: stopped_at
                .saturating_duration_since(awaiting_since)
                .as_secs_f64(),
        };

        self.transcript
            .reserve_placeholder(Role::User, messages::PROCESSING_AUDIO);
        self.emit_transcript();
        self.set_state(TurnState::Thinking, Some(messages::THINKING));
        self.record(
            JournalLevel::Info,
            "recording sent",
            Some(json!({
                "audio_secs": encoded.duration_secs,
                "thinking_time": timing.thinking_time,
                "recording_duration": timing.recording_duration,
                "total_response_time": timing.total_response_time,
            })),
        );

        let turn = UserTurn::audio(encoded.data, Some(encoded.format)).with_timing(timing);
        self.send_turn(turn)
    }

    fn abandon_recording(&mut self, notice: &str, error: AudioError) -> DialogueError {
        self.record(
            JournalLevel::Error,
            "recording failed",
            Some(json!({ "error": error.to_string() })),
        );
        self.notify(notice);
        self.back_to_awaiting();
        error.into()
    }

    fn back_to_awaiting(&mut self) {
        self.clock.recording_started = None;
        self.clock.awaiting_since = Some(Instant::now());
        self.set_state(TurnState::AwaitingUser, None);
    }

    /// Send a client-produced text turn.
    pub fn submit_text(&mut self, text: &str) -> Result<()> {
        if self.closed {
            return Err(DialogueError::SessionClosed);
        }
        if self.state != TurnState::AwaitingUser {
            return Err(self.invalid("send a message"));
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let waited = self
            .clock
            .awaiting_since
            .take()
            .map(|since| now.saturating_duration_since(since).as_secs_f64())
            .unwrap_or(0.0);
        let timing = TurnTiming {
            thinking_time: waited,
            recording_duration: 0.0,
            total_response_time: waited,
        };

        self.transcript.append_final(Role::User, None, text);
        self.emit_transcript();
        self.set_state(TurnState::Thinking, Some(messages::THINKING));
        self.record(
            JournalLevel::Info,
            "text turn sent",
            Some(json!({ "chars": text.chars().count() })),
        );
        self.send_turn(UserTurn::text(text).with_timing(timing))
    }

    /// Re-send a sealed turn whose first send failed.
    pub fn retry_send(&mut self) -> Result<()> {
        if self.state != TurnState::Thinking {
            return Err(self.invalid("retry"));
        }
        match self.pending_turn.take() {
            Some(turn) => self.send_turn(turn),
            None => Ok(()),
        }
    }

    fn send_turn(&mut self, turn: UserTurn) -> Result<()> {
        let command = ClientCommand::User(turn);
        let sent = match self.transport.as_ref() {
            Some(transport) => transport.send(&command),
            None => Err(TransportError::NotOpen),
        };
        match sent {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "failed to send user turn");
                if let ClientCommand::User(turn) = command {
                    self.pending_turn = Some(turn);
                }
                self.notify(messages::SEND_FAILED);
                Err(e.into())
            }
        }
    }

    /// `any -> error`: the channel is gone. Nothing is retried.
    fn fail(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        self.record(
            JournalLevel::Error,
            "connection failed",
            Some(json!({ "reason": reason, "state": self.state.as_str() })),
        );
        self.release_microphone();
        self.playback.clear();
        self.decode_jobs.clear();
        self.close_transport();
        self.buffer = None;
        self.pending_turn = None;
        self.transcript.discard_pending(Role::User);
        self.transcript.append_notice(messages::SERVER_UNREACHABLE);
        self.emit_transcript();
        self.set_state(TurnState::Error, None);
    }

    /// Release every resource. Safe to call repeatedly and from any state.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.release_microphone();
        self.close_transport();
        if !self.playback.is_idle() {
            self.playback.clear();
        }
        self.decode_jobs.clear();
        self.record(
            JournalLevel::Info,
            "session closed",
            Some(json!({ "state": self.state.as_str(), "entries": self.transcript.len() })),
        );
        if let Err(e) = self.journal.flush() {
            tracing::warn!(error = %e, "failed to flush journal");
        }
    }

    fn release_microphone(&mut self) {
        if let Some(job) = self.capture_job.take() {
            self.capture = Some(job.capture);
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.release();
        }
        self.clock.recording_started = None;
    }

    fn close_transport(&mut self) {
        if let Some(transport) = self.transport.as_ref() {
            transport.close();
        }
    }

    fn set_state(&mut self, state: TurnState, loading: Option<&str>) {
        let loading = loading.map(str::to_string);
        if self.state == state && self.loading == loading {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "turn state changed");
        self.state = state;
        self.loading = loading;
        self.bus.publish(
            event_names::STATE_CHANGED,
            &StateChangedEvent {
                state,
                loading_message: self.loading.clone(),
            },
        );
    }

    fn emit_transcript(&self) {
        self.bus.publish(
            event_names::TRANSCRIPT_UPDATED,
            &TranscriptUpdatedEvent {
                entries: self.transcript.entries().to_vec(),
            },
        );
    }

    /// User-visible message, kept in the transcript as a notice line.
    fn notify(&mut self, message: &str) {
        self.transcript.append_notice(message);
        self.emit_transcript();
        self.bus.publish(
            event_names::NOTICE,
            &NoticeEvent {
                message: message.to_string(),
            },
        );
    }

    fn record(&self, level: JournalLevel, message: &str, data: Option<serde_json::Value>) {
        let data = match data {
            Some(serde_json::Value::Object(mut map)) => {
                map.insert("session".into(), json!(self.id.to_string()));
                Some(serde_json::Value::Object(map))
            }
            Some(other) => Some(other),
            None => Some(json!({ "session": self.id.to_string() })),
        };
        self.journal.record(level, message, data);
    }

    fn invalid(&self, action: &'static str) -> DialogueError {
        DialogueError::InvalidState {
            action,
            state: self.state,
        }
    }
}

impl Drop for DialogueSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
