use crate::session::{CaptureDone, CaptureJob, DecodeJob, DialogueSession};
use crate::{DialogueError, Result};
use apollolytics_audio::{DecodedAudio, FragmentTicket};
use apollolytics_events::TurnState;
use apollolytics_transcript::Transcript;
use apollolytics_transport::{ChannelEvent, Connection, Connector};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Participant actions coming from the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    StartRecording,
    StopRecording,
    /// Start when idle, stop when recording.
    ToggleRecording,
    SubmitText(String),
    RetrySend,
    Quit,
}

/// How a dialogue finished.
#[derive(Debug, Clone)]
pub struct DialogueOutcome {
    pub state: TurnState,
    pub transcript: Transcript,
}

type DecodeResult = (FragmentTicket, apollolytics_audio::Result<DecodedAudio>);

/// Drives a [`DialogueSession`] from the channel, the shell and the
/// playback clock until the conversation ends or is cancelled.
pub struct DialogueRunner {
    session: DialogueSession,
    commands: mpsc::UnboundedReceiver<ShellCommand>,
    cancel: CancellationToken,
}

impl DialogueRunner {
    pub fn new(
        session: DialogueSession,
        commands: mpsc::UnboundedReceiver<ShellCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            commands,
            cancel,
        }
    }

    pub fn session(&self) -> &DialogueSession {
        &self.session
    }

    /// Connect, start the conversation about `article` and run it to the end.
    pub async fn run(self, article: &str, connector: &dyn Connector) -> Result<DialogueOutcome> {
        let DialogueRunner {
            mut session,
            mut commands,
            cancel,
        } = self;

        if let Err(e) = DialogueSession::validate_article(article) {
            session.shutdown();
            return Err(e);
        }

        let endpoint = session.config().endpoint.clone();
        tracing::info!(%endpoint, "connecting");
        let connected = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("cancelled before the connection opened");
                session.shutdown();
                return Ok(outcome(&session));
            }
            result = connector.connect(&endpoint) => result,
        };
        let Connection {
            transport,
            mut events,
        } = match connected {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!(error = %e, "failed to connect");
                session.connection_failed(&e);
                session.shutdown();
                return Err(e.into());
            }
        };

        if let Err(e) = session.begin(article, transport) {
            session.shutdown();
            return Err(e);
        }

        let (decoded_tx, mut decoded_rx) = mpsc::unbounded_channel::<DecodeResult>();
        let (captured_tx, mut captured_rx) = mpsc::unbounded_channel::<CaptureDone>();
        let interval = Duration::from_millis(session.config().drain_poll_interval_ms);
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events_open = true;
        let mut commands_open = true;

        loop {
            spawn_decodes(session.take_decode_jobs(), &decoded_tx);
            if let Some(job) = session.take_capture_job() {
                spawn_capture(job, &captured_tx);
            }
            if session.state().is_terminal() && session.playback_idle() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!("dialogue cancelled");
                    break;
                }

                event = events.recv(), if events_open => match event {
                    Some(event) => session.handle_channel_event(event),
                    None => {
                        events_open = false;
                        session.handle_channel_event(ChannelEvent::Closed { reason: None });
                    }
                },

                Some((ticket, decoded)) = decoded_rx.recv() => {
                    session.on_fragment_decoded(ticket, decoded);
                }

                Some(done) = captured_rx.recv() => {
                    if let Err(e) = session.on_capture_done(done) {
                        tracing::warn!(error = %e, "microphone operation failed");
                    }
                }

                command = commands.recv(), if commands_open => match command {
                    Some(ShellCommand::Quit) => {
                        tracing::info!("participant quit");
                        break;
                    }
                    Some(command) => apply(&mut session, command),
                    None => commands_open = false,
                },

                _ = tick.tick() => session.poll_playback(),
            }
        }

        session.shutdown();
        let outcome = outcome(&session);
        tracing::info!(state = %outcome.state, entries = outcome.transcript.len(), "dialogue finished");
        Ok(outcome)
    }
}

fn outcome(session: &DialogueSession) -> DialogueOutcome {
    DialogueOutcome {
        state: session.state(),
        transcript: session.transcript().clone(),
    }
}

fn spawn_decodes(jobs: Vec<DecodeJob>, results: &mpsc::UnboundedSender<DecodeResult>) {
    for job in jobs {
        let results = results.clone();
        tokio::task::spawn_blocking(move || {
            // Receiver gone means the runner already stopped.
            let _ = results.send(job.run());
        });
    }
}

/// Opening a microphone can sit behind a permission prompt, so it never
/// runs on the runner's thread.
fn spawn_capture(job: CaptureJob, results: &mpsc::UnboundedSender<CaptureDone>) {
    let results = results.clone();
    tokio::task::spawn_blocking(move || {
        let _ = results.send(job.run());
    });
}

/// Apply a shell command. Failures were already surfaced to the
/// participant by the session; they are only logged here.
fn apply(session: &mut DialogueSession, command: ShellCommand) {
    let result = match command {
        ShellCommand::StartRecording => session.start_recording(),
        ShellCommand::StopRecording => session.stop_recording(),
        ShellCommand::ToggleRecording => match session.state() {
            TurnState::Recording => session.stop_recording(),
            _ => session.start_recording(),
        },
        ShellCommand::SubmitText(text) => session.submit_text(&text),
        ShellCommand::RetrySend => session.retry_send(),
        ShellCommand::Quit => Ok(()),
    };
    match result {
        Ok(()) => {}
        Err(e @ DialogueError::InvalidState { .. }) => tracing::debug!(error = %e, "command ignored"),
        Err(e) => tracing::warn!(error = %e, "command failed"),
    }
}
