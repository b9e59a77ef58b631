mod common;

use apollolytics_audio::AudioError;
use apollolytics_dialogue::{
    messages, DialogueConfig, DialogueError, DialogueSession, TurnState, VoiceCapability,
};
use apollolytics_events::{event_names, ConversationEndedEvent, NoticeEvent};
use apollolytics_transcript::Role;
use apollolytics_transport::{ChannelEvent, MemoryTransport, Transport};
use common::{
    decode_all_reversed, message, pcm_payload, start_recording, stop_recording, Fixture,
};
use serde_json::json;

fn started(fixture: &Fixture, config: DialogueConfig) -> (DialogueSession, MemoryTransport) {
    let mut session = fixture.session(config);
    let transport = MemoryTransport::new();
    session
        .begin("Test article text", Box::new(transport.clone()))
        .unwrap();
    (session, transport)
}

/// Starts a session and completes the opening assistant turn.
fn awaiting_user(fixture: &Fixture) -> (DialogueSession, MemoryTransport) {
    let (mut session, transport) = started(fixture, DialogueConfig::default());
    session.handle_channel_event(message("assistant_final", json!({"text": "What do you think?"})));
    assert_eq!(session.state(), TurnState::AwaitingUser);
    (session, transport)
}

#[test]
fn test_text_reply_without_audio_finishes_immediately() {
    let fixture = Fixture::new();
    let (mut session, _transport) = started(&fixture, DialogueConfig::default());

    session.handle_channel_event(message("assistant_delta", json!({"text": "Hello"})));
    session.handle_channel_event(message("assistant_delta", json!({"text": " there"})));
    session.handle_channel_event(message("assistant_final", json!("Response complete.")));

    assert_eq!(session.state(), TurnState::AwaitingUser);
    let entries = session.transcript().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].role, Role::Assistant);
    assert_eq!(entries[0].content, "Hello there");
    assert!(entries[0].is_final);
    assert_eq!(
        fixture.states(),
        vec![
            TurnState::Starting,
            TurnState::AssistantSpeaking,
            TurnState::AwaitingUser
        ]
    );
}

#[test]
fn test_fragments_play_back_to_back_and_turn_waits_for_drain() {
    let fixture = Fixture::new();
    let (mut session, _transport) = started(&fixture, DialogueConfig::default());

    session.handle_channel_event(message(
        "assistant_delta",
        json!({"text": "Hello", "audio": pcm_payload(2.0)}),
    ));
    session.handle_channel_event(message(
        "assistant_delta",
        json!({"audio": format!("data:audio/pcm;base64,{}", pcm_payload(1.5))}),
    ));
    session.handle_channel_event(message("assistant_final", json!({"text": "Hello"})));
    decode_all_reversed(&mut session);

    assert_eq!(fixture.sink.scheduled(), vec![(0.0, 2.0), (2.0, 1.5)]);
    assert_eq!(session.state(), TurnState::AssistantSpeaking);
    assert!(session.transcript().is_empty());

    fixture.sink.advance_to(3.4);
    session.poll_playback();
    assert_eq!(session.state(), TurnState::AssistantSpeaking);

    fixture.sink.advance_to(3.5);
    session.poll_playback();
    assert_eq!(session.state(), TurnState::AwaitingUser);
    assert_eq!(session.transcript().entries()[0].content, "Hello");
}

#[test]
fn test_undecodable_fragment_is_skipped() {
    let fixture = Fixture::new();
    let (mut session, _transport) = started(&fixture, DialogueConfig::default());

    session.handle_channel_event(message("assistant_delta", json!({"audio": "!!not base64!!"})));
    session.handle_channel_event(message("assistant_delta", json!({"audio": pcm_payload(0.5)})));
    session.handle_channel_event(message("assistant_final", json!({"text": "Hi"})));
    decode_all_reversed(&mut session);

    assert_eq!(fixture.sink.scheduled(), vec![(0.0, 0.5)]);
    fixture.sink.advance_to(0.5);
    session.poll_playback();
    assert_eq!(session.state(), TurnState::AwaitingUser);
}

#[test]
fn test_barge_in_drops_queued_audio_and_keeps_heard_text() {
    let fixture = Fixture::new();
    let (mut session, _transport) = started(&fixture, DialogueConfig::default());

    session.handle_channel_event(message(
        "assistant_delta",
        json!({"text": "Let me explain", "audio": pcm_payload(1.0)}),
    ));
    let first = session.take_decode_jobs();
    session.handle_channel_event(message("assistant_delta", json!({"audio": pcm_payload(1.0)})));
    let second = session.take_decode_jobs();
    for job in first {
        let (ticket, decoded) = job.run();
        session.on_fragment_decoded(ticket, decoded);
    }
    assert_eq!(fixture.sink.scheduled().len(), 1);

    start_recording(&mut session).unwrap();
    assert_eq!(session.state(), TurnState::Recording);
    assert_eq!(fixture.sink.cancel_count(), 1);
    assert!(session.playback_idle());

    // Decodes that finish after the interruption never reach the output.
    for job in second {
        let (ticket, decoded) = job.run();
        session.on_fragment_decoded(ticket, decoded);
    }
    assert_eq!(fixture.sink.scheduled().len(), 1);

    let entries = session.transcript().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content, "Let me explain");
    assert!(entries[0].is_final);

    // Late events of the interrupted turn are ignored while recording.
    session.handle_channel_event(message("assistant_final", json!({"text": "Let me explain it all"})));
    assert_eq!(session.state(), TurnState::Recording);
    assert_eq!(session.transcript().len(), 1);
}

#[test]
fn test_placeholder_is_filled_in_place() {
    let fixture = Fixture::new();
    let (mut session, transport) = awaiting_user(&fixture);

    fixture.capture.push_recording(vec![0.05; 12_000]);
    start_recording(&mut session).unwrap();
    stop_recording(&mut session).unwrap();
    assert_eq!(session.state(), TurnState::Thinking);
    assert_eq!(session.loading_message(), Some(messages::THINKING));

    let pending = session.transcript().pending(Role::User).unwrap();
    assert_eq!(pending.content, messages::PROCESSING_AUDIO);
    assert!(!pending.is_final);

    // The reply overtakes the transcription.
    session.handle_channel_event(message("assistant_delta", json!({"text": "Interesting."})));
    session.handle_channel_event(message("assistant_final", json!({"id": "assistant_2"})));
    session.handle_channel_event(message(
        "user_transcript",
        json!({"transcript": "hello bot", "item_id": "item_7"}),
    ));

    let entries = session.transcript().entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1].role, Role::User);
    assert_eq!(entries[1].content, "hello bot");
    assert_eq!(entries[1].id, "item_7");
    assert!(entries[1].is_final);
    assert!(!entries[1].is_placeholder);
    assert_eq!(entries[2].content, "Interesting.");
    assert_eq!(entries[2].id, "assistant_2");

    let sent = transport.sent_json();
    assert_eq!(sent.len(), 2);
    let audio = &sent[1]["content"][0]["input_audio"];
    assert_eq!(audio["format"], "wav");
    assert!(audio["data"].as_str().unwrap().starts_with("UklGR"));
}

#[test]
fn test_untranscribed_turn_does_not_pull_later_transcript_back() {
    let fixture = Fixture::new();
    let (mut session, _transport) = awaiting_user(&fixture);

    fixture.capture.push_recording(vec![0.1; 4_800]);
    start_recording(&mut session).unwrap();
    stop_recording(&mut session).unwrap();
    // The backend never transcribes this turn.
    session.handle_channel_event(message("assistant_final", json!({"text": "A2"})));
    assert_eq!(session.state(), TurnState::AwaitingUser);

    fixture.capture.push_recording(vec![0.1; 4_800]);
    start_recording(&mut session).unwrap();
    stop_recording(&mut session).unwrap();
    session.handle_channel_event(message("user_transcript", json!({"transcript": "second turn"})));
    session.handle_channel_event(message("assistant_final", json!({"text": "A3"})));

    let order: Vec<(Role, &str)> = session
        .transcript()
        .entries()
        .iter()
        .map(|e| (e.role, e.content.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            (Role::Assistant, "What do you think?"),
            (Role::Assistant, "A2"),
            (Role::User, "second turn"),
            (Role::Assistant, "A3"),
        ]
    );
    assert!(session.transcript().pending(Role::User).is_none());
}

#[test]
fn test_assistant_keeps_streaming_while_microphone_opens() {
    let fixture = Fixture::new();
    let (mut session, _transport) = started(&fixture, DialogueConfig::default());
    session.handle_channel_event(message(
        "assistant_delta",
        json!({"text": "Let me", "audio": pcm_payload(1.0)}),
    ));

    session.start_recording().unwrap();
    let opening = session.take_capture_job().unwrap();
    assert_eq!(session.state(), TurnState::AssistantSpeaking);

    session.handle_channel_event(message("assistant_delta", json!({"text": " explain"})));
    decode_all_reversed(&mut session);
    assert_eq!(fixture.sink.scheduled(), vec![(0.0, 1.0)]);
    assert_eq!(session.state(), TurnState::AssistantSpeaking);
    assert_eq!(fixture.capture.start_count(), 0);

    session.on_capture_done(opening.run()).unwrap();
    assert_eq!(session.state(), TurnState::Recording);
    assert_eq!(fixture.sink.cancel_count(), 1);
    assert_eq!(session.transcript().entries()[0].content, "Let me explain");
}

#[test]
fn test_user_turn_carries_timing() {
    let fixture = Fixture::new();
    let (mut session, transport) = awaiting_user(&fixture);

    fixture.capture.push_recording(vec![0.1; 4_800]);
    start_recording(&mut session).unwrap();
    stop_recording(&mut session).unwrap();

    let sent = transport.sent_json();
    let timing = &sent[1]["timing"];
    let thinking = timing["thinking_time"].as_f64().unwrap();
    let recording = timing["recording_duration"].as_f64().unwrap();
    let total = timing["total_response_time"].as_f64().unwrap();
    assert!(thinking >= 0.0);
    assert!(recording >= 0.0);
    assert!(total >= thinking);
}

#[test]
fn test_connection_error_while_thinking() {
    let fixture = Fixture::new();
    let (mut session, transport) = awaiting_user(&fixture);

    fixture.capture.push_recording(vec![0.1; 4_800]);
    start_recording(&mut session).unwrap();
    stop_recording(&mut session).unwrap();
    session.handle_channel_event(ChannelEvent::Error("connection reset".into()));

    assert_eq!(session.state(), TurnState::Error);
    assert!(!transport.is_open());
    let last = session.transcript().last().unwrap();
    assert!(last.is_notice);
    assert_eq!(last.content, messages::SERVER_UNREACHABLE);
    assert!(session.transcript().pending(Role::User).is_none());

    // Nothing is retried or reopened afterwards.
    session.handle_channel_event(message("assistant_delta", json!({"text": "late"})));
    assert_eq!(session.state(), TurnState::Error);
    assert_eq!(transport.sent_json().len(), 2);
}

#[test]
fn test_connection_loss_releases_open_microphone() {
    let fixture = Fixture::new();
    let (mut session, _transport) = awaiting_user(&fixture);

    start_recording(&mut session).unwrap();
    session.handle_channel_event(ChannelEvent::Closed { reason: None });

    assert_eq!(session.state(), TurnState::Error);
    assert_eq!(fixture.capture.release_count(), 1);
    assert!(matches!(
        stop_recording(&mut session),
        Err(DialogueError::InvalidState { .. })
    ));
}

#[test]
fn test_conversation_end_celebrates_when_enabled() {
    let fixture = Fixture::new();
    let config = DialogueConfig {
        enable_confetti_on_end: true,
        ..DialogueConfig::default()
    };
    let (mut session, transport) = started(&fixture, config);

    session.handle_channel_event(message("assistant_delta", json!({"text": "Goodbye"})));
    session.handle_channel_event(message(
        "conversation_end",
        json!({"message": "Thank you for participating."}),
    ));

    assert_eq!(session.state(), TurnState::Ended);
    assert_eq!(transport.close_count(), 1);
    let contents: Vec<&str> = session
        .transcript()
        .entries()
        .iter()
        .map(|e| e.content.as_str())
        .collect();
    assert_eq!(contents, vec!["Goodbye", "Thank you for participating."]);

    let ended: Vec<ConversationEndedEvent> = fixture.bus.payloads(event_names::CONVERSATION_ENDED);
    assert_eq!(ended.len(), 1);
    assert!(ended[0].celebrate);
    assert_eq!(ended[0].message.as_deref(), Some("Thank you for participating."));

    // A closed socket after the end is not a failure.
    session.handle_channel_event(ChannelEvent::Closed { reason: None });
    assert_eq!(session.state(), TurnState::Ended);
}

#[test]
fn test_microphone_denied_keeps_session_usable() {
    let fixture = Fixture::new();
    let (mut session, _transport) = awaiting_user(&fixture);

    fixture.capture.fail_next_start(AudioError::PermissionDenied);
    let err = start_recording(&mut session).unwrap_err();
    assert!(matches!(err, DialogueError::Audio(AudioError::PermissionDenied)));
    assert_eq!(session.state(), TurnState::AwaitingUser);

    let notices: Vec<NoticeEvent> = fixture.bus.payloads(event_names::NOTICE);
    assert_eq!(notices.last().unwrap().message, messages::MICROPHONE_UNAVAILABLE);

    start_recording(&mut session).unwrap();
    assert_eq!(session.state(), TurnState::Recording);
}

#[test]
fn test_native_speech_sends_text_turns() {
    let fixture = Fixture::new();
    let mut session =
        fixture.session_with_voice(DialogueConfig::default(), VoiceCapability::NativeSpeech);
    let transport = MemoryTransport::new();
    session
        .begin("Test article text", Box::new(transport.clone()))
        .unwrap();
    session.handle_channel_event(message("assistant_final", json!({"text": "Hi"})));

    assert!(matches!(
        start_recording(&mut session),
        Err(DialogueError::VoiceUnavailable)
    ));
    session.submit_text("  I am not convinced.  ").unwrap();
    assert_eq!(session.state(), TurnState::Thinking);

    let sent = transport.sent_json();
    assert_eq!(sent[1]["content"][0], json!({"type": "text", "text": "I am not convinced."}));
    assert!(sent[1]["timing"]["thinking_time"].as_f64().is_some());
    assert_eq!(session.transcript().last().unwrap().content, "I am not convinced.");
}

#[test]
fn test_journal_records_session_lifecycle() {
    let fixture = Fixture::new();
    {
        let (mut session, _transport) = started(&fixture, DialogueConfig::default());
        session.handle_channel_event(ChannelEvent::Error("refused".into()));
    }
    let messages = fixture.journal.messages();
    assert_eq!(messages.first().map(String::as_str), Some("conversation started"));
    assert!(messages.iter().any(|m| m == "connection failed"));
    assert_eq!(messages.last().map(String::as_str), Some("session closed"));
    assert_eq!(fixture.journal.flush_count(), 1);
}
