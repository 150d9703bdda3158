use std::time::{Duration, Instant};

use serde_json::json;

use jambuster::audio::pcm::EncodedChunk;
use jambuster::convo::{Action, ConnectionStatus, ConvoState, TranscriptEntry};
use jambuster::session::{Speaker, TransportEvent};

const WINDOW: Duration = Duration::from_secs(2);

fn fragment(sender: Speaker, text: &str, is_final: bool) -> TransportEvent {
    TransportEvent::Transcript {
        sender,
        text: text.to_string(),
        is_final,
    }
}

#[test]
fn fragments_concatenate_into_one_utterance() {
    let mut state = ConvoState::new(WINDOW);
    let now = Instant::now();

    state.apply(fragment(Speaker::User, "Hel", false), now);
    assert_eq!(state.live_text(Speaker::User), "Hel");
    state.apply(fragment(Speaker::User, "lo", true), now);

    assert_eq!(
        state.transcript(),
        &[TranscriptEntry::utterance(Speaker::User, "Hello")]
    );
    // Live view clears once finalized.
    assert_eq!(state.live_text(Speaker::User), "");
}

#[test]
fn empty_final_is_a_flush_not_an_utterance() {
    let mut state = ConvoState::new(WINDOW);
    let now = Instant::now();

    state.apply(fragment(Speaker::Assistant, "   ", false), now);
    state.apply(fragment(Speaker::Assistant, "", true), now);

    assert!(state.transcript().is_empty());
    assert_eq!(state.live_text(Speaker::Assistant), "");
}

#[test]
fn duplicate_user_finals_inside_window_are_suppressed() {
    let mut state = ConvoState::new(WINDOW);
    let t0 = Instant::now();

    state.apply(fragment(Speaker::User, "jam at Mohakhali", true), t0);
    state.apply(
        fragment(Speaker::User, "jam at Mohakhali", true),
        t0 + Duration::from_secs(1),
    );
    assert_eq!(state.transcript().len(), 1);

    // Outside the window the same words are a new utterance.
    state.apply(
        fragment(Speaker::User, "jam at Mohakhali", true),
        t0 + Duration::from_secs(4),
    );
    assert_eq!(state.transcript().len(), 2);
}

#[test]
fn assistant_repeats_are_never_suppressed() {
    let mut state = ConvoState::new(WINDOW);
    let now = Instant::now();

    state.apply(fragment(Speaker::Assistant, "Take the flyover.", true), now);
    state.apply(fragment(Speaker::Assistant, "Take the flyover.", true), now);
    assert_eq!(state.transcript().len(), 2);
}

#[test]
fn interleaved_senders_accumulate_independently() {
    let mut state = ConvoState::new(WINDOW);
    let now = Instant::now();

    state.apply(fragment(Speaker::User, "How is ", false), now);
    state.apply(fragment(Speaker::Assistant, "Checking ", false), now);
    state.apply(fragment(Speaker::User, "Airport Road?", false), now);
    state.apply(fragment(Speaker::Assistant, "now.", false), now);

    assert_eq!(state.live_text(Speaker::User), "How is Airport Road?");
    assert_eq!(state.live_text(Speaker::Assistant), "Checking now.");

    state.apply(fragment(Speaker::User, "", true), now);
    state.apply(fragment(Speaker::Assistant, "", true), now);
    assert_eq!(state.transcript().len(), 2);
}

#[test]
fn show_map_invocation_yields_one_entry_and_one_ack() {
    let mut state = ConvoState::new(WINDOW);
    let actions = state.apply(
        TransportEvent::ToolCall {
            id: "call-7".into(),
            name: "show_map".into(),
            args: json!({ "origin": "Gulshan", "destination": "Banani" }),
        },
        Instant::now(),
    );

    assert_eq!(
        state.transcript(),
        &[TranscriptEntry::MapIntent {
            origin: "Gulshan".into(),
            destination: "Banani".into(),
        }]
    );
    assert_eq!(actions.len(), 1);
    match &actions[0] {
        Action::SendToolAck { id, name, .. } => {
            assert_eq!(id, "call-7");
            assert_eq!(name, "show_map");
        }
        other => panic!("expected ack, got {:?}", other),
    }
}

#[test]
fn unknown_tool_is_acked_without_a_transcript_entry() {
    let mut state = ConvoState::new(WINDOW);
    let actions = state.apply(
        TransportEvent::ToolCall {
            id: "call-9".into(),
            name: "book_rickshaw".into(),
            args: json!({}),
        },
        Instant::now(),
    );

    assert!(state.transcript().is_empty());
    assert!(matches!(&actions[0], Action::SendToolAck { id, .. } if id == "call-9"));
}

#[test]
fn audio_and_interruption_map_to_playback_actions() {
    let mut state = ConvoState::new(WINDOW);
    let now = Instant::now();

    let chunk = EncodedChunk::pcm(24_000, "AAAA".into());
    let actions = state.apply(TransportEvent::Audio(chunk.clone()), now);
    assert_eq!(actions, vec![Action::Play(chunk)]);

    let actions = state.apply(TransportEvent::Interrupted, now);
    assert_eq!(actions, vec![Action::InterruptPlayback]);
}

#[test]
fn close_transitions_status() {
    let mut state = ConvoState::new(WINDOW);
    state.begin_connecting();
    assert_eq!(state.status(), ConnectionStatus::Connecting);
    state.mark_connected();
    assert_eq!(state.status(), ConnectionStatus::Connected);

    let actions = state.apply(TransportEvent::Closed { error: None }, Instant::now());
    assert_eq!(state.status(), ConnectionStatus::Idle);
    assert_eq!(actions, vec![Action::Ended { error: None }]);

    let mut errored = ConvoState::new(WINDOW);
    errored.mark_connected();
    errored.apply(
        TransportEvent::Closed {
            error: Some("socket reset".into()),
        },
        Instant::now(),
    );
    assert_eq!(errored.status(), ConnectionStatus::Error);
}

#[test]
fn begin_connecting_resets_previous_session_state() {
    let mut state = ConvoState::new(WINDOW);
    let now = Instant::now();
    state.apply(fragment(Speaker::User, "old words", true), now);
    state.apply(fragment(Speaker::Assistant, "partial", false), now);
    assert_eq!(state.transcript().len(), 1);

    state.begin_connecting();
    assert!(state.transcript().is_empty());
    assert_eq!(state.live_text(Speaker::Assistant), "");
}
