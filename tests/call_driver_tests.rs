use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use jambuster::audio::capture::CaptureControl;
use jambuster::audio::pcm::{encode_base64, encode_pcm16, AudioFrame, EncodedChunk};
use jambuster::audio::playback::{BufferSink, ManualClock, PlaybackQueue};
use jambuster::convo::{CallDriver, ConnectionStatus, TranscriptEntry};
use jambuster::error::SessionError;
use jambuster::history::MemoryHistory;
use jambuster::session::{OutboundLink, Speaker, TransportEvent};

const WINDOW: Duration = Duration::from_secs(2);
const VIDEO_PERIOD: Duration = Duration::from_millis(500);
// Keep the visible-error hold short so tests stay fast.
const ERROR_HOLD: Duration = Duration::from_millis(10);

#[derive(Clone)]
struct FakeLink {
    open: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
    acks: Arc<Mutex<Vec<(String, String, Value)>>>,
}

impl FakeLink {
    fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
            closes: Arc::new(AtomicUsize::new(0)),
            acks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl OutboundLink for FakeLink {
    fn send_audio(&self, _chunk: EncodedChunk) {}
    fn send_video_frame(&self, _chunk: EncodedChunk) {}
    fn send_text(&self, _text: &str) {}

    fn send_tool_ack(&self, id: &str, name: &str, response: Value) -> Result<(), SessionError> {
        self.acks
            .lock()
            .unwrap()
            .push((id.to_string(), name.to_string(), response));
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

struct FakeCapture {
    stops: Arc<AtomicUsize>,
    mutes: Arc<Mutex<Vec<bool>>>,
}

impl CaptureControl for FakeCapture {
    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn set_muted(&mut self, muted: bool) {
        self.mutes.lock().unwrap().push(muted);
    }
}

struct Harness {
    link: FakeLink,
    events: mpsc::Sender<TransportEvent>,
    driver: CallDriver<FakeLink, BufferSink, ManualClock>,
    stops: Arc<AtomicUsize>,
    mutes: Arc<Mutex<Vec<bool>>>,
    history: Arc<Mutex<MemoryHistory>>,
}

fn harness() -> Harness {
    let link = FakeLink::new();
    let (tx, rx) = mpsc::channel(32);
    let playback = PlaybackQueue::new(BufferSink::default(), ManualClock::new(), 24_000);
    let stops = Arc::new(AtomicUsize::new(0));
    let mutes = Arc::new(Mutex::new(Vec::new()));
    let capture = FakeCapture {
        stops: stops.clone(),
        mutes: mutes.clone(),
    };
    let history = Arc::new(Mutex::new(MemoryHistory::new()));

    let driver = CallDriver::new(
        link.clone(),
        rx,
        playback,
        Box::new(capture),
        Box::new(history.clone()),
        WINDOW,
        VIDEO_PERIOD,
        ERROR_HOLD,
    );

    Harness {
        link,
        events: tx,
        driver,
        stops,
        mutes,
        history,
    }
}

fn audio_chunk(duration_secs: f64) -> EncodedChunk {
    let n = (duration_secs * 24_000.0) as usize;
    let frame = AudioFrame::mono(vec![0.0; n], 24_000);
    EncodedChunk::pcm(24_000, encode_base64(&encode_pcm16(&frame)))
}

#[tokio::test]
async fn release_runs_exactly_once_across_close_and_hangup() {
    let mut h = harness();
    h.events
        .send(TransportEvent::Closed { error: None })
        .await
        .unwrap();

    let error = h.driver.run_until_ended().await;
    assert!(error.is_none());

    assert_eq!(h.stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.link.closes.load(Ordering::SeqCst), 1);
    assert_eq!(h.driver.playback().sink().closed, 1);

    // A redundant hangup after the remote close is a no-op.
    h.driver.end_call();
    h.driver.end_call();
    assert_eq!(h.stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.link.closes.load(Ordering::SeqCst), 1);
    assert_eq!(h.driver.playback().sink().closed, 1);
}

#[tokio::test]
async fn transcript_is_persisted_when_the_call_ends() {
    let mut h = harness();
    for (text, is_final) in [("Gulshan theke ", false), ("Banani jabo", true)] {
        h.events
            .send(TransportEvent::Transcript {
                sender: Speaker::User,
                text: text.into(),
                is_final,
            })
            .await
            .unwrap();
    }
    h.events
        .send(TransportEvent::ToolCall {
            id: "fc-42".into(),
            name: "show_map".into(),
            args: json!({ "origin": "Gulshan", "destination": "Banani" }),
        })
        .await
        .unwrap();
    h.events
        .send(TransportEvent::Closed { error: None })
        .await
        .unwrap();

    h.driver.run_until_ended().await;

    let history = h.history.lock().unwrap();
    assert_eq!(history.sessions.len(), 1);
    assert_eq!(
        history.sessions[0].entries,
        vec![
            TranscriptEntry::utterance(Speaker::User, "Gulshan theke Banani jabo"),
            TranscriptEntry::MapIntent {
                origin: "Gulshan".into(),
                destination: "Banani".into(),
            },
        ]
    );

    // Exactly one acknowledgment, referencing the invocation id.
    let acks = h.link.acks.lock().unwrap();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].0, "fc-42");
    assert_eq!(acks[0].1, "show_map");
}

#[tokio::test]
async fn transport_error_is_reported_then_settles_to_idle() {
    let mut h = harness();
    h.events
        .send(TransportEvent::Closed {
            error: Some("socket reset".into()),
        })
        .await
        .unwrap();

    let error = h.driver.run_until_ended().await;
    assert_eq!(error.as_deref(), Some("socket reset"));
    // The error state is transient; after the hold the session is idle.
    assert_eq!(h.driver.status(), ConnectionStatus::Idle);
}

#[tokio::test]
async fn barge_in_flushes_scheduled_playback() {
    let mut h = harness();
    h.events
        .send(TransportEvent::Audio(audio_chunk(1.0)))
        .await
        .unwrap();
    h.events
        .send(TransportEvent::Audio(audio_chunk(1.0)))
        .await
        .unwrap();
    h.events.send(TransportEvent::Interrupted).await.unwrap();
    h.events
        .send(TransportEvent::Closed { error: None })
        .await
        .unwrap();

    h.driver.run_until_ended().await;

    // Once for the interruption, once for shutdown.
    assert_eq!(h.driver.playback().sink().cleared, 2);
    assert!(h.driver.playback().active_sources().is_empty());
}

#[tokio::test]
async fn bad_audio_chunk_does_not_end_the_call() {
    let mut h = harness();
    h.events
        .send(TransportEvent::Audio(EncodedChunk::pcm(
            24_000,
            "!!garbage!!".into(),
        )))
        .await
        .unwrap();
    h.events
        .send(TransportEvent::Audio(audio_chunk(0.5)))
        .await
        .unwrap();
    h.events
        .send(TransportEvent::Closed { error: None })
        .await
        .unwrap();

    let error = h.driver.run_until_ended().await;
    assert!(error.is_none());
    // The good chunk made it through; the malformed one never reached the sink.
    assert_eq!(h.driver.playback().sink().pushed, 1);
}

#[tokio::test]
async fn mute_is_forwarded_to_the_capture_source() {
    let mut h = harness();
    h.driver.set_muted(true);
    h.driver.set_muted(false);
    assert_eq!(*h.mutes.lock().unwrap(), vec![true, false]);
}
