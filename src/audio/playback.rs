use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info};

use crate::audio::pcm::{self, AudioFrame, EncodedChunk};
use crate::error::DecodeError;

/// Clock source for playback scheduling. Injected so the scheduling math is
/// testable without an audio device.
pub trait AudioClock {
    /// Seconds on a monotonic scale. Only differences matter.
    fn now(&self) -> f64;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for tests.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, t: f64) {
        *self.now.lock().unwrap() = t;
    }

    pub fn advance(&self, dt: f64) {
        *self.now.lock().unwrap() += dt;
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap()
    }
}

/// Where decoded samples go. The binary plugs in the cpal speaker sink;
/// tests plug in a buffer.
pub trait PlaybackSink {
    fn push(&mut self, frame: &AudioFrame);
    /// Drop everything queued but not yet played.
    fn clear(&mut self);
    /// Release the output resource. Must be idempotent.
    fn close(&mut self);
}

/// A scheduled (pending or playing) buffer. Owned by the queue and removed
/// on natural completion or interruption.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSource {
    pub id: u64,
    pub start: f64,
    pub end: f64,
}

/// Orders inbound speech chunks for gapless rendering.
///
/// Chunks arrive as a stream of small fragments, so starts are chained off
/// `next_free` rather than played one-and-waited: each chunk starts at
/// max(now, next_free) and advances next_free by its duration.
pub struct PlaybackQueue<S: PlaybackSink, C: AudioClock> {
    sink: S,
    clock: C,
    output_rate: u32,
    next_free: f64,
    next_id: u64,
    active: Vec<ScheduledSource>,
    closed: bool,
}

impl<S: PlaybackSink, C: AudioClock> PlaybackQueue<S, C> {
    pub fn new(sink: S, clock: C, output_rate: u32) -> Self {
        Self {
            sink,
            clock,
            output_rate,
            next_free: 0.0,
            next_id: 0,
            active: Vec::new(),
            closed: false,
        }
    }

    /// Decode and schedule one chunk. Returns the scheduled start time.
    /// Chunks are never reordered; callers must preserve arrival order.
    pub fn enqueue(&mut self, chunk: &EncodedChunk) -> Result<f64, DecodeError> {
        let now = self.clock.now();
        if self.closed {
            return Ok(now);
        }
        let frame = pcm::decode_chunk(chunk, self.output_rate)?;

        self.prune(now);

        let start = now.max(self.next_free);
        let end = start + frame.duration_secs();
        let id = self.next_id;
        self.next_id += 1;
        self.active.push(ScheduledSource { id, start, end });
        self.next_free = end;

        debug!(id, start, end, samples = frame.samples.len(), "scheduled chunk");
        self.sink.push(&frame);
        Ok(start)
    }

    /// Barge-in: stop everything now and reset the timeline to the clock.
    pub fn interrupt(&mut self) {
        if self.closed {
            return;
        }
        let dropped = self.active.len();
        self.active.clear();
        self.next_free = self.clock.now();
        self.sink.clear();
        if dropped > 0 {
            info!(dropped, "playback interrupted");
        }
    }

    /// Stop and release the output. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.active.clear();
        self.sink.clear();
        self.sink.close();
        info!("playback queue shut down");
    }

    /// Sources still pending or playing at the current clock time. Entries
    /// whose end has passed are already gone from the returned view even if
    /// no enqueue has pruned them yet.
    pub fn active_sources(&self) -> Vec<ScheduledSource> {
        let now = self.clock.now();
        self.active
            .iter()
            .filter(|s| s.end > now)
            .cloned()
            .collect()
    }

    pub fn next_free(&self) -> f64 {
        self.next_free
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn prune(&mut self, now: f64) {
        self.active.retain(|s| s.end > now);
    }
}

/// Sink that just accumulates frames. Used by tests and dry runs.
#[derive(Default)]
pub struct BufferSink {
    pub frames: Vec<AudioFrame>,
    pub pushed: usize,
    pub cleared: usize,
    pub closed: usize,
}

impl PlaybackSink for BufferSink {
    fn push(&mut self, frame: &AudioFrame) {
        self.pushed += 1;
        self.frames.push(frame.clone());
    }

    fn clear(&mut self) {
        self.frames.clear();
        self.cleared += 1;
    }

    fn close(&mut self) {
        self.closed += 1;
    }
}
