//! Gapless scheduling of inbound audio chunks on the playback clock.
//!
//! Chunks are laid end to end: each one starts at `max(now, next_start)` and
//! pushes `next_start` forward by its own duration. A burst of chunks arriving
//! faster than real time therefore queues back to back, and a chunk arriving
//! after the clock idled starts immediately instead of in the past.
//!
//! `next_start` is kept as a sample index, so start times never drift from
//! the sample grid however many chunks are queued.

use crate::audio_utils::{frame_at, frame_time};
use jarvis_core::devices::{PlaybackSink, VoiceId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

// Voice ids are unique process-wide so sessions can share one device.
static NEXT_VOICE: AtomicU64 = AtomicU64::new(1);

/// A chunk bound to an absolute start time on the playback clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledPlayback {
    pub voice: VoiceId,
    pub start: Duration,
    pub duration: Duration,
}

impl ScheduledPlayback {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    pub fn is_finished(&self, now: Duration) -> bool {
        now >= self.end()
    }
}

/// Owns `next_start` and the set of chunks still pending or playing.
///
/// Not shared: the session actor owns it, so arrivals and interruptions are
/// serialized by construction.
pub struct PlaybackScheduler {
    sink: Arc<dyn PlaybackSink>,
    rate: u32,
    next_frame: u64,
    live: Vec<ScheduledPlayback>,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn PlaybackSink>) -> Self {
        let rate = sink.sample_rate();
        let next_frame = frame_at(sink.now(), rate);
        Self {
            sink,
            rate,
            next_frame,
            live: Vec::new(),
        }
    }

    /// Schedules one chunk behind everything already queued.
    ///
    /// Returns `None` for an empty chunk, which has nothing to play.
    pub fn enqueue(&mut self, samples: Vec<f32>) -> Option<ScheduledPlayback> {
        if samples.is_empty() {
            return None;
        }
        let now = self.sink.now();
        self.prune(now);

        let start_frame = frame_at(now, self.rate).max(self.next_frame);
        let end_frame = start_frame + samples.len() as u64;
        let start = frame_time(start_frame, self.rate);
        let scheduled = ScheduledPlayback {
            voice: NEXT_VOICE.fetch_add(1, Ordering::Relaxed),
            start,
            duration: frame_time(end_frame, self.rate) - start,
        };
        self.sink.start(scheduled.voice, samples.into(), scheduled.start);
        self.next_frame = end_frame;
        self.live.push(scheduled);
        Some(scheduled)
    }

    /// Stops every pending or playing chunk and rewinds `next_start` to now.
    ///
    /// Returns how many chunks were cut. Calling it with nothing queued is fine.
    pub fn interrupt(&mut self) -> usize {
        let now = self.sink.now();
        self.prune(now);
        let cut = self.live.len();
        for playback in self.live.drain(..) {
            self.sink.stop(playback.voice);
        }
        self.next_frame = frame_at(now, self.rate);
        debug!(cut, "Playback interrupted.");
        cut
    }

    pub fn next_start(&self) -> Duration {
        frame_time(self.next_frame, self.rate)
    }

    /// Chunks not yet finished at the current clock time.
    pub fn pending(&mut self) -> &[ScheduledPlayback] {
        let now = self.sink.now();
        self.prune(now);
        &self.live
    }

    fn prune(&mut self, now: Duration) {
        self.live.retain(|p| !p.is_finished(now));
    }
}
