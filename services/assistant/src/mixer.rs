//! Software mixer: the playback clock and the voices scheduled on it.
//!
//! The clock is the number of frames rendered so far, so scheduled start
//! times line up sample-exactly with what the output device actually plays.

use jarvis_core::devices::{PlaybackSink, VoiceId};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

struct Voice {
    id: VoiceId,
    samples: Arc<[f32]>,
    start_frame: u64,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Default)]
struct MixerState {
    position: u64,
    voices: Vec<Voice>,
}

pub struct Mixer {
    sample_rate: u32,
    state: Mutex<MixerState>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            state: Mutex::new(MixerState::default()),
        }
    }

    /// Fills `out` with the next frames of the mix and advances the clock.
    pub fn render(&self, out: &mut [f32]) {
        let mut state = self.lock();
        let base = state.position;
        out.fill(0.0);

        for voice in &state.voices {
            let from = voice.start_frame.max(base);
            let to = voice.end_frame().min(base + out.len() as u64);
            for frame in from..to {
                out[(frame - base) as usize] += voice.samples[(frame - voice.start_frame) as usize];
            }
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        state.position = base + out.len() as u64;
        let position = state.position;
        state.voices.retain(|v| v.end_frame() > position);
    }

    pub fn active_voices(&self) -> usize {
        self.lock().voices.len()
    }

    fn to_frames(&self, at: Duration) -> u64 {
        let nanos = at.as_nanos() * u128::from(self.sample_rate);
        ((nanos + 500_000_000) / 1_000_000_000) as u64
    }

    fn lock(&self) -> MutexGuard<'_, MixerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PlaybackSink for Mixer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> Duration {
        let frames = self.lock().position;
        Duration::from_nanos(frames * 1_000_000_000 / u64::from(self.sample_rate))
    }

    fn start(&self, voice: VoiceId, samples: Arc<[f32]>, at: Duration) {
        let start_frame = self.to_frames(at);
        self.lock().voices.push(Voice {
            id: voice,
            samples,
            start_frame,
        });
    }

    fn stop(&self, voice: VoiceId) {
        self.lock().voices.retain(|v| v.id != voice);
    }
}
