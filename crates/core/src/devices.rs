//! Audio device seams: where samples come from and where they go.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// What the capture side asks the microphone for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("Microphone unavailable: {0}")]
    Unavailable(String),
}

/// A microphone the session can acquire exclusively.
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn acquire(&self, spec: CaptureSpec) -> Result<Box<dyn MicrophoneStream>, CaptureError>;
}

/// An acquired microphone.
#[async_trait]
pub trait MicrophoneStream: Send {
    /// The next block of mono samples in `[-1, 1]`, or `None` once the source
    /// has ended. Must be cancel safe: the capture loop races it against stop.
    async fn next_block(&mut self) -> Option<Vec<f32>>;

    /// Gives the device back. Idempotent.
    fn release(&mut self);
}

/// Identifies one scheduled chunk on a [`PlaybackSink`].
pub type VoiceId = u64;

/// A playback device together with the clock it plays against.
///
/// `now()` only moves forward. Stopping a voice that already finished, or was
/// never started, is a no-op.
pub trait PlaybackSink: Send + Sync {
    fn sample_rate(&self) -> u32;
    fn now(&self) -> Duration;
    fn start(&self, voice: VoiceId, samples: Arc<[f32]>, at: Duration);
    fn stop(&self, voice: VoiceId);
}
