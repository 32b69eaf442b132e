//! Microphone capture: fixed-size frames, volume feedback, outbound audio.
//!
//! Every frame fires the volume callback. A frame is encoded and queued for
//! the channel only while the session is `Active`; when muted or not yet open
//! it is dropped, never buffered.

use super::protocol::SessionState;
use crate::audio_utils;
use jarvis_core::{
    devices::MicrophoneStream,
    generic_types::{MediaBlob, OutboundMessage, SessionObserver},
};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, info};

/// Re-frames arbitrary microphone blocks into exact `block_size` frames.
pub struct FrameAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Appends samples and returns every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.block_size * self.block_size;
        let frames = self.pending[..complete]
            .chunks_exact(self.block_size)
            .map(<[f32]>::to_vec)
            .collect();
        self.pending.drain(..complete);
        frames
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// What happened to one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Sent,
    Muted,
    Dropped,
}

/// Everything a capture loop needs from its session.
#[derive(Clone)]
pub struct CaptureContext {
    pub state: watch::Receiver<SessionState>,
    pub outbound: mpsc::UnboundedSender<OutboundMessage>,
    pub observer: Arc<dyn SessionObserver>,
    pub volume_gain: f32,
    pub sample_rate: u32,
    pub block_size: usize,
}

impl CaptureContext {
    /// Handles one complete frame.
    pub fn process_frame(&self, frame: &[f32]) -> FrameOutcome {
        self.observer
            .on_volume(audio_utils::rms(frame) * self.volume_gain);

        let state = *self.state.borrow();
        if !state.transmits_audio() {
            return if state == SessionState::Muted {
                FrameOutcome::Muted
            } else {
                FrameOutcome::Dropped
            };
        }

        let blob = MediaBlob::new(
            audio_utils::pcm_mime(self.sample_rate),
            audio_utils::encode(frame),
        );
        match self.outbound.send(OutboundMessage::RealtimeAudio(blob)) {
            Ok(()) => FrameOutcome::Sent,
            Err(_) => FrameOutcome::Dropped,
        }
    }
}

/// A running (or stopped) capture loop.
#[derive(Default)]
pub struct AudioCapture {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AudioCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Starts pulling frames from `stream`. Starting twice is a no-op; the
    /// surplus stream is released straight away.
    pub fn start(&mut self, mut stream: Box<dyn MicrophoneStream>, ctx: CaptureContext) {
        if self.is_running() {
            debug!("Capture already running; ignoring second start.");
            stream.release();
            return;
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);
        self.task = Some(tokio::spawn(run_capture(stream, stop_rx, ctx).in_current_span()));
    }

    /// Stops the loop and waits until the microphone is released. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn run_capture(
    mut stream: Box<dyn MicrophoneStream>,
    mut stop_rx: oneshot::Receiver<()>,
    ctx: CaptureContext,
) {
    let mut assembler = FrameAssembler::new(ctx.block_size);
    let mut sent = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            block = stream.next_block() => match block {
                Some(samples) => {
                    for frame in assembler.push(&samples) {
                        if ctx.process_frame(&frame) == FrameOutcome::Sent {
                            sent += 1;
                        }
                    }
                }
                None => {
                    info!("Microphone source ended.");
                    break;
                }
            },
        }
    }
    stream.release();
    debug!(sent, discarded = assembler.buffered(), "Capture stopped and microphone released.");
}
