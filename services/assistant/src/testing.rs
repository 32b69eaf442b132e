//! In-memory doubles for the device and transport seams.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use jarvis_core::{
    devices::{CaptureError, CaptureSpec, Microphone, MicrophoneStream, PlaybackSink, VoiceId},
    generic_types::{LiveSessionConfig, OutboundMessage, SessionObserver, TranscriptOrigin, TransportEvent},
    realtime_api::{RealtimeConnection, RealtimeSink, RealtimeTransport},
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::sync::mpsc;

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// A playback sink whose clock only moves when told to.
pub struct ManualClockSink {
    sample_rate: u32,
    now: Mutex<Duration>,
    pub started: Mutex<Vec<(VoiceId, usize, Duration)>>,
    pub stopped: Mutex<Vec<VoiceId>>,
}

impl ManualClockSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            now: Mutex::new(Duration::ZERO),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn started_at(&self) -> Vec<Duration> {
        self.started.lock().unwrap().iter().map(|s| s.2).collect()
    }
}

impl PlaybackSink for ManualClockSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn start(&self, voice: VoiceId, samples: Arc<[f32]>, at: Duration) {
        self.started.lock().unwrap().push((voice, samples.len(), at));
    }

    fn stop(&self, voice: VoiceId) {
        self.stopped.lock().unwrap().push(voice);
    }
}

/// A microphone fed by the test. Refuses a second concurrent acquisition.
#[derive(Default)]
pub struct ScriptedMicrophone {
    deny: AtomicBool,
    held: Arc<AtomicUsize>,
    acquisitions: AtomicUsize,
    feed: Mutex<Option<mpsc::UnboundedSender<Vec<f32>>>>,
}

impl ScriptedMicrophone {
    pub fn denying() -> Self {
        let mic = Self::default();
        mic.deny.store(true, Ordering::SeqCst);
        mic
    }

    /// Pushes one block to the currently acquired stream.
    pub fn feed(&self, block: Vec<f32>) -> bool {
        match self.feed.lock().unwrap().as_ref() {
            Some(tx) => tx.send(block).is_ok(),
            None => false,
        }
    }

    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Microphone for ScriptedMicrophone {
    async fn acquire(&self, spec: CaptureSpec) -> Result<Box<dyn MicrophoneStream>, CaptureError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CaptureError::PermissionDenied("denied by test".into()));
        }
        if self.held.load(Ordering::SeqCst) > 0 {
            return Err(CaptureError::Unavailable("already held".into()));
        }
        assert_eq!(spec.channels, 1);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed.lock().unwrap() = Some(tx);
        self.held.fetch_add(1, Ordering::SeqCst);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedStream {
            blocks: rx,
            held: Arc::clone(&self.held),
            released: false,
        }))
    }
}

struct ScriptedStream {
    blocks: mpsc::UnboundedReceiver<Vec<f32>>,
    held: Arc<AtomicUsize>,
    released: bool,
}

#[async_trait]
impl MicrophoneStream for ScriptedStream {
    async fn next_block(&mut self) -> Option<Vec<f32>> {
        self.blocks.recv().await
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.held.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Test-side handles of one scripted connection.
#[derive(Clone)]
pub struct ScriptedConnection {
    pub events: mpsc::Sender<TransportEvent>,
    pub sent: Arc<Mutex<Vec<OutboundMessage>>>,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedConnection {
    pub async fn emit(&self, event: TransportEvent) {
        self.events.send(event).await.unwrap();
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn audio_sent(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, OutboundMessage::RealtimeAudio(_)))
            .count()
    }

    pub fn tool_responses(&self) -> Vec<jarvis_core::tools::ToolResponse> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::ToolResponse(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

/// A transport that records every outbound message per connection.
#[derive(Default)]
pub struct ScriptedTransport {
    fail: AtomicBool,
    stall: AtomicBool,
    lenient_close: AtomicBool,
    connections: Mutex<Vec<ScriptedConnection>>,
}

impl ScriptedTransport {
    pub fn failing() -> Self {
        let transport = Self::default();
        transport.fail.store(true, Ordering::SeqCst);
        transport
    }

    /// A handshake that never completes.
    pub fn stalling() -> Self {
        let transport = Self::default();
        transport.stall.store(true, Ordering::SeqCst);
        transport
    }

    /// Sinks that keep recording after `close`, so only the session itself
    /// can keep late messages off the channel.
    pub fn lenient() -> Self {
        let transport = Self::default();
        transport.lenient_close.store(true, Ordering::SeqCst);
        transport
    }

    pub fn connection(&self, index: usize) -> ScriptedConnection {
        self.connections.lock().unwrap()[index].clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

#[async_trait]
impl RealtimeTransport for ScriptedTransport {
    async fn connect(&self, _config: &LiveSessionConfig) -> Result<RealtimeConnection> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("handshake refused"));
        }
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let (events_tx, events) = mpsc::channel(64);
        let connection = ScriptedConnection {
            events: events_tx,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let sink = RecordingSink {
            sent: Arc::clone(&connection.sent),
            closed: Arc::clone(&connection.closed),
            lenient: self.lenient_close.load(Ordering::SeqCst),
        };
        self.connections.lock().unwrap().push(connection);
        Ok(RealtimeConnection {
            sink: Box::new(sink),
            events,
        })
    }
}

struct RecordingSink {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    closed: Arc<AtomicBool>,
    lenient: bool,
}

#[async_trait]
impl RealtimeSink for RecordingSink {
    async fn send(&mut self, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) && !self.lenient {
            return Err(anyhow!("sink closed"));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every callback.
#[derive(Default)]
pub struct RecordingObserver {
    pub volumes: Mutex<Vec<f32>>,
    pub transcripts: Mutex<Vec<(String, TranscriptOrigin)>>,
    pub active: Mutex<Vec<bool>>,
}

impl RecordingObserver {
    pub fn volume_count(&self) -> usize {
        self.volumes.lock().unwrap().len()
    }

    pub fn active_changes(&self) -> Vec<bool> {
        self.active.lock().unwrap().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_volume(&self, volume: f32) {
        self.volumes.lock().unwrap().push(volume);
    }

    fn on_transcript(&self, text: &str, origin: TranscriptOrigin) {
        self.transcripts.lock().unwrap().push((text.to_string(), origin));
    }

    fn on_session_active(&self, active: bool) {
        self.active.lock().unwrap().push(active);
    }
}
