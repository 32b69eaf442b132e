//! The live-session state machine.
//!
//! [`VoiceSession`] is the public handle. Each successful `connect()` spawns
//! one actor task that owns everything tied to that connection: the capture
//! loop, the playback scheduler and the sender task draining outbound
//! operations into the channel. Teardown always runs inside the actor, so
//! it happens exactly once whichever side ends the session.

use super::{
    capture::{AudioCapture, CaptureContext},
    dispatch::ToolDispatcher,
    playback::PlaybackScheduler,
    protocol::{Control, SessionError, SessionState},
};
use crate::{audio_utils, config::AudioSettings};
use jarvis_core::{
    devices::{CaptureSpec, Microphone, MicrophoneStream, PlaybackSink},
    generic_types::{LiveSessionConfig, MediaBlob, OutboundMessage, SessionObserver, TransportEvent},
    realtime_api::{RealtimeConnection, RealtimeSink, RealtimeTransport},
    tools::ToolCall,
};
use std::sync::{
    Arc, Mutex as StdMutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::{
    sync::{Mutex, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// The collaborators a session is composed from.
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn RealtimeTransport>,
    pub microphone: Arc<dyn Microphone>,
    pub playback: Arc<dyn PlaybackSink>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub observer: Arc<dyn SessionObserver>,
}

struct LiveSession {
    control: mpsc::Sender<Control>,
    task: JoinHandle<()>,
}

impl LiveSession {
    async fn shutdown(self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.control.send(Control::Disconnect { done: done_tx }).await.is_ok() {
            let _ = done_rx.await;
        }
        if let Err(e) = self.task.await {
            error!("Session task ended abnormally: {e}");
        }
    }
}

/// What the handle currently owns.
enum Slot {
    Idle,
    /// A handshake is running outside the lock. `cancel` aborts it and
    /// `finished` resolves once the attempt has let go of the microphone.
    /// Never await `finished` while holding the lock.
    Connecting {
        session_id: Uuid,
        cancel: oneshot::Sender<()>,
        finished: oneshot::Receiver<()>,
    },
    Live(LiveSession),
}

impl Slot {
    fn is_attempt(&self, id: Uuid) -> bool {
        matches!(self, Slot::Connecting { session_id, .. } if *session_id == id)
    }
}


/// A duplex voice session with the realtime engine.
pub struct VoiceSession {
    config: LiveSessionConfig,
    audio: AudioSettings,
    deps: SessionDeps,
    state: Arc<watch::Sender<SessionState>>,
    muted: Arc<AtomicBool>,
    slot: Mutex<Slot>,
    outbound: StdMutex<Option<mpsc::UnboundedSender<OutboundMessage>>>,
}

impl VoiceSession {
    pub fn new(config: LiveSessionConfig, audio: AudioSettings, deps: SessionDeps) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            audio,
            deps,
            state: Arc::new(state),
            muted: Arc::new(AtomicBool::new(false)),
            slot: Mutex::new(Slot::Idle),
            outbound: StdMutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Opens a new session, tearing down any existing one first.
    ///
    /// Resolves once the microphone is held and the channel handshake is done;
    /// the state moves to `Active`/`Muted` when the engine reports it is open.
    /// There is no retry: on failure the state is `Error` and the caller
    /// decides whether to call `connect` again. A `disconnect()` (or a newer
    /// `connect()`) during the handshake aborts it with
    /// [`SessionError::Cancelled`].
    pub async fn connect(&self) -> Result<(), SessionError> {
        let session_id = Uuid::new_v4();
        let (mut cancel, _finished, abandoned) = {
            let mut slot = self.slot.lock().await;
            let abandoned = match std::mem::replace(&mut *slot, Slot::Idle) {
                Slot::Live(previous) => {
                    info!("Replacing the existing session.");
                    previous.shutdown().await;
                    None
                }
                Slot::Connecting {
                    cancel, finished, ..
                } => {
                    info!("Abandoning the pending connect.");
                    let _ = cancel.send(());
                    Some(finished)
                }
                Slot::Idle => None,
            };
            self.set_outbound(None);
            let (cancel_tx, cancel_rx) = oneshot::channel();
            let (finished_tx, finished_rx) = oneshot::channel::<()>();
            *slot = Slot::Connecting {
                session_id,
                cancel: cancel_tx,
                finished: finished_rx,
            };
            self.state.send_replace(SessionState::Connecting);
            (cancel_rx, finished_tx, abandoned)
        };
        if let Some(finished) = abandoned {
            let _ = finished.await;
        }

        let span = info_span!("voice_session", %session_id);
        let handshake = self.handshake(&mut cancel).instrument(span.clone()).await;

        let mut slot = self.slot.lock().await;
        let current = slot.is_attempt(session_id);
        let (mut stream, mut connection) = match handshake {
            Ok(parts) => parts,
            Err(SessionError::Cancelled) => return Err(SessionError::Cancelled),
            Err(e) => {
                if current {
                    *slot = Slot::Idle;
                    self.state.send_replace(SessionState::Error);
                }
                return Err(e);
            }
        };
        if !current {
            // Cancelled just as the handshake completed.
            drop(slot);
            stream.release();
            if let Err(e) = connection.sink.close().await {
                warn!("Failed to close abandoned channel: {e:#}");
            }
            return Err(SessionError::Cancelled);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (sender_stop, sender_stop_rx) = oneshot::channel();
        let sender = tokio::spawn(
            run_sender(connection.sink, outbound_rx, self.state.subscribe(), sender_stop_rx)
                .instrument(span.clone()),
        );

        let mut capture = AudioCapture::new();
        {
            let _entered = span.enter();
            capture.start(
                stream,
                CaptureContext {
                    state: self.state.subscribe(),
                    outbound: outbound_tx.clone(),
                    observer: Arc::clone(&self.deps.observer),
                    volume_gain: self.audio.volume_gain,
                    sample_rate: self.audio.capture_sample_rate,
                    block_size: self.audio.capture_block_size,
                },
            );
        }

        let actor = SessionActor {
            state: Arc::clone(&self.state),
            muted: Arc::clone(&self.muted),
            scheduler: PlaybackScheduler::new(Arc::clone(&self.deps.playback)),
            capture,
            sender,
            sender_stop: Some(sender_stop),
            outbound: outbound_tx.clone(),
            dispatcher: Arc::clone(&self.deps.dispatcher),
            observer: Arc::clone(&self.deps.observer),
        };
        let (control_tx, control_rx) = mpsc::channel(4);
        let task = tokio::spawn(actor.run(connection.events, control_rx).instrument(span));

        *slot = Slot::Live(LiveSession {
            control: control_tx,
            task,
        });
        self.set_outbound(Some(outbound_tx));
        info!(%session_id, model = %self.config.model, "Realtime channel connected; waiting for open.");
        Ok(())
    }

    /// Acquires the microphone, then opens the channel. Either wait ends as
    /// soon as `cancel` fires or its sender is dropped.
    async fn handshake(
        &self,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<(Box<dyn MicrophoneStream>, RealtimeConnection), SessionError> {
        let spec = CaptureSpec {
            sample_rate: self.audio.capture_sample_rate,
            channels: 1,
            block_size: self.audio.capture_block_size,
        };
        let mut stream = tokio::select! {
            biased;
            _ = &mut *cancel => {
                info!("Connect cancelled while acquiring the microphone.");
                return Err(SessionError::Cancelled);
            }
            acquired = self.deps.microphone.acquire(spec) => match acquired {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Could not acquire microphone: {e}");
                    return Err(e.into());
                }
            },
        };

        tokio::select! {
            biased;
            _ = &mut *cancel => {
                info!("Connect cancelled during the channel handshake.");
                stream.release();
                Err(SessionError::Cancelled)
            }
            connected = self.deps.transport.connect(&self.config) => match connected {
                Ok(connection) => Ok((stream, connection)),
                Err(e) => {
                    error!("Could not open realtime channel: {e:#}");
                    stream.release();
                    Err(SessionError::Transport(format!("{e:#}")))
                }
            },
        }
    }

    /// Ends the session: stops capture, cancels playback, closes the channel.
    ///
    /// Safe from any state and idempotent. A handshake still in progress is
    /// aborted. A tool call still running finishes on its own, but its
    /// response is discarded.
    pub async fn disconnect(&self) {
        let mut slot = self.slot.lock().await;
        self.set_outbound(None);
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Live(session) => session.shutdown().await,
            Slot::Connecting {
                cancel, finished, ..
            } => {
                let _ = cancel.send(());
                self.state.send_replace(SessionState::Closed);
                drop(slot);
                let _ = finished.await;
                info!("Disconnect requested while connecting; handshake aborted.");
            }
            Slot::Idle => debug!("Disconnect requested with no live session."),
        }
    }

    /// Toggles between `Active` and `Muted` without touching the channel.
    ///
    /// The flag is remembered while not open and applied when the engine
    /// opens the channel.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        let changed = self.state.send_if_modified(|state| {
            if state.is_open() && *state != SessionState::open(muted) {
                *state = SessionState::open(muted);
                true
            } else {
                false
            }
        });
        if changed {
            info!(muted, "Microphone transmission toggled.");
        }
    }

    /// Sends one JPEG camera frame. Returns `false` when no session is open.
    pub fn send_video_frame(&self, jpeg: &[u8]) -> bool {
        if !self.state().is_open() {
            return false;
        }
        let outbound = match self.outbound.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let blob = MediaBlob::new("image/jpeg", audio_utils::encode_bytes(jpeg));
        outbound.is_some_and(|tx| tx.send(OutboundMessage::RealtimeVideo(blob)).is_ok())
    }

    fn set_outbound(&self, sender: Option<mpsc::UnboundedSender<OutboundMessage>>) {
        match self.outbound.lock() {
            Ok(mut guard) => *guard = sender,
            Err(poisoned) => *poisoned.into_inner() = sender,
        }
    }
}

/// Owns everything tied to one connection.
struct SessionActor {
    state: Arc<watch::Sender<SessionState>>,
    muted: Arc<AtomicBool>,
    scheduler: PlaybackScheduler,
    capture: AudioCapture,
    sender: JoinHandle<()>,
    sender_stop: Option<oneshot::Sender<()>>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    dispatcher: Arc<ToolDispatcher>,
    observer: Arc<dyn SessionObserver>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut control: mpsc::Receiver<Control>,
    ) {
        let (final_state, done) = loop {
            tokio::select! {
                biased;
                command = control.recv() => match command {
                    Some(Control::Disconnect { done }) => {
                        info!("Disconnect requested.");
                        break (SessionState::Closed, Some(done));
                    }
                    // The handle was dropped.
                    None => break (SessionState::Closed, None),
                },
                event = events.recv() => match event {
                    Some(TransportEvent::Closed) | None => {
                        info!("Realtime channel closed.");
                        break (SessionState::Closed, None);
                    }
                    Some(TransportEvent::Errored(reason)) => {
                        error!("Realtime channel failed: {reason}");
                        break (SessionState::Error, None);
                    }
                    Some(event) => self.handle_event(event),
                },
            }
        };

        self.teardown(final_state).await;
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                // Read under the watch lock, serialized with `set_muted`.
                let mut muted = false;
                let opened = self.state.send_if_modified(|state| {
                    if *state == SessionState::Connecting {
                        muted = self.muted.load(Ordering::SeqCst);
                        *state = SessionState::open(muted);
                        true
                    } else {
                        false
                    }
                });
                if opened {
                    info!(muted, "Session open.");
                    self.observer.on_session_active(true);
                }
            }
            TransportEvent::AudioDelta(data) => match audio_utils::decode(&data) {
                Ok(samples) => {
                    if let Some(scheduled) = self.scheduler.enqueue(samples) {
                        debug!(voice = scheduled.voice, start = ?scheduled.start, "Scheduled audio chunk.");
                    }
                }
                Err(e) => warn!("Dropping malformed audio chunk: {e}"),
            },
            TransportEvent::Transcript { origin, text } => {
                debug!(?origin, %text, "Transcript.");
                self.observer.on_transcript(&text, origin);
            }
            TransportEvent::Interrupted => {
                let cut = self.scheduler.interrupt();
                info!(cut, "Engine interrupted playback.");
            }
            TransportEvent::ToolCalls(calls) => {
                for call in calls {
                    self.spawn_tool_call(call);
                }
            }
            // Terminal events are handled by the run loop.
            TransportEvent::Errored(_) | TransportEvent::Closed => {}
        }
    }

    fn spawn_tool_call(&self, call: ToolCall) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let outbound = self.outbound.clone();
        tokio::spawn(
            async move {
                let id = call.id.clone();
                let response = dispatcher.dispatch(call).await;
                if outbound.send(OutboundMessage::ToolResponse(response)).is_err() {
                    warn!(%id, "Session ended before the tool finished; discarding its response.");
                }
            }
            .in_current_span(),
        );
    }

    async fn teardown(mut self, final_state: SessionState) {
        self.state.send_replace(final_state);
        // Nothing reaches the channel once the state is terminal.
        if let Some(stop) = self.sender_stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.sender).await {
            error!("Sender task ended abnormally: {e}");
        }
        self.capture.stop().await;
        self.scheduler.interrupt();
        self.observer.on_session_active(false);
        info!(state = ?final_state, "Session torn down.");
    }
}

/// Drains outbound operations into the channel, in order, once it is open.
///
/// Operations queued before the open are held until then. On stop the
/// channel is closed and the queue dropped, so anything sent afterwards fails.
async fn run_sender(
    mut sink: Box<dyn RealtimeSink>,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    mut state: watch::Receiver<SessionState>,
    mut stop: oneshot::Receiver<()>,
) {
    let opened = tokio::select! {
        biased;
        _ = &mut stop => false,
        opened = state.wait_for(SessionState::is_open) => opened.is_ok(),
    };

    let mut sent = 0usize;
    if opened {
        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                message = outbound.recv() => match message {
                    Some(message) => {
                        if let Err(e) = sink.send(message).await {
                            warn!("Failed to send on realtime channel: {e:#}");
                            break;
                        }
                        sent += 1;
                    }
                    None => break,
                },
            }
        }
    }

    if let Err(e) = sink.close().await {
        warn!("Failed to close realtime channel: {e:#}");
    }
    debug!(sent, "Sender stopped.");
}
