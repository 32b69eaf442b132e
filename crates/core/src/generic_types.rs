use crate::tools::{FunctionDeclaration, ToolCall, ToolResponse};
use serde::{Deserialize, Serialize};

/// Who produced a piece of transcript text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptOrigin {
    /// The engine's transcription of the user's speech.
    User,
    /// The transcript of the engine's own spoken reply.
    Model,
}

/// Configuration for opening a realtime session with any provider.
#[derive(Debug, Clone)]
pub struct LiveSessionConfig {
    /// Model identifier, e.g. `models/gemini-2.5-flash-native-audio-preview-09-2025`.
    pub model: String,
    /// Persona / system instruction text.
    pub instructions: String,
    /// Prebuilt voice name for the spoken reply.
    pub voice: String,
    /// Tools the engine may call.
    pub tools: Vec<FunctionDeclaration>,
    /// Ask the engine to transcribe the user's speech.
    pub input_transcription: bool,
    /// Ask the engine to transcribe its own speech.
    pub output_transcription: bool,
}

/// A base64 payload tagged with its mime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

impl MediaBlob {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// Operations the client sends over an open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// One encoded microphone frame.
    RealtimeAudio(MediaBlob),
    /// One encoded camera frame.
    RealtimeVideo(MediaBlob),
    /// The answer to a tool call.
    ToolResponse(ToolResponse),
}

/// Events any realtime provider can emit back to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The channel finished its handshake and accepts realtime input.
    Opened,
    /// A chunk of spoken audio from the engine (base64 PCM16, 24 kHz).
    AudioDelta(String),
    /// A piece of transcript text.
    Transcript { origin: TranscriptOrigin, text: String },
    /// The engine detected the user speaking over its reply.
    Interrupted,
    /// A batch of tool invocations.
    ToolCalls(Vec<ToolCall>),
    /// The channel failed.
    Errored(String),
    /// The channel was closed.
    Closed,
}

/// Outward callbacks of a voice session. Every method defaults to a no-op.
pub trait SessionObserver: Send + Sync {
    /// Scaled RMS of each captured frame, fired even while muted.
    fn on_volume(&self, _volume: f32) {}
    fn on_transcript(&self, _text: &str, _origin: TranscriptOrigin) {}
    fn on_session_active(&self, _active: bool) {}
}

impl SessionObserver for Vec<std::sync::Arc<dyn SessionObserver>> {
    fn on_volume(&self, volume: f32) {
        self.iter().for_each(|o| o.on_volume(volume));
    }

    fn on_transcript(&self, text: &str, origin: TranscriptOrigin) {
        self.iter().for_each(|o| o.on_transcript(text, origin));
    }

    fn on_session_active(&self, active: bool) {
        self.iter().for_each(|o| o.on_session_active(active));
    }
}
