//! Gemini Live realtime channel.
//!
//! Connects to the `BidiGenerateContent` WebSocket, sends the session setup and
//! translates server messages into provider-neutral [`TransportEvent`]s.

pub mod types;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use jarvis_core::{
    generic_types::{LiveSessionConfig, OutboundMessage, TranscriptOrigin, TransportEvent},
    realtime_api::{RealtimeConnection, RealtimeSink, RealtimeTransport},
    tools::ToolCall,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, error, info, warn};

pub const GEMINI_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens Gemini Live sessions with a fixed API key.
pub struct GeminiLiveTransport {
    api_key: SecretString,
    endpoint: String,
}

impl GeminiLiveTransport {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            endpoint: GEMINI_LIVE_ENDPOINT.to_string(),
        }
    }

    /// Points the transport at a different endpoint, e.g. a local proxy.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl RealtimeTransport for GeminiLiveTransport {
    async fn connect(&self, config: &LiveSessionConfig) -> Result<RealtimeConnection> {
        let url = format!("{}?key={}", self.endpoint, self.api_key.expose_secret());
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Gemini Live WebSocket")?;
        info!(model = %config.model, "Connected to Gemini Live WebSocket.");
        let (mut tx, rx) = ws_stream.split();

        let setup = setup_message(config);
        tx.send(WsMessage::Text(serde_json::to_string(&setup)?.into()))
            .await
            .context("Failed to send Gemini session setup")?;

        let (events_tx, events) = mpsc::channel(128);
        tokio::spawn(read_server_messages(rx, events_tx));

        Ok(RealtimeConnection {
            sink: Box::new(GeminiSink { tx }),
            events,
        })
    }
}

/// Builds the setup message: audio replies with the configured voice, the
/// persona as system instruction and every declared tool.
pub fn setup_message(config: &LiveSessionConfig) -> types::ClientMessage {
    let enabled = |on: bool| on.then(types::AudioTranscriptionConfig::default);
    let tools = if config.tools.is_empty() {
        Vec::new()
    } else {
        vec![types::Tool {
            function_declarations: config.tools.clone(),
        }]
    };

    types::ClientMessage::Setup(types::BidiGenerateContentSetup {
        model: config.model.clone(),
        generation_config: types::GenerationConfig {
            response_modalities: vec![types::ResponseModality::Audio],
            speech_config: types::SpeechConfig {
                voice_config: types::VoiceConfig {
                    prebuilt_voice_config: types::PrebuiltVoiceConfig {
                        voice_name: config.voice.clone(),
                    },
                },
            },
        },
        system_instruction: types::Content {
            parts: vec![types::Part {
                text: config.instructions.clone(),
            }],
        },
        tools,
        input_audio_transcription: enabled(config.input_transcription),
        output_audio_transcription: enabled(config.output_transcription),
    })
}

/// Maps one outbound operation onto its wire message.
pub fn client_message(message: OutboundMessage) -> types::ClientMessage {
    let blob = |b: jarvis_core::generic_types::MediaBlob| types::Blob {
        mime_type: b.mime_type,
        data: b.data,
    };
    match message {
        OutboundMessage::RealtimeAudio(media) => {
            types::ClientMessage::RealtimeInput(types::BidiGenerateContentRealtimeInput {
                audio: Some(blob(media)),
                ..Default::default()
            })
        }
        OutboundMessage::RealtimeVideo(media) => {
            types::ClientMessage::RealtimeInput(types::BidiGenerateContentRealtimeInput {
                video: Some(blob(media)),
                ..Default::default()
            })
        }
        OutboundMessage::ToolResponse(response) => {
            types::ClientMessage::ToolResponse(types::BidiGenerateContentToolResponse {
                function_responses: vec![types::FunctionResponse {
                    id: response.id,
                    name: response.name,
                    response: response.response,
                }],
            })
        }
    }
}

/// Translates one server message into events, in the order the session
/// should see them: readiness, audio, transcripts, interruption, tool calls.
pub fn translate(message: types::ServerMessage) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    if message.setup_complete.is_some() {
        events.push(TransportEvent::Opened);
    }

    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .filter(|blob| {
                        blob.mime_type
                            .as_deref()
                            .is_none_or(|mime| mime.starts_with("audio/"))
                    })
                    .map(|blob| TransportEvent::AudioDelta(blob.data)),
            );
        }
        let transcripts = [
            (content.output_transcription, TranscriptOrigin::Model),
            (content.input_transcription, TranscriptOrigin::User),
        ];
        for (transcription, origin) in transcripts {
            if let Some(t) = transcription.filter(|t| !t.text.is_empty()) {
                events.push(TransportEvent::Transcript {
                    origin,
                    text: t.text,
                });
            }
        }
        if content.interrupted == Some(true) {
            events.push(TransportEvent::Interrupted);
        }
    }

    if let Some(tool_call) = message.tool_call {
        let calls: Vec<ToolCall> = tool_call
            .function_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.name,
                args: if call.args.is_null() {
                    Value::Object(Default::default())
                } else {
                    call.args
                },
            })
            .collect();
        if !calls.is_empty() {
            events.push(TransportEvent::ToolCalls(calls));
        }
    }

    if let Some(cancellation) = message.tool_call_cancellation {
        warn!(ids = ?cancellation.ids, "Gemini cancelled tool calls; their responses will still be sent.");
    }
    if let Some(go_away) = message.go_away {
        warn!(?go_away, "Gemini announced the connection will close soon.");
    }
    events
}

async fn read_server_messages(mut rx: SplitStream<WsStream>, events: mpsc::Sender<TransportEvent>) {
    let terminal = loop {
        let payload = match rx.next().await {
            Some(Ok(WsMessage::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(WsMessage::Binary(bytes))) => bytes.to_vec(),
            Some(Ok(WsMessage::Close(close_frame))) => {
                info!(?close_frame, "Gemini WebSocket connection closed by server.");
                break TransportEvent::Closed;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!("Error reading from Gemini WebSocket: {}", e);
                break TransportEvent::Errored(e.to_string());
            }
            None => break TransportEvent::Closed,
        };

        let message = match serde_json::from_slice::<types::ServerMessage>(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Skipping malformed Gemini message.");
                continue;
            }
        };
        for event in translate(message) {
            if events.send(event).await.is_err() {
                debug!("Session dropped its event receiver; stopping Gemini reader.");
                return;
            }
        }
    };
    let _ = events.send(terminal).await;
}

struct GeminiSink {
    tx: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl RealtimeSink for GeminiSink {
    async fn send(&mut self, message: OutboundMessage) -> Result<()> {
        let payload = serde_json::to_string(&client_message(message))?;
        self.tx.send(WsMessage::Text(payload.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.tx.close().await {
            Ok(()) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
