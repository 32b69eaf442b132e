//! Main Entrypoint for the JARVIS voice assistant
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the persona and the live session configuration.
//! 3. Opening the PulseAudio microphone and speaker.
//! 4. Connecting the voice session and relaying keyboard commands to it.
//! 5. Tearing everything down on Ctrl+C or when the channel ends.

use anyhow::Context;
use clap::Parser;
use gemini_realtime::GeminiLiveTransport;
use jarvis_assistant::{
    config::Config,
    handlers::{CameraSelector, XdgOpener, host_dispatcher},
    mixer::Mixer,
    pulse::{PaplayOutput, ParecMicrophone},
    session::{SessionDeps, SessionState, VoiceSession},
};
use jarvis_core::{
    generic_types::{SessionObserver, TranscriptOrigin},
    persona::PersonaConfig,
    presence::{AgentState, PresenceMonitor},
};
use std::{sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "assistant", about = "Talk to JARVIS over the Gemini Live API")]
struct Args {
    /// Open the session with the microphone muted.
    #[arg(long)]
    start_muted: bool,
    /// File whose contents replace the built-in system instruction.
    #[arg(long)]
    persona: Option<std::path::PathBuf>,
}

/// Prints both sides of the conversation.
struct TranscriptLog;

impl SessionObserver for TranscriptLog {
    fn on_transcript(&self, text: &str, origin: TranscriptOrigin) {
        match origin {
            TranscriptOrigin::User => info!(target: "transcript", "you: {text}"),
            TranscriptOrigin::Model => info!(target: "transcript", "jarvis: {text}"),
        }
    }

    fn on_session_active(&self, active: bool) {
        info!(active, "Session activity changed.");
    }
}

fn load_persona(path: Option<&std::path::Path>) -> anyhow::Result<PersonaConfig> {
    let mut persona = PersonaConfig::jarvis();
    if let Some(path) = path {
        persona.system_instruction = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read persona file {}", path.display()))?;
    }
    Ok(persona)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing voice session...");

    // --- 2. Persona ---
    let persona_path = args.persona.as_deref().or(config.persona_path.as_deref());
    let persona = load_persona(persona_path)?;
    let live_config = persona.live_config(&config.live_model, &config.voice_name);

    // --- 3. Devices ---
    let mixer = Arc::new(Mixer::new(config.audio.playback_sample_rate));
    let mut speaker = PaplayOutput::spawn(mixer.clone())?;
    let presence = Arc::new(PresenceMonitor::new());
    let observers: Vec<Arc<dyn SessionObserver>> = vec![Arc::new(TranscriptLog), presence.clone()];

    let deps = SessionDeps {
        transport: Arc::new(GeminiLiveTransport::new(config.gemini_api_key.clone())),
        microphone: Arc::new(ParecMicrophone),
        playback: mixer,
        dispatcher: Arc::new(host_dispatcher(CameraSelector::default(), Arc::new(XdgOpener))),
        observer: Arc::new(observers),
    };
    let session = VoiceSession::new(live_config, config.audio, deps);
    session.set_muted(args.start_muted);

    // --- 4. Connect ---
    presence.set(AgentState::Connecting);
    let connected = tokio::select! {
        result = session.connect() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal while connecting.");
            session.disconnect().await;
            speaker.stop();
            return Ok(());
        }
    };
    if let Err(e) = connected {
        presence.set(AgentState::Error);
        if e.is_permission_denied() {
            warn!("Microphone access was refused; check the PulseAudio source permissions.");
        }
        return Err(e).context("Failed to start the voice session");
    }
    info!(persona = %persona.name, model = %config.live_model, "Connecting. Type `m` + Enter to toggle mute, `q` to quit.");

    let mut presence_changes = presence.subscribe();
    let mut session_changes = session.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal. Shutting down gracefully...");
                break;
            }
            _ = ticker.tick() => presence.tick(std::time::Instant::now()),
            Ok(()) = presence_changes.changed() => {
                let state = *presence_changes.borrow();
                info!(?state, "Presence changed.");
            }
            Ok(()) = session_changes.changed() => {
                let state = *session_changes.borrow();
                info!(?state, "Session state changed.");
                match state {
                    SessionState::Closed => break,
                    SessionState::Error => {
                        presence.set(AgentState::Error);
                        break;
                    }
                    _ => {}
                }
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(command)) => match command.trim() {
                    "m" => session.set_muted(!session.is_muted()),
                    "q" => break,
                    "" => {}
                    other => warn!("Unknown command `{other}`; use `m` or `q`."),
                },
                // Stdin closed: keep running until Ctrl+C.
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    // --- 5. Teardown ---
    session.disconnect().await;
    speaker.stop();
    info!("Assistant has shut down.");
    Ok(())
}
