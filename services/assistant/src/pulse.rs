//! PulseAudio devices backed by the `parec` / `paplay` command-line tools.

use crate::audio_utils;
use crate::mixer::Mixer;
use async_trait::async_trait;
use jarvis_core::devices::{CaptureError, CaptureSpec, Microphone, MicrophoneStream};
use std::io::{self, Write};
use std::process::Stdio;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// 50 ms at 16 kHz.
const READ_BLOCK: usize = 800;
// 20 ms at 24 kHz.
const RENDER_BLOCK: usize = 480;
// Server-side buffer for paplay. The mixer clock runs at most this far ahead
// of what is audible, so an interrupt cuts audio within it.
const PLAYBACK_LATENCY_MS: u32 = 40;

fn pulse_server() -> Option<String> {
    if std::path::Path::new("/mnt/wslg/PulseServer").exists() {
        Some("unix:/mnt/wslg/PulseServer".to_string())
    } else {
        std::env::var("PULSE_SERVER").ok()
    }
}

fn spawn_error(tool: &str, e: io::Error) -> CaptureError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied(format!("{tool}: {e}")),
        _ => CaptureError::Unavailable(format!(
            "{tool} failed: {e}. Install: sudo apt install pulseaudio-utils"
        )),
    }
}

/// Records from the default PulseAudio source.
#[derive(Debug, Default, Clone)]
pub struct ParecMicrophone;

#[async_trait]
impl Microphone for ParecMicrophone {
    async fn acquire(&self, spec: CaptureSpec) -> Result<Box<dyn MicrophoneStream>, CaptureError> {
        let mut command = Command::new("parec");
        command
            .arg("--format=float32le")
            .arg(format!("--rate={}", spec.sample_rate))
            .arg(format!("--channels={}", spec.channels))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(server) = pulse_server() {
            command.env("PULSE_SERVER", server);
        }

        let mut child = command.spawn().map_err(|e| spawn_error("parec", e))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Unavailable("parec has no stdout".into()))?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = vec![0u8; READ_BLOCK * 4];
            while stdout.read_exact(&mut buf).await.is_ok() {
                if tx.send(decode_f32le(&buf)).await.is_err() {
                    break;
                }
            }
            debug!("parec reader finished.");
        });

        info!(rate = spec.sample_rate, "Microphone acquired via parec.");
        Ok(Box::new(ParecStream {
            child: Some(child),
            blocks: rx,
        }))
    }
}

struct ParecStream {
    child: Option<Child>,
    blocks: mpsc::Receiver<Vec<f32>>,
}

#[async_trait]
impl MicrophoneStream for ParecStream {
    async fn next_block(&mut self) -> Option<Vec<f32>> {
        self.blocks.recv().await
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!("Failed to stop parec: {e}");
            }
            self.blocks.close();
            info!("Microphone released.");
        }
    }
}

impl Drop for ParecStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Streams the mixer to the default PulseAudio sink in real time.
pub struct PaplayOutput {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PaplayOutput {
    pub fn spawn(mixer: Arc<Mixer>) -> anyhow::Result<Self> {
        use jarvis_core::devices::PlaybackSink;

        let mut command = std::process::Command::new("paplay");
        command
            .args(paplay_args(mixer.sample_rate()))
            .stdin(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(server) = pulse_server() {
            command.env("PULSE_SERVER", server);
        }
        let mut child = command
            .spawn()
            .map_err(|e| anyhow::anyhow!("paplay failed: {e}. Install: sudo apt install pulseaudio-utils"))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("paplay has no stdin"))?;

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let block_time = audio_utils::chunk_duration(RENDER_BLOCK, mixer.sample_rate());
        let thread = std::thread::spawn(move || {
            let mut block = vec![0.0f32; RENDER_BLOCK];
            let started = Instant::now();
            let mut rendered = Duration::ZERO;
            while flag.load(Ordering::SeqCst) {
                mixer.render(&mut block);
                if let Err(e) = stdin.write_all(&audio_utils::encode_pcm16_bytes(&block)) {
                    warn!("paplay stopped accepting audio: {e}");
                    break;
                }
                rendered += block_time;
                // Stay one block ahead of the wall clock.
                if let Some(ahead) = rendered.checked_sub(started.elapsed() + block_time) {
                    std::thread::sleep(ahead);
                }
            }
            drop(stdin);
            let _ = child.kill();
            let _ = child.wait();
            debug!("Playback thread finished.");
        });

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PaplayOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn paplay_args(sample_rate: u32) -> Vec<String> {
    vec![
        "--raw".to_string(),
        "--format=s16le".to_string(),
        "--channels=1".to_string(),
        format!("--rate={sample_rate}"),
        format!("--latency-msec={PLAYBACK_LATENCY_MS}"),
    ]
}

/// Decodes the little-endian `f32` stream `parec --format=float32le` writes.
fn decode_f32le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_f32le() {
        let mut bytes: Vec<u8> = [0.5f32, -0.25, 1.0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        assert_eq!(decode_f32le(&bytes), vec![0.5, -0.25, 1.0]);
        // A trailing partial sample is ignored.
        bytes.push(0x7F);
        assert_eq!(decode_f32le(&bytes).len(), 3);
    }

    #[test]
    fn test_paplay_keeps_a_short_buffer() {
        let args = paplay_args(24_000);
        assert!(args.contains(&"--rate=24000".to_string()));
        assert!(args.contains(&"--latency-msec=40".to_string()));
        // The render thread never runs further ahead than the buffer.
        assert!(RENDER_BLOCK as u32 * 1000 / 24_000 < PLAYBACK_LATENCY_MS);
    }

    #[test]
    fn test_spawn_error_mapping() {
        let denied = spawn_error("parec", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, CaptureError::PermissionDenied(_)));
        let missing = spawn_error("parec", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(missing, CaptureError::Unavailable(msg) if msg.contains("pulseaudio-utils")));
    }
}
