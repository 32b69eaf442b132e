//! JARVIS Assistant Library Crate
//!
//! This library contains the voice-session logic of the assistant: the PCM
//! codec, microphone capture, gapless playback scheduling, the session
//! lifecycle and tool dispatch, plus the PulseAudio devices and host tool
//! handlers the `assistant` binary composes them with.

pub mod audio_utils;
pub mod config;
pub mod handlers;
pub mod mixer;
pub mod pulse;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
