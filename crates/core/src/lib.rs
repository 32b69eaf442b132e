//! Jarvis Core
//!
//! Domain types and the seams between the voice session manager and the
//! collaborators it does not own: the realtime channel, the microphone, the
//! playback device and the host's tool handlers. Nothing in this crate
//! performs I/O.

pub mod devices;
pub mod generic_types;
pub mod persona;
pub mod presence;
pub mod realtime_api;
pub mod tools;
