//! Duplex voice sessions with the realtime engine.
//!
//! - `capture`: microphone frames to the channel, volume to the observer.
//! - `playback`: inbound audio chunks onto the playback clock.
//! - `dispatch`: tool calls to host handlers, one response per call.
//! - `manager`: the lifecycle tying them to one channel.

pub mod capture;
pub mod dispatch;
pub mod manager;
pub mod playback;
pub mod protocol;

pub use dispatch::{ToolDispatcher, ToolHandler};
pub use manager::{SessionDeps, VoiceSession};
pub use playback::{PlaybackScheduler, ScheduledPlayback};
pub use protocol::{SessionError, SessionState};
