//! Presence: the coarse "what is the assistant doing" state shown by a UI.
//!
//! The tracker is driven entirely by session callbacks (volume, transcripts,
//! session activity) and by the host for the states it alone knows about
//! (connecting, thinking, error). Time is passed in explicitly so the
//! speaking timeout is deterministic.

use crate::generic_types::{SessionObserver, TranscriptOrigin};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Volume above which the user is considered to be speaking.
pub const LISTENING_THRESHOLD: f32 = 10.0;
/// How long `Speaking` lasts after the latest model transcript.
pub const SPEAKING_HOLD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    #[default]
    Idle,
    Connecting,
    Listening,
    Thinking,
    Speaking,
    Error,
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    state: AgentState,
    speaking_until: Option<Instant>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Forces a state the host knows about (connecting, thinking, error).
    pub fn set(&mut self, state: AgentState) -> Option<AgentState> {
        if state != AgentState::Speaking {
            self.speaking_until = None;
        }
        self.transition(state)
    }

    pub fn on_volume(&mut self, volume: f32) -> Option<AgentState> {
        let busy = matches!(self.state, AgentState::Speaking | AgentState::Thinking);
        if volume > LISTENING_THRESHOLD && !busy {
            self.transition(AgentState::Listening)
        } else if volume <= LISTENING_THRESHOLD && self.state == AgentState::Listening {
            self.transition(AgentState::Idle)
        } else {
            None
        }
    }

    pub fn on_transcript(&mut self, origin: TranscriptOrigin, now: Instant) -> Option<AgentState> {
        match origin {
            TranscriptOrigin::Model => {
                self.speaking_until = Some(now + SPEAKING_HOLD);
                self.transition(AgentState::Speaking)
            }
            TranscriptOrigin::User => None,
        }
    }

    pub fn on_session_active(&mut self, _active: bool) -> Option<AgentState> {
        self.speaking_until = None;
        self.transition(AgentState::Idle)
    }

    /// Ends `Speaking` once its hold has elapsed.
    pub fn tick(&mut self, now: Instant) -> Option<AgentState> {
        match self.speaking_until {
            Some(deadline) if now >= deadline && self.state == AgentState::Speaking => {
                self.speaking_until = None;
                self.transition(AgentState::Idle)
            }
            _ => None,
        }
    }

    fn transition(&mut self, next: AgentState) -> Option<AgentState> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

/// A [`PresenceTracker`] wired up as a [`SessionObserver`], publishing every
/// change on a watch channel.
pub struct PresenceMonitor {
    tracker: Mutex<PresenceTracker>,
    changes: watch::Sender<AgentState>,
}

impl Default for PresenceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceMonitor {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(AgentState::Idle);
        Self {
            tracker: Mutex::new(PresenceTracker::new()),
            changes,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.changes.subscribe()
    }

    pub fn state(&self) -> AgentState {
        *self.changes.borrow()
    }

    pub fn set(&self, state: AgentState) {
        self.update(|t| t.set(state));
    }

    pub fn tick(&self, now: Instant) {
        self.update(|t| t.tick(now));
    }

    fn update(&self, f: impl FnOnce(&mut PresenceTracker) -> Option<AgentState>) {
        let changed = {
            let mut tracker = match self.tracker.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            f(&mut tracker)
        };
        if let Some(state) = changed {
            self.changes.send_replace(state);
        }
    }
}

impl SessionObserver for PresenceMonitor {
    fn on_volume(&self, volume: f32) {
        self.update(|t| t.on_volume(volume));
    }

    fn on_transcript(&self, _text: &str, origin: TranscriptOrigin) {
        let now = Instant::now();
        self.update(|t| t.on_transcript(origin, now));
    }

    fn on_session_active(&self, active: bool) {
        self.update(|t| t.on_session_active(active));
    }
}
