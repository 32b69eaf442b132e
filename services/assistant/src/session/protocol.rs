//! Lifecycle states, control messages and errors of a voice session.

use jarvis_core::devices::CaptureError;
use tokio::sync::oneshot;

/// Where a session is in its lifecycle.
///
/// `Active` and `Muted` are both "open": inbound events are routed the same
/// way, only outbound microphone frames differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Muted,
    Closed,
    Error,
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Muted)
    }

    /// Whether captured frames go out on the channel.
    pub fn transmits_audio(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    /// The open sub-state for a given mute flag.
    pub fn open(muted: bool) -> Self {
        if muted {
            SessionState::Muted
        } else {
            SessionState::Active
        }
    }
}

/// Messages from the public handle to the session actor.
#[derive(Debug)]
pub(crate) enum Control {
    /// Tear everything down; `done` fires once teardown finished.
    Disconnect { done: oneshot::Sender<()> },
}

/// Why `connect()` failed.
///
/// The session is left in [`SessionState::Error`], except after `Cancelled`,
/// where whoever cancelled decides the state.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Microphone(#[from] CaptureError),
    #[error("Failed to open realtime channel: {0}")]
    Transport(String),
    #[error("Connect was cancelled before the channel opened")]
    Cancelled,
}

impl SessionError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SessionError::Microphone(CaptureError::PermissionDenied(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_states() {
        assert!(SessionState::Active.is_open());
        assert!(SessionState::Muted.is_open());
        assert!(!SessionState::Connecting.is_open());
        assert!(!SessionState::Closed.is_open());
        assert!(!SessionState::Error.is_open());

        assert!(SessionState::Active.transmits_audio());
        assert!(!SessionState::Muted.transmits_audio());
        assert_eq!(SessionState::open(true), SessionState::Muted);
        assert_eq!(SessionState::open(false), SessionState::Active);
    }

    #[test]
    fn test_session_error_display() {
        let denied: SessionError = CaptureError::PermissionDenied("user refused".into()).into();
        assert!(denied.is_permission_denied());
        assert_eq!(denied.to_string(), "Microphone permission denied: user refused");

        let transport = SessionError::Transport("handshake failed".into());
        assert!(!transport.is_permission_denied());
        assert_eq!(
            transport.to_string(),
            "Failed to open realtime channel: handshake failed"
        );
        assert!(!SessionError::Cancelled.is_permission_denied());
    }
}
