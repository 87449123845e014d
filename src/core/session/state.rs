use serde::{Deserialize, Serialize};

/// Session status
///
/// `Idle -> Connecting -> {Connected | Listening} -> Disconnected`, with
/// `Connecting -> Disconnected` on a failed open and any state reaching
/// `Disconnected` on an explicit disconnect. A disconnected session may be
/// connected again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, never opened
    Idle,
    /// Open in progress
    Connecting,
    /// Client or serial link established
    Connected,
    /// Server bound and accepting
    Listening,
    /// Closed, lost or failed to open
    Disconnected,
}

impl SessionStatus {
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (*self, next) {
            (_, Disconnected) => true,
            (Idle, Connecting) | (Disconnected, Connecting) => true,
            (Connecting, Connected) | (Connecting, Listening) => true,
            _ => false,
        }
    }

    /// Whether the adapter is expected to hold a live transport
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Connected | SessionStatus::Listening)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Listening => write!(f, "listening"),
            SessionStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::*;

    #[test]
    fn test_forward_path() {
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Listening));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Connecting));
    }

    #[test]
    fn test_any_state_can_disconnect() {
        for status in [Idle, Connecting, Connected, Listening, Disconnected] {
            assert!(status.can_transition_to(Disconnected));
        }
    }

    #[test]
    fn test_rejected_edges() {
        assert!(!Idle.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Listening));
        assert!(!Listening.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Idle));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&Listening).unwrap(), "\"listening\"");
    }
}
