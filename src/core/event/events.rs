use crate::core::communication::message::{now_millis, Direction, MessageRecord};
use crate::core::session::state::SessionStatus;
use crate::domain::error::CommHubError;
use serde::{Deserialize, Serialize};

/// Topic names used on the event bus
pub mod topics {
    pub const WILDCARD: &str = "*";
    pub const SESSION_STATUS: &str = "session:status";
    pub const SESSION_MESSAGE: &str = "session:message";
    pub const ERROR: &str = "session:error";
    pub const RECONNECTING: &str = "tcp:client_reconnecting";
    pub const RECONNECT_FAILED: &str = "tcp:client_reconnect_failed";
    pub const PEER_CONNECTED: &str = "tcp:peer_connected";
    pub const PEER_DISCONNECTED: &str = "tcp:peer_disconnected";
    pub const CONNECTION_REJECTED: &str = "tcp:connection_rejected";
}

/// Events published by the engine and fanned out to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    SessionStatusChanged {
        session_id: String,
        status: SessionStatus,
        previous: SessionStatus,
        timestamp: u64,
    },
    Message {
        session_id: String,
        direction: Direction,
        content: String,
        is_hex: bool,
        byte_length: usize,
        timestamp: u64,
    },
    Error {
        code: u16,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        timestamp: u64,
    },
    Reconnecting {
        session_id: String,
        attempt: u32,
        max_attempts: u32,
        timestamp: u64,
    },
    /// Terminal report of an exhausted reconnect budget, carrying the
    /// error code observers would otherwise get from a separate error event
    ReconnectFailed {
        session_id: String,
        attempts: u32,
        code: u16,
        message: String,
        timestamp: u64,
    },
    PeerConnected {
        session_id: String,
        peer: String,
        timestamp: u64,
    },
    PeerDisconnected {
        session_id: String,
        peer: String,
        timestamp: u64,
    },
    PeerRejected {
        session_id: String,
        peer: String,
        reason: String,
        timestamp: u64,
    },
}

impl EngineEvent {
    pub fn status(session_id: &str, previous: SessionStatus, status: SessionStatus) -> Self {
        Self::SessionStatusChanged {
            session_id: session_id.to_string(),
            status,
            previous,
            timestamp: now_millis(),
        }
    }

    pub fn message(session_id: &str, record: &MessageRecord) -> Self {
        Self::Message {
            session_id: session_id.to_string(),
            direction: record.direction,
            content: record.content.clone(),
            is_hex: record.is_hex,
            byte_length: record.byte_length,
            timestamp: record.timestamp,
        }
    }

    pub fn error(error: &CommHubError, session_id: Option<&str>, details: Option<String>) -> Self {
        Self::Error {
            code: error.code(),
            message: error.to_string(),
            details,
            session_id: session_id.map(str::to_string),
            timestamp: now_millis(),
        }
    }

    pub fn reconnect_failed(session_id: &str, attempts: u32) -> Self {
        let failure = CommHubError::transient(format!("gave up after {} reconnect attempts", attempts));
        Self::ReconnectFailed {
            session_id: session_id.to_string(),
            attempts,
            code: failure.code(),
            message: failure.to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Self::SessionStatusChanged { .. } => topics::SESSION_STATUS,
            Self::Message { .. } => topics::SESSION_MESSAGE,
            Self::Error { .. } => topics::ERROR,
            Self::Reconnecting { .. } => topics::RECONNECTING,
            Self::ReconnectFailed { .. } => topics::RECONNECT_FAILED,
            Self::PeerConnected { .. } => topics::PEER_CONNECTED,
            Self::PeerDisconnected { .. } => topics::PEER_DISCONNECTED,
            Self::PeerRejected { .. } => topics::CONNECTION_REJECTED,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SessionStatusChanged { session_id, .. }
            | Self::Message { session_id, .. }
            | Self::Reconnecting { session_id, .. }
            | Self::ReconnectFailed { session_id, .. }
            | Self::PeerConnected { session_id, .. }
            | Self::PeerDisconnected { session_id, .. }
            | Self::PeerRejected { session_id, .. } => Some(session_id),
            Self::Error { session_id, .. } => session_id.as_deref(),
        }
    }
}
