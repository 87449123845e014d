use thiserror::Error;

/// Status codes carried by `error` events and observer responses
pub mod codes {
    pub const OK: u16 = 0;
    pub const INVALID_MESSAGE: u16 = 4001;
    pub const AUTH_FAILED: u16 = 4002;
    pub const SESSION_NOT_FOUND: u16 = 4003;
    pub const SUBSCRIBE_FAILED: u16 = 4004;
    pub const CAPACITY: u16 = 4005;
    pub const INTERNAL: u16 = 5001;
    pub const CONNECTION: u16 = 5002;
    pub const STORAGE_DEGRADED: u16 = 5003;
    pub const WRITE_FAILED: u16 = 5004;
}

/// CommHub unified error type
#[derive(Error, Debug)]
pub enum CommHubError {
    #[error("Connection error: {message}")]
    TransientConnection { message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Capacity exceeded: {message}")]
    Capacity { message: String },

    #[error("Storage degraded: {message}")]
    StorageDegraded { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Session '{session_id}' is not connected")]
    NotConnected { session_id: String },

    #[error("Endpoint '{endpoint}' is already open")]
    AlreadyOpen { endpoint: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Output error: {0}")]
    Output(String),
}

impl CommHubError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientConnection { message: message.into() }
    }

    pub fn not_found(session_id: impl Into<String>) -> Self {
        Self::NotFound { session_id: session_id.into() }
    }

    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed { message: message.into() }
    }

    /// Numeric status code reported to observers
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol(_) | Self::InvalidInput(_) | Self::InvalidTransition { .. } => {
                codes::INVALID_MESSAGE
            }
            Self::NotFound { .. } => codes::SESSION_NOT_FOUND,
            Self::Capacity { .. } => codes::CAPACITY,
            Self::TransientConnection { .. }
            | Self::NotConnected { .. }
            | Self::AlreadyOpen { .. }
            | Self::Serial(_)
            | Self::Io(_) => codes::CONNECTION,
            Self::StorageDegraded { .. } | Self::Storage(_) => codes::STORAGE_DEGRADED,
            Self::WriteFailed { .. } => codes::WRITE_FAILED,
            Self::Config { .. } | Self::Serialization(_) | Self::Output(_) => codes::INTERNAL,
        }
    }

    /// Whether retrying the failed operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientConnection { .. } | Self::Io(_) | Self::Serial(_) | Self::WriteFailed { .. }
        )
    }
}

pub type CommHubResult<T> = Result<T, CommHubError>;
