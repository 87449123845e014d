use crate::core::communication::message::{Direction, MessageRecord};
use crate::core::session::state::SessionStatus;
use crate::domain::error::{CommHubError, CommHubResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Transport kind behind a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    TcpClient,
    TcpServer,
    Serial,
}

impl TransportKind {
    /// Prefix used when generating session identifiers
    pub fn id_prefix(&self) -> &'static str {
        match self {
            TransportKind::TcpClient => "tcpc",
            TransportKind::TcpServer => "tcps",
            TransportKind::Serial => "serial",
        }
    }

    /// Status reached once `open` succeeds
    pub fn open_status(&self) -> SessionStatus {
        match self {
            TransportKind::TcpServer => SessionStatus::Listening,
            TransportKind::TcpClient | TransportKind::Serial => SessionStatus::Connected,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::TcpClient => write!(f, "tcp_client"),
            TransportKind::TcpServer => write!(f, "tcp_server"),
            TransportKind::Serial => write!(f, "serial"),
        }
    }
}

/// Lifecycle of a sub-connection accepted by a listening session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected { addr: SocketAddr },
    Disconnected { addr: SocketAddr },
    Rejected { addr: SocketAddr, reason: String },
}

/// Callbacks an adapter uses to report what happens on the wire.
///
/// Implemented by the engine. Adapters never touch the registry, store or
/// broadcaster directly.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    /// Commit a captured record. Returns the record as persisted.
    async fn on_record(&self, record: MessageRecord) -> MessageRecord;

    /// The underlying link ended without an explicit close
    async fn on_link_lost(&self, reason: String);

    async fn on_peer(&self, event: PeerEvent);

    /// Report a failure that is not returned to any caller
    async fn on_error(&self, error: &CommHubError);
}

/// Uniform capability set over TCP client, TCP server and serial transports.
///
/// Each adapter owns at most one transport handle and one read loop. `close`
/// is idempotent and causes the read loop to exit within one read timeout.
#[async_trait]
pub trait ConnectionAdapter: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Establish the transport and start the read loop
    async fn open(&self) -> CommHubResult<()>;

    /// Write `data` and commit the matching sent record before returning.
    /// `as_hex` forces hex capture for this payload.
    async fn write(&self, data: &[u8], as_hex: bool) -> CommHubResult<MessageRecord>;

    async fn close(&self) -> CommHubResult<()>;

    fn is_open(&self) -> bool;

    fn hex_mode(&self) -> bool;

    fn set_hex_mode(&self, enabled: bool);

    /// Local socket (clients) or bound address (listeners)
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Accepted sub-connections currently attached
    fn peer_count(&self) -> usize {
        0
    }
}

/// Capture a payload and hand it to the sink
pub async fn commit_capture(
    sink: &dyn ConnectionSink,
    direction: Direction,
    data: &[u8],
    hex_mode: bool,
) -> MessageRecord {
    sink.on_record(MessageRecord::capture(direction, data, hex_mode)).await
}
