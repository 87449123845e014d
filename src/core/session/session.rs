use crate::core::communication::message::now_millis;
use crate::core::communication::transport::{ConnectionAdapter, TransportKind};
use crate::core::session::reconnect::ReconnectSupervisor;
use crate::core::session::state::SessionStatus;
use crate::domain::config::{DeviceConfig, TransportConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Session identifier
pub type SessionId = String;

/// Parameters for creating a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Display name, derived from the endpoint when absent
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hex_mode: bool,
    pub transport: TransportConfig,
}

impl SessionDescriptor {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            name: None,
            hex_mode: false,
            transport,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_hex_mode(mut self, hex_mode: bool) -> Self {
        self.hex_mode = hex_mode;
        self
    }

    pub fn kind(&self) -> TransportKind {
        match self.transport {
            TransportConfig::TcpClient(_) => TransportKind::TcpClient,
            TransportConfig::TcpServer(_) => TransportKind::TcpServer,
            TransportConfig::Serial(_) => TransportKind::Serial,
        }
    }
}

impl From<&DeviceConfig> for SessionDescriptor {
    fn from(device: &DeviceConfig) -> Self {
        Self {
            name: Some(device.name.clone()),
            hex_mode: device.hex_mode,
            transport: device.transport.clone(),
        }
    }
}

/// Session entity as held by the registry
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub kind: TransportKind,
    pub name: String,
    pub status: SessionStatus,
    pub transport: TransportConfig,
    pub hex_mode: bool,
    pub created_at: u64,
    pub connected_at: Option<u64>,
    pub local_addr: Option<SocketAddr>,
}

impl Session {
    pub fn new(descriptor: SessionDescriptor) -> Self {
        let kind = descriptor.kind();
        let id = format!("{}_{}", kind.id_prefix(), Uuid::new_v4().simple());
        let name = descriptor
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{} {}", kind, descriptor.transport.endpoint()));

        Self {
            id,
            kind,
            name,
            status: SessionStatus::Idle,
            transport: descriptor.transport,
            hex_mode: descriptor.hex_mode,
            created_at: now_millis(),
            connected_at: None,
            local_addr: None,
        }
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    pub fn info(&self, peer_count: usize) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            status: self.status,
            endpoint: self.endpoint(),
            is_hex: self.hex_mode,
            created_at: self.created_at,
            connect_time: self.connected_at,
            local_addr: self.local_addr.map(|a| a.to_string()),
            peer_count,
        }
    }
}

/// Snapshot handed to callers and observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub kind: TransportKind,
    pub name: String,
    pub status: SessionStatus,
    pub endpoint: String,
    pub is_hex: bool,
    pub created_at: u64,
    pub connect_time: Option<u64>,
    pub local_addr: Option<String>,
    pub peer_count: usize,
}

/// Live parts of a session: its adapter, supervisor and gates
pub struct SessionRuntime {
    pub adapter: Arc<dyn ConnectionAdapter>,
    pub supervisor: Option<Arc<ReconnectSupervisor>>,
    /// `false` once removal started. Held across connect, disconnect and
    /// removal so an adapter never opens after its session is gone.
    pub lifecycle: Mutex<bool>,
    /// `false` once removal started; record commits hold this lock so
    /// appends for one session are serialized and stop at removal
    pub commit_gate: Mutex<bool>,
}

impl SessionRuntime {
    pub fn new(
        adapter: Arc<dyn ConnectionAdapter>,
        supervisor: Option<Arc<ReconnectSupervisor>>,
    ) -> Self {
        Self {
            adapter,
            supervisor,
            lifecycle: Mutex::new(true),
            commit_gate: Mutex::new(true),
        }
    }

    /// Block further commits, waiting for one in flight to finish
    pub async fn seal(&self) {
        let mut open = self.commit_gate.lock().await;
        *open = false;
    }
}
