use crate::core::broadcast::{Broadcaster, CommandHandler, ObserverCommand, ObserverHandle, ObserverReply, Outbound};
use crate::core::communication::message::{now_millis, MessageRecord};
use crate::core::communication::transport::{ConnectionSink, PeerEvent, TransportKind};
use crate::core::event::{EngineEvent, EventBus, EventLogger};
use crate::core::session::reconnect::{ReconnectObserver, ReconnectPolicy, ReconnectSupervisor};
use crate::core::session::{SessionDescriptor, SessionInfo, SessionRegistry, SessionRuntime, SessionStatus};
use crate::core::store::{MessageHistory, StoreManager};
use crate::domain::config::{CommHubConfig, TransportConfig};
use crate::domain::error::{codes, CommHubError, CommHubResult};
use crate::domain::hex;
use crate::infrastructure::observer::ObserverServer;
use crate::infrastructure::{build_adapter, serial};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// State shared by the engine handle and every session link
struct EngineShared {
    config: CommHubConfig,
    registry: SessionRegistry,
    store: StoreManager,
    bus: Arc<EventBus>,
    broadcaster: Arc<Broadcaster>,
    logger: Option<Arc<EventLogger>>,
}

impl EngineShared {
    /// Fan an event out to the session's observers, then to bus handlers
    async fn emit(&self, session_id: &str, event: EngineEvent) {
        self.broadcaster.notify(session_id, &event).await;
        self.bus.publish(event);
    }

    async fn emit_error(&self, error: &CommHubError, session_id: Option<&str>, details: Option<String>) {
        let event = EngineEvent::error(error, session_id, details);
        match session_id {
            Some(id) => self.emit(id, event).await,
            None => self.bus.publish(event),
        }
    }

    /// Move a session to `status`, publishing the change when one happened
    async fn set_status(&self, session_id: &str, status: SessionStatus) {
        match self.registry.update_status(session_id, status).await {
            Ok(Some(change)) => {
                self.emit(session_id, EngineEvent::status(session_id, change.previous, change.current))
                    .await;
            }
            Ok(None) => {}
            Err(CommHubError::NotFound { .. }) => {
                debug!("Status {} for removed session '{}' ignored", status, session_id);
            }
            Err(e) => warn!("Session '{}': {}", session_id, e),
        }
    }
}

/// Callback target bound to one session. Adapters and the reconnect
/// supervisor report through it; it never keeps the engine alive.
#[derive(Clone)]
struct SessionLink {
    session_id: String,
    shared: Weak<EngineShared>,
}

impl SessionLink {
    fn engine(&self) -> Option<Arc<EngineShared>> {
        self.shared.upgrade()
    }
}

#[async_trait]
impl ConnectionSink for SessionLink {
    async fn on_record(&self, record: MessageRecord) -> MessageRecord {
        let Some(shared) = self.engine() else {
            return record;
        };
        let Ok(runtime) = shared.registry.runtime(&self.session_id).await else {
            return record;
        };

        // Held across append and fan-out so observers see store order.
        let gate = runtime.commit_gate.lock().await;
        if !*gate {
            debug!("Session '{}' sealed, dropping {} record", self.session_id, record.direction);
            return record;
        }

        let stored = match shared.store.append(&self.session_id, record.clone()) {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to store record for '{}': {}", self.session_id, e);
                shared.emit_error(&e, Some(&self.session_id), None).await;
                record
            }
        };

        debug!(
            "Session '{}' {} {} bytes",
            self.session_id, stored.direction, stored.byte_length
        );
        shared
            .emit(&self.session_id, EngineEvent::message(&self.session_id, &stored))
            .await;
        drop(gate);

        stored
    }

    async fn on_link_lost(&self, reason: String) {
        let Some(shared) = self.engine() else {
            return;
        };
        warn!("Session '{}' lost its link: {}", self.session_id, reason);

        shared.set_status(&self.session_id, SessionStatus::Disconnected).await;
        shared
            .emit_error(&CommHubError::transient(reason), Some(&self.session_id), None)
            .await;

        if let Ok(runtime) = shared.registry.runtime(&self.session_id).await {
            if let Some(supervisor) = &runtime.supervisor {
                supervisor
                    .trigger(Arc::clone(&runtime.adapter), Arc::new(self.clone()))
                    .await;
            }
        }
    }

    async fn on_peer(&self, event: PeerEvent) {
        let Some(shared) = self.engine() else {
            return;
        };
        let timestamp = now_millis();
        let session_id = self.session_id.clone();

        let engine_event = match event {
            PeerEvent::Connected { addr } => EngineEvent::PeerConnected {
                session_id,
                peer: addr.to_string(),
                timestamp,
            },
            PeerEvent::Disconnected { addr } => EngineEvent::PeerDisconnected {
                session_id,
                peer: addr.to_string(),
                timestamp,
            },
            PeerEvent::Rejected { addr, reason } => {
                let capacity = CommHubError::Capacity {
                    message: reason.clone(),
                };
                shared
                    .emit_error(&capacity, Some(&self.session_id), Some(addr.to_string()))
                    .await;
                EngineEvent::PeerRejected {
                    session_id,
                    peer: addr.to_string(),
                    reason,
                    timestamp,
                }
            }
        };

        shared.emit(&self.session_id, engine_event).await;
    }

    async fn on_error(&self, error: &CommHubError) {
        if let Some(shared) = self.engine() {
            shared.emit_error(error, Some(&self.session_id), None).await;
        }
    }
}

#[async_trait]
impl ReconnectObserver for SessionLink {
    async fn attempt_started(&self, attempt: u32, max: u32) {
        if let Some(shared) = self.engine() {
            let event = EngineEvent::Reconnecting {
                session_id: self.session_id.clone(),
                attempt,
                max_attempts: max,
                timestamp: now_millis(),
            };
            shared.emit(&self.session_id, event).await;
        }
    }

    async fn dialing(&self, _attempt: u32) {
        if let Some(shared) = self.engine() {
            shared.set_status(&self.session_id, SessionStatus::Connecting).await;
        }
    }

    async fn attempt_failed(&self, attempt: u32, error: &CommHubError) {
        if let Some(shared) = self.engine() {
            debug!("Session '{}' attempt {} failed: {}", self.session_id, attempt, error);
            shared.set_status(&self.session_id, SessionStatus::Disconnected).await;
        }
    }

    async fn reconnected(&self, _attempt: u32) {
        if let Some(shared) = self.engine() {
            shared.set_status(&self.session_id, SessionStatus::Connected).await;
        }
    }

    async fn exhausted(&self, attempts: u32) {
        if let Some(shared) = self.engine() {
            let event = EngineEvent::reconnect_failed(&self.session_id, attempts);
            shared.emit(&self.session_id, event).await;
        }
    }
}

/// Command surface over sessions, their adapters, message stores and
/// observers. Cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct SessionEngine {
    shared: Arc<EngineShared>,
}

impl SessionEngine {
    /// Create an engine storing messages under the configured data directory
    pub fn new(config: &CommHubConfig) -> Self {
        let store = StoreManager::new(config.global.data_dir());
        Self::with_store(config, store)
    }

    /// Create an engine around an existing store manager
    pub fn with_store(config: &CommHubConfig, store: StoreManager) -> Self {
        let bus = Arc::new(EventBus::new(config.event_bus.max_concurrent_handlers));
        let broadcaster = Arc::new(Broadcaster::new(config.broadcaster.queue_capacity));

        let logger = config.event_bus.audit_log.then(|| {
            let logger = EventLogger::new();
            logger.attach(&bus);
            logger
        });

        Self {
            shared: Arc::new(EngineShared {
                config: config.clone(),
                registry: SessionRegistry::new(),
                store: store.with_event_bus(Arc::clone(&bus)),
                bus,
                broadcaster,
                logger,
            }),
        }
    }

    pub fn config(&self) -> &CommHubConfig {
        &self.shared.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.shared.bus)
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        Arc::clone(&self.shared.broadcaster)
    }

    /// Audit logger attached to the bus, when enabled in configuration
    pub fn event_logger(&self) -> Option<Arc<EventLogger>> {
        self.shared.logger.clone()
    }

    pub fn store(&self) -> &StoreManager {
        &self.shared.store
    }

    /// Register a session. It starts `Idle` with no open transport.
    pub async fn create_session(&self, descriptor: SessionDescriptor) -> CommHubResult<SessionInfo> {
        let hex_mode = descriptor.hex_mode || self.shared.config.global.default_hex_mode;
        let descriptor = descriptor.with_hex_mode(hex_mode);
        let weak = Arc::downgrade(&self.shared);

        let session = self
            .shared
            .registry
            .create(descriptor, |session| {
                let link = Arc::new(SessionLink {
                    session_id: session.id.clone(),
                    shared: weak,
                });
                let adapter = build_adapter(&session.transport, session.hex_mode, link);
                let supervisor = match &session.transport {
                    TransportConfig::TcpClient(config) if config.reconnect_enabled() => Some(Arc::new(
                        ReconnectSupervisor::new(session.id.clone(), ReconnectPolicy::from(config)),
                    )),
                    _ => None,
                };
                Ok(Arc::new(SessionRuntime::new(adapter, supervisor)))
            })
            .await?;

        Ok(session.info(0))
    }

    /// Open the session's transport
    pub async fn connect(&self, session_id: &str) -> CommHubResult<SessionInfo> {
        let runtime = self.shared.registry.runtime(session_id).await?;
        let alive = runtime.lifecycle.lock().await;
        if !*alive {
            return Err(CommHubError::not_found(session_id));
        }
        let adapter = Arc::clone(&runtime.adapter);

        if let Some(supervisor) = &runtime.supervisor {
            // An explicit connect supersedes any pending retry.
            supervisor.stop().await;
            supervisor.arm().await;
        }
        if adapter.is_open() {
            let session = self.shared.registry.get(session_id).await?;
            return Err(CommHubError::AlreadyOpen {
                endpoint: session.endpoint(),
            });
        }

        self.shared.set_status(session_id, SessionStatus::Connecting).await;
        info!("Connecting session '{}'", session_id);

        match adapter.open().await {
            Ok(()) => {
                self.shared.set_status(session_id, adapter.kind().open_status()).await;
                drop(alive);
                self.shared.registry.info(session_id).await
            }
            Err(e @ CommHubError::AlreadyOpen { .. }) => Err(e),
            Err(e) => {
                error!("Failed to connect session '{}': {}", session_id, e);
                self.shared.set_status(session_id, SessionStatus::Disconnected).await;
                self.shared.emit_error(&e, Some(session_id), None).await;

                if let Some(supervisor) = &runtime.supervisor {
                    let link = Arc::new(SessionLink {
                        session_id: session_id.to_string(),
                        shared: Arc::downgrade(&self.shared),
                    });
                    supervisor.trigger(adapter, link).await;
                }
                Err(e)
            }
        }
    }

    /// Close the session's transport. Never starts a reconnect.
    pub async fn disconnect(&self, session_id: &str) -> CommHubResult<()> {
        let runtime = self.shared.registry.runtime(session_id).await?;
        let alive = runtime.lifecycle.lock().await;
        if !*alive {
            return Err(CommHubError::not_found(session_id));
        }

        if let Some(supervisor) = &runtime.supervisor {
            supervisor.stop().await;
        }
        runtime.adapter.close().await?;
        self.shared.set_status(session_id, SessionStatus::Disconnected).await;
        drop(alive);

        info!("Disconnected session '{}'", session_id);
        Ok(())
    }

    /// Write `data` to the session. With `is_hex`, `data` is a hex string
    /// decoded before writing.
    pub async fn send(&self, session_id: &str, data: &str, is_hex: bool) -> CommHubResult<MessageRecord> {
        let runtime = self.shared.registry.runtime(session_id).await?;

        let payload = if is_hex {
            hex::decode(data)?
        } else {
            data.as_bytes().to_vec()
        };

        if !runtime.adapter.is_open() {
            return Err(CommHubError::NotConnected {
                session_id: session_id.to_string(),
            });
        }

        match runtime.adapter.write(&payload, is_hex).await {
            Ok(record) => Ok(record),
            Err(e) => {
                error!("Send on session '{}' failed: {}", session_id, e);
                self.shared.emit_error(&e, Some(session_id), None).await;
                Err(e)
            }
        }
    }

    /// Remove the session, closing its transport and destroying its store
    pub async fn remove_session(&self, session_id: &str) -> CommHubResult<()> {
        let runtime = self.shared.registry.runtime(session_id).await?;
        // Waits out a connect in progress; one started later sees the flag.
        let mut alive = runtime.lifecycle.lock().await;
        if !*alive {
            return Err(CommHubError::not_found(session_id));
        }
        *alive = false;
        runtime.seal().await;

        let entry = self.shared.registry.remove(session_id).await?;
        if let Some(supervisor) = &entry.runtime.supervisor {
            supervisor.stop().await;
        }
        if let Err(e) = entry.runtime.adapter.close().await {
            warn!("Closing session '{}' during removal failed: {}", session_id, e);
        }
        drop(alive);
        if let Err(e) = self.shared.store.destroy(session_id) {
            warn!("Destroying store of '{}' failed: {}", session_id, e);
        }

        let observers = self.shared.broadcaster.unsubscribe_session(session_id).await;
        info!(
            "Removed session '{}' ({} observers unsubscribed)",
            session_id,
            observers.len()
        );
        Ok(())
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        self.shared.registry.list().await
    }

    pub async fn get_session(&self, session_id: &str) -> CommHubResult<SessionInfo> {
        self.shared.registry.info(session_id).await
    }

    pub async fn rename_session(&self, session_id: &str, name: &str) -> CommHubResult<SessionInfo> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CommHubError::InvalidInput("session name must not be empty".to_string()));
        }
        self.shared
            .registry
            .update(session_id, |session| session.name = name.to_string())
            .await?;
        self.shared.registry.info(session_id).await
    }

    /// Toggle hex capture for future records of the session
    pub async fn set_hex_mode(&self, session_id: &str, enabled: bool) -> CommHubResult<SessionInfo> {
        let runtime = self.shared.registry.runtime(session_id).await?;
        runtime.adapter.set_hex_mode(enabled);
        self.shared
            .registry
            .update(session_id, |session| session.hex_mode = enabled)
            .await?;
        self.shared.registry.info(session_id).await
    }

    /// Stored records in insertion order. `limit <= 0` is unbounded.
    pub async fn get_messages(&self, session_id: &str, limit: i64, offset: usize) -> CommHubResult<MessageHistory> {
        if !self.shared.registry.contains(session_id).await {
            return Err(CommHubError::not_found(session_id));
        }
        self.shared.store.history(session_id, limit, offset)
    }

    pub async fn clear_messages(&self, session_id: &str) -> CommHubResult<()> {
        if !self.shared.registry.contains(session_id).await {
            return Err(CommHubError::not_found(session_id));
        }
        self.shared.store.clear(session_id)
    }

    pub fn list_serial_ports(&self) -> CommHubResult<Vec<String>> {
        serial::ports::port_names()
    }

    /// Register an observer queue with the broadcaster
    pub async fn register_observer(
        &self,
        observer_id: Option<String>,
    ) -> (Arc<ObserverHandle>, mpsc::Receiver<Outbound>) {
        self.shared.broadcaster.register(observer_id).await
    }

    pub async fn remove_observer(&self, observer_id: &str) -> bool {
        self.shared.broadcaster.remove_observer(observer_id).await
    }

    pub async fn subscribe(&self, observer_id: &str, session_id: &str) -> CommHubResult<()> {
        if !self.shared.registry.contains(session_id).await {
            return Err(CommHubError::not_found(session_id));
        }
        self.shared.broadcaster.subscribe(observer_id, session_id).await
    }

    pub async fn unsubscribe(&self, observer_id: &str, session_id: &str) -> bool {
        self.shared.broadcaster.unsubscribe(observer_id, session_id).await
    }

    /// Accept WebSocket observers using the configured port range
    pub async fn serve_observers(&self) -> CommHubResult<ObserverServer> {
        ObserverServer::start(
            &self.shared.config.observer_server,
            self.broadcaster(),
            Arc::new(self.clone()),
            self.shared.config.broadcaster.keepalive_interval(),
        )
        .await
    }

    /// Remove every session and disconnect every observer
    pub async fn shutdown(&self) {
        for session_id in self.shared.registry.ids().await {
            if let Err(e) = self.remove_session(&session_id).await {
                debug!("Session '{}' already gone at shutdown: {}", session_id, e);
            }
        }
        self.shared.broadcaster.shutdown().await;
        self.shared.store.close_all();
        info!("Session engine shut down");
    }

    /// Sessions of one transport kind
    pub async fn sessions_of(&self, kind: TransportKind) -> Vec<SessionInfo> {
        self.list_sessions()
            .await
            .into_iter()
            .filter(|info| info.kind == kind)
            .collect()
    }
}

#[async_trait]
impl CommandHandler for SessionEngine {
    async fn handle(&self, observer: &Arc<ObserverHandle>, command: ObserverCommand) -> ObserverReply {
        match command {
            ObserverCommand::Auth { client_id } => {
                if client_id.trim().is_empty() {
                    return ObserverReply::failure(codes::AUTH_FAILED, "clientId must not be empty", None);
                }
                info!("Observer '{}' identified as '{}'", observer.id(), client_id);
                ObserverReply::ok(format!("authenticated as {}", client_id), None)
            }
            ObserverCommand::Subscribe { session_id } => {
                match self.subscribe(observer.id(), &session_id).await {
                    Ok(()) => ObserverReply::ok("subscribed", Some(session_id)),
                    Err(e @ CommHubError::NotFound { .. }) => {
                        ObserverReply::failure(codes::SESSION_NOT_FOUND, e.to_string(), Some(session_id))
                    }
                    Err(e) => ObserverReply::failure(codes::SUBSCRIBE_FAILED, e.to_string(), Some(session_id)),
                }
            }
            ObserverCommand::Unsubscribe { session_id } => {
                self.unsubscribe(observer.id(), &session_id).await;
                ObserverReply::ok("unsubscribed", Some(session_id))
            }
            ObserverCommand::Ping => ObserverReply::Pong,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::communication::message::Direction;
    use crate::core::event::topics;
    use crate::domain::config::{TcpClientConfig, TcpServerConfig};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn engine() -> SessionEngine {
        let mut config = CommHubConfig::default();
        config.event_bus.audit_log = false;
        SessionEngine::with_store(&config, StoreManager::in_memory())
    }

    fn collect(engine: &SessionEngine, topic: &str) -> mpsc::UnboundedReceiver<Arc<EngineEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        engine.event_bus().subscribe(topic, move |event| {
            let _ = tx.send(event);
        });
        rx
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never held");
    }

    async fn echo_server() -> (u16, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if socket.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        (port, task)
    }

    #[tokio::test]
    async fn test_create_session_starts_idle() {
        let engine = engine();
        let info = engine
            .create_session(SessionDescriptor::new(TransportConfig::TcpClient(TcpClientConfig::new(
                "127.0.0.1",
                1,
            ))))
            .await
            .unwrap();

        assert!(info.session_id.starts_with("tcpc_"));
        let fetched = engine.get_session(&info.session_id).await.unwrap();
        assert_eq!(fetched.status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_send_and_receive_are_stored_in_order() {
        let engine = engine();
        let (port, _server) = echo_server().await;
        let info = engine
            .create_session(SessionDescriptor::new(TransportConfig::TcpClient(TcpClientConfig::new(
                "127.0.0.1",
                port,
            ))))
            .await
            .unwrap();
        let id = info.session_id;

        let connected = engine.connect(&id).await.unwrap();
        assert_eq!(connected.status, SessionStatus::Connected);
        assert!(connected.local_addr.is_some());

        let record = engine.send(&id, "ping", false).await.unwrap();
        assert_eq!(record.direction, Direction::Sent);

        eventually(|| async { engine.get_messages(&id, 0, 0).await.unwrap().total == 2 }).await;
        let history = engine.get_messages(&id, 0, 0).await.unwrap();
        assert_eq!(history.records[0].direction, Direction::Sent);
        assert_eq!(history.records[1].direction, Direction::Received);
        assert_eq!(history.records[1].content, "ping");

        engine.disconnect(&id).await.unwrap();
        let info = engine.get_session(&id).await.unwrap();
        assert_eq!(info.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_hex_is_rejected_without_record() {
        let engine = engine();
        let (port, _server) = echo_server().await;
        let id = engine
            .create_session(SessionDescriptor::new(TransportConfig::TcpClient(TcpClientConfig::new(
                "127.0.0.1",
                port,
            ))))
            .await
            .unwrap()
            .session_id;
        engine.connect(&id).await.unwrap();

        let err = engine.send(&id, "12 ZZ", true).await.unwrap_err();
        assert!(matches!(err, CommHubError::Protocol(_)));
        assert_eq!(engine.get_messages(&id, 0, 0).await.unwrap().total, 0);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_requires_open_link() {
        let engine = engine();
        let id = engine
            .create_session(SessionDescriptor::new(TransportConfig::TcpClient(TcpClientConfig::new(
                "127.0.0.1",
                1,
            ))))
            .await
            .unwrap()
            .session_id;

        let err = engine.send(&id, "x", false).await.unwrap_err();
        assert!(matches!(err, CommHubError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_failed_connect_publishes_status_and_error() {
        let engine = engine();
        let mut statuses = collect(&engine, topics::SESSION_STATUS);
        let mut errors = collect(&engine, topics::ERROR);

        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = unused.local_addr().unwrap().port();
        drop(unused);

        let id = engine
            .create_session(SessionDescriptor::new(TransportConfig::TcpClient(TcpClientConfig::new(
                "127.0.0.1",
                port,
            ))))
            .await
            .unwrap()
            .session_id;
        assert!(engine.connect(&id).await.is_err());

        // Handlers run concurrently, so only the set of changes is fixed.
        let mut seen = Vec::new();
        for _ in 0..2 {
            if let EngineEvent::SessionStatusChanged { status, .. } = *statuses.recv().await.unwrap() {
                seen.push(status);
            }
        }
        assert!(seen.contains(&SessionStatus::Connecting));
        assert!(seen.contains(&SessionStatus::Disconnected));
        assert_eq!(engine.get_session(&id).await.unwrap().status, SessionStatus::Disconnected);

        let error = errors.recv().await.unwrap();
        assert!(matches!(*error, EngineEvent::Error { code: codes::CONNECTION, .. }));
    }

    #[tokio::test]
    async fn test_server_session_reports_peers() {
        let engine = engine();
        let mut peers = collect(&engine, topics::PEER_CONNECTED);
        let id = engine
            .create_session(SessionDescriptor::new(TransportConfig::TcpServer(TcpServerConfig::new(
                "127.0.0.1",
                0,
            ))))
            .await
            .unwrap()
            .session_id;

        let info = engine.connect(&id).await.unwrap();
        assert_eq!(info.status, SessionStatus::Listening);
        let addr = info.local_addr.unwrap();

        let _client = tokio::net::TcpStream::connect(addr.as_str()).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), peers.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.session_id(), Some(id.as_str()));

        engine.remove_session(&id).await.unwrap();
        assert!(engine.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_rename_and_hex_mode() {
        let engine = engine();
        let id = engine
            .create_session(SessionDescriptor::new(TransportConfig::TcpClient(TcpClientConfig::new(
                "127.0.0.1",
                1,
            ))))
            .await
            .unwrap()
            .session_id;

        let renamed = engine.rename_session(&id, "plc").await.unwrap();
        assert_eq!(renamed.name, "plc");
        assert!(engine.rename_session(&id, "  ").await.is_err());

        let info = engine.set_hex_mode(&id, true).await.unwrap();
        assert!(info.is_hex);
    }

    #[tokio::test]
    async fn test_observer_commands() {
        let engine = engine();
        let id = engine
            .create_session(SessionDescriptor::new(TransportConfig::TcpClient(TcpClientConfig::new(
                "127.0.0.1",
                1,
            ))))
            .await
            .unwrap()
            .session_id;
        let (observer, _rx) = engine.register_observer(None).await;

        let reply = engine
            .handle(&observer, ObserverCommand::Subscribe { session_id: "nope".into() })
            .await;
        assert!(matches!(reply, ObserverReply::Response { code: codes::SESSION_NOT_FOUND, .. }));

        let reply = engine
            .handle(&observer, ObserverCommand::Subscribe { session_id: id.clone() })
            .await;
        assert!(matches!(reply, ObserverReply::Response { code: codes::OK, .. }));
        assert_eq!(engine.broadcaster().subscribers(&id).await, vec![observer.id().to_string()]);

        let reply = engine
            .handle(&observer, ObserverCommand::Auth { client_id: String::new() })
            .await;
        assert!(matches!(reply, ObserverReply::Response { code: codes::AUTH_FAILED, .. }));

        engine.remove_session(&id).await.unwrap();
        assert!(engine.broadcaster().subscribers(&id).await.is_empty());
    }

    #[tokio::test]
    async fn test_operations_on_unknown_session() {
        let engine = engine();
        assert!(matches!(engine.connect("missing").await, Err(CommHubError::NotFound { .. })));
        assert!(matches!(engine.disconnect("missing").await, Err(CommHubError::NotFound { .. })));
        assert!(matches!(engine.remove_session("missing").await, Err(CommHubError::NotFound { .. })));
        assert!(matches!(engine.get_messages("missing", 0, 0).await, Err(CommHubError::NotFound { .. })));
    }
}
