use super::{read_loop, ReadExit};
use crate::core::communication::message::{Direction, MessageRecord};
use crate::core::communication::transport::{
    commit_capture, ConnectionAdapter, ConnectionSink, PeerEvent, TransportKind,
};
use crate::domain::config::TcpServerConfig;
use crate::domain::error::{CommHubError, CommHubResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accepted sub-connection
struct Peer {
    writer: OwnedWriteHalf,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

type PeerMap = Arc<Mutex<HashMap<SocketAddr, Peer>>>;

struct Listening {
    cancel: CancellationToken,
    acceptor: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Shared state handed to the accept loop and peer readers
#[derive(Clone)]
struct ServerContext {
    config: TcpServerConfig,
    sink: Arc<dyn ConnectionSink>,
    hex_mode: Arc<AtomicBool>,
    peers: PeerMap,
    peer_count: Arc<AtomicUsize>,
}

/// Listening TCP endpoint; every accepted connection is a sub-connection of
/// the same session
pub struct TcpServerAdapter {
    ctx: ServerContext,
    open: AtomicBool,
    listening: Mutex<Option<Listening>>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

impl TcpServerAdapter {
    pub fn new(config: TcpServerConfig, hex_mode: bool, sink: Arc<dyn ConnectionSink>) -> Self {
        Self {
            ctx: ServerContext {
                config,
                sink,
                hex_mode: Arc::new(AtomicBool::new(hex_mode)),
                peers: Arc::new(Mutex::new(HashMap::new())),
                peer_count: Arc::new(AtomicUsize::new(0)),
            },
            open: AtomicBool::new(false),
            listening: Mutex::new(None),
            local_addr: std::sync::Mutex::new(None),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.ctx.config.host, self.ctx.config.port)
    }

    /// Addresses of the attached sub-connections
    pub async fn peers(&self) -> Vec<SocketAddr> {
        self.ctx.peers.lock().await.keys().copied().collect()
    }
}

async fn accept_loop(listener: TcpListener, ctx: ServerContext, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => admit(stream, addr, &ctx, &cancel).await,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
    debug!("Accept loop on {}:{} stopped", ctx.config.host, ctx.config.port);
}

async fn admit(stream: TcpStream, addr: SocketAddr, ctx: &ServerContext, cancel: &CancellationToken) {
    {
        let mut peers = ctx.peers.lock().await;
        if peers.len() >= ctx.config.max_connections {
            drop(peers);
            drop(stream);
            let reason = format!("maximum of {} connections reached", ctx.config.max_connections);
            warn!("Rejected connection from {}: {}", addr, reason);
            ctx.sink.on_peer(PeerEvent::Rejected { addr, reason }).await;
            return;
        }

        let (reader, writer) = stream.into_split();
        let peer_cancel = cancel.child_token();
        let reader = tokio::spawn(peer_reader(reader, addr, ctx.clone(), peer_cancel.clone()));
        peers.insert(
            addr,
            Peer {
                writer,
                cancel: peer_cancel,
                reader,
            },
        );
        ctx.peer_count.store(peers.len(), Ordering::SeqCst);
    }

    info!("Accepted connection from {}", addr);
    ctx.sink.on_peer(PeerEvent::Connected { addr }).await;
}

async fn peer_reader(
    reader: tokio::net::tcp::OwnedReadHalf,
    addr: SocketAddr,
    ctx: ServerContext,
    cancel: CancellationToken,
) {
    let exit = read_loop(
        reader,
        ctx.config.buffer_size,
        ctx.config.read_timeout(),
        cancel,
        ctx.sink.as_ref(),
        &ctx.hex_mode,
    )
    .await;

    if matches!(exit, ReadExit::Cancelled) {
        return;
    }

    let removed = {
        let mut peers = ctx.peers.lock().await;
        let removed = peers.remove(&addr).is_some();
        ctx.peer_count.store(peers.len(), Ordering::SeqCst);
        removed
    };
    if removed {
        info!("Connection from {} ended: {}", addr, exit.reason());
        ctx.sink.on_peer(PeerEvent::Disconnected { addr }).await;
    }
}

#[async_trait]
impl ConnectionAdapter for TcpServerAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::TcpServer
    }

    async fn open(&self) -> CommHubResult<()> {
        let mut listening = self.listening.lock().await;
        if listening.is_some() {
            return Err(CommHubError::AlreadyOpen { endpoint: self.endpoint() });
        }

        let listener = TcpListener::bind((self.ctx.config.host.as_str(), self.ctx.config.port))
            .await
            .map_err(|e| {
                CommHubError::transient(format!("failed to listen on {}: {}", self.endpoint(), e))
            })?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let acceptor = tokio::spawn(accept_loop(listener, self.ctx.clone(), cancel.clone()));
        *listening = Some(Listening {
            cancel,
            acceptor,
            local_addr,
        });
        *self.local_addr.lock().unwrap_or_else(|p| p.into_inner()) = Some(local_addr);
        self.open.store(true, Ordering::SeqCst);

        info!("TCP server listening on {}", local_addr);
        Ok(())
    }

    /// Fan the payload out to every attached peer
    async fn write(&self, data: &[u8], as_hex: bool) -> CommHubResult<MessageRecord> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CommHubError::write_failed("server is not listening"));
        }

        let mut peers = self.ctx.peers.lock().await;
        if peers.is_empty() {
            return Err(CommHubError::write_failed("no connected peers"));
        }

        let timeout = self.ctx.config.write_timeout();
        let mut failed = Vec::new();
        for (addr, peer) in peers.iter_mut() {
            let written = tokio::time::timeout(timeout, async {
                peer.writer.write_all(data).await?;
                peer.writer.flush().await
            })
            .await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Failed to write to {}: {}", addr, e);
                    failed.push(*addr);
                }
                Err(_) => {
                    warn!("Write to {} timed out", addr);
                    failed.push(*addr);
                }
            }
        }

        let delivered = peers.len() - failed.len();
        for addr in &failed {
            if let Some(peer) = peers.remove(addr) {
                peer.cancel.cancel();
            }
        }
        self.ctx.peer_count.store(peers.len(), Ordering::SeqCst);
        drop(peers);

        for addr in failed {
            self.ctx.sink.on_peer(PeerEvent::Disconnected { addr }).await;
        }
        if delivered == 0 {
            return Err(CommHubError::write_failed("write failed on every peer"));
        }

        debug!("Sent {} bytes to {} peers", data.len(), delivered);
        let hex = as_hex || self.ctx.hex_mode.load(Ordering::Relaxed);
        Ok(commit_capture(self.ctx.sink.as_ref(), Direction::Sent, data, hex).await)
    }

    async fn close(&self) -> CommHubResult<()> {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        let listening = self.listening.lock().await.take();
        let Some(listening) = listening else {
            return Ok(());
        };

        // Stop accepting first so no peer is added while draining.
        listening.cancel.cancel();
        if let Err(e) = listening.acceptor.await {
            warn!("Accept loop ended abnormally: {}", e);
        }

        let peers: Vec<(SocketAddr, Peer)> = {
            let mut peers = self.ctx.peers.lock().await;
            let drained = peers.drain().collect();
            self.ctx.peer_count.store(0, Ordering::SeqCst);
            drained
        };
        for (addr, mut peer) in peers {
            peer.cancel.cancel();
            let _ = peer.writer.shutdown().await;
            if let Err(e) = peer.reader.await {
                warn!("Reader for {} ended abnormally: {}", addr, e);
            }
        }

        if was_open {
            info!("TCP server on {} closed", listening.local_addr);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn hex_mode(&self) -> bool {
        self.ctx.hex_mode.load(Ordering::Relaxed)
    }

    fn set_hex_mode(&self, enabled: bool) {
        self.ctx.hex_mode.store(enabled, Ordering::Relaxed);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn peer_count(&self) -> usize {
        self.ctx.peer_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::tcp::client::tests::{channel_sink, next_event, SinkEvent};
    use tokio::io::AsyncReadExt;

    fn create_test_config(max_connections: usize) -> TcpServerConfig {
        TcpServerConfig {
            max_connections,
            read_timeout_ms: 50,
            ..TcpServerConfig::new("127.0.0.1", 0)
        }
    }

    async fn open_server(max_connections: usize) -> (TcpServerAdapter, tokio::sync::mpsc::UnboundedReceiver<SinkEvent>, SocketAddr) {
        let (sink, rx) = channel_sink();
        let adapter = TcpServerAdapter::new(create_test_config(max_connections), false, sink);
        adapter.open().await.unwrap();
        let addr = adapter.local_addr().unwrap();
        (adapter, rx, addr)
    }

    #[tokio::test]
    async fn test_accept_receive_and_broadcast() {
        let (adapter, mut rx, addr) = open_server(4).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            SinkEvent::Peer(PeerEvent::Connected { .. })
        ));
        assert_eq!(adapter.peer_count(), 1);

        client.write_all(b"hello").await.unwrap();
        match next_event(&mut rx).await {
            SinkEvent::Record(record) => assert_eq!(record.content, "hello"),
            other => panic!("unexpected {:?}", other),
        }

        adapter.write(b"back", false).await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"back");

        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_beyond_max_connections() {
        let (adapter, mut rx, addr) = open_server(1).await;
        let _first = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            next_event(&mut rx).await,
            SinkEvent::Peer(PeerEvent::Connected { .. })
        ));

        let mut second = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            next_event(&mut rx).await,
            SinkEvent::Peer(PeerEvent::Rejected { .. })
        ));
        let mut buf = [0u8; 1];
        assert_eq!(second.read(&mut buf).await.unwrap_or(0), 0);
        assert_eq!(adapter.peer_count(), 1);

        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_drops_listener_and_peers() {
        let (adapter, mut rx, addr) = open_server(4).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        next_event(&mut rx).await;

        adapter.close().await.unwrap();
        assert!(!adapter.is_open());
        assert_eq!(adapter.peer_count(), 0);

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap_or(0), 0);
        assert!(TcpStream::connect(addr).await.is_err());
        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_without_peers_fails() {
        let (adapter, _rx, _addr) = open_server(4).await;
        assert!(matches!(
            adapter.write(b"x", false).await,
            Err(CommHubError::WriteFailed { .. })
        ));
        adapter.close().await.unwrap();
    }
}
