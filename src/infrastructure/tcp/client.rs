use super::{read_loop, ReadExit};
use crate::core::communication::message::{Direction, MessageRecord};
use crate::core::communication::transport::{
    commit_capture, ConnectionAdapter, ConnectionSink, TransportKind,
};
use crate::domain::config::TcpClientConfig;
use crate::domain::error::{CommHubError, CommHubResult};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ClientLink {
    writer: OwnedWriteHalf,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// Outbound TCP connection
pub struct TcpClientAdapter {
    config: TcpClientConfig,
    sink: Arc<dyn ConnectionSink>,
    hex_mode: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    link: Mutex<Option<ClientLink>>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

impl TcpClientAdapter {
    pub fn new(config: TcpClientConfig, hex_mode: bool, sink: Arc<dyn ConnectionSink>) -> Self {
        Self {
            config,
            sink,
            hex_mode: Arc::new(AtomicBool::new(hex_mode)),
            open: Arc::new(AtomicBool::new(false)),
            link: Mutex::new(None),
            local_addr: std::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TcpClientConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    async fn dial(&self) -> CommHubResult<TcpStream> {
        let endpoint = self.endpoint();
        let stream = tokio::time::timeout(
            self.config.connect_timeout(),
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        .map_err(|_| CommHubError::transient(format!("connection timeout to {}", endpoint)))?
        .map_err(|e| CommHubError::transient(format!("failed to connect to {}: {}", endpoint, e)))?;

        if self.config.no_delay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
        }
        Ok(stream)
    }
}

async fn run_reader(
    reader: tokio::net::tcp::OwnedReadHalf,
    config: TcpClientConfig,
    cancel: CancellationToken,
    sink: Arc<dyn ConnectionSink>,
    hex_mode: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
) {
    let exit = read_loop(
        reader,
        config.buffer_size,
        config.read_timeout(),
        cancel,
        sink.as_ref(),
        &hex_mode,
    )
    .await;

    if matches!(exit, ReadExit::Cancelled) {
        return;
    }
    // Whoever flips `open` first owns the shutdown path.
    if open.swap(false, Ordering::SeqCst) {
        info!("TCP connection to {}:{} lost: {}", config.host, config.port, exit.reason());
        sink.on_link_lost(exit.reason()).await;
    }
}

#[async_trait]
impl ConnectionAdapter for TcpClientAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::TcpClient
    }

    async fn open(&self) -> CommHubResult<()> {
        let mut link = self.link.lock().await;
        if self.open.load(Ordering::SeqCst) {
            return Err(CommHubError::AlreadyOpen { endpoint: self.endpoint() });
        }
        if let Some(stale) = link.take() {
            stale.cancel.cancel();
            let _ = stale.reader.await;
        }

        let stream = self.dial().await?;
        let local = stream.local_addr().ok();
        let (reader, writer) = stream.into_split();
        let cancel = CancellationToken::new();

        self.open.store(true, Ordering::SeqCst);
        let reader = tokio::spawn(run_reader(
            reader,
            self.config.clone(),
            cancel.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.hex_mode),
            Arc::clone(&self.open),
        ));

        *link = Some(ClientLink { writer, cancel, reader });
        *self.local_addr.lock().unwrap_or_else(|p| p.into_inner()) = local;
        info!("TCP connection established to {}", self.endpoint());
        Ok(())
    }

    async fn write(&self, data: &[u8], as_hex: bool) -> CommHubResult<MessageRecord> {
        let mut link = self.link.lock().await;
        let active = match link.as_mut() {
            Some(active) if self.open.load(Ordering::SeqCst) => active,
            _ => return Err(CommHubError::write_failed("connection is not open")),
        };

        let written = tokio::time::timeout(self.config.write_timeout(), async {
            active.writer.write_all(data).await?;
            active.writer.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(CommHubError::write_failed(format!(
                    "write to {} failed: {}",
                    self.endpoint(),
                    e
                )))
            }
            Err(_) => {
                return Err(CommHubError::write_failed(format!(
                    "write to {} timed out",
                    self.endpoint()
                )))
            }
        }

        debug!("Sent {} bytes over TCP", data.len());
        let hex = as_hex || self.hex_mode.load(Ordering::Relaxed);
        Ok(commit_capture(self.sink.as_ref(), Direction::Sent, data, hex).await)
    }

    async fn close(&self) -> CommHubResult<()> {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        let link = self.link.lock().await.take();

        if let Some(mut link) = link {
            link.cancel.cancel();
            if let Err(e) = link.writer.shutdown().await {
                debug!("Failed to shutdown TCP stream: {}", e);
            }
            if let Err(e) = link.reader.await {
                warn!("TCP reader task ended abnormally: {}", e);
            }
        }

        if was_open {
            info!("TCP client to {} closed", self.endpoint());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn hex_mode(&self) -> bool {
        self.hex_mode.load(Ordering::Relaxed)
    }

    fn set_hex_mode(&self, enabled: bool) {
        self.hex_mode.store(enabled, Ordering::Relaxed);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|p| p.into_inner())
    }
}
