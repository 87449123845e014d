use crate::core::broadcast::{run_read_pump, run_write_pump, Broadcaster, CommandHandler};
use crate::domain::config::ObserverServerConfig;
use crate::domain::error::{CommHubError, CommHubResult};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts observer WebSocket connections and wires each one to the broadcaster
pub struct ObserverServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    acceptor: JoinHandle<()>,
}

impl ObserverServer {
    /// Bind the first free port in `port..port + port_search_span` and start
    /// accepting observers
    pub async fn start<H>(
        config: &ObserverServerConfig,
        broadcaster: Arc<Broadcaster>,
        handler: Arc<H>,
        keepalive: Duration,
    ) -> CommHubResult<Self>
    where
        H: CommandHandler + 'static,
    {
        let listener = bind_in_range(config).await?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_bytes);
        ws_config.max_frame_size = Some(config.max_message_bytes);

        info!("Observer server listening on ws://{}", local_addr);

        let acceptor = tokio::spawn(accept_loop(
            listener,
            ws_config,
            broadcaster,
            handler,
            keepalive,
            cancel.clone(),
        ));

        Ok(Self {
            local_addr,
            cancel,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and tear down every live observer connection
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.acceptor.await;
        info!("Observer server on {} stopped", self.local_addr);
    }
}

async fn bind_in_range(config: &ObserverServerConfig) -> CommHubResult<TcpListener> {
    let span = config.port_search_span.max(1);
    let mut last_error = None;

    for offset in 0..span {
        let Some(port) = config.port.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((config.host.as_str(), port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!("Observer port {} unavailable: {}", port, e);
                last_error = Some(e);
            }
        }
    }

    Err(CommHubError::Config {
        message: format!(
            "No free observer port in {}..{} on {}: {}",
            config.port,
            config.port.saturating_add(span),
            config.host,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        ),
    })
}

async fn accept_loop<H>(
    listener: TcpListener,
    ws_config: WebSocketConfig,
    broadcaster: Arc<Broadcaster>,
    handler: Arc<H>,
    keepalive: Duration,
    cancel: CancellationToken,
) where
    H: CommandHandler + 'static,
{
    let mut connections = Vec::new();

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                connections.retain(|task: &JoinHandle<()>| !task.is_finished());
                connections.push(tokio::spawn(serve_observer(
                    stream,
                    addr,
                    ws_config,
                    Arc::clone(&broadcaster),
                    Arc::clone(&handler),
                    keepalive,
                    cancel.child_token(),
                )));
            }
            Err(e) => {
                warn!("Observer accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    for task in connections {
        let _ = task.await;
    }
}

async fn serve_observer<H>(
    stream: TcpStream,
    addr: SocketAddr,
    ws_config: WebSocketConfig,
    broadcaster: Arc<Broadcaster>,
    handler: Arc<H>,
    keepalive: Duration,
    server_cancel: CancellationToken,
) where
    H: CommandHandler + 'static,
{
    let handshake = tokio::select! {
        _ = server_cancel.cancelled() => return,
        handshake = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)),
        ) => handshake,
    };
    let websocket = match handshake {
        Ok(Ok(websocket)) => websocket,
        Ok(Err(e)) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!("WebSocket handshake with {} timed out", addr);
            return;
        }
    };

    let (observer, rx) = broadcaster.register(None).await;
    let observer_cancel = observer.cancel_token();
    info!("Observer '{}' connected from {}", observer.id(), addr);

    let (writer, reader) = websocket.split();

    // Either side ending tears down the other.
    let stop = CancellationToken::new();
    let relay = {
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = server_cancel.cancelled() => {}
                _ = observer_cancel.cancelled() => {}
                _ = stop.cancelled() => {}
            }
            stop.cancel();
        })
    };

    let writer_task = {
        let stop = stop.clone();
        tokio::spawn(async move {
            if let Err(e) = run_write_pump(rx, writer, keepalive, stop.clone()).await {
                debug!("Observer write pump ended: {}", e);
            }
            stop.cancel();
        })
    };

    run_read_pump(
        reader,
        Arc::clone(&observer),
        handler.as_ref(),
        stop.clone(),
    )
    .await;

    stop.cancel();
    let _ = writer_task.await;
    let _ = relay.await;

    broadcaster.remove_observer(observer.id()).await;
    info!("Observer '{}' from {} disconnected", observer.id(), addr);
}
