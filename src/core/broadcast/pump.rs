//! Observer connection pumps: one JSON document per WebSocket text frame.

use super::observer::{ObserverHandle, Outbound};
use crate::domain::error::codes;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Commands an observer may send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ObserverCommand {
    Auth { client_id: String },
    Subscribe { session_id: String },
    Unsubscribe { session_id: String },
    Ping,
}

/// Replies written back to an observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ObserverReply {
    Response {
        code: u16,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Pong,
}

impl ObserverReply {
    pub fn ok(message: impl Into<String>, session_id: Option<String>) -> Self {
        Self::Response {
            code: codes::OK,
            message: message.into(),
            session_id,
        }
    }

    pub fn failure(code: u16, message: impl Into<String>, session_id: Option<String>) -> Self {
        Self::Response {
            code,
            message: message.into(),
            session_id,
        }
    }

    fn encode(&self) -> Option<Outbound> {
        serde_json::to_string(self).ok().map(Arc::new)
    }
}

/// Executes observer commands on behalf of the read pump
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, observer: &Arc<ObserverHandle>, command: ObserverCommand) -> ObserverReply;
}

/// Drain the observer queue into `sink`, one text frame per event.
/// Sends a ping frame every `keepalive` and stops on cancellation, queue
/// close or a send error.
pub async fn run_write_pump<S>(
    mut rx: mpsc::Receiver<Outbound>,
    mut sink: S,
    keepalive: Duration,
    cancel: CancellationToken,
) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut ticker = tokio::time::interval(keepalive.max(Duration::from_millis(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => {
                let Some(message) = message else { break };
                sink.send(Message::text(message.as_str().to_owned())).await?;
            }
            _ = ticker.tick() => {
                sink.send(Message::Ping(Default::default())).await?;
            }
        }
    }

    let _ = sink.close().await;
    Ok(())
}

/// Parse commands from `stream` and queue each reply on the observer.
/// Returns when the peer closes, the token is cancelled or a frame fails,
/// including one over the configured size limit.
pub async fn run_read_pump<S, H>(
    mut stream: S,
    observer: Arc<ObserverHandle>,
    handler: &H,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
    H: CommandHandler + ?Sized,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Observer '{}' sent non UTF-8 binary frame", observer.id());
                    continue;
                }
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                trace!("Observer '{}' control frame", observer.id());
                continue;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(WsError::Capacity(e))) => {
                warn!("Observer '{}' frame rejected: {}", observer.id(), e);
                break;
            }
            Some(Err(e)) => {
                debug!("Observer '{}' read error: {}", observer.id(), e);
                break;
            }
        };
        if text.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<ObserverCommand>(&text) {
            Ok(command) => handler.handle(&observer, command).await,
            Err(e) => ObserverReply::failure(
                codes::INVALID_MESSAGE,
                format!("invalid command: {}", e),
                None,
            ),
        };

        if let Some(encoded) = reply.encode() {
            if !observer.send(encoded) {
                warn!("Observer '{}' queue full, closing", observer.id());
                observer.disconnect();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::error::CapacityError;

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn handle(&self, _observer: &Arc<ObserverHandle>, command: ObserverCommand) -> ObserverReply {
            match command {
                ObserverCommand::Ping => ObserverReply::Pong,
                ObserverCommand::Subscribe { session_id } => {
                    ObserverReply::ok("subscribed", Some(session_id))
                }
                _ => ObserverReply::ok("ok", None),
            }
        }
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: ObserverCommand =
            serde_json::from_str(r#"{"type":"subscribe","sessionId":"tcpc_1"}"#).unwrap();
        assert_eq!(cmd, ObserverCommand::Subscribe { session_id: "tcpc_1".into() });

        let ping: ObserverCommand = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ObserverCommand::Ping);
    }

    #[tokio::test]
    async fn test_read_pump_replies_through_queue() {
        let (observer, mut rx) = ObserverHandle::new("client_t", 8);
        let frames = futures::stream::iter::<Vec<Result<Message, WsError>>>(vec![
            Ok(Message::text(r#"{"type":"ping"}"#)),
            Ok(Message::Ping(Default::default())),
            Ok(Message::text("not json")),
            Ok(Message::text(r#"{"type":"subscribe","sessionId":"s"}"#)),
        ]);

        run_read_pump(frames, Arc::clone(&observer), &EchoHandler, CancellationToken::new()).await;

        assert_eq!(rx.recv().await.unwrap().as_str(), r#"{"type":"pong"}"#);
        assert!(rx.recv().await.unwrap().contains("4001"));
        assert!(rx.recv().await.unwrap().contains("\"sessionId\":\"s\""));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_read_pump_stops_on_oversized_frame() {
        let (observer, mut rx) = ObserverHandle::new("client_t", 8);
        let frames = futures::stream::iter(vec![
            Err(WsError::Capacity(CapacityError::MessageTooLong { size: 1 << 20, max_size: 1024 })),
            Ok(Message::text(r#"{"type":"ping"}"#)),
        ]);

        run_read_pump(frames, Arc::clone(&observer), &EchoHandler, CancellationToken::new()).await;

        // Nothing after the rejected frame is handled.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_pump_sends_text_frames() {
        let (tx, rx) = mpsc::channel(4);
        let (sink, frames) = futures::channel::mpsc::unbounded::<Message>();
        tx.send(Arc::new("{\"a\":1}".to_string())).await.unwrap();
        tx.send(Arc::new("{\"b\":2}".to_string())).await.unwrap();
        drop(tx);

        run_write_pump(
            rx,
            sink.sink_map_err(|_| WsError::ConnectionClosed),
            Duration::from_secs(30),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let frames: Vec<Message> = frames.collect().await;
        assert_eq!(frames, vec![Message::text("{\"a\":1}"), Message::text("{\"b\":2}")]);
    }

    #[tokio::test]
    async fn test_write_pump_pings_on_keepalive() {
        let (_tx, rx) = mpsc::channel::<Outbound>(4);
        let (sink, mut frames) = futures::channel::mpsc::unbounded::<Message>();
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(run_write_pump(
            rx,
            sink.sink_map_err(|_| WsError::ConnectionClosed),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        let first = tokio::time::timeout(Duration::from_secs(2), frames.next()).await.unwrap();
        assert!(matches!(first, Some(Message::Ping(_))));
        cancel.cancel();
        pump.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_write_pump_stops_when_peer_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        let (sink, frames) = futures::channel::mpsc::unbounded::<Message>();
        drop(frames);
        tx.send(Arc::new("{\"a\":1}".to_string())).await.unwrap();

        let result = run_write_pump(
            rx,
            sink.sink_map_err(|_| WsError::ConnectionClosed),
            Duration::from_secs(30),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(WsError::ConnectionClosed)));
        assert!(tx.is_closed());
    }
}
