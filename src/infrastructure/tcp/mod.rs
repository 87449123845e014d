// TCP module - Client and listener adapters sharing one read loop
pub mod client;
pub mod server;

pub use client::TcpClientAdapter;
pub use server::TcpServerAdapter;

use crate::core::communication::message::Direction;
use crate::core::communication::transport::{commit_capture, ConnectionSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a read loop stopped
#[derive(Debug)]
pub(crate) enum ReadExit {
    /// Explicit close
    Cancelled,
    /// Peer closed the stream
    Eof,
    Failed(std::io::Error),
}

impl ReadExit {
    pub(crate) fn reason(&self) -> String {
        match self {
            ReadExit::Cancelled => "closed".to_string(),
            ReadExit::Eof => "connection closed by peer".to_string(),
            ReadExit::Failed(e) => format!("read failed: {}", e),
        }
    }
}

/// Read into a fixed buffer until cancelled, EOF or a hard error, committing
/// every chunk as a received record. A read timeout only re-checks the token.
pub(crate) async fn read_loop<R>(
    mut reader: R,
    buffer_size: usize,
    read_timeout: Duration,
    cancel: CancellationToken,
    sink: &dyn ConnectionSink,
    hex_mode: &AtomicBool,
) -> ReadExit
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let read_timeout = read_timeout.max(Duration::from_millis(1));

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return ReadExit::Cancelled,
            read = tokio::time::timeout(read_timeout, reader.read(&mut buffer)) => read,
        };

        match read {
            Ok(Ok(0)) => return ReadExit::Eof,
            Ok(Ok(n)) => {
                debug!("Received {} bytes over TCP", n);
                commit_capture(
                    sink,
                    Direction::Received,
                    &buffer[..n],
                    hex_mode.load(Ordering::Relaxed),
                )
                .await;
            }
            Ok(Err(e)) => return ReadExit::Failed(e),
            // Timeout - continue reading
            Err(_) => continue,
        }
    }
}
