use crate::core::communication::message::{Direction, MessageRecord};
use crate::core::communication::transport::{
    commit_capture, ConnectionAdapter, ConnectionSink, TransportKind,
};
use crate::domain::config::{FlowControlConfig, ParityConfig, SerialConfig};
use crate::domain::error::{CommHubError, CommHubResult};
use async_trait::async_trait;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type PortHandle = Arc<std::sync::Mutex<Box<dyn SerialPort>>>;

/// Output of the blocking poll thread
enum PollEvent {
    Data(Vec<u8>),
    Closed(String),
}

struct SerialLink {
    writer: PortHandle,
    cancel: CancellationToken,
    poller: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

/// Serial port endpoint.
///
/// Serial reads cannot be cancelled natively, so a blocking thread polls the
/// port with a short read timeout and checks the cancel token between polls.
pub struct SerialAdapter {
    config: SerialConfig,
    sink: Arc<dyn ConnectionSink>,
    hex_mode: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    link: Mutex<Option<SerialLink>>,
}

impl SerialAdapter {
    pub fn new(config: SerialConfig, hex_mode: bool, sink: Arc<dyn ConnectionSink>) -> Self {
        Self {
            config,
            sink,
            hex_mode: Arc::new(AtomicBool::new(hex_mode)),
            open: Arc::new(AtomicBool::new(false)),
            link: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

/// Translate the configuration into a `serialport` builder
pub fn port_builder(config: &SerialConfig) -> CommHubResult<serialport::SerialPortBuilder> {
    let mut builder = serialport::new(&config.port, config.baud_rate);

    builder = builder.data_bits(match config.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        8 => serialport::DataBits::Eight,
        other => {
            return Err(CommHubError::Config {
                message: format!("Invalid data bits: {}", other),
            })
        }
    });

    builder = builder.stop_bits(match config.stop_bits {
        1 => serialport::StopBits::One,
        2 => serialport::StopBits::Two,
        other => {
            return Err(CommHubError::Config {
                message: format!("Invalid stop bits: {}", other),
            })
        }
    });

    builder = builder.parity(match config.parity {
        ParityConfig::None => serialport::Parity::None,
        ParityConfig::Even => serialport::Parity::Even,
        ParityConfig::Odd => serialport::Parity::Odd,
    });

    builder = builder.flow_control(match config.flow_control {
        FlowControlConfig::None => serialport::FlowControl::None,
        FlowControlConfig::Software => serialport::FlowControl::Software,
        FlowControlConfig::Hardware => serialport::FlowControl::Hardware,
    });

    Ok(builder.timeout(config.read_timeout()))
}

fn poll_port(
    mut port: Box<dyn SerialPort>,
    config: SerialConfig,
    cancel: CancellationToken,
    tx: mpsc::Sender<PollEvent>,
) {
    let mut buffer = vec![0u8; config.buffer_size.max(1)];
    let poll_interval = config.poll_interval();

    while !cancel.is_cancelled() {
        match port.read(&mut buffer) {
            // No data available, continue
            Ok(0) => {}
            Ok(n) => {
                debug!("Received {} bytes over serial", n);
                if tx.blocking_send(PollEvent::Data(buffer[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                error!("Failed to read from serial port {}: {}", config.port, e);
                let _ = tx.blocking_send(PollEvent::Closed(format!("read failed: {}", e)));
                return;
            }
        }
        std::thread::sleep(poll_interval);
    }
}

async fn forward_events(
    mut rx: mpsc::Receiver<PollEvent>,
    sink: Arc<dyn ConnectionSink>,
    hex_mode: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            PollEvent::Data(data) => {
                commit_capture(
                    sink.as_ref(),
                    Direction::Received,
                    &data,
                    hex_mode.load(Ordering::Relaxed),
                )
                .await;
            }
            PollEvent::Closed(reason) => {
                if open.swap(false, Ordering::SeqCst) {
                    sink.on_link_lost(reason).await;
                }
                return;
            }
        }
    }
}

#[async_trait]
impl ConnectionAdapter for SerialAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    async fn open(&self) -> CommHubResult<()> {
        let mut link = self.link.lock().await;
        if self.open.load(Ordering::SeqCst) {
            return Err(CommHubError::AlreadyOpen {
                endpoint: self.config.port.clone(),
            });
        }
        if let Some(stale) = link.take() {
            stale.cancel.cancel();
            let _ = stale.poller.await;
            let _ = stale.forwarder.await;
        }

        let builder = port_builder(&self.config)?;
        let name = self.config.port.clone();
        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| CommHubError::transient(format!("serial open task failed: {}", e)))?
            .map_err(|e| CommHubError::transient(format!("failed to open serial port {}: {}", name, e)))?;
        let reader = port.try_clone()?;

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(64);
        self.open.store(true, Ordering::SeqCst);

        let poller = {
            let config = self.config.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || poll_port(reader, config, cancel, tx))
        };
        let forwarder = tokio::spawn(forward_events(
            rx,
            Arc::clone(&self.sink),
            Arc::clone(&self.hex_mode),
            Arc::clone(&self.open),
        ));

        *link = Some(SerialLink {
            writer: Arc::new(std::sync::Mutex::new(port)),
            cancel,
            poller,
            forwarder,
        });
        info!(
            "Serial port {} opened at {} baud",
            self.config.port, self.config.baud_rate
        );
        Ok(())
    }

    async fn write(&self, data: &[u8], as_hex: bool) -> CommHubResult<MessageRecord> {
        let link = self.link.lock().await;
        let writer = match link.as_ref() {
            Some(active) if self.open.load(Ordering::SeqCst) => Arc::clone(&active.writer),
            _ => return Err(CommHubError::write_failed("serial port is not open")),
        };

        let payload = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut port = writer.lock().unwrap_or_else(|p| p.into_inner());
            port.write_all(&payload)?;
            port.flush()
        })
        .await
        .map_err(|e| CommHubError::write_failed(format!("serial write task failed: {}", e)))?
        .map_err(|e| {
            CommHubError::write_failed(format!("write to {} failed: {}", self.config.port, e))
        })?;

        debug!("Sent {} bytes over serial", data.len());
        let hex = as_hex || self.hex_mode.load(Ordering::Relaxed);
        Ok(commit_capture(self.sink.as_ref(), Direction::Sent, data, hex).await)
    }

    async fn close(&self) -> CommHubResult<()> {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        let link = self.link.lock().await.take();

        if let Some(link) = link {
            link.cancel.cancel();
            // Exits within one read timeout plus one poll interval.
            if let Err(e) = link.poller.await {
                warn!("Serial poll thread ended abnormally: {}", e);
            }
            if let Err(e) = link.forwarder.await {
                warn!("Serial forwarder ended abnormally: {}", e);
            }
        }

        if was_open {
            info!("Serial port {} closed", self.config.port);
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::tcp::client::tests::channel_sink;

    #[test]
    fn test_builder_rejects_bad_framing() {
        let mut config = SerialConfig::new("/dev/ttyUSB0", 9600);
        config.data_bits = 9;
        assert!(matches!(port_builder(&config), Err(CommHubError::Config { .. })));

        let mut config = SerialConfig::new("/dev/ttyUSB0", 9600);
        config.stop_bits = 3;
        assert!(port_builder(&config).is_err());
    }

    #[tokio::test]
    async fn test_open_fails_gracefully() {
        let (sink, _rx) = channel_sink();
        // /dev/null is not a serial device
        let adapter = SerialAdapter::new(SerialConfig::new("/dev/null", 9600), false, sink);

        assert!(adapter.open().await.is_err());
        assert!(!adapter.is_open());
        assert!(adapter.write(b"x", false).await.is_err());
        adapter.close().await.unwrap();
    }
}
