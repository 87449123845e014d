use crate::cli::args::OutputFormat;
use crate::core::event::EngineEvent;
use crate::core::session::{SessionDescriptor, SessionInfo};
use crate::domain::config::{CommHubConfig, DeviceConfig};
use crate::infrastructure::serial::ports::PortSummary;
use std::io;
use tabled::{Table, Tabled};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_sessions(&self, sessions: &[SessionInfo]) -> Result<(), OutputError>;
    fn write_ports(&self, ports: &[PortSummary]) -> Result<(), OutputError>;
    fn write_config(&self, config: &CommHubConfig) -> Result<(), OutputError>;
    fn write_event(&self, event: &EngineEvent) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::CommHubError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
    quiet: bool,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format, quiet: false }
    }

    /// Suppress informational messages; errors and data still print
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_sessions(&self, sessions: &[SessionInfo]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                for session in sessions {
                    println!("Session: {} ({})", session.session_id, session.kind);
                    println!("  Name: {}", session.name);
                    println!("  Endpoint: {}", session.endpoint);
                    println!("  Status: {}", session.status);
                    if let Some(addr) = &session.local_addr {
                        println!("  Local: {}", addr);
                    }
                    if session.peer_count > 0 {
                        println!("  Peers: {}", session.peer_count);
                    }
                    println!();
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(sessions)?);
            }
            OutputFormat::Table => {
                if !sessions.is_empty() {
                    let rows: Vec<SessionTableRow> = sessions.iter().map(SessionTableRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
        }
        Ok(())
    }

    fn write_ports(&self, ports: &[PortSummary]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                if ports.is_empty() {
                    println!("No serial ports found");
                }
                for port in ports {
                    println!("{}  {}", port.name, port.kind);
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(ports)?);
            }
            OutputFormat::Table => {
                if !ports.is_empty() {
                    let rows: Vec<PortTableRow> = ports.iter().map(PortTableRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
        }
        Ok(())
    }

    fn write_config(&self, config: &CommHubConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("CommHub Configuration:");
                println!("  Log level: {}", config.global.log_level);
                println!("  Data directory: {}", config.global.data_dir().display());
                println!("  Default hex mode: {}", config.global.default_hex_mode);
                println!(
                    "  Observers: {}:{} (+{})",
                    config.observer_server.host,
                    config.observer_server.port,
                    config.observer_server.port_search_span
                );

                if !config.devices.is_empty() {
                    println!("  Devices:");
                    for device in &config.devices {
                        let desc = if device.description.is_empty() { "No description" } else { &device.description };
                        println!("    {}: {} ({})", device.name, desc, device.transport.endpoint());
                    }
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(config)?);
            }
            OutputFormat::Table => {
                if !config.devices.is_empty() {
                    let rows: Vec<DeviceTableRow> = config.devices.iter().map(DeviceTableRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
        }
        Ok(())
    }

    fn write_event(&self, event: &EngineEvent) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
            _ => println!("{}", describe_event(event)),
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        if self.quiet {
            return Ok(());
        }
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "message": message,
                    "level": "info"
                });
                println!("{}", serde_json::to_string(&output)?);
            }
            _ => {
                println!("{}", message);
            }
        }
        Ok(())
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "error": error,
                    "level": "error"
                });
                eprintln!("{}", serde_json::to_string(&output)?);
            }
            _ => {
                eprintln!("Error: {}", error);
            }
        }
        Ok(())
    }
}

/// One-line rendering of an engine event for terminals
pub fn describe_event(event: &EngineEvent) -> String {
    match event {
        EngineEvent::SessionStatusChanged { status, previous, .. } => {
            format!("* status {} -> {}", previous, status)
        }
        EngineEvent::Message {
            direction,
            content,
            byte_length,
            ..
        } => {
            let arrow = match direction {
                crate::core::communication::Direction::Sent => ">>",
                crate::core::communication::Direction::Received => "<<",
            };
            format!("{} [{}] {}", arrow, byte_length, content)
        }
        EngineEvent::Error { code, message, details, .. } => match details {
            Some(details) => format!("! {} {} ({})", code, message, details),
            None => format!("! {} {}", code, message),
        },
        EngineEvent::Reconnecting {
            attempt, max_attempts, ..
        } => format!("* reconnecting {}/{}", attempt, max_attempts),
        EngineEvent::ReconnectFailed { attempts, code, .. } => {
            format!("! {} reconnect failed after {} attempts", code, attempts)
        }
        EngineEvent::PeerConnected { peer, .. } => format!("* peer {} connected", peer),
        EngineEvent::PeerDisconnected { peer, .. } => format!("* peer {} disconnected", peer),
        EngineEvent::PeerRejected { peer, reason, .. } => {
            format!("* peer {} rejected: {}", peer, reason)
        }
    }
}

/// Table row for session summary
#[derive(Tabled)]
struct SessionTableRow {
    id: String,
    name: String,
    r#type: String,
    endpoint: String,
    status: String,
    peers: usize,
}

impl From<&SessionInfo> for SessionTableRow {
    fn from(session: &SessionInfo) -> Self {
        Self {
            id: session.session_id.clone(),
            name: session.name.clone(),
            r#type: session.kind.to_string(),
            endpoint: session.endpoint.clone(),
            status: session.status.to_string(),
            peers: session.peer_count,
        }
    }
}

/// Table row for serial ports
#[derive(Tabled)]
struct PortTableRow {
    port: String,
    kind: String,
}

impl From<&PortSummary> for PortTableRow {
    fn from(port: &PortSummary) -> Self {
        Self {
            port: port.name.clone(),
            kind: port.kind.clone(),
        }
    }
}

/// Table row for device configuration
#[derive(Tabled)]
struct DeviceTableRow {
    name: String,
    description: String,
    transport: String,
    endpoint: String,
}

impl From<&DeviceConfig> for DeviceTableRow {
    fn from(device: &DeviceConfig) -> Self {
        Self {
            name: device.name.clone(),
            description: device.description.clone(),
            transport: SessionDescriptor::from(device).kind().to_string(),
            endpoint: device.transport.endpoint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::communication::{Direction, MessageRecord};
    use crate::core::session::SessionStatus;
    use crate::domain::error::CommHubError;

    #[test]
    fn test_describe_status_and_message() {
        let status = EngineEvent::status("s", SessionStatus::Connecting, SessionStatus::Connected);
        assert_eq!(describe_event(&status), "* status connecting -> connected");

        let record = MessageRecord::capture(Direction::Received, b"\x12\xab", true);
        let message = EngineEvent::message("s", &record);
        assert_eq!(describe_event(&message), "<< [2] 12 ab");
    }

    #[test]
    fn test_describe_error_with_details() {
        let capacity = CommHubError::Capacity {
            message: "limit 1".to_string(),
        };
        let event = EngineEvent::error(&capacity, Some("s"), Some("10.0.0.9:5000".to_string()));
        let line = describe_event(&event);
        assert!(line.starts_with("! 4005"));
        assert!(line.ends_with("(10.0.0.9:5000)"));
    }
}
