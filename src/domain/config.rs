use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// CommHub configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommHubConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Event bus tuning
    #[serde(default)]
    pub event_bus: EventBusConfig,
    /// Observer fan-out tuning
    #[serde(default)]
    pub broadcaster: BroadcasterConfig,
    /// Observer listener
    #[serde(default)]
    pub observer_server: ObserverServerConfig,
    /// Named session presets
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory holding one message store per session
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Hex mode applied to sessions that do not set it
    #[serde(default)]
    pub default_hex_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Upper bound on handler tasks running at once
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,
    /// Log every published event
    #[serde(default = "default_true")]
    pub audit_log: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    /// Outbound queue slots per observer
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Keepalive ping period for observer connections
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverServerConfig {
    #[serde(default = "default_observer_host")]
    pub host: String,
    /// First port tried
    #[serde(default = "default_observer_port")]
    pub port: u16,
    /// Number of consecutive ports tried before giving up
    #[serde(default = "default_port_search_span")]
    pub port_search_span: u16,
    /// Largest observer frame accepted; bigger ones close the connection
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name
    pub name: String,
    /// Device description
    #[serde(default)]
    pub description: String,
    /// Capture payloads as hex
    #[serde(default)]
    pub hex_mode: bool,
    /// Transport parameters
    pub transport: TransportConfig,
}

/// Transport configuration, one variant per endpoint kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportConfig {
    #[serde(rename = "tcp_client")]
    TcpClient(TcpClientConfig),
    #[serde(rename = "tcp_server")]
    TcpServer(TcpServerConfig),
    #[serde(rename = "serial")]
    Serial(SerialConfig),
}

impl TransportConfig {
    /// Human readable endpoint, `host:port` or the serial device path
    pub fn endpoint(&self) -> String {
        match self {
            TransportConfig::TcpClient(c) => format!("{}:{}", c.host, c.port),
            TransportConfig::TcpServer(c) => format!("{}:{}", c.host, c.port),
            TransportConfig::Serial(c) => c.port.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpClientConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_tcp_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_tcp_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_true")]
    pub no_delay: bool,
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Zero disables the reconnect supervisor
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl TcpClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_tcp_read_timeout(),
            write_timeout_ms: default_write_timeout(),
            buffer_size: default_tcp_buffer_size(),
            no_delay: true,
            auto_reconnect: false,
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_enabled(&self) -> bool {
        self.auto_reconnect && self.max_reconnect_attempts > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpServerConfig {
    #[serde(default = "default_bind_host")]
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_tcp_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_tcp_buffer_size")]
    pub buffer_size: usize,
}

impl TcpServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            max_connections: default_max_connections(),
            read_timeout_ms: default_tcp_read_timeout(),
            write_timeout_ms: default_write_timeout(),
            buffer_size: default_tcp_buffer_size(),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: ParityConfig,
    #[serde(default)]
    pub flow_control: FlowControlConfig,
    /// Per-poll read timeout
    #[serde(default = "default_serial_read_timeout")]
    pub read_timeout_ms: u64,
    /// Pause between polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_serial_buffer_size")]
    pub buffer_size: usize,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: ParityConfig::None,
            flow_control: FlowControlConfig::None,
            read_timeout_ms: default_serial_read_timeout(),
            poll_interval_ms: default_poll_interval(),
            buffer_size: default_serial_buffer_size(),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Parity configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    #[default]
    None,
    Odd,
    Even,
}

/// Flow control configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControlConfig {
    #[default]
    None,
    Hardware,
    Software,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_handlers() -> usize {
    64
}

fn default_queue_capacity() -> usize {
    256
}

fn default_keepalive_interval() -> u64 {
    30_000
}

fn default_observer_host() -> String {
    "127.0.0.1".to_string()
}

fn default_observer_port() -> u16 {
    1743
}

fn default_port_search_span() -> u16 {
    10
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_tcp_read_timeout() -> u64 {
    1000
}

fn default_write_timeout() -> u64 {
    30_000
}

fn default_tcp_buffer_size() -> usize {
    4096
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_serial_read_timeout() -> u64 {
    100
}

fn default_poll_interval() -> u64 {
    10
}

fn default_serial_buffer_size() -> usize {
    1024
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: None,
            default_hex_mode: false,
        }
    }
}

impl GlobalConfig {
    /// Resolved message store directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("commhub")
                .join("message_data")
        })
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: default_max_concurrent_handlers(),
            audit_log: true,
        }
    }
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            keepalive_interval_ms: default_keepalive_interval(),
        }
    }
}

impl BroadcasterConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

impl Default for ObserverServerConfig {
    fn default() -> Self {
        Self {
            host: default_observer_host(),
            port: default_observer_port(),
            port_search_span: default_port_search_span(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}
