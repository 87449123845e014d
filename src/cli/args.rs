use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Command line arguments for CommHub
#[derive(Parser, Debug)]
#[command(
    name = "commhub",
    version = env!("CARGO_PKG_VERSION"),
    about = "Session engine for TCP and serial endpoints",
    long_about = "Opens TCP client, TCP listener and serial sessions, captures their traffic per session and fans live events out to observers."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available serial ports
    Ports,
    /// Open an interactive TCP client session
    Connect(ConnectArgs),
    /// Open an interactive TCP listener session
    Listen(ListenArgs),
    /// Open an interactive serial session
    Serial(SerialArgs),
    /// Open a session from a configured device preset
    Device {
        /// Device name from the configuration
        name: String,
        /// Send and display payloads as hex
        #[arg(long)]
        hex: bool,
    },
    /// Open every configured device and accept observers until Ctrl-C
    Serve {
        /// Observer port (overrides the configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
}

/// TCP client arguments
#[derive(ClapArgs, Debug)]
pub struct ConnectArgs {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Session name
    #[arg(short, long)]
    pub name: Option<String>,
    /// Send and display payloads as hex
    #[arg(long)]
    pub hex: bool,
    /// Connection timeout in milliseconds
    #[arg(short, long, default_value = "10000")]
    pub timeout_ms: u64,
    /// Reconnect after the link drops
    #[arg(long)]
    pub auto_reconnect: bool,
    /// Reconnect attempts before giving up
    #[arg(long, default_value = "5")]
    pub max_attempts: u32,
    /// Delay between reconnect attempts in milliseconds
    #[arg(long, default_value = "5000")]
    pub delay_ms: u64,
}

/// TCP listener arguments
#[derive(ClapArgs, Debug)]
pub struct ListenArgs {
    /// Port number
    pub port: u16,
    /// Bind address
    #[arg(short = 'b', long, default_value = "0.0.0.0")]
    pub host: String,
    /// Session name
    #[arg(short, long)]
    pub name: Option<String>,
    /// Concurrent peers accepted before new ones are rejected
    #[arg(short, long, default_value = "100")]
    pub max_connections: usize,
    /// Send and display payloads as hex
    #[arg(long)]
    pub hex: bool,
}

/// Serial communication arguments
#[derive(ClapArgs, Debug)]
pub struct SerialArgs {
    /// Serial port path
    pub port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    pub baud: u32,

    /// Data bits
    #[arg(long, default_value = "8")]
    pub data_bits: u8,

    /// Stop bits
    #[arg(long, default_value = "1")]
    pub stop_bits: u8,

    /// Parity (none, even, odd)
    #[arg(long, value_enum, default_value = "none")]
    pub parity: ParityArg,

    /// Flow control (none, software, hardware)
    #[arg(long, value_enum, default_value = "none")]
    pub flow_control: FlowControlArg,

    /// Session name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Send and display payloads as hex
    #[arg(long)]
    pub hex: bool,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Create a configuration with example devices
    Init {
        /// Directory receiving `.commhub/config.toml`
        #[arg(short, long)]
        dir: Option<String>,
        /// Write the global configuration instead
        #[arg(short, long)]
        global: bool,
    },
    /// Print the configuration file locations
    Path,
}

/// Parity configuration argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ParityArg {
    None,
    Even,
    Odd,
}

/// Flow control configuration argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum FlowControlArg {
    None,
    Software,
    Hardware,
}

impl From<ParityArg> for crate::domain::config::ParityConfig {
    fn from(parity: ParityArg) -> Self {
        match parity {
            ParityArg::None => Self::None,
            ParityArg::Even => Self::Even,
            ParityArg::Odd => Self::Odd,
        }
    }
}

impl From<FlowControlArg> for crate::domain::config::FlowControlConfig {
    fn from(flow_control: FlowControlArg) -> Self {
        match flow_control {
            FlowControlArg::None => Self::None,
            FlowControlArg::Software => Self::Software,
            FlowControlArg::Hardware => Self::Hardware,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect() {
        let args = Args::try_parse_from([
            "commhub",
            "connect",
            "10.0.0.5",
            "502",
            "--auto-reconnect",
            "--max-attempts",
            "3",
        ])
        .unwrap();

        match args.command {
            Command::Connect(connect) => {
                assert_eq!(connect.host, "10.0.0.5");
                assert_eq!(connect.port, 502);
                assert!(connect.auto_reconnect);
                assert_eq!(connect.max_attempts, 3);
                assert_eq!(connect.delay_ms, 5000);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_output_after_subcommand() {
        let args = Args::try_parse_from(["commhub", "ports", "--output", "json"]).unwrap();
        assert_eq!(args.output, OutputFormat::Json);
    }

    #[test]
    fn test_serial_defaults() {
        let args = Args::try_parse_from(["commhub", "serial", "/dev/ttyUSB0"]).unwrap();
        match args.command {
            Command::Serial(serial) => {
                assert_eq!(serial.baud, 9600);
                assert_eq!(serial.data_bits, 8);
                assert!(matches!(serial.parity, ParityArg::None));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Args::try_parse_from(["commhub", "listen", "99999"]).is_err());
    }
}
