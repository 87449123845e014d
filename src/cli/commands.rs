use crate::cli::args::{Args, Command, ConfigCommand, ConnectArgs, ListenArgs, OutputFormat, SerialArgs};
use crate::cli::output::{ConsoleWriter, OutputWriter};
use crate::core::communication::SessionEngine;
use crate::core::event::EngineEvent;
use crate::core::session::SessionDescriptor;
use crate::domain::config::{
    CommHubConfig, SerialConfig, TcpClientConfig, TcpServerConfig, TransportConfig,
};
use crate::domain::error::{CommHubError, CommHubResult};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::serial::ports::available_ports;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Execute CLI command
pub async fn execute_command(args: Args) -> CommHubResult<()> {
    let writer = ConsoleWriter::new(args.output).quiet(args.quiet);

    let config_manager = ConfigManager::new()?;
    let config = match &args.config {
        Some(config_path) => config_manager.load_config_from_path(config_path.as_ref())?,
        None => config_manager.load_config()?,
    };

    if !args.quiet {
        init_logging(&config.global.log_level, args.verbose).map_err(|e| CommHubError::Config {
            message: format!("Failed to initialize logging: {}", e),
        })?;
    }

    match args.command {
        Command::Ports => {
            writer.write_ports(&available_ports()?)?;
            Ok(())
        }
        Command::Connect(connect) => {
            let hex = connect.hex;
            let keep_trying = connect.auto_reconnect;
            run_interactive(&config, client_descriptor(connect), hex, keep_trying, args.output).await
        }
        Command::Listen(listen) => {
            let hex = listen.hex;
            run_interactive(&config, listener_descriptor(listen), hex, false, args.output).await
        }
        Command::Serial(serial) => {
            let hex = serial.hex;
            run_interactive(&config, serial_descriptor(serial), hex, false, args.output).await
        }
        Command::Device { name, hex } => {
            let device = config
                .devices
                .iter()
                .find(|d| d.name == name)
                .ok_or_else(|| CommHubError::Config {
                    message: format!("Device '{}' is not configured", name),
                })?;
            let descriptor = SessionDescriptor::from(device);
            let hex = hex || descriptor.hex_mode;
            let keep_trying = matches!(&descriptor.transport, TransportConfig::TcpClient(c) if c.reconnect_enabled());
            run_interactive(&config, descriptor, hex, keep_trying, args.output).await
        }
        Command::Serve { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.observer_server.port = port;
            }
            serve(&config, &writer).await
        }
        Command::Config(config_args) => execute_config_command(config_args.command, &writer, &config, &config_manager),
        Command::Version => {
            writer.write_message(&format!("commhub {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

fn client_descriptor(args: ConnectArgs) -> SessionDescriptor {
    let mut config = TcpClientConfig::new(args.host, args.port);
    config.connect_timeout_ms = args.timeout_ms;
    config.auto_reconnect = args.auto_reconnect;
    config.max_reconnect_attempts = args.max_attempts;
    config.reconnect_delay_ms = args.delay_ms;

    with_name(SessionDescriptor::new(TransportConfig::TcpClient(config)), args.name).with_hex_mode(args.hex)
}

fn listener_descriptor(args: ListenArgs) -> SessionDescriptor {
    let mut config = TcpServerConfig::new(args.host, args.port);
    config.max_connections = args.max_connections;

    with_name(SessionDescriptor::new(TransportConfig::TcpServer(config)), args.name).with_hex_mode(args.hex)
}

fn serial_descriptor(args: SerialArgs) -> SessionDescriptor {
    let mut config = SerialConfig::new(args.port, args.baud);
    config.data_bits = args.data_bits;
    config.stop_bits = args.stop_bits;
    config.parity = args.parity.into();
    config.flow_control = args.flow_control.into();

    with_name(SessionDescriptor::new(TransportConfig::Serial(config)), args.name).with_hex_mode(args.hex)
}

fn with_name(descriptor: SessionDescriptor, name: Option<String>) -> SessionDescriptor {
    match name {
        Some(name) => descriptor.with_name(name),
        None => descriptor,
    }
}

/// Open one session, print its events and send every stdin line until EOF,
/// `:quit` or Ctrl-C
async fn run_interactive(
    config: &CommHubConfig,
    descriptor: SessionDescriptor,
    hex: bool,
    keep_trying: bool,
    format: OutputFormat,
) -> CommHubResult<()> {
    let engine = SessionEngine::new(config);
    let writer = ConsoleWriter::new(format);

    let session = engine.create_session(descriptor).await?;
    let session_id = session.session_id.clone();

    let (observer, mut rx) = engine.register_observer(Some("console".to_string())).await;
    engine.subscribe(observer.id(), &session_id).await?;

    let printer = tokio::spawn(async move {
        let writer = ConsoleWriter::new(format);
        while let Some(line) = rx.recv().await {
            match serde_json::from_str::<EngineEvent>(&line) {
                Ok(event) => {
                    let _ = writer.write_event(&event);
                }
                Err(e) => warn!("Unreadable event line: {}", e),
            }
        }
    });

    match engine.connect(&session_id).await {
        Ok(info) => writer.write_message(&format!(
            "Session '{}' {} on {} (type lines to send, :quit to exit)",
            info.name, info.status, info.endpoint
        ))?,
        Err(e) if keep_trying => writer.write_error(&format!("{}; reconnecting in the background", e))?,
        Err(e) => {
            engine.shutdown().await;
            let _ = printer.await;
            return Err(e);
        }
    }

    let mut hex = hex;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim_end_matches(['\r', '\n']);

        match line {
            "" => continue,
            ":quit" | ":q" => break,
            ":hex on" | ":hex off" => {
                hex = line.ends_with("on");
                engine.set_hex_mode(&session_id, hex).await?;
                writer.write_message(&format!("hex mode {}", if hex { "on" } else { "off" }))?;
            }
            ":history" => {
                let history = engine.get_messages(&session_id, 0, 0).await?;
                writer.write_message(&format!("{} records stored", history.total))?;
            }
            data => {
                if let Err(e) = engine.send(&session_id, data, hex).await {
                    writer.write_error(&e.to_string())?;
                }
            }
        }
    }

    engine.shutdown().await;
    let _ = printer.await;
    Ok(())
}

/// Open every configured device and serve observers until Ctrl-C
async fn serve(config: &CommHubConfig, writer: &ConsoleWriter) -> CommHubResult<()> {
    let engine = SessionEngine::new(config);

    for device in &config.devices {
        let session = engine.create_session(SessionDescriptor::from(device)).await?;
        match engine.connect(&session.session_id).await {
            Ok(info) => info!("Device '{}' is {} as '{}'", device.name, info.status, info.session_id),
            Err(e) => warn!("Device '{}' did not open: {}", device.name, e),
        }
    }

    let server = engine.serve_observers().await?;
    writer.write_message(&format!(
        "Serving {} sessions, observers on ws://{} (Ctrl-C to stop)",
        engine.list_sessions().await.len(),
        server.local_addr()
    ))?;
    writer.write_sessions(&engine.list_sessions().await)?;

    tokio::signal::ctrl_c().await?;

    server.shutdown().await;
    engine.shutdown().await;
    writer.write_message("Stopped")?;
    Ok(())
}

fn execute_config_command(
    command: ConfigCommand,
    writer: &ConsoleWriter,
    config: &CommHubConfig,
    config_manager: &ConfigManager,
) -> CommHubResult<()> {
    match command {
        ConfigCommand::Show => {
            writer.write_config(config)?;
            Ok(())
        }
        ConfigCommand::Init { dir, global } => {
            if global {
                let global_path = config_manager.get_global_config_path_ref();
                config_manager.save_config_to_path(global_path, &CommHubConfig::default())?;
                writer.write_message(&format!("Global configuration initialized at '{}'", global_path.display()))?;
            } else {
                let dir = match dir {
                    Some(dir) => dir.into(),
                    None => std::env::current_dir().map_err(|e| CommHubError::Config {
                        message: format!("Failed to get current directory: {}", e),
                    })?,
                };
                let path = config_manager.init_project_config(&dir)?;
                writer.write_message(&format!("Project configuration initialized at '{}'", path.display()))?;
            }
            Ok(())
        }
        ConfigCommand::Path => {
            writer.write_message(&format!("global: {}", config_manager.get_global_config_path_ref().display()))?;
            match config_manager.get_project_config_path() {
                Some(path) => writer.write_message(&format!("project: {}", path.display()))?,
                None => writer.write_message("project: (none)")?,
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{FlowControlArg, ParityArg};
    use crate::domain::config::ParityConfig;

    #[test]
    fn test_client_descriptor_carries_reconnect_flags() {
        let descriptor = client_descriptor(ConnectArgs {
            host: "127.0.0.1".into(),
            port: 7000,
            name: Some("bench".into()),
            hex: true,
            timeout_ms: 250,
            auto_reconnect: true,
            max_attempts: 2,
            delay_ms: 100,
        });

        assert_eq!(descriptor.name.as_deref(), Some("bench"));
        assert!(descriptor.hex_mode);
        match descriptor.transport {
            TransportConfig::TcpClient(config) => {
                assert!(config.reconnect_enabled());
                assert_eq!(config.connect_timeout_ms, 250);
                assert_eq!(config.max_reconnect_attempts, 2);
            }
            other => panic!("unexpected transport {:?}", other),
        }
    }

    #[test]
    fn test_serial_descriptor_maps_framing() {
        let descriptor = serial_descriptor(SerialArgs {
            port: "/dev/ttyS1".into(),
            baud: 115_200,
            data_bits: 7,
            stop_bits: 2,
            parity: ParityArg::Even,
            flow_control: FlowControlArg::None,
            name: None,
            hex: false,
        });

        match descriptor.transport {
            TransportConfig::Serial(config) => {
                assert_eq!(config.baud_rate, 115_200);
                assert_eq!(config.data_bits, 7);
                assert_eq!(config.parity, ParityConfig::Even);
            }
            other => panic!("unexpected transport {:?}", other),
        }
    }
}
