// Infrastructure module - Transport adapters, observer listener, config and logging
pub mod config;
pub mod logging;
pub mod observer;
pub mod serial;
pub mod tcp;

use crate::core::communication::transport::{ConnectionAdapter, ConnectionSink};
use crate::domain::config::TransportConfig;
use std::sync::Arc;

/// Build the adapter variant matching `transport`
pub fn build_adapter(
    transport: &TransportConfig,
    hex_mode: bool,
    sink: Arc<dyn ConnectionSink>,
) -> Arc<dyn ConnectionAdapter> {
    match transport {
        TransportConfig::TcpClient(config) => {
            Arc::new(tcp::TcpClientAdapter::new(config.clone(), hex_mode, sink))
        }
        TransportConfig::TcpServer(config) => {
            Arc::new(tcp::TcpServerAdapter::new(config.clone(), hex_mode, sink))
        }
        TransportConfig::Serial(config) => {
            Arc::new(serial::SerialAdapter::new(config.clone(), hex_mode, sink))
        }
    }
}
