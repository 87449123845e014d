// Serial module - Serial port adapter and enumeration
pub mod client;
pub mod ports;

pub use client::SerialAdapter;
pub use ports::{available_ports, port_names, PortSummary};
