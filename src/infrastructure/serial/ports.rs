use crate::domain::error::CommHubResult;
use serde::Serialize;
use serialport::SerialPortType;

/// Serial device visible to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSummary {
    pub name: String,
    pub kind: String,
}

pub fn available_ports() -> CommHubResult<Vec<PortSummary>> {
    let mut ports: Vec<PortSummary> = serialport::available_ports()?
        .into_iter()
        .map(|port| PortSummary {
            kind: describe(&port.port_type),
            name: port.port_name,
        })
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}

/// Names of the available serial ports
pub fn port_names() -> CommHubResult<Vec<String>> {
    Ok(available_ports()?.into_iter().map(|p| p.name).collect())
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(info) => match &info.product {
            Some(product) => format!("usb ({})", product),
            None => format!("usb {:04x}:{:04x}", info.vid, info.pid),
        },
        SerialPortType::PciPort => "pci".to_string(),
        SerialPortType::BluetoothPort => "bluetooth".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}
