//! Serial port enumeration, grounded on
//! `src/communication/serial.rs::list_ports` / `SerialPortInfo`.

use grblcore_types::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

/// Enumerate serial ports visible to the host OS.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| Error::other(e.to_string()))?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let (manufacturer, vid, pid) = match &p.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    (usb.manufacturer.clone(), Some(usb.vid), Some(usb.pid))
                }
                _ => (None, None, None),
            };
            SerialPortInfo {
                port_name: p.port_name,
                description: None,
                manufacturer,
                vid,
                pid,
            }
        })
        .collect())
}
