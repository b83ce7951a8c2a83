//! Serial port handling
//!
//! Port discovery and async port opening for XBee modules.

use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};

use super::{Result, XbeeError};

/// USB vendor id of the FTDI bridge used on Digi XBee USB adapters
const FTDI_VID: u16 = 0x0403;

/// A serial device that may have an XBee module behind it
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Device path passed to [`open_port`]
    pub name: String,

    /// USB vendor id of the bridge chip, `None` for non-USB ports
    pub vid: Option<u16>,

    /// Product string reported by the adapter, e.g. "FT231X USB UART"
    pub product: Option<String>,
}

impl PortInfo {
    fn from_path(name: String) -> Self {
        Self {
            name,
            vid: None,
            product: None,
        }
    }

    /// Whether the port sits behind an FTDI bridge, as XBee USB boards do
    pub fn is_ftdi(&self) -> bool {
        self.vid == Some(FTDI_VID)
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                product: usb.product,
            },
            _ => Self::from_path(info.port_name),
        }
    }
}

/// Sort key placing USB serial bridges first:
///  - ttyUSB* (FTDI adapters, sorted numerically by suffix)
///  - then ttyACM* / tty.usbserial*
///  - then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    if basename.starts_with("tty.usbserial") || basename.starts_with("cu.usbserial") {
        return (1, usize::MAX, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// Candidate ports for an XBee adapter, USB bridges first.
///
/// On Linux, `/dev/ttyUSB*` and `/dev/ttyACM*` nodes the enumeration API
/// misses are added by path.
pub fn list_ports() -> Vec<PortInfo> {
    let mut by_name: HashMap<String, PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|info| {
            let port = PortInfo::from(info);
            (port.name.clone(), port)
        })
        .collect();

    #[cfg(target_os = "linux")]
    for path in usb_device_nodes() {
        by_name
            .entry(path.clone())
            .or_insert_with(|| PortInfo::from_path(path));
    }

    let mut ports: Vec<PortInfo> = by_name.into_values().collect();
    sort_ports(&mut ports);
    ports
}

/// FTDI bridges (Digi adapters) first, then by device family and number
fn sort_ports(ports: &mut [PortInfo]) {
    ports.sort_by_key(|p| (!p.is_ftdi(), port_sort_key(&p.name)));
}

#[cfg(target_os = "linux")]
fn usb_device_nodes() -> Vec<String> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("ttyUSB") || name.starts_with("ttyACM"))
        .map(|name| format!("/dev/{}", name))
        .collect()
}

/// Open a serial port as an async stream, 8N1 without flow control.
///
/// Must be called from within a tokio runtime context.
pub fn open_port(name: &str, baud_rate: u32) -> Result<SerialStream> {
    let builder = tokio_serial::new(name, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None);

    SerialStream::open(&builder)
        .map_err(|e| XbeeError::ConnectionFailed(format!("{}: {}", name, e)))
}
