//! XBee API Protocol
//!
//! Implements API mode 1 framing for XBee radios:
//!
//! ```text
//! 0x7E | length (u16 BE) | frame type | fields ... payload | checksum
//! ```
//!
//! `length` counts the bytes from the frame type through the last payload
//! byte, and the checksum is `0xFF` minus the low byte of their sum.

pub mod codec;
mod connection;
mod error;
mod frame;
pub mod serial;
mod stream;

pub use codec::{byte_sum, checksum, to_hex_text, to_wire_bytes};
pub use connection::{
    ConnectionState, LinkStats, ReadHandler, SerialXbee, WriteHandler, XbeeConfig,
};
pub use error::{Result, XbeeError};
pub use frame::{address, Frame, FrameType, HexFormat, ReceivePacket, TransmitRequest};
pub use serial::{list_ports, open_port, PortInfo};
pub use stream::{FrameReader, ReadState, Transport};

/// Frame start delimiter
pub const START_DELIMITER: u8 = 0x7E;

/// Default baud rate for XBee modules
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Default timeout for header and payload reads in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Maximum payload carried by a single frame
pub const MAX_PAYLOAD_SIZE: usize = 256;

/// Default serial device for the host platform
#[cfg(target_os = "windows")]
pub const DEFAULT_PORT: &str = "COM1";

/// Default serial device for the host platform
#[cfg(target_os = "macos")]
pub const DEFAULT_PORT: &str = "/dev/tty.usbserial";

/// Default serial device for the host platform
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
