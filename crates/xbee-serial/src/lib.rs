//! # xbee-serial
//!
//! Driver for XBee radio modules running in API mode 1 (unescaped frames).

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Big-endian wire encoding, hex rendering and checksum helpers
//! - The Receive Packet (0x90) and Transmit Request (0x10) frames
//! - An asynchronous engine that reads frames off a serial port on a
//!   background thread and writes outgoing frames without blocking the caller
//!
//! ## Example
//!
//! ```rust,ignore
//! use xbee_serial::protocol::{Frame, SerialXbee, XbeeConfig};
//!
//! let xbee = SerialXbee::new(XbeeConfig::default());
//! xbee.set_read_handler(|frame: &Frame| {
//!     if let Frame::Receive(packet) = frame {
//!         println!("from {:016X}: {}", packet.source_mac_64(), packet.text());
//!     }
//! });
//! xbee.connect("/dev/ttyUSB0", 57600)?;
//! xbee.send_data("hello", 0x0013_A200_1234_5678, None)?;
//! // ...
//! xbee.stop();
//! ```

pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        ConnectionState, Frame, FrameType, HexFormat, LinkStats, ReceivePacket, SerialXbee,
        TransmitRequest, XbeeConfig, XbeeError,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
