//! API frame encoding/decoding
//!
//! Frames modeled here:
//! - 0x90 Receive Packet: data received by the local radio
//! - 0x10 Transmit Request: data the local radio should send
//!
//! Frame layout (API mode 1, no escaping):
//! - 1 byte: start delimiter (0x7E)
//! - 2 bytes: length (big-endian), frame type through last payload byte
//! - 1 byte: frame type
//! - N bytes: frame-specific fields, then payload
//! - 1 byte: checksum = 0xFF - (sum of frame type..payload & 0xFF)

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use super::codec::{checksum, to_hex_text, to_wire_bytes};
use super::{Result, XbeeError, MAX_PAYLOAD_SIZE, START_DELIMITER};

/// Well-known 64-bit and 16-bit addresses
pub mod address {
    /// 64-bit address of the network coordinator
    pub const COORDINATOR_64: u64 = 0x0000_0000_0000_0000;
    /// 64-bit broadcast address
    pub const BROADCAST_64: u64 = 0x0000_0000_0000_FFFF;
    /// 64-bit address reported when the sender is unknown
    pub const UNKNOWN_64: u64 = 0xFFFF_FFFF_FFFF_FFFF;
    /// 16-bit network address meaning "unknown / use the 64-bit address"
    pub const UNKNOWN_16: u16 = 0xFFFE;
}

/// Frame type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Outgoing data (0x10)
    TransmitRequest = 0x10,
    /// Incoming data (0x90)
    ReceivePacket = 0x90,
}

impl FrameType {
    /// Bytes from the frame type through the last fixed field (payload excluded)
    pub const fn fixed_len(self) -> usize {
        match self {
            // type + frame id + mac64 + mac16 + radius + options
            FrameType::TransmitRequest => 1 + 1 + 8 + 2 + 1 + 1,
            // type + mac64 + mac16 + options
            FrameType::ReceivePacket => 1 + 8 + 2 + 1,
        }
    }

    /// Largest `length` field any modeled frame can carry
    pub const fn max_length() -> usize {
        FrameType::TransmitRequest.fixed_len() + MAX_PAYLOAD_SIZE
    }
}

impl From<FrameType> for u8 {
    fn from(frame_type: FrameType) -> Self {
        frame_type as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = XbeeError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x10 => Ok(FrameType::TransmitRequest),
            0x90 => Ok(FrameType::ReceivePacket),
            other => Err(XbeeError::UnknownFrameType(other)),
        }
    }
}

/// Separator placement for hex renderings of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HexFormat {
    /// `7E001010...58`
    #[default]
    NoSpacing,
    /// One separator between fields, payload octets kept together:
    /// `7E 0010 10 00 0013A20012345678 FFFE 00 00 6869 58`
    FieldSpacing,
    /// One separator between every octet: `7E 00 10 10 ... 69 58`
    ByteSpacing,
}

/// Field layout shared by both frame variants
trait Layout {
    const FRAME_TYPE: FrameType;

    /// Fixed fields following the frame type, in wire order
    fn fields(&self) -> Vec<Vec<u8>>;

    fn payload(&self) -> &[u8];

    fn length(&self) -> u16;

    fn checksum(&self) -> u8;

    /// Frame type through last payload byte
    fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(Self::FRAME_TYPE.fixed_len() + self.payload().len());
        body.push(Self::FRAME_TYPE as u8);
        for field in self.fields() {
            body.extend_from_slice(&field);
        }
        body.extend_from_slice(self.payload());
        body
    }

    fn computed_length(&self) -> u16 {
        // Payloads are capped at MAX_PAYLOAD_SIZE so this always fits
        (Self::FRAME_TYPE.fixed_len() + self.payload().len()) as u16
    }

    fn computed_checksum(&self) -> u8 {
        checksum(&self.body())
    }

    fn serialize(&self) -> Vec<u8> {
        let body = self.body();
        let mut bytes = Vec::with_capacity(body.len() + 4);
        bytes.push(START_DELIMITER);
        bytes.extend_from_slice(&to_wire_bytes(self.length()));
        bytes.extend_from_slice(&body);
        bytes.push(self.checksum());
        bytes
    }

    fn hex_string(&self, spacing: HexFormat) -> String {
        match spacing {
            HexFormat::NoSpacing => to_hex_text(&self.serialize(), false, false),
            HexFormat::ByteSpacing => to_hex_text(&self.serialize(), true, false),
            HexFormat::FieldSpacing => {
                let mut groups = vec![
                    to_hex_text(&START_DELIMITER, false, false),
                    to_hex_text(&self.length(), false, false),
                    to_hex_text(&(Self::FRAME_TYPE as u8), false, false),
                ];
                groups.extend(self.fields().iter().map(|f| to_hex_text(f, false, false)));
                if !self.payload().is_empty() {
                    groups.push(to_hex_text(self.payload(), false, false));
                }
                groups.push(to_hex_text(&self.checksum(), false, false));
                groups.join(" ")
            }
        }
    }
}

fn check_payload(data: &[u8]) -> Result<()> {
    if data.len() > MAX_PAYLOAD_SIZE {
        return Err(XbeeError::PayloadTooLarge {
            size: data.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

/// Receive Packet (0x90): data delivered by a remote radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivePacket {
    source_mac_64: u64,
    source_mac_16: u16,
    /// Receive options (unused)
    options: u8,
    data: Vec<u8>,
    length: u16,
    checksum: u8,
}

impl Layout for ReceivePacket {
    const FRAME_TYPE: FrameType = FrameType::ReceivePacket;

    fn fields(&self) -> Vec<Vec<u8>> {
        vec![
            to_wire_bytes(self.source_mac_64),
            to_wire_bytes(self.source_mac_16),
            to_wire_bytes(self.options),
        ]
    }

    fn payload(&self) -> &[u8] {
        &self.data
    }

    fn length(&self) -> u16 {
        self.length
    }

    fn checksum(&self) -> u8 {
        self.checksum
    }
}

impl Default for ReceivePacket {
    fn default() -> Self {
        Self::with_addresses(address::UNKNOWN_64, address::UNKNOWN_16)
    }
}

impl ReceivePacket {
    /// Create an empty packet from an unknown sender
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty packet from the given 64-bit address
    pub fn with_mac_64(source_mac_64: u64) -> Self {
        Self::with_addresses(source_mac_64, address::UNKNOWN_16)
    }

    /// Create an empty packet from the given 64-bit and 16-bit addresses
    pub fn with_addresses(source_mac_64: u64, source_mac_16: u16) -> Self {
        let mut packet = Self {
            source_mac_64,
            source_mac_16,
            options: 0,
            data: Vec::new(),
            length: 0,
            checksum: 0,
        };
        packet.refresh();
        packet
    }

    /// Create a packet with every field given
    pub fn from_parts(
        source_mac_64: u64,
        source_mac_16: u16,
        options: u8,
        data: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        let data = data.into();
        check_payload(&data)?;
        let mut packet = Self {
            source_mac_64,
            source_mac_16,
            options,
            data,
            length: 0,
            checksum: 0,
        };
        packet.refresh();
        Ok(packet)
    }

    fn refresh(&mut self) {
        self.length = self.computed_length();
        self.checksum = self.computed_checksum();
    }

    /// Frame type (always [`FrameType::ReceivePacket`])
    pub fn frame_type(&self) -> FrameType {
        Self::FRAME_TYPE
    }

    /// 64-bit address of the sender
    pub fn source_mac_64(&self) -> u64 {
        self.source_mac_64
    }

    /// 16-bit network address of the sender
    pub fn source_mac_16(&self) -> u16 {
        self.source_mac_16
    }

    /// Receive options byte
    pub fn options(&self) -> u8 {
        self.options
    }

    /// Received payload
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Received payload as text, invalid UTF-8 replaced
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Length field (frame type through last payload byte)
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Checksum byte
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Encode the full frame, delimiter through checksum
    pub fn serialize(&self) -> Vec<u8> {
        Layout::serialize(self)
    }

    /// Render the full frame as hex
    pub fn to_hex_string(&self, spacing: HexFormat) -> String {
        self.hex_string(spacing)
    }
}

/// Transmit Request (0x10): data for the local radio to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitRequest {
    /// Non-zero ids ask the radio for a Transmit Status; not tracked here
    frame_id: u8,
    target_mac_64: u64,
    target_mac_16: u16,
    /// Maximum hops for broadcasts, 0 = network maximum
    broadcast_radius: u8,
    /// Transmit options (unused)
    options: u8,
    data: Vec<u8>,
    length: u16,
    checksum: u8,
}

impl Layout for TransmitRequest {
    const FRAME_TYPE: FrameType = FrameType::TransmitRequest;

    fn fields(&self) -> Vec<Vec<u8>> {
        vec![
            to_wire_bytes(self.frame_id),
            to_wire_bytes(self.target_mac_64),
            to_wire_bytes(self.target_mac_16),
            to_wire_bytes(self.broadcast_radius),
            to_wire_bytes(self.options),
        ]
    }

    fn payload(&self) -> &[u8] {
        &self.data
    }

    fn length(&self) -> u16 {
        self.length
    }

    fn checksum(&self) -> u8 {
        self.checksum
    }
}

impl Default for TransmitRequest {
    fn default() -> Self {
        Self::with_addresses(address::BROADCAST_64, address::UNKNOWN_16)
    }
}

impl TransmitRequest {
    /// Create an empty broadcast request
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty request addressed by 64-bit address
    pub fn with_mac_64(target_mac_64: u64) -> Self {
        Self::with_addresses(target_mac_64, address::UNKNOWN_16)
    }

    /// Create an empty request addressed by 64-bit and 16-bit addresses
    pub fn with_addresses(target_mac_64: u64, target_mac_16: u16) -> Self {
        let mut request = Self {
            frame_id: 0,
            target_mac_64,
            target_mac_16,
            broadcast_radius: 0,
            options: 0,
            data: Vec::new(),
            length: 0,
            checksum: 0,
        };
        request.refresh();
        request
    }

    fn refresh(&mut self) {
        self.length = self.computed_length();
        self.checksum = self.computed_checksum();
    }

    /// Replace the payload.
    ///
    /// Fails with [`XbeeError::PayloadTooLarge`] and leaves the request
    /// untouched if `data` exceeds [`MAX_PAYLOAD_SIZE`].
    pub fn set_data(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let data = data.as_ref();
        check_payload(data)?;
        self.data = data.to_vec();
        self.refresh();
        Ok(())
    }

    /// Set the frame id
    pub fn set_frame_id(&mut self, frame_id: u8) {
        self.frame_id = frame_id;
        self.refresh();
    }

    /// Set the broadcast radius
    pub fn set_broadcast_radius(&mut self, radius: u8) {
        self.broadcast_radius = radius;
        self.refresh();
    }

    /// Set the transmit options byte
    pub fn set_options(&mut self, options: u8) {
        self.options = options;
        self.refresh();
    }

    /// Frame type (always [`FrameType::TransmitRequest`])
    pub fn frame_type(&self) -> FrameType {
        Self::FRAME_TYPE
    }

    /// Frame id
    pub fn frame_id(&self) -> u8 {
        self.frame_id
    }

    /// 64-bit destination address
    pub fn target_mac_64(&self) -> u64 {
        self.target_mac_64
    }

    /// 16-bit destination network address
    pub fn target_mac_16(&self) -> u16 {
        self.target_mac_16
    }

    /// Broadcast radius
    pub fn broadcast_radius(&self) -> u8 {
        self.broadcast_radius
    }

    /// Transmit options byte
    pub fn options(&self) -> u8 {
        self.options
    }

    /// Payload to send
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length field (frame type through last payload byte)
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Checksum byte
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Encode the full frame, delimiter through checksum
    pub fn serialize(&self) -> Vec<u8> {
        Layout::serialize(self)
    }

    /// Render the full frame as hex
    pub fn to_hex_string(&self, spacing: HexFormat) -> String {
        self.hex_string(spacing)
    }
}

/// Any modeled API frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Receive Packet (0x90)
    Receive(ReceivePacket),
    /// Transmit Request (0x10)
    Transmit(TransmitRequest),
}

impl Frame {
    /// Decode a frame body.
    ///
    /// `body` holds everything after the frame type byte: the fixed fields,
    /// the payload and the trailing checksum. The checksum is verified.
    pub fn decode(frame_type: u8, body: &[u8]) -> Result<Frame> {
        let frame_type = FrameType::try_from(frame_type)?;

        // Fixed fields after the type byte, plus the checksum
        let min_len = frame_type.fixed_len();
        if body.len() < min_len {
            return Err(XbeeError::Truncated {
                expected: min_len,
                actual: body.len(),
            });
        }

        let (content, trailer) = body.split_at(body.len() - 1);
        let received_checksum = trailer[0];
        let data = &content[frame_type.fixed_len() - 1..];
        // `body` spans exactly `length` bytes
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(XbeeError::InvalidLength { length: body.len() });
        }

        let frame = match frame_type {
            FrameType::ReceivePacket => Frame::Receive(ReceivePacket::from_parts(
                BigEndian::read_u64(&content[0..8]),
                BigEndian::read_u16(&content[8..10]),
                content[10],
                data,
            )?),
            FrameType::TransmitRequest => {
                let mut request = TransmitRequest {
                    frame_id: content[0],
                    target_mac_64: BigEndian::read_u64(&content[1..9]),
                    target_mac_16: BigEndian::read_u16(&content[9..11]),
                    broadcast_radius: content[11],
                    options: content[12],
                    data: data.to_vec(),
                    length: 0,
                    checksum: 0,
                };
                request.refresh();
                Frame::Transmit(request)
            }
        };

        if frame.checksum() != received_checksum {
            return Err(XbeeError::ChecksumMismatch {
                expected: frame.checksum(),
                actual: received_checksum,
            });
        }

        Ok(frame)
    }

    /// Decode exactly one complete frame, delimiter through checksum
    pub fn from_bytes(bytes: &[u8]) -> Result<Frame> {
        if bytes.len() < 4 {
            return Err(XbeeError::Truncated {
                expected: 4,
                actual: bytes.len(),
            });
        }

        if bytes[0] != START_DELIMITER {
            return Err(XbeeError::MissingDelimiter);
        }

        let length = BigEndian::read_u16(&bytes[1..3]) as usize;
        if length == 0 {
            return Err(XbeeError::InvalidLength { length });
        }

        // delimiter + length + (type..payload) + checksum
        let total = 3 + length + 1;
        if bytes.len() < total {
            return Err(XbeeError::Truncated {
                expected: total,
                actual: bytes.len(),
            });
        }
        if bytes.len() > total {
            return Err(XbeeError::InvalidLength { length });
        }

        Frame::decode(bytes[3], &bytes[4..total])
    }

    /// Frame type discriminator
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Receive(_) => FrameType::ReceivePacket,
            Frame::Transmit(_) => FrameType::TransmitRequest,
        }
    }

    /// Length field
    pub fn length(&self) -> u16 {
        match self {
            Frame::Receive(packet) => packet.length(),
            Frame::Transmit(request) => request.length(),
        }
    }

    /// Checksum byte
    pub fn checksum(&self) -> u8 {
        match self {
            Frame::Receive(packet) => packet.checksum(),
            Frame::Transmit(request) => request.checksum(),
        }
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        match self {
            Frame::Receive(packet) => packet.data(),
            Frame::Transmit(request) => request.data(),
        }
    }

    /// Encode the full frame, delimiter through checksum
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Frame::Receive(packet) => packet.serialize(),
            Frame::Transmit(request) => request.serialize(),
        }
    }

    /// Render the full frame as hex
    pub fn to_hex_string(&self, spacing: HexFormat) -> String {
        match self {
            Frame::Receive(packet) => packet.to_hex_string(spacing),
            Frame::Transmit(request) => request.to_hex_string(spacing),
        }
    }
}

impl From<ReceivePacket> for Frame {
    fn from(packet: ReceivePacket) -> Self {
        Frame::Receive(packet)
    }
}

impl From<TransmitRequest> for Frame {
    fn from(request: TransmitRequest) -> Self {
        Frame::Transmit(request)
    }
}

impl fmt::Display for ReceivePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_string(HexFormat::ByteSpacing))
    }
}

impl fmt::Display for TransmitRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_string(HexFormat::ByteSpacing))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_string(HexFormat::ByteSpacing))
    }
}
