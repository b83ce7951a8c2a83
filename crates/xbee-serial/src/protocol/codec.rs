//! Wire encoding helpers
//!
//! Big-endian byte conversion, hex rendering and the API frame checksum.
//! Only fixed-width unsigned integers, byte slices and strings can be fed
//! through these functions; the traits are sealed so structs and other
//! composite types are rejected at compile time.

use std::borrow::Cow;
use std::fmt::Write;

use byteorder::{BigEndian, ByteOrder};

mod sealed {
    pub trait Sealed {}

    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
    impl Sealed for [u8] {}
    impl Sealed for Vec<u8> {}
    impl Sealed for str {}
    impl Sealed for String {}
}

/// A fixed-width unsigned integer that has a big-endian wire form
pub trait WireScalar: sealed::Sealed + Copy {
    /// Width in bytes on the wire
    const WIDTH: usize;

    /// Append the most-significant-byte-first encoding of `self` to `dst`
    fn write_be(self, dst: &mut Vec<u8>);
}

impl WireScalar for u8 {
    const WIDTH: usize = 1;

    fn write_be(self, dst: &mut Vec<u8>) {
        dst.push(self);
    }
}

macro_rules! wire_scalar {
    ($ty:ty, $width:expr, $write:path) => {
        impl WireScalar for $ty {
            const WIDTH: usize = $width;

            fn write_be(self, dst: &mut Vec<u8>) {
                let mut buf = [0u8; $width];
                $write(&mut buf, self);
                dst.extend_from_slice(&buf);
            }
        }
    };
}

wire_scalar!(u16, 2, BigEndian::write_u16);
wire_scalar!(u32, 4, BigEndian::write_u32);
wire_scalar!(u64, 8, BigEndian::write_u64);

/// A value whose raw bytes can be rendered as hex or summed
pub trait Octets: sealed::Sealed {
    /// The bytes of the value in the order they are read (big-endian for integers)
    fn octets(&self) -> Cow<'_, [u8]>;
}

macro_rules! scalar_octets {
    ($($ty:ty),*) => {
        $(
            impl Octets for $ty {
                fn octets(&self) -> Cow<'_, [u8]> {
                    Cow::Owned(to_wire_bytes(*self))
                }
            }
        )*
    };
}

scalar_octets!(u8, u16, u32, u64);

impl Octets for [u8] {
    fn octets(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl Octets for Vec<u8> {
    fn octets(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_slice())
    }
}

impl Octets for str {
    fn octets(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl Octets for String {
    fn octets(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

/// Encode a fixed-width integer in big-endian (wire) order
pub fn to_wire_bytes<T: WireScalar>(value: T) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(T::WIDTH);
    value.write_be(&mut bytes);
    bytes
}

/// Render a value as uppercase hex octets, most-significant byte first.
///
/// With `separate_octets` a single space goes between octets; with
/// `trailing_separator` one space is appended after the last octet.
pub fn to_hex_text<T: Octets + ?Sized>(
    value: &T,
    separate_octets: bool,
    trailing_separator: bool,
) -> String {
    let bytes = value.octets();
    let mut text = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 && separate_octets {
            text.push(' ');
        }
        // Writing into a String cannot fail
        let _ = write!(text, "{:02X}", byte);
    }
    if trailing_separator {
        text.push(' ');
    }
    text
}

/// Sum the raw bytes of a value, wrapping at 256
pub fn byte_sum<T: Octets + ?Sized>(value: &T) -> u8 {
    value
        .octets()
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// API frame checksum over the frame-type-through-payload bytes
pub fn checksum(bytes: &[u8]) -> u8 {
    0xFF - byte_sum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_bytes_are_big_endian() {
        assert_eq!(to_wire_bytes(0x7Eu8), vec![0x7E]);
        assert_eq!(to_wire_bytes(0x000Fu16), vec![0x00, 0x0F]);
        assert_eq!(to_wire_bytes(0xDEAD_BEEFu32), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(
            to_wire_bytes(0x0013_A200_1234_5678u64),
            vec![0x00, 0x13, 0xA2, 0x00, 0x12, 0x34, 0x56, 0x78]
        );
    }

    #[test]
    fn test_hex_text_spacing() {
        assert_eq!(to_hex_text(&0xFFFEu16, false, false), "FFFE");
        assert_eq!(to_hex_text(&0xFFFEu16, true, false), "FF FE");
        assert_eq!(to_hex_text(&0xFFFEu16, true, true), "FF FE ");
        assert_eq!(to_hex_text(&0xFFFEu16, false, true), "FFFE ");
        assert_eq!(to_hex_text(&0x0Au8, true, false), "0A");
    }

    #[test]
    fn test_hex_text_strings_and_slices() {
        assert_eq!(to_hex_text("hi", true, false), "68 69");
        assert_eq!(to_hex_text(&b"\x00\x7e"[..], false, false), "007E");
        assert_eq!(to_hex_text("", true, true), " ");
    }

    #[test]
    fn test_byte_sum_wraps() {
        assert_eq!(byte_sum(&0x0102u16), 3);
        assert_eq!(byte_sum(&0xFFFF_FFFF_FFFF_FFFFu64), 0xF8);
        assert_eq!(byte_sum("hi"), 0xD1);
        assert_eq!(byte_sum(&[0x80u8, 0x80, 0x01][..]), 0x01);
    }

    #[test]
    fn test_checksum() {
        // Known-good Transmit Request body (frame type through payload)
        let body = [
            0x10, 0x01, 0x00, 0x13, 0xA2, 0x00, 0x40, 0x0A, 0x01, 0x27, 0xFF, 0xFE, 0x00, 0x00,
            0x54, 0x78, 0x44, 0x61, 0x74, 0x61, 0x30, 0x41,
        ];
        assert_eq!(checksum(&body), 0x13);
        assert_eq!(checksum(&[]), 0xFF);
    }
}
