use rand::RngCore;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// A 128-bit Bluetooth UUID.
///
/// SIG-assigned 16-bit shorthand values expand over the Bluetooth base UUID.
/// Internally the UUID is always stored as a full 128-bit value in
/// little-endian byte order; the text form is the canonical hyphenated
/// 8-4-4-4-12 representation, compared case-insensitively.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct Uuid {
    bytes: [u8; 16],
}

/// The Bluetooth base UUID "00000000-0000-1000-8000-00805F9B34FB",
/// little-endian.
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset within the base UUID where the 16-bit shorthand value lives.
const BASE_OFFSET: usize = 12;

impl Uuid {
    /// Creates a UUID directly from 16 bytes in little-endian order.
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid { bytes }
    }

    /// Creates a UUID directly from 16 bytes in big-endian (textual) order.
    pub fn from_bytes_be(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid { bytes }
    }

    /// Expands a 16-bit SIG-assigned value over the base UUID.
    pub const fn from_u16(uuid16: u16) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid16 as u8;
        bytes[BASE_OFFSET + 1] = (uuid16 >> 8) as u8;
        Uuid { bytes }
    }

    /// Tries to create a UUID from a little-endian byte slice.
    ///
    /// Accepts slices of length 2 (16-bit shorthand) or 16 (full UUID).
    pub fn try_from_slice_le(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::from_u16(u16::from_le_bytes([slice[0], slice[1]]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::from_bytes_le(bytes))
            }
            _ => None,
        }
    }

    /// Generates a random (version 4) UUID.
    pub fn new_v4() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);

        // Version 4, RFC 4122 variant, applied in big-endian positions.
        bytes[6] = (bytes[6] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;

        Uuid::from_bytes_be(bytes)
    }

    /// Returns the underlying 16 bytes in little-endian order.
    pub const fn as_bytes_le(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Returns the underlying 16 bytes in big-endian (textual) order.
    pub fn as_bytes_be(&self) -> [u8; 16] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }

    /// Whether the UUID is derived from the Bluetooth base UUID.
    fn is_sig_assigned(&self) -> bool {
        self.bytes[0..BASE_OFFSET] == BASE_UUID_BYTES[0..BASE_OFFSET]
    }

    /// The 16-bit shorthand value, if this UUID is SIG-assigned.
    pub fn as_u16(&self) -> Option<u16> {
        if self.is_sig_assigned()
            && self.bytes[BASE_OFFSET + 2] == 0
            && self.bytes[BASE_OFFSET + 3] == 0
        {
            Some(u16::from_le_bytes([
                self.bytes[BASE_OFFSET],
                self.bytes[BASE_OFFSET + 1],
            ]))
        } else {
            None
        }
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl From<[u8; 16]> for Uuid {
    /// Assumes little-endian byte order.
    fn from(bytes: [u8; 16]) -> Self {
        Uuid::from_bytes_le(bytes)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl Hash for Uuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.as_bytes_be();
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(uuid16) = self.as_u16() {
            write!(f, "Uuid(0x{:04X})", uuid16)
        } else {
            fmt::Display::fmt(self, f)
        }
    }
}

/// Errors produced when parsing a UUID from text.
#[derive(Debug, Error, PartialEq)]
pub enum UuidParseError {
    #[error("UUID string has an invalid length")]
    InvalidLength,

    #[error("UUID string contains invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Parses the canonical hyphenated form or a 4-digit SIG shorthand.
    /// Hex digits are accepted in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != '-').collect();

        match cleaned.len() {
            4 => {
                let mut bytes = [0u8; 2];
                hex::decode_to_slice(&cleaned, &mut bytes)?;
                Ok(Uuid::from_u16(u16::from_be_bytes(bytes)))
            }
            32 => {
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes)?;
                Ok(Uuid::from_bytes_be(bytes))
            }
            _ => Err(UuidParseError::InvalidLength),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sig_shorthand_round_trip() {
        let uuid = Uuid::from_u16(0x180A);
        assert_eq!(uuid.as_u16(), Some(0x180A));
        assert_eq!(uuid, 0x180Au16);
        assert_eq!(uuid.to_string(), "0000180a-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn parse_canonical_form() {
        let uuid: Uuid = "F38EEBFE-BC74-42A5-B874-59E53AA6A097".parse().unwrap();
        assert_eq!(uuid.to_string(), "f38eebfe-bc74-42a5-b874-59e53aa6a097");
        assert_eq!(uuid.as_u16(), None);
    }

    #[test]
    fn parse_is_case_insensitive() {
        let upper: Uuid = "548CCB32-92EC-4DEA-9B72-B7A563A1A06E".parse().unwrap();
        let lower: Uuid = "548ccb32-92ec-4dea-9b72-b7a563a1a06e".parse().unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn parse_shorthand() {
        let uuid: Uuid = "180a".parse().unwrap();
        assert_eq!(uuid, Uuid::from_u16(0x180A));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            "180".parse::<Uuid>().unwrap_err(),
            UuidParseError::InvalidLength
        );
        assert!("zzzzzzzz-0000-1000-8000-00805f9b34fb"
            .parse::<Uuid>()
            .is_err());
    }

    #[test]
    fn slice_conversions() {
        let uuid = Uuid::from_u16(0x2A00);
        assert_eq!(
            Uuid::try_from_slice_le(&uuid.as_bytes_le()[..]),
            Some(uuid)
        );
        assert_eq!(Uuid::try_from_slice_le(&[0x00, 0x2A]), Some(uuid));
        assert_eq!(Uuid::try_from_slice_le(&[0x00]), None);
    }

    #[test]
    fn random_uuids_are_distinct() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(a, b);
        assert_eq!(a.as_u16(), None);
    }
}
