//! Abstract radio transport
//!
//! The core never touches radio hardware. All scanning, connection, and
//! attribute traffic goes through the [`Transport`] trait, implemented by the
//! embedding platform. A single transport instance stands for the single
//! logical radio in the process and is expected to serialize radio work
//! internally; the protocol state machines submit one operation at a time and
//! complete them in submission order.

use crate::att::{AttCommand, AttRequest};
use crate::error::TransportError;
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Cursor;

/// Identity of a remote peer: a 6-byte radio address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId {
    bytes: [u8; 6],
}

impl PeerId {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() == 6 {
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(slice);
            Some(Self { bytes })
        } else {
            None
        }
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.bytes
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

// AD structure types used in advertising payloads.
const AD_TYPE_INCOMPLETE_16BIT_UUIDS: u8 = 0x02;
const AD_TYPE_COMPLETE_16BIT_UUIDS: u8 = 0x03;
const AD_TYPE_INCOMPLETE_128BIT_UUIDS: u8 = 0x06;
const AD_TYPE_COMPLETE_128BIT_UUIDS: u8 = 0x07;
const AD_TYPE_SHORTENED_LOCAL_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// Advertising payload: the advertised service UUIDs plus an optional local
/// name. This is the unit a peripheral broadcasts and a central receives on
/// each advertisement report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advertisement {
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
}

impl Advertisement {
    pub fn new(local_name: Option<String>, service_uuids: Vec<Uuid>) -> Self {
        Self {
            local_name,
            service_uuids,
        }
    }

    /// Whether any advertised service matches the given UUID set.
    pub fn advertises_any_of(&self, uuids: &[Uuid]) -> bool {
        self.service_uuids.iter().any(|u| uuids.contains(u))
    }

    /// Encodes the payload as standard length-type-value AD structures.
    ///
    /// SIG-assigned UUIDs go into a complete 16-bit list, the rest into a
    /// complete 128-bit list, and the local name (if any) into a complete
    /// local name structure.
    pub fn encode(&self) -> Vec<u8> {
        let mut uuid16: Vec<u8> = Vec::new();
        let mut uuid128: Vec<u8> = Vec::new();

        for uuid in &self.service_uuids {
            if let Some(short) = uuid.as_u16() {
                // Infallible: writing into a Vec.
                let _ = uuid16.write_u16::<LittleEndian>(short);
            } else {
                uuid128.extend_from_slice(uuid.as_bytes_le());
            }
        }

        let mut out = Vec::new();
        if !uuid16.is_empty() {
            out.push((uuid16.len() + 1) as u8);
            out.push(AD_TYPE_COMPLETE_16BIT_UUIDS);
            out.extend_from_slice(&uuid16);
        }
        if !uuid128.is_empty() {
            out.push((uuid128.len() + 1) as u8);
            out.push(AD_TYPE_COMPLETE_128BIT_UUIDS);
            out.extend_from_slice(&uuid128);
        }
        if let Some(name) = &self.local_name {
            let bytes = name.as_bytes();
            out.push((bytes.len() + 1) as u8);
            out.push(AD_TYPE_COMPLETE_LOCAL_NAME);
            out.extend_from_slice(bytes);
        }
        out
    }

    /// Parses AD structures from a raw advertising payload.
    ///
    /// Unknown AD types are skipped; parsing stops at the first malformed
    /// length octet, keeping whatever was decoded up to that point. This is
    /// the usual tolerance for over-the-air payloads.
    pub fn parse(data: &[u8]) -> Self {
        let mut adv = Advertisement::default();
        let mut i = 0;

        while i < data.len() {
            let length = data[i] as usize;
            if length == 0 || i + length >= data.len() {
                break;
            }

            let ad_type = data[i + 1];
            let ad_data = &data[i + 2..i + 1 + length];

            match ad_type {
                AD_TYPE_INCOMPLETE_16BIT_UUIDS | AD_TYPE_COMPLETE_16BIT_UUIDS => {
                    let mut cursor = Cursor::new(ad_data);
                    while let Ok(short) = cursor.read_u16::<LittleEndian>() {
                        adv.service_uuids.push(Uuid::from_u16(short));
                    }
                }
                AD_TYPE_INCOMPLETE_128BIT_UUIDS | AD_TYPE_COMPLETE_128BIT_UUIDS => {
                    for chunk in ad_data.chunks_exact(16) {
                        if let Some(uuid) = Uuid::try_from_slice_le(chunk) {
                            adv.service_uuids.push(uuid);
                        }
                    }
                }
                AD_TYPE_SHORTENED_LOCAL_NAME | AD_TYPE_COMPLETE_LOCAL_NAME => {
                    adv.local_name = String::from_utf8(ad_data.to_vec()).ok();
                }
                _ => {}
            }

            i += 1 + length;
        }

        adv
    }
}

/// The abstract radio.
///
/// Implementations own the physical scanning, link establishment, and ATT
/// exchange. Completions are delivered back into the core by calling the
/// matching `handle_*` method on [`ScanCoordinator`](crate::scan::ScanCoordinator),
/// [`GattClient`](crate::gatt::GattClient), or
/// [`GattServer`](crate::gatt::GattServer) from the transport's delivery
/// context.
pub trait Transport: Send + Sync {
    /// Begins scanning, optionally restricted to peers advertising one of
    /// the given service UUIDs.
    fn start_scan(&self, filter: Option<&[Uuid]>) -> Result<(), TransportError>;

    /// Stops scanning. Idempotent.
    fn stop_scan(&self);

    /// Initiates a connection to a peer. Completion is reported through
    /// [`ScanCoordinator::handle_connect_result`](crate::scan::ScanCoordinator::handle_connect_result).
    fn connect(&self, peer: PeerId) -> Result<(), TransportError>;

    /// Tears down a connection. Idempotent.
    fn disconnect(&self, peer: PeerId);

    /// Submits an acknowledged attribute request. The response is delivered
    /// through [`GattClient::handle_response`](crate::gatt::GattClient::handle_response)
    /// in submission order.
    fn submit(&self, peer: PeerId, request: AttRequest) -> Result<(), TransportError>;

    /// Sends an unacknowledged attribute command. Fire-and-forget: delivery
    /// is neither guaranteed nor reported.
    fn send_command(&self, peer: PeerId, command: AttCommand) -> Result<(), TransportError>;

    /// Begins advertising the given payload (peripheral role).
    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), TransportError>;

    /// Stops advertising. Idempotent.
    fn stop_advertising(&self);

    /// Pushes a new characteristic value to a subscribed peer.
    fn notify(&self, peer: PeerId, value_handle: u16, value: &[u8]) -> Result<(), TransportError>;
}
