//! Attribute request and response types

use super::error::AttErrorCode;
use crate::gatt::types::{Characteristic, Service};
use crate::uuid::Uuid;

/// An acknowledged attribute request, submitted through
/// [`Transport::submit`](crate::transport::Transport::submit). Exactly one
/// [`AttResponse`] comes back per request, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum AttRequest {
    /// Primary/secondary service discovery, optionally filtered by UUID.
    DiscoverServices { filter: Option<Vec<Uuid>> },
    /// Characteristic discovery within a service's handle range.
    DiscoverCharacteristics { start_handle: u16, end_handle: u16 },
    /// Read the value of the attribute at `handle`.
    Read { handle: u16 },
    /// Write `value` to the attribute at `handle`, acknowledged.
    Write { handle: u16, value: Vec<u8> },
    /// Enable or disable value notifications for the characteristic whose
    /// value lives at `handle`.
    Subscribe { handle: u16, enable: bool },
}

/// An unacknowledged attribute command. No response ever comes back.
#[derive(Debug, Clone, PartialEq)]
pub enum AttCommand {
    /// Best-effort write; delivery is neither guaranteed nor reported.
    WriteWithoutResponse { handle: u16, value: Vec<u8> },
}

/// The server's answer to an [`AttRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttResponse {
    /// Services matching a discovery request.
    Services(Vec<Service>),
    /// Characteristic declarations matching a discovery request.
    Characteristics(Vec<Characteristic>),
    /// A read value.
    Value(Vec<u8>),
    /// Acknowledgment of a completed write.
    WriteAck,
    /// Acknowledgment of a subscription change.
    SubscribeAck { handle: u16, enabled: bool },
    /// The request failed with a protocol error code.
    Error(AttErrorCode),
}
