//! BlueKit - a transport-agnostic Bluetooth Low Energy GATT core
//!
//! This library implements the central and peripheral halves of the GATT
//! protocol as explicit state machines over an abstract radio transport.
//! The central role scans, connects, and drives discovery and
//! read/write/subscribe procedures; the peripheral role publishes a
//! validated service table, serves inbound attribute requests, and pushes
//! value updates to subscribers. All radio work happens behind the
//! [`Transport`] trait; completions flow back into the state machines from
//! the transport-delivery context and surface as discriminated events.

pub mod att;
pub mod error;
pub mod gatt;
pub mod scan;
pub mod transport;
pub mod uuid;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export common types for convenience
pub use att::{AttCommand, AttErrorCode, AttRequest, AttResponse};
pub use error::TransportError;
pub use gatt::{
    Characteristic, CharacteristicProperties, ClientEvent, ClientState, GattCharacteristic,
    GattClient, GattError, GattServer, GattService, Permissions, ServerError, ServerEvent, Service,
};
pub use scan::{CentralEvent, Peripheral, PeripheralState, ScanCoordinator, ScanError, ScanOptions};
pub use transport::{Advertisement, PeerId, Transport};
pub use uuid::Uuid;
