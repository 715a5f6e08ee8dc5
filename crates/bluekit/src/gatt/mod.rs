//! GATT (Generic Attribute Profile) implementation
//!
//! This module provides the client and server halves of the GATT data model:
//! discovery, read/write/subscribe procedures on the client side, and a
//! published service table with subscription fan-out on the server side.

pub mod client;
pub mod server;
pub mod types;

#[cfg(test)]
mod tests;

pub use client::{ClientEvent, ClientState, GattClient, GattError};
pub use server::{
    GattCharacteristic, GattServer, GattService, ServerError, ServerEvent, SubscriptionRegistry,
};
pub use types::{Characteristic, CharacteristicProperties, Permissions, Service};
