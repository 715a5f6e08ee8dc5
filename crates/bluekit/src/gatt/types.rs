//! Common types for GATT operations

use crate::uuid::Uuid;
use bitflags::bitflags;

bitflags! {
    /// Characteristic properties as defined in the Bluetooth specification.
    ///
    /// Properties tell a client which procedures the characteristic supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
    }
}

impl CharacteristicProperties {
    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn can_write_without_response(&self) -> bool {
        self.contains(Self::WRITE_WITHOUT_RESPONSE)
    }

    pub fn can_notify(&self) -> bool {
        self.contains(Self::NOTIFY)
    }

    pub fn can_indicate(&self) -> bool {
        self.contains(Self::INDICATE)
    }

    /// Whether a client may subscribe to value updates.
    pub fn can_subscribe(&self) -> bool {
        self.intersects(Self::NOTIFY | Self::INDICATE)
    }
}

bitflags! {
    /// Attribute permissions: what the server lets remote peers do with a
    /// characteristic's value, independent of the advertised properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u8 {
        const READABLE = 0x01;
        const WRITEABLE = 0x02;
    }
}

impl Permissions {
    pub fn allows_read(&self) -> bool {
        self.contains(Self::READABLE)
    }

    pub fn allows_write(&self) -> bool {
        self.contains(Self::WRITEABLE)
    }
}

/// A GATT service as seen by a client after discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    /// Service UUID
    pub uuid: Uuid,
    /// Whether this is a primary or secondary service
    pub is_primary: bool,
    /// Declaration handle for this service
    pub start_handle: u16,
    /// Last handle belonging to this service
    pub end_handle: u16,
}

impl Service {
    /// Whether the given attribute handle falls inside this service.
    pub fn contains_handle(&self, handle: u16) -> bool {
        (self.start_handle..=self.end_handle).contains(&handle)
    }
}

/// A GATT characteristic declaration as seen by a client after discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct Characteristic {
    /// Characteristic UUID
    pub uuid: Uuid,
    /// Declaration handle
    pub declaration_handle: u16,
    /// Value handle, the target of read/write/subscribe requests
    pub value_handle: u16,
    /// Characteristic properties
    pub properties: CharacteristicProperties,
}
