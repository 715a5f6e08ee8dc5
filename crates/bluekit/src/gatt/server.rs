//! GATT Server implementation
//!
//! The server role: a static service/characteristic table registered by the
//! application, frozen by [`GattServer::publish`], and served to remote
//! centrals from the transport-delivery context. Value pushes to subscribers
//! go out through [`GattServer::update_value`], the only server-initiated
//! value path.

use crate::att::{AttCommand, AttErrorCode, AttRequest, AttResponse, ATT_HANDLE_MIN};
use crate::error::TransportError;
use crate::gatt::types::{Characteristic, CharacteristicProperties, Permissions, Service};
use crate::transport::{Advertisement, PeerId, Transport};
use crate::uuid::Uuid;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

/// Error types specific to the server role
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("service table is already published")]
    AlreadyPublished,

    #[error("service table has not been published")]
    NotPublished,

    #[error("invalid characteristic: {0}")]
    InvalidCharacteristic(String),

    #[error("duplicate service UUID {0}")]
    DuplicateService(Uuid),

    #[error("no published characteristic with UUID {0}")]
    CharacteristicNotFound(Uuid),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// A characteristic definition for registration.
///
/// A readable characteristic must carry its initial value; a write-only
/// characteristic must not. Both rules are enforced when the table is
/// published.
#[derive(Debug, Clone)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub permissions: Permissions,
    pub value: Option<Vec<u8>>,
}

impl GattCharacteristic {
    pub fn new(
        uuid: Uuid,
        properties: CharacteristicProperties,
        permissions: Permissions,
        value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            uuid,
            properties,
            permissions,
            value,
        }
    }

    /// A plain readable characteristic with an initial value.
    pub fn readable(uuid: Uuid, value: Vec<u8>) -> Self {
        Self::new(
            uuid,
            CharacteristicProperties::READ,
            Permissions::READABLE,
            Some(value),
        )
    }

    /// A write-only characteristic. The value stays absent until a peer
    /// writes it.
    pub fn writeable(uuid: Uuid) -> Self {
        Self::new(
            uuid,
            CharacteristicProperties::WRITE,
            Permissions::WRITEABLE,
            None,
        )
    }

    fn is_readable(&self) -> bool {
        self.properties.can_read() || self.permissions.allows_read()
    }

    fn is_writeable(&self) -> bool {
        self.properties.can_write()
            || self.properties.can_write_without_response()
            || self.permissions.allows_write()
    }
}

/// A service definition for registration.
#[derive(Debug, Clone)]
pub struct GattService {
    pub uuid: Uuid,
    pub is_primary: bool,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn new(uuid: Uuid, is_primary: bool) -> Self {
        Self {
            uuid,
            is_primary,
            characteristics: Vec::new(),
        }
    }

    pub fn add_characteristic(&mut self, characteristic: GattCharacteristic) -> &mut Self {
        self.characteristics.push(characteristic);
        self
    }
}

/// A published characteristic with its assigned handles.
#[derive(Debug)]
struct PublishedCharacteristic {
    uuid: Uuid,
    properties: CharacteristicProperties,
    permissions: Permissions,
    declaration_handle: u16,
    value_handle: u16,
    value: Option<Vec<u8>>,
}

/// A published service with its assigned handle range.
#[derive(Debug)]
struct PublishedService {
    uuid: Uuid,
    is_primary: bool,
    start_handle: u16,
    end_handle: u16,
}

/// Events the server produces for the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A remote peer wrote a new value to a characteristic.
    WriteReceived {
        peer: PeerId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// A remote peer subscribed to or unsubscribed from a characteristic.
    SubscriptionChanged {
        peer: PeerId,
        characteristic: Uuid,
        subscribed: bool,
    },
}

/// Which peers are subscribed to which characteristic value handles.
///
/// Mutated only from the transport-delivery context (subscribe/unsubscribe
/// requests and peer disconnects); iterated during value fan-out.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashSet<(PeerId, u16)>>,
}

impl SubscriptionRegistry {
    /// Records a subscription change. Returns whether the registry changed.
    fn set(&self, peer: PeerId, value_handle: u16, subscribed: bool) -> bool {
        let mut entries = self.entries.write().unwrap();
        if subscribed {
            entries.insert((peer, value_handle))
        } else {
            entries.remove(&(peer, value_handle))
        }
    }

    fn drop_peer(&self, peer: PeerId) {
        self.entries.write().unwrap().retain(|(p, _)| *p != peer);
    }

    pub fn is_subscribed(&self, peer: PeerId, value_handle: u16) -> bool {
        self.entries.read().unwrap().contains(&(peer, value_handle))
    }

    /// All peers currently subscribed to the given value handle.
    pub fn subscribers_of(&self, value_handle: u16) -> Vec<PeerId> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|(_, h)| *h == value_handle)
            .map(|(p, _)| *p)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

/// A GATT server
pub struct GattServer {
    /// Radio transport, used for advertising and value pushes
    transport: Arc<dyn Transport>,
    /// Services registered but not yet published
    pending: RwLock<Vec<GattService>>,
    /// Whether the table has been frozen by `publish`
    published: RwLock<bool>,
    /// Published services in registration order
    services: RwLock<Vec<PublishedService>>,
    /// Published characteristics keyed by value handle
    characteristics: RwLock<BTreeMap<u16, PublishedCharacteristic>>,
    /// Remote subscriptions
    subscriptions: SubscriptionRegistry,
    /// Whether advertising is active
    advertising: RwLock<bool>,
    /// Events awaiting the application
    events: Mutex<VecDeque<ServerEvent>>,
}

impl GattServer {
    /// Create a new GATT server on the given transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: RwLock::new(Vec::new()),
            published: RwLock::new(false),
            services: RwLock::new(Vec::new()),
            characteristics: RwLock::new(BTreeMap::new()),
            subscriptions: SubscriptionRegistry::default(),
            advertising: RwLock::new(false),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Add a service to the pending table.
    ///
    /// Duplicate UUIDs are accepted here; `publish` rejects them.
    pub fn register_service(&self, service: GattService) -> Result<(), ServerError> {
        if *self.published.read().unwrap() {
            return Err(ServerError::AlreadyPublished);
        }

        debug!(
            "registering service {} with {} characteristic(s)",
            service.uuid,
            service.characteristics.len()
        );
        self.pending.write().unwrap().push(service);
        Ok(())
    }

    /// Validate the pending table, assign attribute handles, and freeze it.
    ///
    /// On any validation failure nothing is published and the pending table
    /// is left untouched for correction.
    pub fn publish(&self) -> Result<(), ServerError> {
        let mut published = self.published.write().unwrap();
        if *published {
            return Err(ServerError::AlreadyPublished);
        }

        let pending = self.pending.read().unwrap();

        let mut seen = HashSet::new();
        for service in pending.iter() {
            if !seen.insert(service.uuid) {
                return Err(ServerError::DuplicateService(service.uuid));
            }

            for characteristic in &service.characteristics {
                if characteristic.is_readable() && characteristic.value.is_none() {
                    return Err(ServerError::InvalidCharacteristic(format!(
                        "readable characteristic {} has no value",
                        characteristic.uuid
                    )));
                }
                if characteristic.is_writeable()
                    && !characteristic.is_readable()
                    && characteristic.value.is_some()
                {
                    return Err(ServerError::InvalidCharacteristic(format!(
                        "write-only characteristic {} must not pre-populate a value",
                        characteristic.uuid
                    )));
                }
            }
        }

        let mut services = self.services.write().unwrap();
        let mut characteristics = self.characteristics.write().unwrap();
        let mut next_handle = ATT_HANDLE_MIN;

        for service in pending.iter() {
            let start_handle = next_handle;
            next_handle += 1;

            for characteristic in &service.characteristics {
                let declaration_handle = next_handle;
                let value_handle = next_handle + 1;
                next_handle += 2;

                characteristics.insert(
                    value_handle,
                    PublishedCharacteristic {
                        uuid: characteristic.uuid,
                        properties: characteristic.properties,
                        permissions: characteristic.permissions,
                        declaration_handle,
                        value_handle,
                        value: characteristic.value.clone(),
                    },
                );
            }

            services.push(PublishedService {
                uuid: service.uuid,
                is_primary: service.is_primary,
                start_handle,
                end_handle: next_handle - 1,
            });
        }

        *published = true;
        info!(
            "published {} service(s), {} attribute handle(s)",
            services.len(),
            next_handle - ATT_HANDLE_MIN
        );
        Ok(())
    }

    pub fn is_published(&self) -> bool {
        *self.published.read().unwrap()
    }

    pub fn is_advertising(&self) -> bool {
        *self.advertising.read().unwrap()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// The value handle assigned to a characteristic at publish time.
    pub fn value_handle_of(&self, characteristic: &Uuid) -> Option<u16> {
        self.characteristics
            .read()
            .unwrap()
            .values()
            .find(|c| c.uuid == *characteristic)
            .map(|c| c.value_handle)
    }

    /// Begin advertising the published services.
    pub fn start_advertising(&self, local_name: Option<&str>) -> Result<(), ServerError> {
        if !*self.published.read().unwrap() {
            return Err(ServerError::NotPublished);
        }

        let advertisement = {
            let services = self.services.read().unwrap();
            Advertisement::new(
                local_name.map(str::to_owned),
                services.iter().map(|s| s.uuid).collect(),
            )
        };

        self.transport.start_advertising(&advertisement)?;
        *self.advertising.write().unwrap() = true;
        info!(
            "advertising {} service(s) as {:?}",
            advertisement.service_uuids.len(),
            advertisement.local_name.as_deref().unwrap_or("(unnamed)")
        );
        Ok(())
    }

    /// Stop advertising. Idempotent.
    pub fn stop_advertising(&self) {
        let mut advertising = self.advertising.write().unwrap();
        if *advertising {
            self.transport.stop_advertising();
            *advertising = false;
        }
    }

    /// Serve an inbound acknowledged request from a remote central.
    ///
    /// Called from the transport-delivery context; the response goes back on
    /// the same exchange.
    pub fn handle_request(&self, peer: PeerId, request: AttRequest) -> AttResponse {
        match request {
            AttRequest::DiscoverServices { filter } => self.discover_services(filter.as_deref()),
            AttRequest::DiscoverCharacteristics {
                start_handle,
                end_handle,
            } => self.discover_characteristics(start_handle, end_handle),
            AttRequest::Read { handle } => self.read_attribute(handle),
            AttRequest::Write { handle, value } => self.write_attribute(peer, handle, value),
            AttRequest::Subscribe { handle, enable } => self.subscribe(peer, handle, enable),
        }
    }

    /// Apply an inbound unacknowledged command from a remote central.
    ///
    /// There is no response path, so impermissible writes are dropped.
    pub fn handle_command(&self, peer: PeerId, command: AttCommand) {
        match command {
            AttCommand::WriteWithoutResponse { handle, value } => {
                let uuid = {
                    let mut characteristics = self.characteristics.write().unwrap();
                    match characteristics.get_mut(&handle) {
                        Some(c) if c.permissions.allows_write() => {
                            c.value = Some(value.clone());
                            c.uuid
                        }
                        Some(c) => {
                            warn!("dropping unacknowledged write to non-writeable {}", c.uuid);
                            return;
                        }
                        None => {
                            warn!(
                                "dropping unacknowledged write to unknown handle 0x{:04x}",
                                handle
                            );
                            return;
                        }
                    }
                };
                self.push_event(ServerEvent::WriteReceived {
                    peer,
                    characteristic: uuid,
                    value,
                });
            }
        }
    }

    /// Update a characteristic's stored value and push it to every current
    /// subscriber. Non-subscribers are unaffected.
    ///
    /// Where a UUID is shared by characteristics in different services, the
    /// one with the lowest value handle is updated.
    pub fn update_value(&self, characteristic: &Uuid, value: &[u8]) -> Result<(), ServerError> {
        if !*self.published.read().unwrap() {
            return Err(ServerError::NotPublished);
        }

        let value_handle = {
            let mut characteristics = self.characteristics.write().unwrap();
            match characteristics
                .values_mut()
                .find(|c| c.uuid == *characteristic)
            {
                Some(c) => {
                    c.value = Some(value.to_vec());
                    c.value_handle
                }
                None => return Err(ServerError::CharacteristicNotFound(*characteristic)),
            }
        };

        debug!("updated {} to {}", characteristic, hex::encode(value));

        let mut failed = None;
        for peer in self.subscriptions.subscribers_of(value_handle) {
            if let Err(e) = self.transport.notify(peer, value_handle, value) {
                warn!("value push to {} failed: {}", peer, e);
                failed = Some(e);
            }
        }
        match failed {
            Some(e) => Err(ServerError::Transport(e)),
            None => Ok(()),
        }
    }

    /// Drop all state held for a disconnected peer.
    pub fn handle_peer_disconnected(&self, peer: PeerId) {
        debug!("peer {} disconnected, dropping its subscriptions", peer);
        self.subscriptions.drop_peer(peer);
    }

    /// Next pending server event, if any.
    pub fn poll_event(&self) -> Option<ServerEvent> {
        self.events.lock().unwrap().pop_front()
    }

    fn push_event(&self, event: ServerEvent) {
        self.events.lock().unwrap().push_back(event);
    }

    fn discover_services(&self, filter: Option<&[Uuid]>) -> AttResponse {
        let services = self.services.read().unwrap();
        let matches: Vec<Service> = services
            .iter()
            .filter(|s| filter.map_or(true, |f| f.contains(&s.uuid)))
            .map(|s| Service {
                uuid: s.uuid,
                is_primary: s.is_primary,
                start_handle: s.start_handle,
                end_handle: s.end_handle,
            })
            .collect();

        if matches.is_empty() {
            AttResponse::Error(AttErrorCode::AttributeNotFound)
        } else {
            AttResponse::Services(matches)
        }
    }

    fn discover_characteristics(&self, start_handle: u16, end_handle: u16) -> AttResponse {
        let characteristics = self.characteristics.read().unwrap();
        let matches: Vec<Characteristic> = characteristics
            .values()
            .filter(|c| c.declaration_handle >= start_handle && c.declaration_handle <= end_handle)
            .map(|c| Characteristic {
                uuid: c.uuid,
                declaration_handle: c.declaration_handle,
                value_handle: c.value_handle,
                properties: c.properties,
            })
            .collect();

        if matches.is_empty() {
            AttResponse::Error(AttErrorCode::AttributeNotFound)
        } else {
            AttResponse::Characteristics(matches)
        }
    }

    fn read_attribute(&self, handle: u16) -> AttResponse {
        let characteristics = self.characteristics.read().unwrap();
        match characteristics.get(&handle) {
            None => AttResponse::Error(AttErrorCode::InvalidHandle),
            Some(c) if !c.permissions.allows_read() => {
                debug!("rejecting read of {} (not permitted)", c.uuid);
                AttResponse::Error(AttErrorCode::ReadNotPermitted)
            }
            Some(c) => match &c.value {
                Some(value) => AttResponse::Value(value.clone()),
                // Publish validation guarantees readable values exist, but a
                // response is still owed if the table was built another way.
                None => AttResponse::Error(AttErrorCode::UnlikelyError),
            },
        }
    }

    fn write_attribute(&self, peer: PeerId, handle: u16, value: Vec<u8>) -> AttResponse {
        let uuid = {
            let mut characteristics = self.characteristics.write().unwrap();
            match characteristics.get_mut(&handle) {
                None => return AttResponse::Error(AttErrorCode::InvalidHandle),
                Some(c) if !c.permissions.allows_write() => {
                    debug!("rejecting write to {} (not permitted)", c.uuid);
                    return AttResponse::Error(AttErrorCode::WriteNotPermitted);
                }
                Some(c) => {
                    c.value = Some(value.clone());
                    c.uuid
                }
            }
        };

        debug!("peer {} wrote {} to {}", peer, hex::encode(&value), uuid);
        self.push_event(ServerEvent::WriteReceived {
            peer,
            characteristic: uuid,
            value,
        });
        AttResponse::WriteAck
    }

    fn subscribe(&self, peer: PeerId, handle: u16, enable: bool) -> AttResponse {
        let uuid = {
            let characteristics = self.characteristics.read().unwrap();
            match characteristics.get(&handle) {
                None => return AttResponse::Error(AttErrorCode::InvalidHandle),
                Some(c) if !c.properties.can_subscribe() => {
                    debug!("rejecting subscription to {} (no notify/indicate)", c.uuid);
                    return AttResponse::Error(AttErrorCode::RequestNotSupported);
                }
                Some(c) => c.uuid,
            }
        };

        if self.subscriptions.set(peer, handle, enable) {
            info!(
                "peer {} {} {}",
                peer,
                if enable { "subscribed to" } else { "unsubscribed from" },
                uuid
            );
            self.push_event(ServerEvent::SubscriptionChanged {
                peer,
                characteristic: uuid,
                subscribed: enable,
            });
        }
        AttResponse::SubscribeAck {
            handle,
            enabled: enable,
        }
    }
}
