//! GATT Client implementation
//!
//! One `GattClient` per connected peer. Commands submit acknowledged
//! requests through the transport and park a pending-operation record; the
//! transport delivers each response back through
//! [`GattClient::handle_response`] in submission order (the radio serializes,
//! so there is never more than one exchange in flight on the air). Each
//! completion surfaces as a [`ClientEvent`].
//!
//! Disconnection invalidates every pending operation deterministically; the
//! client never re-submits an operation against a later connection.

use crate::att::{AttCommand, AttErrorCode, AttRequest, AttResponse};
use crate::error::TransportError;
use crate::gatt::types::{Characteristic, Service};
use crate::transport::{PeerId, Transport};
use crate::uuid::Uuid;
use log::{debug, info, trace, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Error types specific to client-role GATT operations
#[derive(Debug, thiserror::Error)]
pub enum GattError {
    #[error("characteristic does not support reads")]
    NotReadable,

    #[error("characteristic does not support this kind of write")]
    NotWritable,

    #[error("characteristic supports neither notify nor indicate")]
    NotifyUnsupported,

    #[error("read rejected by peer: {0}")]
    ReadError(AttErrorCode),

    #[error("write rejected by peer: {0}")]
    WriteError(AttErrorCode),

    #[error("discovery rejected by peer: {0}")]
    DiscoveryError(AttErrorCode),

    #[error("no discovered service with UUID {0}")]
    ServiceNotFound(Uuid),

    #[error("no discovered characteristic with UUID {0}")]
    CharacteristicNotFound(Uuid),

    #[error("peer disconnected")]
    Disconnected,

    #[error("operation timed out")]
    Timeout,

    #[error("peer sent a response of the wrong kind")]
    UnexpectedResponse,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Where the client is in its per-connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, nothing discovered yet
    Connected,
    /// Service discovery in flight
    DiscoveringServices,
    /// Characteristic discovery in flight
    DiscoveringCharacteristics,
    /// Attribute tables populated, operations available
    Ready,
    /// Link is gone; every operation fails
    Disconnected,
}

/// Completion and push events produced by the client.
#[derive(Debug)]
pub enum ClientEvent {
    ServicesDiscovered {
        result: Result<Vec<Service>, GattError>,
    },
    CharacteristicsDiscovered {
        service: Uuid,
        result: Result<Vec<Characteristic>, GattError>,
    },
    ReadCompleted {
        characteristic: Uuid,
        result: Result<Vec<u8>, GattError>,
    },
    WriteCompleted {
        characteristic: Uuid,
        result: Result<(), GattError>,
    },
    NotifyStateChanged {
        characteristic: Uuid,
        result: Result<bool, GattError>,
    },
    /// A subscribed characteristic's value was pushed by the peer.
    ValueUpdated { characteristic: Uuid, value: Vec<u8> },
}

/// What an in-flight request was issued for.
#[derive(Debug, Clone, PartialEq)]
enum OperationKind {
    DiscoverServices,
    DiscoverCharacteristics(Uuid),
    Read(Uuid),
    Write(Uuid),
    SetNotify(Uuid, bool),
}

#[derive(Debug)]
struct PendingOperation {
    kind: OperationKind,
    issued_at: Instant,
}

/// A client for one connected GATT peer
pub struct GattClient {
    /// Remote peer identity
    peer: PeerId,
    /// Radio transport
    transport: Arc<dyn Transport>,
    /// Lifecycle state
    state: ClientState,
    /// Discovered services
    services: Vec<Service>,
    /// Discovered characteristics, keyed by service start handle
    characteristics: HashMap<u16, Vec<Characteristic>>,
    /// Value handles with an active subscription
    subscriptions: HashSet<u16>,
    /// Requests awaiting a response, oldest first
    pending: VecDeque<PendingOperation>,
    /// Events awaiting the application
    events: VecDeque<ClientEvent>,
}

impl GattClient {
    /// Create a client for an already-connected peer
    pub fn new(peer: PeerId, transport: Arc<dyn Transport>) -> Self {
        GattClient {
            peer,
            transport,
            state: ClientState::Connected,
            services: Vec::new(),
            characteristics: HashMap::new(),
            subscriptions: HashSet::new(),
            pending: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Discovered services, empty until service discovery completes
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Number of requests still awaiting a response
    pub fn pending_operations(&self) -> usize {
        self.pending.len()
    }

    /// Find a discovered service by UUID
    pub fn find_service(&self, uuid: &Uuid) -> Option<&Service> {
        self.services.iter().find(|s| s.uuid == *uuid)
    }

    /// Find a discovered characteristic by UUID across all services
    pub fn find_characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics
            .values()
            .flat_map(|c| c.iter())
            .find(|c| c.uuid == *uuid)
    }

    /// Discovered characteristics of a service, empty until discovered
    pub fn characteristics_of(&self, service: &Uuid) -> &[Characteristic] {
        self.find_service(service)
            .and_then(|s| self.characteristics.get(&s.start_handle))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Next pending client event, if any
    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    /// Issue service discovery, optionally filtered by UUID.
    ///
    /// Completion arrives as [`ClientEvent::ServicesDiscovered`]. On a
    /// protocol error the peer stays usable and discovery may be retried.
    pub fn discover_services(&mut self, filter: Option<&[Uuid]>) -> Result<(), GattError> {
        self.check_connected()?;

        self.submit(
            AttRequest::DiscoverServices {
                filter: filter.map(<[Uuid]>::to_vec),
            },
            OperationKind::DiscoverServices,
        )?;
        self.state = ClientState::DiscoveringServices;
        Ok(())
    }

    /// Issue characteristic discovery for a known service.
    pub fn discover_characteristics(&mut self, service: &Uuid) -> Result<(), GattError> {
        self.check_connected()?;

        let (start_handle, end_handle) = match self.find_service(service) {
            Some(s) => (s.start_handle, s.end_handle),
            None => return Err(GattError::ServiceNotFound(*service)),
        };

        self.submit(
            AttRequest::DiscoverCharacteristics {
                start_handle,
                end_handle,
            },
            OperationKind::DiscoverCharacteristics(*service),
        )?;
        self.state = ClientState::DiscoveringCharacteristics;
        Ok(())
    }

    /// Issue a read of a discovered characteristic's value.
    ///
    /// Completion arrives as [`ClientEvent::ReadCompleted`].
    pub fn read(&mut self, characteristic: &Uuid) -> Result<(), GattError> {
        self.check_connected()?;

        let c = self
            .find_characteristic(characteristic)
            .ok_or(GattError::CharacteristicNotFound(*characteristic))?;
        if !c.properties.can_read() {
            return Err(GattError::NotReadable);
        }
        let handle = c.value_handle;

        self.submit(
            AttRequest::Read { handle },
            OperationKind::Read(*characteristic),
        )
    }

    /// Write a discovered characteristic's value.
    ///
    /// With `with_response` the write completes on peer acknowledgment as
    /// [`ClientEvent::WriteCompleted`]. Without it the value goes out as an
    /// unacknowledged command and this call resolves immediately; delivery is
    /// best-effort and peer-side failures never surface.
    pub fn write(
        &mut self,
        characteristic: &Uuid,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), GattError> {
        self.check_connected()?;

        let c = self
            .find_characteristic(characteristic)
            .ok_or(GattError::CharacteristicNotFound(*characteristic))?;
        let handle = c.value_handle;

        if with_response {
            if !c.properties.can_write() {
                return Err(GattError::NotWritable);
            }
            self.submit(
                AttRequest::Write {
                    handle,
                    value: value.to_vec(),
                },
                OperationKind::Write(*characteristic),
            )
        } else {
            if !c.properties.can_write_without_response() {
                return Err(GattError::NotWritable);
            }
            trace!(
                "write command to {}: {}",
                characteristic,
                hex::encode(value)
            );
            self.transport.send_command(
                self.peer,
                AttCommand::WriteWithoutResponse {
                    handle,
                    value: value.to_vec(),
                },
            )?;
            Ok(())
        }
    }

    /// Enable or disable value-update subscription on a characteristic.
    ///
    /// Completion arrives as [`ClientEvent::NotifyStateChanged`]; once
    /// enabled, peer pushes surface as [`ClientEvent::ValueUpdated`] until
    /// disabled or disconnect.
    pub fn set_notify(&mut self, characteristic: &Uuid, enable: bool) -> Result<(), GattError> {
        self.check_connected()?;

        let c = self
            .find_characteristic(characteristic)
            .ok_or(GattError::CharacteristicNotFound(*characteristic))?;
        if !c.properties.can_subscribe() {
            return Err(GattError::NotifyUnsupported);
        }
        let handle = c.value_handle;

        self.submit(
            AttRequest::Subscribe { handle, enable },
            OperationKind::SetNotify(*characteristic, enable),
        )
    }

    /// Tear down the connection.
    ///
    /// Every pending operation is invalidated with
    /// [`GattError::Disconnected`] before this returns.
    pub fn disconnect(&mut self) {
        if self.state == ClientState::Disconnected {
            return;
        }
        self.transport.disconnect(self.peer);
        self.handle_disconnected();
    }

    /// Deliver the response to the oldest pending request.
    ///
    /// Called from the transport-delivery context, in submission order.
    pub fn handle_response(&mut self, result: Result<AttResponse, TransportError>) {
        let op = match self.pending.pop_front() {
            Some(op) => op,
            None => {
                warn!("response from {} with no pending operation", self.peer);
                return;
            }
        };

        let event = match op.kind {
            OperationKind::DiscoverServices => {
                let result = match result {
                    Ok(AttResponse::Services(services)) => {
                        self.services = services.clone();
                        self.characteristics.clear();
                        info!("discovered {} service(s) on {}", services.len(), self.peer);
                        Ok(services)
                    }
                    other => match Self::discovery_failure(other) {
                        Ok(()) => {
                            self.services.clear();
                            self.characteristics.clear();
                            Ok(Vec::new())
                        }
                        Err(e) => Err(e),
                    },
                };
                self.settle_discovery_state();
                ClientEvent::ServicesDiscovered { result }
            }
            OperationKind::DiscoverCharacteristics(service) => {
                let start_handle = self.find_service(&service).map(|s| s.start_handle);
                let result = match result {
                    Ok(AttResponse::Characteristics(characteristics)) => {
                        if let Some(start_handle) = start_handle {
                            self.characteristics
                                .insert(start_handle, characteristics.clone());
                        }
                        debug!(
                            "discovered {} characteristic(s) in {} on {}",
                            characteristics.len(),
                            service,
                            self.peer
                        );
                        Ok(characteristics)
                    }
                    other => match Self::discovery_failure(other) {
                        Ok(()) => {
                            if let Some(start_handle) = start_handle {
                                self.characteristics.insert(start_handle, Vec::new());
                            }
                            Ok(Vec::new())
                        }
                        Err(e) => Err(e),
                    },
                };
                self.settle_discovery_state();
                ClientEvent::CharacteristicsDiscovered { service, result }
            }
            OperationKind::Read(characteristic) => {
                let result = match result {
                    Ok(AttResponse::Value(value)) => Ok(value),
                    Ok(AttResponse::Error(code)) => Err(GattError::ReadError(code)),
                    Ok(_) => Err(GattError::UnexpectedResponse),
                    Err(e) => Err(GattError::Transport(e)),
                };
                ClientEvent::ReadCompleted {
                    characteristic,
                    result,
                }
            }
            OperationKind::Write(characteristic) => {
                let result = match result {
                    Ok(AttResponse::WriteAck) => Ok(()),
                    Ok(AttResponse::Error(code)) => Err(GattError::WriteError(code)),
                    Ok(_) => Err(GattError::UnexpectedResponse),
                    Err(e) => Err(GattError::Transport(e)),
                };
                ClientEvent::WriteCompleted {
                    characteristic,
                    result,
                }
            }
            OperationKind::SetNotify(characteristic, enable) => {
                let result = match result {
                    Ok(AttResponse::SubscribeAck { handle, enabled }) => {
                        if enabled != enable {
                            warn!(
                                "peer {} acknowledged a subscription state it was not asked for",
                                self.peer
                            );
                        }
                        if enabled {
                            self.subscriptions.insert(handle);
                        } else {
                            self.subscriptions.remove(&handle);
                        }
                        info!(
                            "{} updates {} on {}",
                            characteristic,
                            if enabled { "enabled" } else { "disabled" },
                            self.peer
                        );
                        Ok(enabled)
                    }
                    // The subscription rides on a configuration write; a
                    // protocol rejection is a write failure.
                    Ok(AttResponse::Error(code)) => Err(GattError::WriteError(code)),
                    Ok(_) => Err(GattError::UnexpectedResponse),
                    Err(e) => Err(GattError::Transport(e)),
                };
                ClientEvent::NotifyStateChanged {
                    characteristic,
                    result,
                }
            }
        };

        self.events.push_back(event);
    }

    /// Deliver a value push from the peer.
    ///
    /// Pushes for handles without an active subscription are dropped.
    pub fn handle_notification(&mut self, value_handle: u16, value: &[u8]) {
        if !self.subscriptions.contains(&value_handle) {
            warn!(
                "dropping value push for unsubscribed handle 0x{:04x} from {}",
                value_handle, self.peer
            );
            return;
        }

        let characteristic = self
            .characteristics
            .values()
            .flat_map(|c| c.iter())
            .find(|c| c.value_handle == value_handle)
            .map(|c| c.uuid);

        match characteristic {
            Some(characteristic) => {
                trace!(
                    "value push for {}: {}",
                    characteristic,
                    hex::encode(value)
                );
                self.events.push_back(ClientEvent::ValueUpdated {
                    characteristic,
                    value: value.to_vec(),
                });
            }
            None => warn!(
                "subscribed handle 0x{:04x} has no discovered characteristic",
                value_handle
            ),
        }
    }

    /// Fail every pending operation older than `limit` with
    /// [`GattError::Timeout`].
    ///
    /// The radio serializes requests, so a stalled operation also stalls
    /// everything queued behind it; operations are failed from the front.
    pub fn process_timeouts(&mut self, limit: Duration) {
        while self
            .pending
            .front()
            .map_or(false, |op| op.issued_at.elapsed() > limit)
        {
            if let Some(op) = self.pending.pop_front() {
                warn!("operation {:?} on {} timed out", op.kind, self.peer);
                let event = Self::failure_event(op.kind, GattError::Timeout);
                self.events.push_back(event);
            }
        }
    }

    /// The link is gone: invalidate all K pending operations with
    /// [`GattError::Disconnected`], drop the attribute tables and
    /// subscriptions, and refuse further commands.
    pub fn handle_disconnected(&mut self) {
        if self.state == ClientState::Disconnected {
            return;
        }

        info!(
            "{} disconnected, invalidating {} pending operation(s)",
            self.peer,
            self.pending.len()
        );

        while let Some(op) = self.pending.pop_front() {
            let event = Self::failure_event(op.kind, GattError::Disconnected);
            self.events.push_back(event);
        }

        self.services.clear();
        self.characteristics.clear();
        self.subscriptions.clear();
        self.state = ClientState::Disconnected;
    }

    fn check_connected(&self) -> Result<(), GattError> {
        if self.state == ClientState::Disconnected {
            Err(GattError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn submit(&mut self, request: AttRequest, kind: OperationKind) -> Result<(), GattError> {
        trace!("submitting {:?} to {}", kind, self.peer);
        self.transport.submit(self.peer, request)?;
        self.pending.push_back(PendingOperation {
            kind,
            issued_at: Instant::now(),
        });
        Ok(())
    }

    /// Maps a non-success discovery outcome to a `GattError`. A peer
    /// reporting no matching attributes is an empty result, not a failure.
    fn discovery_failure(
        outcome: Result<AttResponse, TransportError>,
    ) -> Result<(), GattError> {
        match outcome {
            Ok(AttResponse::Error(AttErrorCode::AttributeNotFound)) => Ok(()),
            Ok(AttResponse::Error(code)) => Err(GattError::DiscoveryError(code)),
            Ok(_) => Err(GattError::UnexpectedResponse),
            Err(e) => Err(GattError::Transport(e)),
        }
    }

    /// After a discovery completes, return to a usable state: `Ready` once
    /// the service table is populated, otherwise back to `Connected`.
    fn settle_discovery_state(&mut self) {
        self.state = if self.services.is_empty() {
            ClientState::Connected
        } else {
            ClientState::Ready
        };
    }

    fn failure_event(kind: OperationKind, error: GattError) -> ClientEvent {
        match kind {
            OperationKind::DiscoverServices => ClientEvent::ServicesDiscovered {
                result: Err(error),
            },
            OperationKind::DiscoverCharacteristics(service) => {
                ClientEvent::CharacteristicsDiscovered {
                    service,
                    result: Err(error),
                }
            }
            OperationKind::Read(characteristic) => ClientEvent::ReadCompleted {
                characteristic,
                result: Err(error),
            },
            OperationKind::Write(characteristic) => ClientEvent::WriteCompleted {
                characteristic,
                result: Err(error),
            },
            OperationKind::SetNotify(characteristic, _) => ClientEvent::NotifyStateChanged {
                characteristic,
                result: Err(error),
            },
        }
    }
}

impl std::fmt::Debug for GattClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattClient")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("services", &self.services)
            .field("pending", &self.pending.len())
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}
