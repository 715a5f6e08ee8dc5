//! Bluetooth LE scanning and connection establishment
//!
//! The `ScanCoordinator` owns the central role's discovery side: one scan
//! session at a time, per-session de-duplication of advertisement reports,
//! and the `Discovered → Connecting → Connected` lifecycle of each remote
//! peer. A connected peer is claimed out of the coordinator into a
//! [`GattClient`], which owns it from then on.

use crate::error::TransportError;
use crate::gatt::GattClient;
use crate::transport::{Advertisement, PeerId, Transport};
use crate::uuid::Uuid;
use log::{debug, info, trace, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

/// Error types specific to scanning and connection establishment
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a scan session is already active")]
    AlreadyScanning,

    #[error("peer {0} has not been discovered")]
    UnknownPeer(PeerId),

    #[error("peer {0} is not in a state that allows this")]
    InvalidPeerState(PeerId),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Connection lifecycle of a peer tracked by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralState {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

/// A remote peer as seen from the central role.
#[derive(Debug, Clone)]
pub struct Peripheral {
    pub id: PeerId,
    pub state: PeripheralState,
    pub advertised_services: Vec<Uuid>,
    pub local_name: Option<String>,
    /// Signal strength of the most recent advertisement, in dBm
    pub rssi: i16,
}

/// Scan session policy knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Report every advertisement from a peer instead of only the first
    /// per session.
    pub allow_duplicates: bool,
}

/// Events the coordinator produces for the application.
#[derive(Debug)]
pub enum CentralEvent {
    /// A peer was discovered (first advertisement per session, unless
    /// duplicates were requested).
    Discovered {
        peer: PeerId,
        advertised_services: Vec<Uuid>,
        local_name: Option<String>,
        rssi: i16,
    },
    /// A connection attempt succeeded; the peer can now be claimed.
    Connected { peer: PeerId },
    /// A connection attempt failed; the peer is `Discovered` again and may
    /// be retried by the application.
    ConnectFailed {
        peer: PeerId,
        reason: TransportError,
    },
    /// An unclaimed connected peer dropped its link.
    Disconnected { peer: PeerId },
}

/// Coordinates scan sessions and connection establishment for the central
/// role.
pub struct ScanCoordinator {
    transport: Arc<dyn Transport>,
    scanning: bool,
    filter: Option<Vec<Uuid>>,
    options: ScanOptions,
    /// Peers already reported this session
    seen: HashSet<PeerId>,
    peripherals: HashMap<PeerId, Peripheral>,
    events: VecDeque<CentralEvent>,
}

impl ScanCoordinator {
    /// Create a coordinator on the given transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        ScanCoordinator {
            transport,
            scanning: false,
            filter: None,
            options: ScanOptions::default(),
            seen: HashSet::new(),
            peripherals: HashMap::new(),
            events: VecDeque::new(),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// The tracked record for a peer, if any
    pub fn peripheral(&self, peer: &PeerId) -> Option<&Peripheral> {
        self.peripherals.get(peer)
    }

    /// All tracked peers
    pub fn peripherals(&self) -> impl Iterator<Item = &Peripheral> {
        self.peripherals.values()
    }

    /// Next pending central event, if any
    pub fn poll_event(&mut self) -> Option<CentralEvent> {
        self.events.pop_front()
    }

    /// Begin a scan session, optionally restricted to peers advertising one
    /// of the given service UUIDs.
    ///
    /// Starting a session resets the de-duplication set and drops peers left
    /// over from the previous session that never progressed past discovery.
    pub fn start_scan(
        &mut self,
        filter: Option<&[Uuid]>,
        options: ScanOptions,
    ) -> Result<(), ScanError> {
        if self.scanning {
            return Err(ScanError::AlreadyScanning);
        }

        self.peripherals.retain(|_, p| {
            matches!(
                p.state,
                PeripheralState::Connecting | PeripheralState::Connected
            )
        });
        self.seen.clear();

        self.transport.start_scan(filter)?;
        self.scanning = true;
        self.filter = filter.map(<[Uuid]>::to_vec);
        self.options = options;
        info!(
            "scan session started (filter: {:?}, duplicates: {})",
            self.filter, options.allow_duplicates
        );
        Ok(())
    }

    /// End the scan session. Idempotent; discovered peers stay connectable
    /// until the next session starts.
    pub fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        self.transport.stop_scan();
        self.scanning = false;
        debug!("scan session stopped");
    }

    /// Deliver an advertisement report from the transport context.
    ///
    /// Reports outside a session, or filtered out by the session's service
    /// filter, are dropped. By default each peer is reported at most once
    /// per session.
    pub fn handle_advertisement(&mut self, peer: PeerId, advertisement: &Advertisement, rssi: i16) {
        if !self.scanning {
            trace!("advertisement from {} outside a scan session", peer);
            return;
        }

        if let Some(filter) = &self.filter {
            if !advertisement.advertises_any_of(filter) {
                trace!("advertisement from {} does not match filter", peer);
                return;
            }
        }

        let duplicate = !self.seen.insert(peer);
        if duplicate && !self.options.allow_duplicates {
            trace!("suppressing duplicate advertisement from {}", peer);
            return;
        }

        let record = self.peripherals.entry(peer).or_insert_with(|| Peripheral {
            id: peer,
            state: PeripheralState::Discovered,
            advertised_services: Vec::new(),
            local_name: None,
            rssi,
        });
        record.advertised_services = advertisement.service_uuids.clone();
        if advertisement.local_name.is_some() {
            record.local_name = advertisement.local_name.clone();
        }
        record.rssi = rssi;

        debug!(
            "discovered {} ({}) rssi {}",
            peer,
            record.local_name.as_deref().unwrap_or("untitled"),
            rssi
        );
        self.events.push_back(CentralEvent::Discovered {
            peer,
            advertised_services: advertisement.service_uuids.clone(),
            local_name: advertisement.local_name.clone(),
            rssi,
        });
    }

    /// Begin connecting to a discovered peer.
    ///
    /// Completion arrives through [`ScanCoordinator::handle_connect_result`].
    /// There is no automatic retry; a failed attempt leaves the peer
    /// `Discovered` for the application to decide.
    pub fn connect(&mut self, peer: PeerId) -> Result<(), ScanError> {
        let record = self
            .peripherals
            .get_mut(&peer)
            .ok_or(ScanError::UnknownPeer(peer))?;

        match record.state {
            PeripheralState::Discovered | PeripheralState::Disconnected => {}
            _ => return Err(ScanError::InvalidPeerState(peer)),
        }

        record.state = PeripheralState::Connecting;
        if let Err(e) = self.transport.connect(peer) {
            // The attempt never left the radio; revert immediately.
            if let Some(record) = self.peripherals.get_mut(&peer) {
                record.state = PeripheralState::Discovered;
            }
            return Err(ScanError::Transport(e));
        }

        info!("connecting to {}", peer);
        Ok(())
    }

    /// Deliver the outcome of a connection attempt from the transport
    /// context.
    pub fn handle_connect_result(&mut self, peer: PeerId, result: Result<(), TransportError>) {
        let record = match self.peripherals.get_mut(&peer) {
            Some(record) => record,
            None => {
                warn!("connect result for unknown peer {}", peer);
                return;
            }
        };

        if record.state != PeripheralState::Connecting {
            warn!(
                "connect result for {} in state {:?}",
                peer, record.state
            );
            return;
        }

        match result {
            Ok(()) => {
                record.state = PeripheralState::Connected;
                info!("connected to {}", peer);
                self.events.push_back(CentralEvent::Connected { peer });
            }
            Err(reason) => {
                record.state = PeripheralState::Discovered;
                warn!("connection to {} failed: {}", peer, reason);
                self.events
                    .push_back(CentralEvent::ConnectFailed { peer, reason });
            }
        }
    }

    /// Transfer ownership of a connected peer into a new [`GattClient`].
    ///
    /// The coordinator forgets the peer entirely; its lifecycle now belongs
    /// to the client.
    pub fn claim(&mut self, peer: PeerId) -> Result<GattClient, ScanError> {
        match self.peripherals.get(&peer) {
            None => Err(ScanError::UnknownPeer(peer)),
            Some(record) if record.state != PeripheralState::Connected => {
                Err(ScanError::InvalidPeerState(peer))
            }
            Some(_) => {
                self.peripherals.remove(&peer);
                debug!("ownership of {} transferred to a GATT client", peer);
                Ok(GattClient::new(peer, self.transport.clone()))
            }
        }
    }

    /// Deliver a link loss for a peer still owned by the coordinator.
    pub fn handle_disconnected(&mut self, peer: PeerId) {
        let record = match self.peripherals.get_mut(&peer) {
            Some(record) => record,
            None => return,
        };

        match record.state {
            PeripheralState::Connected | PeripheralState::Connecting => {
                record.state = PeripheralState::Disconnected;
                debug!("unclaimed peer {} disconnected", peer);
                self.events.push_back(CentralEvent::Disconnected { peer });
            }
            _ => {}
        }
    }
}
