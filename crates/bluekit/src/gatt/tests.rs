//! Unit tests for GATT client and server behavior

use super::client::{ClientEvent, ClientState, GattClient, GattError};
use super::server::{GattCharacteristic, GattServer, GattService, ServerError, ServerEvent};
use super::types::{Characteristic, CharacteristicProperties, Permissions, Service};
use crate::att::{AttErrorCode, AttRequest, AttResponse};
use crate::error::TransportError;
use crate::testutil::{MockTransport, TransportCall};
use crate::transport::{PeerId, Transport};
use crate::uuid::Uuid;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SERVICE: &str = "f38eebfe-bc74-42a5-b874-59e53aa6a097";
const READABLE: &str = "548ccb32-92ec-4dea-9b72-b7a563a1a06e";
const WRITEABLE: &str = "eee73588-64c8-4c4e-9ee1-76af5bd93122";

fn uuid(s: &str) -> Uuid {
    s.parse().unwrap()
}

fn peer_a() -> PeerId {
    PeerId::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])
}

fn peer_b() -> PeerId {
    PeerId::new([0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB])
}

/// Temperature measurement, readable and notifiable.
fn notify_uuid() -> Uuid {
    Uuid::from_u16(0x2A6E)
}

fn sample_service() -> GattService {
    let mut service = GattService::new(uuid(SERVICE), true);
    service.add_characteristic(GattCharacteristic::readable(
        uuid(READABLE),
        b"hello world".to_vec(),
    ));
    service.add_characteristic(GattCharacteristic::writeable(uuid(WRITEABLE)));
    service.add_characteristic(GattCharacteristic::new(
        notify_uuid(),
        CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        Permissions::READABLE,
        Some(vec![0x00, 0x00]),
    ));
    service
}

fn published_server() -> (Arc<MockTransport>, GattServer) {
    let transport = Arc::new(MockTransport::new());
    let server = GattServer::new(transport.clone());
    server.register_service(sample_service()).unwrap();
    server.publish().unwrap();
    (transport, server)
}

/// A client whose tables match `sample_service` after publication.
fn ready_client(transport: Arc<MockTransport>) -> GattClient {
    let mut client = GattClient::new(peer_a(), transport);

    client.discover_services(None).unwrap();
    client.handle_response(Ok(AttResponse::Services(vec![Service {
        uuid: uuid(SERVICE),
        is_primary: true,
        start_handle: 0x0001,
        end_handle: 0x0007,
    }])));
    let _ = client.poll_event();

    client.discover_characteristics(&uuid(SERVICE)).unwrap();
    client.handle_response(Ok(AttResponse::Characteristics(vec![
        Characteristic {
            uuid: uuid(READABLE),
            declaration_handle: 0x0002,
            value_handle: 0x0003,
            properties: CharacteristicProperties::READ,
        },
        Characteristic {
            uuid: uuid(WRITEABLE),
            declaration_handle: 0x0004,
            value_handle: 0x0005,
            properties: CharacteristicProperties::WRITE
                | CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
        },
        Characteristic {
            uuid: notify_uuid(),
            declaration_handle: 0x0006,
            value_handle: 0x0007,
            properties: CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        },
    ])));
    let _ = client.poll_event();

    client
}

// --- Server: registration and publication ---

#[test]
fn publish_requires_value_for_readable() {
    let server = GattServer::new(Arc::new(MockTransport::new()));
    let mut service = GattService::new(uuid(SERVICE), true);
    service.add_characteristic(GattCharacteristic::new(
        uuid(READABLE),
        CharacteristicProperties::READ,
        Permissions::READABLE,
        None,
    ));
    server.register_service(service).unwrap();

    assert!(matches!(
        server.publish(),
        Err(ServerError::InvalidCharacteristic(_))
    ));
    assert!(!server.is_published());
}

#[test]
fn publish_rejects_prepopulated_write_only() {
    let server = GattServer::new(Arc::new(MockTransport::new()));
    let mut service = GattService::new(uuid(SERVICE), true);
    service.add_characteristic(GattCharacteristic::new(
        uuid(WRITEABLE),
        CharacteristicProperties::WRITE,
        Permissions::WRITEABLE,
        Some(b"not allowed".to_vec()),
    ));
    server.register_service(service).unwrap();

    assert!(matches!(
        server.publish(),
        Err(ServerError::InvalidCharacteristic(_))
    ));
    assert!(!server.is_published());
}

#[test]
fn readable_and_writeable_keeps_its_value() {
    let server = GattServer::new(Arc::new(MockTransport::new()));
    let mut service = GattService::new(uuid(SERVICE), true);
    service.add_characteristic(GattCharacteristic::new(
        uuid(READABLE),
        CharacteristicProperties::READ | CharacteristicProperties::WRITE,
        Permissions::READABLE | Permissions::WRITEABLE,
        Some(b"initial".to_vec()),
    ));
    server.register_service(service).unwrap();
    server.publish().unwrap();
}

#[test]
fn publish_rejects_duplicate_service_uuids() {
    let server = GattServer::new(Arc::new(MockTransport::new()));
    server.register_service(sample_service()).unwrap();
    // Registration is just a list; the duplicate is accepted here.
    server
        .register_service(GattService::new(uuid(SERVICE), false))
        .unwrap();

    match server.publish() {
        Err(ServerError::DuplicateService(u)) => assert_eq!(u, uuid(SERVICE)),
        other => panic!("expected DuplicateService, got {:?}", other.err()),
    }
    assert!(!server.is_published());
}

#[test]
fn register_after_publish_fails() {
    let (_transport, server) = published_server();
    assert!(matches!(
        server.register_service(GattService::new(Uuid::from_u16(0x180F), true)),
        Err(ServerError::AlreadyPublished)
    ));
    assert!(matches!(server.publish(), Err(ServerError::AlreadyPublished)));
}

#[test]
fn publish_assigns_sequential_handles() {
    let (_transport, server) = published_server();

    assert_eq!(server.value_handle_of(&uuid(READABLE)), Some(0x0003));
    assert_eq!(server.value_handle_of(&uuid(WRITEABLE)), Some(0x0005));
    assert_eq!(server.value_handle_of(&notify_uuid()), Some(0x0007));

    match server.handle_request(peer_a(), AttRequest::DiscoverServices { filter: None }) {
        AttResponse::Services(services) => {
            assert_eq!(services.len(), 1);
            assert_eq!(services[0].uuid, uuid(SERVICE));
            assert_eq!(services[0].start_handle, 0x0001);
            assert_eq!(services[0].end_handle, 0x0007);
            assert!(services[0].is_primary);
        }
        other => panic!("expected services, got {:?}", other),
    }
}

#[test]
fn service_discovery_respects_filter() {
    let (_transport, server) = published_server();

    let response = server.handle_request(
        peer_a(),
        AttRequest::DiscoverServices {
            filter: Some(vec![Uuid::from_u16(0x180F)]),
        },
    );
    assert_eq!(
        response,
        AttResponse::Error(AttErrorCode::AttributeNotFound)
    );
}

#[test]
fn characteristic_discovery_returns_declarations() {
    let (_transport, server) = published_server();

    match server.handle_request(
        peer_a(),
        AttRequest::DiscoverCharacteristics {
            start_handle: 0x0001,
            end_handle: 0x0007,
        },
    ) {
        AttResponse::Characteristics(characteristics) => {
            assert_eq!(characteristics.len(), 3);
            assert_eq!(characteristics[0].uuid, uuid(READABLE));
            assert_eq!(characteristics[0].value_handle, 0x0003);
            assert!(characteristics[1].properties.can_write());
        }
        other => panic!("expected characteristics, got {:?}", other),
    }
}

// --- Server: advertising ---

#[test]
fn advertising_requires_publication() {
    let transport = Arc::new(MockTransport::new());
    let server = GattServer::new(transport.clone());
    server.register_service(sample_service()).unwrap();

    assert!(matches!(
        server.start_advertising(Some("demo")),
        Err(ServerError::NotPublished)
    ));
    assert_eq!(transport.call_count(), 0);

    server.publish().unwrap();
    server.start_advertising(Some("demo")).unwrap();
    assert!(server.is_advertising());

    match &transport.calls()[0] {
        TransportCall::StartAdvertising(adv) => {
            assert_eq!(adv.local_name.as_deref(), Some("demo"));
            assert_eq!(adv.service_uuids, vec![uuid(SERVICE)]);
        }
        other => panic!("expected StartAdvertising, got {:?}", other),
    }
}

#[test]
fn stop_advertising_is_idempotent() {
    let (transport, server) = published_server();
    server.start_advertising(None).unwrap();

    server.stop_advertising();
    server.stop_advertising();

    let stops = transport
        .calls()
        .iter()
        .filter(|c| **c == TransportCall::StopAdvertising)
        .count();
    assert_eq!(stops, 1);
    assert!(!server.is_advertising());
}

// --- Server: inbound requests ---

#[test]
fn read_request_follows_permissions() {
    let (_transport, server) = published_server();
    let readable = server.value_handle_of(&uuid(READABLE)).unwrap();
    let writeable = server.value_handle_of(&uuid(WRITEABLE)).unwrap();

    assert_eq!(
        server.handle_request(peer_a(), AttRequest::Read { handle: readable }),
        AttResponse::Value(b"hello world".to_vec())
    );
    assert_eq!(
        server.handle_request(peer_a(), AttRequest::Read { handle: writeable }),
        AttResponse::Error(AttErrorCode::ReadNotPermitted)
    );
    assert_eq!(
        server.handle_request(peer_a(), AttRequest::Read { handle: 0x7777 }),
        AttResponse::Error(AttErrorCode::InvalidHandle)
    );
}

#[test]
fn write_request_follows_permissions() {
    let (_transport, server) = published_server();
    let readable = server.value_handle_of(&uuid(READABLE)).unwrap();
    let writeable = server.value_handle_of(&uuid(WRITEABLE)).unwrap();

    assert_eq!(
        server.handle_request(
            peer_a(),
            AttRequest::Write {
                handle: writeable,
                value: b"ping".to_vec(),
            }
        ),
        AttResponse::WriteAck
    );
    assert_eq!(
        server.poll_event(),
        Some(ServerEvent::WriteReceived {
            peer: peer_a(),
            characteristic: uuid(WRITEABLE),
            value: b"ping".to_vec(),
        })
    );

    assert_eq!(
        server.handle_request(
            peer_a(),
            AttRequest::Write {
                handle: readable,
                value: b"nope".to_vec(),
            }
        ),
        AttResponse::Error(AttErrorCode::WriteNotPermitted)
    );
    assert_eq!(server.poll_event(), None);
}

#[test]
fn unacknowledged_write_is_applied_or_dropped() {
    let (_transport, server) = published_server();
    let readable = server.value_handle_of(&uuid(READABLE)).unwrap();
    let writeable = server.value_handle_of(&uuid(WRITEABLE)).unwrap();

    server.handle_command(
        peer_a(),
        crate::att::AttCommand::WriteWithoutResponse {
            handle: writeable,
            value: b"fire and forget".to_vec(),
        },
    );
    assert!(matches!(
        server.poll_event(),
        Some(ServerEvent::WriteReceived { .. })
    ));

    // Not writeable: dropped, since there is no response path.
    server.handle_command(
        peer_a(),
        crate::att::AttCommand::WriteWithoutResponse {
            handle: readable,
            value: b"dropped".to_vec(),
        },
    );
    assert_eq!(server.poll_event(), None);
}

#[test]
fn subscribe_requires_notify_capability() {
    let (_transport, server) = published_server();
    let readable = server.value_handle_of(&uuid(READABLE)).unwrap();
    let notifiable = server.value_handle_of(&notify_uuid()).unwrap();

    assert_eq!(
        server.handle_request(
            peer_a(),
            AttRequest::Subscribe {
                handle: readable,
                enable: true,
            }
        ),
        AttResponse::Error(AttErrorCode::RequestNotSupported)
    );
    assert!(server.subscriptions().is_empty());

    assert_eq!(
        server.handle_request(
            peer_a(),
            AttRequest::Subscribe {
                handle: notifiable,
                enable: true,
            }
        ),
        AttResponse::SubscribeAck {
            handle: notifiable,
            enabled: true,
        }
    );
    assert!(server.subscriptions().is_subscribed(peer_a(), notifiable));
    assert_eq!(
        server.poll_event(),
        Some(ServerEvent::SubscriptionChanged {
            peer: peer_a(),
            characteristic: notify_uuid(),
            subscribed: true,
        })
    );
}

#[test]
fn unsubscribe_removes_registration() {
    let (_transport, server) = published_server();
    let notifiable = server.value_handle_of(&notify_uuid()).unwrap();

    server.handle_request(
        peer_a(),
        AttRequest::Subscribe {
            handle: notifiable,
            enable: true,
        },
    );
    let _ = server.poll_event();

    server.handle_request(
        peer_a(),
        AttRequest::Subscribe {
            handle: notifiable,
            enable: false,
        },
    );
    assert!(!server.subscriptions().is_subscribed(peer_a(), notifiable));
    assert!(matches!(
        server.poll_event(),
        Some(ServerEvent::SubscriptionChanged {
            subscribed: false,
            ..
        })
    ));

    // Unsubscribing again changes nothing and produces no event.
    server.handle_request(
        peer_a(),
        AttRequest::Subscribe {
            handle: notifiable,
            enable: false,
        },
    );
    assert_eq!(server.poll_event(), None);
}

// --- Server: value updates ---

#[test]
fn update_value_reaches_only_subscribers() {
    let (transport, server) = published_server();
    let notifiable = server.value_handle_of(&notify_uuid()).unwrap();

    server.handle_request(
        peer_a(),
        AttRequest::Subscribe {
            handle: notifiable,
            enable: true,
        },
    );

    server.update_value(&notify_uuid(), &[0x12, 0x0A]).unwrap();

    let notifies: Vec<_> = transport
        .calls()
        .into_iter()
        .filter(|c| matches!(c, TransportCall::Notify(..)))
        .collect();
    assert_eq!(
        notifies,
        vec![TransportCall::Notify(
            peer_a(),
            notifiable,
            vec![0x12, 0x0A]
        )]
    );

    // The stored value moved too; peer B sees it on a plain read.
    assert_eq!(
        server.handle_request(peer_b(), AttRequest::Read { handle: notifiable }),
        AttResponse::Value(vec![0x12, 0x0A])
    );
}

#[test]
fn update_value_requires_publication_and_known_uuid() {
    let server = GattServer::new(Arc::new(MockTransport::new()));
    server.register_service(sample_service()).unwrap();
    assert!(matches!(
        server.update_value(&notify_uuid(), &[0x01]),
        Err(ServerError::NotPublished)
    ));

    server.publish().unwrap();
    assert!(matches!(
        server.update_value(&Uuid::from_u16(0x2A00), &[0x01]),
        Err(ServerError::CharacteristicNotFound(_))
    ));
}

#[test]
fn peer_disconnect_drops_its_subscriptions() {
    let (transport, server) = published_server();
    let notifiable = server.value_handle_of(&notify_uuid()).unwrap();

    server.handle_request(
        peer_a(),
        AttRequest::Subscribe {
            handle: notifiable,
            enable: true,
        },
    );
    server.handle_peer_disconnected(peer_a());
    assert!(server.subscriptions().is_empty());

    server.update_value(&notify_uuid(), &[0x01]).unwrap();
    assert!(!transport
        .calls()
        .iter()
        .any(|c| matches!(c, TransportCall::Notify(..))));
}

// --- Client: local property checks ---

#[test]
fn read_rejects_unreadable_characteristic_locally() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport.clone());
    let submits_before = transport.call_count();

    assert!(matches!(
        client.read(&uuid(WRITEABLE)),
        Err(GattError::NotReadable)
    ));
    // Never reached the radio.
    assert_eq!(transport.call_count(), submits_before);
}

#[test]
fn write_rejects_unwritable_characteristic_locally() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport);

    assert!(matches!(
        client.write(&uuid(READABLE), b"x", true),
        Err(GattError::NotWritable)
    ));
    assert!(matches!(
        client.write(&uuid(READABLE), b"x", false),
        Err(GattError::NotWritable)
    ));
}

#[test]
fn set_notify_rejects_unsupported_characteristic() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport.clone());
    let submits_before = transport.call_count();

    assert!(matches!(
        client.set_notify(&uuid(READABLE), true),
        Err(GattError::NotifyUnsupported)
    ));
    assert_eq!(transport.call_count(), submits_before);
    assert_eq!(client.pending_operations(), 0);
}

#[test]
fn operations_on_unknown_characteristics_fail() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport);
    let stranger = Uuid::from_u16(0x2A37);

    assert!(matches!(
        client.read(&stranger),
        Err(GattError::CharacteristicNotFound(_))
    ));
    assert!(matches!(
        client.discover_characteristics(&Uuid::from_u16(0x180F)),
        Err(GattError::ServiceNotFound(_))
    ));
}

// --- Client: completions ---

#[test]
fn read_round_trip() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport.clone());

    client.read(&uuid(READABLE)).unwrap();
    assert_eq!(client.pending_operations(), 1);
    assert!(matches!(
        transport.calls().last(),
        Some(TransportCall::Submit(_, AttRequest::Read { handle: 0x0003 }))
    ));

    client.handle_response(Ok(AttResponse::Value(b"hello world".to_vec())));
    match client.poll_event() {
        Some(ClientEvent::ReadCompleted {
            characteristic,
            result: Ok(value),
        }) => {
            assert_eq!(characteristic, uuid(READABLE));
            assert_eq!(value, b"hello world");
        }
        other => panic!("expected read completion, got {:?}", other),
    }
    assert_eq!(client.pending_operations(), 0);
}

#[test]
fn write_with_response_resolves_on_ack() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport);

    client.write(&uuid(WRITEABLE), b"ping", true).unwrap();
    client.handle_response(Ok(AttResponse::WriteAck));
    assert!(matches!(
        client.poll_event(),
        Some(ClientEvent::WriteCompleted { result: Ok(()), .. })
    ));

    client.write(&uuid(WRITEABLE), b"ping", true).unwrap();
    client.handle_response(Ok(AttResponse::Error(AttErrorCode::WriteNotPermitted)));
    assert!(matches!(
        client.poll_event(),
        Some(ClientEvent::WriteCompleted {
            result: Err(GattError::WriteError(AttErrorCode::WriteNotPermitted)),
            ..
        })
    ));
}

#[test]
fn write_without_response_never_blocks_or_reports() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport.clone());

    client.write(&uuid(WRITEABLE), b"best effort", false).unwrap();

    assert_eq!(client.pending_operations(), 0);
    assert!(client.poll_event().is_none());
    assert!(matches!(
        transport.calls().last(),
        Some(TransportCall::SendCommand(..))
    ));
}

#[test]
fn unexpected_response_kind_fails_the_operation() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport);

    client.read(&uuid(READABLE)).unwrap();
    client.handle_response(Ok(AttResponse::WriteAck));
    assert!(matches!(
        client.poll_event(),
        Some(ClientEvent::ReadCompleted {
            result: Err(GattError::UnexpectedResponse),
            ..
        })
    ));
}

// --- Client: discovery ---

#[test]
fn discovery_transitions_through_states() {
    let transport = Arc::new(MockTransport::new());
    let mut client = GattClient::new(peer_a(), transport);
    assert_eq!(client.state(), ClientState::Connected);

    client.discover_services(None).unwrap();
    assert_eq!(client.state(), ClientState::DiscoveringServices);

    client.handle_response(Ok(AttResponse::Services(vec![Service {
        uuid: uuid(SERVICE),
        is_primary: true,
        start_handle: 0x0001,
        end_handle: 0x0007,
    }])));
    assert_eq!(client.state(), ClientState::Ready);

    client.discover_characteristics(&uuid(SERVICE)).unwrap();
    assert_eq!(client.state(), ClientState::DiscoveringCharacteristics);
    client.handle_response(Ok(AttResponse::Characteristics(Vec::new())));
    assert_eq!(client.state(), ClientState::Ready);
}

#[test]
fn discovery_failure_leaves_peer_usable() {
    let transport = Arc::new(MockTransport::new());
    let mut client = GattClient::new(peer_a(), transport);

    client.discover_services(None).unwrap();
    client.handle_response(Ok(AttResponse::Error(AttErrorCode::UnlikelyError)));
    assert!(matches!(
        client.poll_event(),
        Some(ClientEvent::ServicesDiscovered {
            result: Err(GattError::DiscoveryError(AttErrorCode::UnlikelyError)),
        })
    ));

    assert_eq!(client.state(), ClientState::Connected);
    client.discover_services(None).unwrap();
}

#[test]
fn empty_discovery_is_not_an_error() {
    let transport = Arc::new(MockTransport::new());
    let mut client = GattClient::new(peer_a(), transport);

    client.discover_services(None).unwrap();
    client.handle_response(Ok(AttResponse::Error(AttErrorCode::AttributeNotFound)));
    match client.poll_event() {
        Some(ClientEvent::ServicesDiscovered { result: Ok(services) }) => {
            assert!(services.is_empty())
        }
        other => panic!("expected empty success, got {:?}", other),
    }
}

// --- Client: notifications ---

#[test]
fn notifications_flow_only_while_subscribed() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport);

    // Push before subscribing: dropped.
    client.handle_notification(0x0007, &[0x01]);
    assert!(client.poll_event().is_none());

    client.set_notify(&notify_uuid(), true).unwrap();
    client.handle_response(Ok(AttResponse::SubscribeAck {
        handle: 0x0007,
        enabled: true,
    }));
    assert!(matches!(
        client.poll_event(),
        Some(ClientEvent::NotifyStateChanged { result: Ok(true), .. })
    ));

    client.handle_notification(0x0007, &[0x12, 0x0A]);
    match client.poll_event() {
        Some(ClientEvent::ValueUpdated {
            characteristic,
            value,
        }) => {
            assert_eq!(characteristic, notify_uuid());
            assert_eq!(value, vec![0x12, 0x0A]);
        }
        other => panic!("expected value update, got {:?}", other),
    }

    client.set_notify(&notify_uuid(), false).unwrap();
    client.handle_response(Ok(AttResponse::SubscribeAck {
        handle: 0x0007,
        enabled: false,
    }));
    let _ = client.poll_event();

    client.handle_notification(0x0007, &[0x13, 0x0A]);
    assert!(client.poll_event().is_none());
}

// --- Client: invalidation ---

#[test]
fn disconnect_invalidates_every_pending_operation() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport.clone());

    client.read(&uuid(READABLE)).unwrap();
    client.write(&uuid(WRITEABLE), b"ping", true).unwrap();
    client.set_notify(&notify_uuid(), true).unwrap();
    assert_eq!(client.pending_operations(), 3);

    client.disconnect();
    assert!(matches!(
        transport.calls().last(),
        Some(TransportCall::Disconnect(_))
    ));

    let mut failures = 0;
    while let Some(event) = client.poll_event() {
        match event {
            ClientEvent::ReadCompleted {
                result: Err(GattError::Disconnected),
                ..
            }
            | ClientEvent::WriteCompleted {
                result: Err(GattError::Disconnected),
                ..
            }
            | ClientEvent::NotifyStateChanged {
                result: Err(GattError::Disconnected),
                ..
            } => failures += 1,
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(failures, 3);
    assert_eq!(client.pending_operations(), 0);
    assert_eq!(client.state(), ClientState::Disconnected);

    // Nothing is retried against a later connection implicitly; the client
    // is spent.
    assert!(matches!(
        client.read(&uuid(READABLE)),
        Err(GattError::Disconnected)
    ));
    assert!(matches!(
        client.discover_services(None),
        Err(GattError::Disconnected)
    ));
}

#[test]
fn stalled_operations_time_out_from_the_front() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport);

    client.read(&uuid(READABLE)).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    client.process_timeouts(Duration::from_millis(1));

    assert!(matches!(
        client.poll_event(),
        Some(ClientEvent::ReadCompleted {
            result: Err(GattError::Timeout),
            ..
        })
    ));
    assert_eq!(client.pending_operations(), 0);
}

#[test]
fn response_without_pending_operation_is_ignored() {
    let transport = Arc::new(MockTransport::new());
    let mut client = ready_client(transport);

    client.handle_response(Ok(AttResponse::WriteAck));
    assert!(client.poll_event().is_none());
}

// --- End to end over a loopback transport ---

/// Routes client requests straight into an attached `GattServer` and queues
/// the responses and value pushes for the test to pump back into the client.
#[derive(Default)]
struct LoopbackTransport {
    server: Mutex<Option<Arc<GattServer>>>,
    responses: Mutex<VecDeque<Result<AttResponse, TransportError>>>,
    notifications: Mutex<VecDeque<(PeerId, u16, Vec<u8>)>>,
}

impl LoopbackTransport {
    fn attach(&self, server: Arc<GattServer>) {
        *self.server.lock().unwrap() = Some(server);
    }

    fn pump(&self, client: &mut GattClient) {
        loop {
            let response = self.responses.lock().unwrap().pop_front();
            match response {
                Some(response) => client.handle_response(response),
                None => break,
            }
        }
        loop {
            let push = self.notifications.lock().unwrap().pop_front();
            match push {
                Some((peer, handle, value)) if peer == client.peer() => {
                    client.handle_notification(handle, &value)
                }
                Some(_) => {}
                None => break,
            }
        }
    }
}

impl Transport for LoopbackTransport {
    fn start_scan(&self, _filter: Option<&[Uuid]>) -> Result<(), TransportError> {
        Ok(())
    }

    fn stop_scan(&self) {}

    fn connect(&self, _peer: PeerId) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&self, peer: PeerId) {
        if let Some(server) = self.server.lock().unwrap().as_ref() {
            server.handle_peer_disconnected(peer);
        }
    }

    fn submit(&self, peer: PeerId, request: AttRequest) -> Result<(), TransportError> {
        let server = self
            .server
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let response = server.handle_request(peer, request);
        self.responses.lock().unwrap().push_back(Ok(response));
        Ok(())
    }

    fn send_command(
        &self,
        peer: PeerId,
        command: crate::att::AttCommand,
    ) -> Result<(), TransportError> {
        let server = self
            .server
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        server.handle_command(peer, command);
        Ok(())
    }

    fn start_advertising(&self, _advertisement: &crate::transport::Advertisement) -> Result<(), TransportError> {
        Ok(())
    }

    fn stop_advertising(&self) {}

    fn notify(&self, peer: PeerId, value_handle: u16, value: &[u8]) -> Result<(), TransportError> {
        self.notifications
            .lock()
            .unwrap()
            .push_back((peer, value_handle, value.to_vec()));
        Ok(())
    }
}

#[test]
fn loopback_discover_read_write_subscribe() {
    let transport = Arc::new(LoopbackTransport::default());
    let server = Arc::new(GattServer::new(transport.clone()));
    transport.attach(server.clone());

    server.register_service(sample_service()).unwrap();
    server.publish().unwrap();
    server.start_advertising(Some("playground")).unwrap();

    let mut client = GattClient::new(peer_a(), transport.clone());

    // Discovery.
    client.discover_services(None).unwrap();
    transport.pump(&mut client);
    assert_eq!(client.services().len(), 1);
    client.discover_characteristics(&uuid(SERVICE)).unwrap();
    transport.pump(&mut client);
    assert_eq!(client.characteristics_of(&uuid(SERVICE)).len(), 3);

    // Read the published value.
    client.read(&uuid(READABLE)).unwrap();
    transport.pump(&mut client);
    match client.poll_event() {
        Some(ClientEvent::ReadCompleted { result: Ok(value), .. }) => {
            assert_eq!(value, b"hello world")
        }
        other => panic!("expected read completion, got {:?}", other),
    }

    // Acknowledged write lands on the server.
    client.write(&uuid(WRITEABLE), b"ping", true).unwrap();
    transport.pump(&mut client);
    assert!(matches!(
        client.poll_event(),
        Some(ClientEvent::WriteCompleted { result: Ok(()), .. })
    ));
    assert_eq!(
        server.poll_event(),
        Some(ServerEvent::WriteReceived {
            peer: peer_a(),
            characteristic: uuid(WRITEABLE),
            value: b"ping".to_vec(),
        })
    );

    // Subscribe, then a server-side update arrives as a value push.
    client.set_notify(&notify_uuid(), true).unwrap();
    transport.pump(&mut client);
    assert!(matches!(
        client.poll_event(),
        Some(ClientEvent::NotifyStateChanged { result: Ok(true), .. })
    ));
    let _ = server.poll_event();

    server.update_value(&notify_uuid(), &[0x12, 0x0A]).unwrap();
    transport.pump(&mut client);
    match client.poll_event() {
        Some(ClientEvent::ValueUpdated {
            characteristic,
            value,
        }) => {
            assert_eq!(characteristic, notify_uuid());
            assert_eq!(value, vec![0x12, 0x0A]);
        }
        other => panic!("expected value update, got {:?}", other),
    }

    // Disconnect clears the server-side subscription.
    client.disconnect();
    assert!(server.subscriptions().is_empty());
    server.update_value(&notify_uuid(), &[0x13, 0x0A]).unwrap();
    assert!(transport.notifications.lock().unwrap().is_empty());
}
