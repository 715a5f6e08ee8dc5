//! Example demonstrating the central role
//!
//! Scans for a peripheral, connects, discovers its services and
//! characteristics, then reads, writes, and subscribes. The remote side is a
//! `GattServer` wired up behind an in-memory loopback transport, so the whole
//! exchange runs in one process.

use bluekit::{
    Advertisement, AttCommand, AttRequest, AttResponse, CharacteristicProperties,
    GattCharacteristic, GattClient, GattServer, GattService, PeerId, Permissions, ScanCoordinator,
    ScanOptions, Transport, TransportError, Uuid,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Routes attribute traffic straight into an in-process `GattServer`.
#[derive(Default)]
struct LoopbackTransport {
    server: Mutex<Option<Arc<GattServer>>>,
    responses: Mutex<VecDeque<AttResponse>>,
    pushes: Mutex<VecDeque<(u16, Vec<u8>)>>,
}

impl LoopbackTransport {
    fn attach(&self, server: Arc<GattServer>) {
        *self.server.lock().unwrap() = Some(server);
    }

    /// Feed queued responses and value pushes back into the client, printing
    /// every event that falls out.
    fn pump(&self, client: &mut GattClient) {
        loop {
            let response = self.responses.lock().unwrap().pop_front();
            match response {
                Some(response) => client.handle_response(Ok(response)),
                None => break,
            }
        }
        loop {
            let push = self.pushes.lock().unwrap().pop_front();
            match push {
                Some((handle, value)) => client.handle_notification(handle, &value),
                None => break,
            }
        }
        while let Some(event) = client.poll_event() {
            println!("client event: {:?}", event);
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
        self.responses.lock().unwrap().push_back(response);
        Ok(())
    }

    fn send_command(&self, peer: PeerId, command: AttCommand) -> Result<(), TransportError> {
        let server = self
            .server
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        server.handle_command(peer, command);
        Ok(())
    }

    fn start_advertising(&self, _advertisement: &Advertisement) -> Result<(), TransportError> {
        Ok(())
    }

    fn stop_advertising(&self) {}

    fn notify(&self, _peer: PeerId, value_handle: u16, value: &[u8]) -> Result<(), TransportError> {
        self.pushes
            .lock()
            .unwrap()
            .push_back((value_handle, value.to_vec()));
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service_uuid: Uuid = "f38eebfe-bc74-42a5-b874-59e53aa6a097".parse()?;
    let readable_uuid: Uuid = "548ccb32-92ec-4dea-9b72-b7a563a1a06e".parse()?;
    let writeable_uuid: Uuid = "eee73588-64c8-4c4e-9ee1-76af5bd93122".parse()?;
    let temperature = Uuid::from_u16(0x2A6E);

    // The remote side: a published peripheral behind the loopback radio.
    let transport = Arc::new(LoopbackTransport::default());
    let server = Arc::new(GattServer::new(transport.clone()));
    transport.attach(server.clone());

    let mut service = GattService::new(service_uuid, true);
    service.add_characteristic(GattCharacteristic::readable(
        readable_uuid,
        b"hello world".to_vec(),
    ));
    service.add_characteristic(GattCharacteristic::writeable(writeable_uuid));
    service.add_characteristic(GattCharacteristic::new(
        temperature,
        CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        Permissions::READABLE,
        Some(vec![0x00, 0x00]),
    ));
    server.register_service(service)?;
    server.publish()?;
    server.start_advertising(Some("BlueKit Playground"))?;

    // The central side: scan, discover, connect.
    let mut coordinator = ScanCoordinator::new(transport.clone());
    coordinator.start_scan(Some(&[service_uuid]), ScanOptions::default())?;

    let peer = PeerId::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    coordinator.handle_advertisement(
        peer,
        &Advertisement::new(Some("BlueKit Playground".into()), vec![service_uuid]),
        -57,
    );
    while let Some(event) = coordinator.poll_event() {
        println!("central event: {:?}", event);
    }

    coordinator.connect(peer)?;
    coordinator.handle_connect_result(peer, Ok(()));
    while let Some(event) = coordinator.poll_event() {
        println!("central event: {:?}", event);
    }

    let mut client = coordinator.claim(peer)?;
    coordinator.stop_scan();

    // Explore the peer's attribute tables.
    client.discover_services(None)?;
    transport.pump(&mut client);
    for service in client.services() {
        println!(
            "service {} (handles 0x{:04x}..0x{:04x})",
            service.uuid, service.start_handle, service.end_handle
        );
    }

    client.discover_characteristics(&service_uuid)?;
    transport.pump(&mut client);
    for characteristic in client.characteristics_of(&service_uuid) {
        println!(
            "characteristic {} at 0x{:04x} ({:?})",
            characteristic.uuid, characteristic.value_handle, characteristic.properties
        );
    }

    // Read, write, subscribe.
    client.read(&readable_uuid)?;
    transport.pump(&mut client);

    client.write(&writeable_uuid, b"ping", true)?;
    transport.pump(&mut client);

    client.set_notify(&temperature, true)?;
    transport.pump(&mut client);

    // The peripheral publishes a new temperature; it arrives as a push.
    server.update_value(&temperature, &[0x12, 0x0A])?;
    transport.pump(&mut client);

    client.disconnect();
    Ok(())
}
