//! Example demonstrating the peripheral role
//!
//! Builds a GATT server with a readable "hello world" characteristic and a
//! write-only characteristic, publishes the table, starts advertising, and
//! then serves a few requests a remote central would send.

use bluekit::{
    Advertisement, AttCommand, AttRequest, CharacteristicProperties, GattCharacteristic,
    GattServer, GattService, PeerId, Permissions, Transport, TransportError, Uuid,
};
use std::sync::Arc;

/// Stands in for the platform radio: prints what it is asked to do.
struct PrintTransport;

impl Transport for PrintTransport {
    fn start_scan(&self, _filter: Option<&[Uuid]>) -> Result<(), TransportError> {
        Ok(())
    }

    fn stop_scan(&self) {}

    fn connect(&self, _peer: PeerId) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&self, _peer: PeerId) {}

    fn submit(&self, _peer: PeerId, _request: AttRequest) -> Result<(), TransportError> {
        Ok(())
    }

    fn send_command(&self, _peer: PeerId, _command: AttCommand) -> Result<(), TransportError> {
        Ok(())
    }

    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), TransportError> {
        println!(
            "radio: advertising {:?} with services {:?}",
            advertisement.local_name, advertisement.service_uuids
        );
        Ok(())
    }

    fn stop_advertising(&self) {
        println!("radio: advertising stopped");
    }

    fn notify(&self, peer: PeerId, value_handle: u16, value: &[u8]) -> Result<(), TransportError> {
        println!(
            "radio: push to {} handle 0x{:04x}: {}",
            peer,
            value_handle,
            hex::encode(value)
        );
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service_uuid: Uuid = "f38eebfe-bc74-42a5-b874-59e53aa6a097".parse()?;
    let readable_uuid: Uuid = "548ccb32-92ec-4dea-9b72-b7a563a1a06e".parse()?;
    let writeable_uuid: Uuid = "eee73588-64c8-4c4e-9ee1-76af5bd93122".parse()?;

    let transport = Arc::new(PrintTransport);
    let server = GattServer::new(transport);

    // A readable characteristic must carry its value; a write-only one must
    // not.
    let mut service = GattService::new(service_uuid, true);
    service.add_characteristic(GattCharacteristic::readable(
        readable_uuid,
        b"hello world".to_vec(),
    ));
    service.add_characteristic(GattCharacteristic::writeable(writeable_uuid));
    service.add_characteristic(GattCharacteristic::new(
        Uuid::from_u16(0x2A6E), // Temperature
        CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        Permissions::READABLE,
        Some(vec![0x00, 0x00]),
    ));
    server.register_service(service)?;

    server.publish()?;
    println!("published service {}", service_uuid);

    server.start_advertising(Some("BlueKit Playground"))?;

    // What a remote central's requests look like from here on.
    let central = PeerId::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    let readable_handle = server.value_handle_of(&readable_uuid).unwrap();
    let response = server.handle_request(central, AttRequest::Read { handle: readable_handle });
    println!("read {} -> {:?}", readable_uuid, response);

    let writeable_handle = server.value_handle_of(&writeable_uuid).unwrap();
    let response = server.handle_request(
        central,
        AttRequest::Write {
            handle: writeable_handle,
            value: b"ping".to_vec(),
        },
    );
    println!("write {} -> {:?}", writeable_uuid, response);

    // Reading the write-only characteristic is refused.
    let response = server.handle_request(central, AttRequest::Read { handle: writeable_handle });
    println!("read {} -> {:?}", writeable_uuid, response);

    // Subscribe to the temperature, then push an update to all subscribers.
    let temperature = Uuid::from_u16(0x2A6E);
    let temperature_handle = server.value_handle_of(&temperature).unwrap();
    server.handle_request(
        central,
        AttRequest::Subscribe {
            handle: temperature_handle,
            enable: true,
        },
    );
    server.update_value(&temperature, &[0x12, 0x0A])?;

    while let Some(event) = server.poll_event() {
        println!("server event: {:?}", event);
    }

    server.stop_advertising();
    Ok(())
}
