//! Test doubles shared by the module tests

use crate::att::{AttCommand, AttRequest};
use crate::error::TransportError;
use crate::transport::{Advertisement, PeerId, Transport};
use crate::uuid::Uuid;
use std::sync::Mutex;

/// One recorded transport interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    StartScan(Option<Vec<Uuid>>),
    StopScan,
    Connect(PeerId),
    Disconnect(PeerId),
    Submit(PeerId, AttRequest),
    SendCommand(PeerId, AttCommand),
    StartAdvertising(Advertisement),
    StopAdvertising,
    Notify(PeerId, u16, Vec<u8>),
}

/// A transport that records every call, in order, and accepts everything.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Transport for MockTransport {
    fn start_scan(&self, filter: Option<&[Uuid]>) -> Result<(), TransportError> {
        self.record(TransportCall::StartScan(filter.map(<[Uuid]>::to_vec)));
        Ok(())
    }

    fn stop_scan(&self) {
        self.record(TransportCall::StopScan);
    }

    fn connect(&self, peer: PeerId) -> Result<(), TransportError> {
        self.record(TransportCall::Connect(peer));
        Ok(())
    }

    fn disconnect(&self, peer: PeerId) {
        self.record(TransportCall::Disconnect(peer));
    }

    fn submit(&self, peer: PeerId, request: AttRequest) -> Result<(), TransportError> {
        self.record(TransportCall::Submit(peer, request));
        Ok(())
    }

    fn send_command(&self, peer: PeerId, command: AttCommand) -> Result<(), TransportError> {
        self.record(TransportCall::SendCommand(peer, command));
        Ok(())
    }

    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), TransportError> {
        self.record(TransportCall::StartAdvertising(advertisement.clone()));
        Ok(())
    }

    fn stop_advertising(&self) {
        self.record(TransportCall::StopAdvertising);
    }

    fn notify(&self, peer: PeerId, value_handle: u16, value: &[u8]) -> Result<(), TransportError> {
        self.record(TransportCall::Notify(peer, value_handle, value.to_vec()));
        Ok(())
    }
}
