//! Test doubles: a recording transport and a recording event handler.

use crate::att::{AttHandle, AttUuid, ErrorCode};
use crate::gatt::{
    Control, DiscoveredCharacteristic, DiscoveredDescriptor, DiscoveredService, EventHandler,
    GattError, Hvx, HvxKind, Properties, ReadEvent, WriteEvent,
};
use crate::pal::{AttClient, ConnHandle, DEFAULT_ATT_MTU};
use crate::Error;
use std::vec::Vec;

/// A request captured by [`MockPal`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Issued {
    ExchangeMtu { mtu: u16 },
    DiscoverPrimary { start: u16 },
    DiscoverPrimaryByUuid { start: u16, uuid: AttUuid },
    DiscoverCharacteristics { start: u16, end: u16 },
    DiscoverDescriptors { start: u16, end: u16 },
    Read { handle: u16 },
    ReadBlob { handle: u16, offset: u16 },
    WriteCommand { handle: u16, value: Vec<u8> },
    SignedWriteCommand { handle: u16, value: Vec<u8> },
    WriteRequest { handle: u16, value: Vec<u8> },
    PrepareWrite { handle: u16, offset: u16, value: Vec<u8> },
    ExecuteWrite { execute: bool },
}

/// Transport double that records every request instead of sending it.
pub struct MockPal {
    pub issued: Vec<Issued>,
    /// When set, the next request fails with `Error::Transport`.
    pub fail_next: bool,
    pub mtu: u16,
    pub encrypted: bool,
    pub initialized: bool,
    pub terminated: bool,
}

impl MockPal {
    pub fn new() -> Self {
        Self {
            issued: Vec::new(),
            fail_next: false,
            mtu: DEFAULT_ATT_MTU,
            encrypted: false,
            initialized: false,
            terminated: false,
        }
    }

    /// Returns the requests issued since the last call.
    pub fn take(&mut self) -> Vec<Issued> {
        core::mem::take(&mut self.issued)
    }

    fn push(&mut self, request: Issued) -> Result<(), Error> {
        if core::mem::take(&mut self.fail_next) {
            return Err(Error::Transport);
        }
        self.issued.push(request);
        Ok(())
    }
}

impl AttClient for MockPal {
    fn initialize(&mut self) -> Result<(), Error> {
        self.initialized = true;
        Ok(())
    }

    fn terminate(&mut self) {
        self.terminated = true;
    }

    fn att_mtu(&self, _conn: ConnHandle) -> u16 {
        self.mtu
    }

    fn link_encrypted(&self, _conn: ConnHandle) -> bool {
        self.encrypted
    }

    fn exchange_mtu(&mut self, _conn: ConnHandle, mtu: u16) -> Result<(), Error> {
        self.push(Issued::ExchangeMtu { mtu })
    }

    fn discover_primary_services(
        &mut self,
        _conn: ConnHandle,
        start: AttHandle,
    ) -> Result<(), Error> {
        self.push(Issued::DiscoverPrimary {
            start: start.as_u16(),
        })
    }

    fn discover_primary_services_by_uuid(
        &mut self,
        _conn: ConnHandle,
        start: AttHandle,
        uuid: AttUuid,
    ) -> Result<(), Error> {
        self.push(Issued::DiscoverPrimaryByUuid {
            start: start.as_u16(),
            uuid,
        })
    }

    fn discover_characteristics(
        &mut self,
        _conn: ConnHandle,
        start: AttHandle,
        end: AttHandle,
    ) -> Result<(), Error> {
        self.push(Issued::DiscoverCharacteristics {
            start: start.as_u16(),
            end: end.as_u16(),
        })
    }

    fn discover_descriptors(
        &mut self,
        _conn: ConnHandle,
        start: AttHandle,
        end: AttHandle,
    ) -> Result<(), Error> {
        self.push(Issued::DiscoverDescriptors {
            start: start.as_u16(),
            end: end.as_u16(),
        })
    }

    fn read_attribute(&mut self, _conn: ConnHandle, handle: AttHandle) -> Result<(), Error> {
        self.push(Issued::Read {
            handle: handle.as_u16(),
        })
    }

    fn read_attribute_blob(
        &mut self,
        _conn: ConnHandle,
        handle: AttHandle,
        offset: u16,
    ) -> Result<(), Error> {
        self.push(Issued::ReadBlob {
            handle: handle.as_u16(),
            offset,
        })
    }

    fn write_without_response(
        &mut self,
        _conn: ConnHandle,
        handle: AttHandle,
        value: &[u8],
    ) -> Result<(), Error> {
        self.push(Issued::WriteCommand {
            handle: handle.as_u16(),
            value: value.to_vec(),
        })
    }

    fn signed_write_without_response(
        &mut self,
        _conn: ConnHandle,
        handle: AttHandle,
        value: &[u8],
    ) -> Result<(), Error> {
        self.push(Issued::SignedWriteCommand {
            handle: handle.as_u16(),
            value: value.to_vec(),
        })
    }

    fn write_attribute(
        &mut self,
        _conn: ConnHandle,
        handle: AttHandle,
        value: &[u8],
    ) -> Result<(), Error> {
        self.push(Issued::WriteRequest {
            handle: handle.as_u16(),
            value: value.to_vec(),
        })
    }

    fn queue_prepare_write(
        &mut self,
        _conn: ConnHandle,
        handle: AttHandle,
        offset: u16,
        value: &[u8],
    ) -> Result<(), Error> {
        self.push(Issued::PrepareWrite {
            handle: handle.as_u16(),
            offset,
            value: value.to_vec(),
        })
    }

    fn execute_write_queue(&mut self, _conn: ConnHandle, execute: bool) -> Result<(), Error> {
        self.push(Issued::ExecuteWrite { execute })
    }
}

/// An event captured by [`Recorder`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Event {
    Service {
        uuid: Option<AttUuid>,
        start: u16,
        end: u16,
    },
    Characteristic {
        uuid: AttUuid,
        properties: Properties,
        decl: u16,
        value: u16,
        end: u16,
    },
    DiscoveryComplete(Result<(), GattError>),
    Descriptor {
        handle: u16,
        uuid: AttUuid,
    },
    DescriptorsComplete {
        characteristic: u16,
        status: Result<(), GattError>,
    },
    Read {
        handle: u16,
        data: Vec<u8>,
        status: Result<(), GattError>,
    },
    Written {
        handle: u16,
        status: Result<(), GattError>,
        error_code: Option<ErrorCode>,
    },
    Hvx {
        kind: HvxKind,
        handle: u16,
        data: Vec<u8>,
    },
    MtuExchanged(u16),
    SignedWriteSent {
        handle: u16,
    },
    Shutdown,
}

/// Event handler double that records everything it sees.
///
/// The `*_budget` fields make the per-item callbacks return [`Control::Stop`] after the given
/// number of items.
pub struct Recorder {
    pub events: Vec<Event>,
    pub service_budget: Option<usize>,
    pub characteristic_budget: Option<usize>,
    pub descriptor_budget: Option<usize>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            service_budget: None,
            characteristic_budget: None,
            descriptor_budget: None,
        }
    }

    pub fn take(&mut self) -> Vec<Event> {
        core::mem::take(&mut self.events)
    }

    fn consume(budget: &mut Option<usize>) -> Control {
        match budget {
            Some(left) => {
                *left -= 1;
                if *left == 0 {
                    Control::Stop
                } else {
                    Control::Continue
                }
            }
            None => Control::Continue,
        }
    }
}

impl EventHandler for Recorder {
    fn service_discovered(&mut self, _conn: ConnHandle, service: &DiscoveredService) -> Control {
        self.events.push(Event::Service {
            uuid: service.uuid,
            start: service.start.as_u16(),
            end: service.end.as_u16(),
        });
        Self::consume(&mut self.service_budget)
    }

    fn characteristic_discovered(&mut self, characteristic: &DiscoveredCharacteristic) -> Control {
        self.events.push(Event::Characteristic {
            uuid: characteristic.uuid,
            properties: characteristic.properties,
            decl: characteristic.decl_handle.as_u16(),
            value: characteristic.value_handle.as_u16(),
            end: characteristic.end_handle.as_u16(),
        });
        Self::consume(&mut self.characteristic_budget)
    }

    fn discovery_complete(&mut self, _conn: ConnHandle, status: Result<(), GattError>) {
        self.events.push(Event::DiscoveryComplete(status));
    }

    fn descriptor_discovered(
        &mut self,
        _conn: ConnHandle,
        descriptor: &DiscoveredDescriptor,
    ) -> Control {
        self.events.push(Event::Descriptor {
            handle: descriptor.handle.as_u16(),
            uuid: descriptor.uuid,
        });
        Self::consume(&mut self.descriptor_budget)
    }

    fn descriptor_discovery_complete(
        &mut self,
        _conn: ConnHandle,
        characteristic: &DiscoveredCharacteristic,
        status: Result<(), GattError>,
    ) {
        self.events.push(Event::DescriptorsComplete {
            characteristic: characteristic.value_handle.as_u16(),
            status,
        });
    }

    fn data_read(&mut self, _conn: ConnHandle, event: &ReadEvent<'_>) {
        self.events.push(Event::Read {
            handle: event.handle.as_u16(),
            data: event.data.to_vec(),
            status: event.status,
        });
    }

    fn data_written(&mut self, _conn: ConnHandle, event: &WriteEvent) {
        self.events.push(Event::Written {
            handle: event.handle.as_u16(),
            status: event.status,
            error_code: event.error_code,
        });
    }

    fn hvx(&mut self, _conn: ConnHandle, hvx: &Hvx<'_>) {
        self.events.push(Event::Hvx {
            kind: hvx.kind,
            handle: hvx.handle.as_u16(),
            data: hvx.data.as_ref().to_vec(),
        });
    }

    fn att_mtu_exchanged(&mut self, _conn: ConnHandle, mtu: u16) {
        self.events.push(Event::MtuExchanged(mtu));
    }

    fn signed_write_command_sent(&mut self, _conn: ConnHandle, handle: AttHandle) {
        self.events.push(Event::SignedWriteSent {
            handle: handle.as_u16(),
        });
    }

    fn shutdown(&mut self) {
        self.events.push(Event::Shutdown);
    }
}
